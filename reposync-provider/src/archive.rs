//! Repository archive extraction.
//!
//! Every provider wraps archive contents in one top-level directory named
//! after the repository and revision. That directory is stripped so paths
//! match the tree listing.

use reposync_types::RepoPath;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::ArchiveFile;

/// Reads a zip archive into a path → file map.
pub fn extract_zip(bytes: &[u8]) -> ProviderResult<BTreeMap<RepoPath, ArchiveFile>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ProviderError::Archive(format!("invalid zip: {e}")))?;

    let mut files = BTreeMap::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ProviderError::Archive(format!("entry {index}: {e}")))?;
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        let Some((_, relative)) = name.split_once('/') else {
            continue;
        };
        if relative.is_empty() {
            continue;
        }
        let path = match RepoPath::new(relative) {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping archive entry {}: {}", name, e);
                continue;
            }
        };

        // The declared size is untrusted.
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        files.insert(path, ArchiveFile::new(content));
    }

    debug!("Extracted {} files from archive", files.len());
    Ok(files)
}
