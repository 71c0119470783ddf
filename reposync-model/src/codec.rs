//! Entity ↔ repository file conversion.

use reposync_types::{ContentHash, EntityKey, RepoPath};
use tracing::debug;

use crate::entity::{Entity, EntityPayload};
use crate::error::{CodecError, CodecResult};
use crate::transform::{TransformDirection, TransformRegistry};

/// One entity rendered as a repository file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    pub path: RepoPath,
    pub content: Vec<u8>,
    pub hash: ContentHash,
}

/// Serializes entities into canonical repository files and back.
///
/// Canonical form is pretty-printed JSON with sorted keys and a trailing
/// newline, so equal payloads always produce equal hashes.
#[derive(Clone, Default)]
pub struct EntityCodec {
    transforms: TransformRegistry,
}

impl EntityCodec {
    pub fn new(transforms: TransformRegistry) -> Self {
        Self { transforms }
    }

    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }

    /// Renders `entity` as a repository file, running export transforms.
    pub fn export_entity(&self, entity: &Entity) -> CodecResult<RepoFile> {
        let mut payload = entity.payload.clone();
        self.transforms
            .apply(TransformDirection::Export, &entity.key, &mut payload)?;

        let content = Self::canonical_bytes(&payload)?;
        let hash = ContentHash::of(&content);
        let path = entity.key.path();
        debug!("Exported {} -> {} ({})", entity.key, path, hash);

        Ok(RepoFile {
            path,
            content,
            hash,
        })
    }

    /// Parses a repository file back into an entity, running import transforms.
    pub fn import_file(&self, path: &RepoPath, content: &[u8]) -> CodecResult<Entity> {
        let key = EntityKey::from_path(path)?;
        let mut payload: EntityPayload =
            serde_json::from_slice(content).map_err(|source| CodecError::InvalidPayload {
                path: path.to_string(),
                source,
            })?;
        self.transforms
            .apply(TransformDirection::Import, &key, &mut payload)?;
        Ok(Entity { key, payload })
    }

    /// Hash the entity would have in the repository.
    pub fn hash_entity(&self, entity: &Entity) -> CodecResult<ContentHash> {
        Ok(self.export_entity(entity)?.hash)
    }

    fn canonical_bytes(payload: &EntityPayload) -> CodecResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(payload)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}
