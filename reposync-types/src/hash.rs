//! Content hashing.
//!
//! Hashes are Git blob object ids so that a locally computed hash can be
//! compared directly against the `sha`/`id` a provider reports in a tree
//! listing.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Git blob object id of a file's content, as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Computes the blob id of `content`: `sha1("blob <len>\0" + content)`.
    #[must_use]
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(format!("blob {}\0", content.len()).as_bytes());
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    /// Wraps a hash reported by a provider or read back from storage.
    ///
    /// Accepts SHA-1 (40) and SHA-256 (64) object ids; uppercase input is
    /// normalized.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        if !matches!(s.len(), 40 | 64) || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidHash(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Returns the hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}
