//! Repository paths and the entity key ↔ path mapping.
//!
//! Every entity lives at `_<type>/<escaped name>`. The mapping is a pure
//! function of (type, name) and is reversible: names are escaped so they
//! never introduce extra path segments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Prefix marking a top-level directory as an entity type namespace.
const TYPE_PREFIX: char = '_';

/// A repository-relative file path, `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoPath(String);

impl RepoPath {
    /// Validates and wraps a repository-relative path.
    ///
    /// Rejects empty paths, absolute paths, empty segments and `.`/`..`
    /// segments.
    pub fn new(path: impl Into<String>) -> Result<Self, Error> {
        let path = path.into();
        if path.is_empty() || path.starts_with('/') || path.contains('\\') {
            return Err(Error::InvalidPath(path));
        }
        if path
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(Error::InvalidPath(path));
        }
        Ok(Self(path))
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this path lives under the namespace of `entity_type`.
    #[must_use]
    pub fn is_under_type(&self, entity_type: &str) -> bool {
        self.0
            .strip_prefix(TYPE_PREFIX)
            .and_then(|rest| rest.strip_prefix(entity_type))
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Parses the entity key this path encodes, if it is an entity path.
    pub fn entity_key(&self) -> Result<EntityKey, Error> {
        EntityKey::from_path(self)
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RepoPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RepoPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RepoPath> for String {
    fn from(path: RepoPath) -> Self {
        path.0
    }
}

impl AsRef<str> for RepoPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The (type, name) identity of an entity as seen by the sync engine.
///
/// Table rows use the type `plugin@table` and a natural-key name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: String,
    pub name: String,
}

impl EntityKey {
    /// Creates a key after validating both parts.
    pub fn new(entity_type: impl Into<String>, name: impl Into<String>) -> Result<Self, Error> {
        let entity_type = entity_type.into();
        let name = name.into();
        validate_type(&entity_type)?;
        if name.is_empty() {
            return Err(Error::InvalidKey(format!("empty name for type {entity_type}")));
        }
        Ok(Self { entity_type, name })
    }

    /// Creates the key of a relational table row.
    pub fn table_row(plugin: &str, table: &str, natural_key: impl Into<String>) -> Result<Self, Error> {
        Self::new(table_type(plugin, table), natural_key)
    }

    /// Returns the canonical repository path: `_<type>/<escaped name>`.
    #[must_use]
    pub fn path(&self) -> RepoPath {
        RepoPath(format!(
            "{TYPE_PREFIX}{}/{}",
            self.entity_type,
            escape_name(&self.name)
        ))
    }

    /// Recovers a key from its canonical path.
    pub fn from_path(path: &RepoPath) -> Result<Self, Error> {
        let rest = path
            .as_str()
            .strip_prefix(TYPE_PREFIX)
            .ok_or_else(|| Error::InvalidKey(format!("not an entity path: {path}")))?;
        let (entity_type, escaped) = rest
            .split_once('/')
            .ok_or_else(|| Error::InvalidKey(format!("missing name segment: {path}")))?;
        if escaped.contains('/') {
            return Err(Error::InvalidKey(format!("nested entity path: {path}")));
        }
        Self::new(entity_type, unescape_name(escaped)?)
    }

    /// Returns the directory prefix (`_<type>/`) of all paths of a type.
    #[must_use]
    pub fn type_prefix(entity_type: &str) -> String {
        format!("{TYPE_PREFIX}{entity_type}/")
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.name)
    }
}

/// Returns the entity type used for rows of `table` owned by `plugin`.
#[must_use]
pub fn table_type(plugin: &str, table: &str) -> String {
    format!("{plugin}@{table}")
}

fn validate_type(entity_type: &str) -> Result<(), Error> {
    if entity_type.is_empty()
        || entity_type.starts_with(TYPE_PREFIX)
        || entity_type.contains('/')
        || entity_type.contains('%')
        || entity_type == "."
        || entity_type == ".."
    {
        return Err(Error::InvalidKey(format!("invalid entity type: {entity_type:?}")));
    }
    Ok(())
}

/// Escapes an entity name into a single path segment.
///
/// `%` becomes `%25` and `/` becomes `%2F`; a leading `.` becomes `%2E` so
/// names like `..` stay valid segments.
#[must_use]
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            '.' if i == 0 => out.push_str("%2E"),
            c => out.push(c),
        }
    }
    out
}

/// Reverses [`escape_name`].
pub fn unescape_name(escaped: &str) -> Result<String, Error> {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let code = rest
            .get(idx + 1..idx + 3)
            .ok_or_else(|| Error::InvalidKey(format!("truncated escape in {escaped:?}")))?;
        let decoded = match code {
            "25" => '%',
            "2F" | "2f" => '/',
            "5C" | "5c" => '\\',
            "2E" | "2e" => '.',
            _ => return Err(Error::InvalidKey(format!("unknown escape %{code} in {escaped:?}"))),
        };
        out.push(decoded);
        rest = &rest[idx + 3..];
    }
    out.push_str(rest);
    Ok(out)
}
