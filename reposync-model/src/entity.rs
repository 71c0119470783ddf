use reposync_types::EntityKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::CodecResult;

/// A content entity as exchanged with the host CMS.
///
/// The CMS owns identity and storage; the sync engine only sees the key and
/// the payload it serializes into the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: EntityKey,
    pub payload: EntityPayload,
}

impl Entity {
    /// Creates an entity, validating the key.
    pub fn new(
        entity_type: impl Into<String>,
        name: impl Into<String>,
        payload: EntityPayload,
    ) -> CodecResult<Self> {
        Ok(Self {
            key: EntityKey::new(entity_type, name)?,
            payload,
        })
    }

    pub fn entity_type(&self) -> &str {
        &self.key.entity_type
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Extract a string field (e.g., "title").
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.payload.fields.get(field).and_then(Value::as_str)
    }

    /// Extract a string meta value.
    pub fn get_meta_str(&self, key: &str) -> Option<&str> {
        self.payload.meta.get(key).and_then(Value::as_str)
    }
}

/// Serialized form of an entity's content.
///
/// Every section is optional; unknown top-level keys are rejected so a
/// malformed file fails at decode time instead of being half-imported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityPayload {
    /// Core fields (title, body, status, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
    /// Free-form metadata keyed by meta name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
    /// Binary attachment body, for attachment entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// Column values, for table-row entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<BTreeMap<String, Value>>,
}

impl EntityPayload {
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_meta(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(name.into(), value.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Binary file attached to an entity. Stored base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
