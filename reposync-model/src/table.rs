use reposync_types::{EntityKey, table_type};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::entity::{Entity, EntityPayload};
use crate::error::{CodecError, CodecResult};

/// Separator between key column values in a row's natural key.
const KEY_SEPARATOR: &str = "--";

/// Escapes one column value of a composite key so it cannot contain the
/// separator: `%` becomes `%25` and `-` becomes `%2D`.
fn escape_key_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        match c {
            '%' => out.push_str("%25"),
            '-' => out.push_str("%2D"),
            c => out.push(c),
        }
    }
    out
}

/// A relational table whose rows are synced as entities.
///
/// Rows are keyed by their natural key (the configured key columns), never by
/// an auto-increment id, so the same row maps to the same path everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub plugin: String,
    pub table: String,
    pub key_columns: Vec<String>,
}

impl TableSpec {
    pub fn new(plugin: impl Into<String>, table: impl Into<String>, key_columns: &[&str]) -> Self {
        Self {
            plugin: plugin.into(),
            table: table.into(),
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Entity type of this table's rows: `plugin@table`.
    pub fn entity_type(&self) -> String {
        table_type(&self.plugin, &self.table)
    }

    /// Builds the natural key of a row from its key columns.
    ///
    /// A single-column key is the value itself. Composite keys escape each
    /// value before joining, so distinct rows never share a key.
    pub fn natural_key(&self, row: &BTreeMap<String, Value>) -> CodecResult<String> {
        let mut parts = Vec::with_capacity(self.key_columns.len());
        for column in &self.key_columns {
            let value = row
                .get(column)
                .filter(|v| !v.is_null())
                .ok_or_else(|| CodecError::MissingKeyColumn {
                    table: self.entity_type(),
                    column: column.clone(),
                })?;
            parts.push(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }
        let escaped: Vec<String> = parts.iter().map(|p| escape_key_part(p)).collect();
        Ok(escaped.join(KEY_SEPARATOR))
    }

    /// Wraps a row as an entity.
    pub fn row_entity(&self, row: BTreeMap<String, Value>) -> CodecResult<Entity> {
        let name = self.natural_key(&row)?;
        Ok(Entity {
            key: EntityKey::new(self.entity_type(), name)?,
            payload: EntityPayload {
                row: Some(row),
                ..Default::default()
            },
        })
    }

    /// Returns the row carried by `entity` if it belongs to this table.
    pub fn row_of<'a>(&self, entity: &'a Entity) -> Option<&'a BTreeMap<String, Value>> {
        if entity.key.entity_type != self.entity_type() {
            return None;
        }
        entity.payload.row.as_ref()
    }
}
