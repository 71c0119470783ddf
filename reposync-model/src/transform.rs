//! Field transform hooks.
//!
//! Plugins that store environment-specific values (local ids, absolute URLs,
//! serialized blobs) register a [`FieldTransform`] for the fields they own.
//! Transforms run on export (CMS → repository) and import (repository → CMS)
//! and are keyed by `(entity type, field name)`; the type `*` matches every
//! type.

use reposync_types::EntityKey;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::entity::EntityPayload;
use crate::error::{CodecError, CodecResult};

/// Type wildcard accepted by [`TransformRegistry::register`].
pub const ANY_TYPE: &str = "*";

/// Which way content is flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformDirection {
    Export,
    Import,
}

/// What a transform decided for one field value.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    /// Leave the value as it is.
    Keep,
    /// Drop the field entirely.
    Remove,
    /// Substitute a new value.
    Replace(Value),
}

/// A per-field hook. Both directions default to [`TransformOutcome::Keep`].
pub trait FieldTransform: Send + Sync {
    fn export(&self, key: &EntityKey, value: &Value) -> Result<TransformOutcome, String> {
        let _ = (key, value);
        Ok(TransformOutcome::Keep)
    }

    fn import(&self, key: &EntityKey, value: &Value) -> Result<TransformOutcome, String> {
        let _ = (key, value);
        Ok(TransformOutcome::Keep)
    }
}

type TransformFn = dyn Fn(&EntityKey, &Value) -> Result<TransformOutcome, String> + Send + Sync;

/// A [`FieldTransform`] built from a pair of closures.
pub struct FnTransform {
    export: Box<TransformFn>,
    import: Box<TransformFn>,
}

impl FnTransform {
    pub fn new<E, I>(export: E, import: I) -> Self
    where
        E: Fn(&EntityKey, &Value) -> Result<TransformOutcome, String> + Send + Sync + 'static,
        I: Fn(&EntityKey, &Value) -> Result<TransformOutcome, String> + Send + Sync + 'static,
    {
        Self {
            export: Box::new(export),
            import: Box::new(import),
        }
    }

    /// A transform that drops the field on export and keeps it on import.
    pub fn strip_on_export() -> Self {
        Self::new(
            |_, _| Ok(TransformOutcome::Remove),
            |_, _| Ok(TransformOutcome::Keep),
        )
    }
}

impl FieldTransform for FnTransform {
    fn export(&self, key: &EntityKey, value: &Value) -> Result<TransformOutcome, String> {
        (self.export)(key, value)
    }

    fn import(&self, key: &EntityKey, value: &Value) -> Result<TransformOutcome, String> {
        (self.import)(key, value)
    }
}

/// Explicit mapping from (entity type, field name) to a transform.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<(String, String), Arc<dyn FieldTransform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `transform` for `field` of `entity_type` (or [`ANY_TYPE`]).
    /// A later registration for the same pair replaces the earlier one.
    pub fn register(
        &mut self,
        entity_type: impl Into<String>,
        field: impl Into<String>,
        transform: Arc<dyn FieldTransform>,
    ) {
        self.transforms
            .insert((entity_type.into(), field.into()), transform);
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    fn lookup(&self, entity_type: &str, field: &str) -> Option<&Arc<dyn FieldTransform>> {
        self.transforms
            .get(&(entity_type.to_string(), field.to_string()))
            .or_else(|| self.transforms.get(&(ANY_TYPE.to_string(), field.to_string())))
    }

    /// Applies every matching transform to `fields`, `meta` and the table
    /// `row` of `payload`.
    pub fn apply(
        &self,
        direction: TransformDirection,
        key: &EntityKey,
        payload: &mut EntityPayload,
    ) -> CodecResult<()> {
        if self.transforms.is_empty() {
            return Ok(());
        }
        self.apply_map(direction, key, &mut payload.fields)?;
        self.apply_map(direction, key, &mut payload.meta)?;
        if let Some(row) = payload.row.as_mut() {
            self.apply_map(direction, key, row)?;
        }
        Ok(())
    }

    fn apply_map(
        &self,
        direction: TransformDirection,
        key: &EntityKey,
        map: &mut BTreeMap<String, Value>,
    ) -> CodecResult<()> {
        let names: Vec<String> = map.keys().cloned().collect();
        for name in names {
            let Some(transform) = self.lookup(&key.entity_type, &name) else {
                continue;
            };
            let Some(value) = map.get(&name) else {
                continue;
            };
            let outcome = match direction {
                TransformDirection::Export => transform.export(key, value),
                TransformDirection::Import => transform.import(key, value),
            }
            .map_err(|message| CodecError::Transform {
                entity: key.to_string(),
                field: name.clone(),
                message,
            })?;

            match outcome {
                TransformOutcome::Keep => {}
                TransformOutcome::Remove => {
                    map.remove(&name);
                }
                TransformOutcome::Replace(new_value) => {
                    map.insert(name, new_value);
                }
            }
        }
        Ok(())
    }
}
