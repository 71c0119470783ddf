//! Entity model and codec for reposync.
//!
//! Defines how CMS content is represented in the repository:
//! - [`Entity`]: an entity key plus a typed [`EntityPayload`]
//! - [`EntityCodec`]: entity ↔ (path, content) conversion
//! - [`TransformRegistry`]: per-(type, field) export/import hooks
//! - [`EntitySource`]: the contract the host CMS implements
//! - [`TableSpec`]: how relational rows become entities
//!
//! The sync engine never looks inside payloads; it only hashes the canonical
//! bytes produced here.

mod codec;
mod entity;
mod error;
mod source;
mod table;
mod transform;

pub use codec::{EntityCodec, RepoFile};
pub use entity::{Attachment, Entity, EntityPayload};
pub use error::{CodecError, CodecResult};
pub use source::{EntitySource, InMemoryEntitySource};
pub use table::TableSpec;
pub use transform::{
    ANY_TYPE, FieldTransform, FnTransform, TransformDirection, TransformOutcome, TransformRegistry,
};
