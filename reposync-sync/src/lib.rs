//! Sync between a CMS content store and a Git repository branch.
//!
//! - [`reconcile`]: per-file tree diffs and action plans
//! - [`status`]: commit-history status classification
//! - [`orchestrator`]: staging, push, pull, initialization and materialization
//!
//! The orchestrator wires an [`EntitySource`](reposync_model::EntitySource)
//! (the CMS), an [`EntityCodec`](reposync_model::EntityCodec), a
//! [`StateStore`](reposync_state::StateStore) and a
//! [`RepositoryProvider`](reposync_provider::RepositoryProvider) together.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod status;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use orchestrator::{MaterializeReport, PullReport, PushReport, StageReport, SyncOrchestrator};
pub use reconcile::{
    LocalTree, SkippedEntity, SyncAction, SyncDirection, build_local_tree, diff_tree,
    plan_actions, restrict_to_types,
};
pub use status::sync_status;
