//! Block document model and change detection for Folio.
//!
//! [`DocumentModel`] owns the ordered block list of one notebook and emits a
//! snapshot after every mutation. [`ChangeDetector`] turns consecutive
//! snapshots into added/changed/removed sets, which the sync layer feeds to
//! its queue.

mod diff;
mod document;
mod error;

pub use diff::{Baseline, ChangeDetector, ChangeSet, ProtectedFn, Snapshot, snapshot_of};
pub use document::{DocumentModel, SnapshotListener};
pub use error::DocError;

/// Result type for document operations.
pub type Result<T> = std::result::Result<T, DocError>;
