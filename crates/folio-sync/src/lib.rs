//! Debounced write-back of notebook edits.
//!
//! [`SyncQueue`] coalesces rapid edits per [`EntityKey`](folio_types::EntityKey)
//! and writes them to a [`RemoteStore`] once the debounce window passes.
//! [`NotebookSession`] wires a [`DocumentModel`](folio_doc::DocumentModel) to a
//! queue so that document mutations become remote creates, updates, and
//! deletes.

pub mod config;
pub mod queue;
pub mod remote;
pub mod session;
pub mod status;
pub mod timer;

pub use config::{ConfigError, SyncConfig};
pub use queue::{DeleteHandle, SyncQueue};
pub use remote::{MemoryStore, RemoteCall, RemoteError, RemoteStore};
pub use session::NotebookSession;
pub use status::{OverallStatus, SyncEvent, SyncState, aggregate};
pub use timer::ScheduledTask;
