//! The remote store seam.
//!
//! [`RemoteStore`] is the three-call contract the queue writes through.
//! Any failure (non-success status, dropped connection, timeout) is a
//! [`RemoteError`]; the queue does not distinguish between them.
//!
//! [`MemoryStore`] is an in-process implementation that records every call,
//! with configurable latency and failure injection.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use folio_types::{Entity, EntityTarget, NotebookId};

/// Transport-level failure of a remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network failure: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl RemoteError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Status {
            status,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Status { status: 404, .. })
    }
}

/// Remote persistence for notebook entities.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create `entity` in `scope`. The store may echo or rewrite it.
    async fn create(&self, scope: &NotebookId, entity: &Entity) -> Result<Entity, RemoteError>;

    /// Overwrite the entity at `target` with `entity`.
    async fn update(
        &self,
        scope: &NotebookId,
        target: &EntityTarget,
        entity: &Entity,
    ) -> Result<Entity, RemoteError>;

    async fn delete(&self, scope: &NotebookId, target: &EntityTarget) -> Result<(), RemoteError>;
}

/// One call observed by a [`MemoryStore`], recorded when the call starts.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteCall {
    Create {
        scope: NotebookId,
        entity: Entity,
    },
    Update {
        scope: NotebookId,
        target: EntityTarget,
        entity: Entity,
    },
    Delete {
        scope: NotebookId,
        target: EntityTarget,
    },
}

impl RemoteCall {
    pub fn target(&self) -> EntityTarget {
        match self {
            RemoteCall::Create { entity, .. } => entity.target(),
            RemoteCall::Update { target, .. } | RemoteCall::Delete { target, .. } => *target,
        }
    }

    pub fn entity(&self) -> Option<&Entity> {
        match self {
            RemoteCall::Create { entity, .. } | RemoteCall::Update { entity, .. } => Some(entity),
            RemoteCall::Delete { .. } => None,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, RemoteCall::Create { .. })
    }

    pub fn is_update(&self) -> bool {
        matches!(self, RemoteCall::Update { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, RemoteCall::Delete { .. })
    }
}

#[derive(Default)]
struct MemoryState {
    entities: HashMap<(NotebookId, EntityTarget), Entity>,
    calls: Vec<RemoteCall>,
    latency: Duration,
    fail_next: usize,
}

impl MemoryState {
    /// Record `call` and decide up front whether it fails.
    fn begin(&mut self, call: RemoteCall) -> (Duration, bool) {
        self.calls.push(call);
        let fail = self.fail_next > 0;
        if fail {
            self.fail_next -= 1;
        }
        (self.latency, fail)
    }
}

/// In-process [`RemoteStore`].
///
/// Semantics follow a REST backend: creating an existing block is a 409,
/// updating or deleting a missing block is a 404. Notebook attributes always
/// exist and can be updated without a prior create.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every subsequent call by `latency` (tokio time, so tests can pause it).
    pub fn with_latency(latency: Duration) -> Self {
        let store = Self::new();
        store.set_latency(latency);
        store
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Make the next `count` calls fail with a 500.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// Place an entity without recording a call, as if it was loaded from the server.
    pub fn seed(&self, scope: NotebookId, entity: Entity) {
        self.state.lock().entities.insert((scope, entity.target()), entity);
    }

    pub fn get(&self, scope: &NotebookId, target: &EntityTarget) -> Option<Entity> {
        self.state.lock().entities.get(&(*scope, *target)).cloned()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_for(&self, target: &EntityTarget) -> Vec<RemoteCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| &c.target() == target)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn entity_count(&self, scope: &NotebookId) -> usize {
        self.state.lock().entities.keys().filter(|(s, _)| s == scope).count()
    }

    async fn settle(latency: Duration, fail: bool) -> Result<(), RemoteError> {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if fail {
            return Err(RemoteError::status(500, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn create(&self, scope: &NotebookId, entity: &Entity) -> Result<Entity, RemoteError> {
        let (latency, fail) = self.state.lock().begin(RemoteCall::Create {
            scope: *scope,
            entity: entity.clone(),
        });
        Self::settle(latency, fail).await?;

        let mut state = self.state.lock();
        let slot = (*scope, entity.target());
        if state.entities.contains_key(&slot) {
            return Err(RemoteError::status(409, format!("{} already exists", slot.1)));
        }
        state.entities.insert(slot, entity.clone());
        Ok(entity.clone())
    }

    async fn update(
        &self,
        scope: &NotebookId,
        target: &EntityTarget,
        entity: &Entity,
    ) -> Result<Entity, RemoteError> {
        let (latency, fail) = self.state.lock().begin(RemoteCall::Update {
            scope: *scope,
            target: *target,
            entity: entity.clone(),
        });
        Self::settle(latency, fail).await?;

        let mut state = self.state.lock();
        let slot = (*scope, *target);
        if matches!(target, EntityTarget::Block(_)) && !state.entities.contains_key(&slot) {
            return Err(RemoteError::status(404, format!("{target} not found")));
        }
        state.entities.insert(slot, entity.clone());
        Ok(entity.clone())
    }

    async fn delete(&self, scope: &NotebookId, target: &EntityTarget) -> Result<(), RemoteError> {
        let (latency, fail) = self.state.lock().begin(RemoteCall::Delete {
            scope: *scope,
            target: *target,
        });
        Self::settle(latency, fail).await?;

        match self.state.lock().entities.remove(&(*scope, *target)) {
            Some(_) => Ok(()),
            None => Err(RemoteError::status(404, format!("{target} not found"))),
        }
    }
}
