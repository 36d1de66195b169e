//! Per-key sync states and the overall indicator derived from them.

use serde::{Deserialize, Serialize};

use folio_types::EntityKey;

/// Where one key is in its write-back cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Edit queued, debounce timer armed.
    Pending,
    /// Network call in flight.
    Syncing,
    /// Last call succeeded.
    Synced,
    /// Last call failed. Cleared by the next edit to the key.
    Error,
}

/// The single "all changes saved" indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    #[default]
    Synced,
    Syncing,
    Error,
}

impl OverallStatus {
    pub fn label(&self) -> &'static str {
        match self {
            OverallStatus::Synced => "Synced",
            OverallStatus::Syncing => "Syncing",
            OverallStatus::Error => "Sync error",
        }
    }
}

/// Fold per-key states into one status.
///
/// Any `Error` wins, then any `Pending`/`Syncing`, else `Synced`.
pub fn aggregate<'a>(states: impl IntoIterator<Item = &'a SyncState>) -> OverallStatus {
    let mut overall = OverallStatus::Synced;
    for state in states {
        match state {
            SyncState::Error => return OverallStatus::Error,
            SyncState::Pending | SyncState::Syncing => overall = OverallStatus::Syncing,
            SyncState::Synced => {}
        }
    }
    overall
}

/// Broadcast by the queue on every per-key transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    /// `key` moved to `state`.
    Changed { key: EntityKey, state: SyncState },
    /// `key` no longer has a state: it was deleted, discarded, or cancelled.
    Cleared { key: EntityKey },
}

impl SyncEvent {
    pub fn key(&self) -> &EntityKey {
        match self {
            SyncEvent::Changed { key, .. } | SyncEvent::Cleared { key } => key,
        }
    }

    pub fn state(&self) -> Option<SyncState> {
        match self {
            SyncEvent::Changed { state, .. } => Some(*state),
            SyncEvent::Cleared { .. } => None,
        }
    }
}
