//! Debounced write-back queue.
//!
//! Every [`EntityKey`] owns one slot. An edit arms (or re-arms) the slot's
//! timer; when the timer fires the operation moves in flight and the remote
//! store is called. Per key:
//!
//! ```text
//!   queue_upsert ──▶ PENDING ──timer──▶ SYNCING ──┬──▶ SYNCED
//!        ▲   (re-arm resets timer)                └──▶ ERROR
//!        └──────────── next edit ◀────────────────────────┘
//! ```
//!
//! - At most one timer is armed per key; a new edit replaces it.
//! - At most one upsert is in flight per key. A timer that fires while an
//!   upsert is in flight parks its operation as the slot's `deferred`
//!   operation; the in-flight task runs it as soon as the current call
//!   settles, choosing create vs update from the exists flag at that moment.
//! - Deletes bypass the queue: they cancel whatever is pending for the key and
//!   go out immediately, even with an upsert in flight.
//!
//! State lives behind a `parking_lot::Mutex` that is never held across an
//! await. Remote calls run in spawned tasks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use folio_types::{Entity, EntityKey, NotebookId};

use crate::config::SyncConfig;
use crate::remote::{RemoteError, RemoteStore};
use crate::status::{OverallStatus, SyncEvent, SyncState, aggregate};
use crate::timer::ScheduledTask;

/// An upsert waiting to be sent.
#[derive(Clone, Debug)]
struct Upsert {
    payload: Entity,
    is_new: bool,
}

/// An upsert with its debounce timer running.
struct Armed {
    op: Upsert,
    generation: u64,
    _timer: ScheduledTask,
}

#[derive(Default)]
struct Slot {
    armed: Option<Armed>,
    /// Fired while another upsert for this key was in flight.
    deferred: Option<Upsert>,
    in_flight: bool,
    deletes: usize,
    /// Set by a successful create, cleared by a successful delete.
    exists: bool,
    /// A delete was issued; in-flight upserts finishing afterwards don't
    /// publish a state.
    deleted: bool,
    state: Option<SyncState>,
}

impl Slot {
    fn is_busy(&self) -> bool {
        self.armed.is_some() || self.in_flight || self.deletes > 0
    }

    fn is_settled(&self) -> bool {
        !self.in_flight && self.deletes == 0
    }

    /// Safe to forget: nothing scheduled, nothing running, nothing learned.
    fn is_disposable(&self) -> bool {
        !self.is_busy() && self.deferred.is_none() && !self.exists && self.state.is_none()
    }
}

#[derive(Default)]
struct QueueState {
    slots: HashMap<EntityKey, Slot>,
    next_generation: u64,
}

struct Inner {
    store: Arc<dyn RemoteStore>,
    config: SyncConfig,
    state: Mutex<QueueState>,
    events: broadcast::Sender<SyncEvent>,
    /// Bumped every time an in-flight call settles.
    settled: watch::Sender<u64>,
}

impl Inner {
    fn publish(&self, slot: &mut Slot, key: EntityKey, state: SyncState) {
        slot.state = Some(state);
        // No subscribers is fine.
        let _ = self.events.send(SyncEvent::Changed { key, state });
    }

    fn clear(&self, slot: &mut Slot, key: EntityKey) {
        if slot.state.take().is_some() {
            let _ = self.events.send(SyncEvent::Cleared { key });
        }
    }

    fn mark_settled(&self) {
        self.settled.send_modify(|n| *n = n.wrapping_add(1));
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        match self.config.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| RemoteError::Timeout(limit))?,
            None => fut.await,
        }
    }
}

/// Handle to the write-back queue. Cheap to clone; all clones share state.
///
/// Must be used from within a tokio runtime: arming a timer spawns a task.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<Inner>,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (settled, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                state: Mutex::new(QueueState::default()),
                events,
                settled,
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Subscribe to per-key state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Queue `payload` for `key`, replacing anything already pending for it.
    ///
    /// `is_new` asks for a create; it is ignored once a create for `key` has
    /// succeeded.
    pub fn queue_upsert(&self, key: EntityKey, payload: Entity, is_new: bool) {
        debug_assert_eq!(key.target, payload.target(), "payload does not belong to key");
        let deadline = Instant::now() + self.inner.config.debounce();

        let mut state = self.inner.state.lock();
        state.next_generation += 1;
        let generation = state.next_generation;

        let queue = self.clone();
        let timer = ScheduledTask::spawn(deadline, async move {
            queue.fire(key, generation).await;
        });

        let slot = state.slots.entry(key).or_default();
        let replaced = slot.armed.is_some();
        slot.armed = Some(Armed {
            op: Upsert { payload, is_new },
            generation,
            _timer: timer,
        });
        slot.deleted = false;
        self.inner.publish(slot, key, SyncState::Pending);
        debug!(%key, generation, replaced, "upsert queued");
    }

    /// Cancel anything pending for `key` and delete it remotely, now.
    ///
    /// The pending upsert (if any) is dropped, not sent. The delete is issued
    /// even if an upsert for `key` is in flight, and even if the returned
    /// handle is never awaited.
    pub fn queue_delete(&self, key: EntityKey) -> DeleteHandle {
        {
            let mut state = self.inner.state.lock();
            let slot = state.slots.entry(key).or_default();
            let dropped_armed = slot.armed.take().is_some();
            let dropped_deferred = slot.deferred.take().is_some();
            slot.deletes += 1;
            slot.deleted = true;
            self.inner.clear(slot, key);
            debug!(%key, dropped_armed, dropped_deferred, "delete issued");
        }

        let inner = self.inner.clone();
        let join = tokio::spawn(async move {
            let store = inner.store.clone();
            let result = inner.call(store.delete(&key.scope, &key.target)).await;
            {
                let mut state = inner.state.lock();
                let idle = match state.slots.get_mut(&key) {
                    Some(slot) => {
                        slot.deletes = slot.deletes.saturating_sub(1);
                        if result.is_ok() {
                            slot.exists = false;
                        }
                        !slot.is_busy()
                    }
                    None => false,
                };
                if result.is_ok() && idle {
                    state.slots.remove(&key);
                }
            }
            inner.mark_settled();
            match &result {
                Ok(()) => info!(%key, "deleted"),
                Err(e) => error!(%key, error = %e, "delete failed"),
            }
            result
        });
        DeleteHandle { join }
    }

    /// Drop anything pending for `key` without contacting the remote store.
    ///
    /// For entities that never reached the store. In-flight calls complete.
    pub fn discard(&self, key: &EntityKey) {
        let mut state = self.inner.state.lock();
        let disposable = match state.slots.get_mut(key) {
            Some(slot) => {
                slot.armed = None;
                slot.deferred = None;
                self.inner.clear(slot, *key);
                slot.is_disposable()
            }
            None => return,
        };
        if disposable {
            state.slots.remove(key);
        }
        debug!(%key, "discarded");
    }

    /// Send everything pending under `scope` now, then wait until every call
    /// under `scope` that was pending or in flight has settled.
    pub async fn force_flush(&self, scope: &NotebookId) {
        let mut settled = self.inner.settled.subscribe();

        let ready: Vec<(EntityKey, Upsert)> = {
            let mut state = self.inner.state.lock();
            let mut ready = Vec::new();
            for (key, slot) in state.slots.iter_mut().filter(|(k, _)| k.in_scope(scope)) {
                let Some(armed) = slot.armed.take() else {
                    continue;
                };
                if slot.in_flight {
                    slot.deferred = Some(armed.op);
                } else {
                    slot.in_flight = true;
                    ready.push((*key, armed.op));
                }
            }
            ready
        };
        debug!(scope = %scope.short(), flushed = ready.len(), "force flush");

        for (key, op) in ready {
            let queue = self.clone();
            tokio::spawn(async move { queue.drive(key, op).await });
        }

        while !self.is_scope_settled(scope) {
            if settled.changed().await.is_err() {
                break;
            }
        }
    }

    /// Drop every pending and deferred operation under `scope` unsent.
    /// In-flight calls are left to complete.
    pub fn cancel_scope(&self, scope: &NotebookId) {
        let mut state = self.inner.state.lock();
        let mut cancelled = 0usize;
        for (key, slot) in state.slots.iter_mut().filter(|(k, _)| k.in_scope(scope)) {
            let armed = slot.armed.take().is_some();
            let deferred = slot.deferred.take().is_some();
            if armed || deferred {
                cancelled += 1;
                self.inner.clear(slot, *key);
            }
        }
        state.slots.retain(|_, slot| !slot.is_disposable());
        debug!(scope = %scope.short(), cancelled, "scope cancelled");
    }

    /// Forget every idle key under `scope`, clearing its state.
    ///
    /// Keys with an armed timer, a deferred op, an in-flight call, or an
    /// outstanding delete are kept. Returns how many keys were released.
    pub fn release_scope(&self, scope: &NotebookId) -> usize {
        let mut state = self.inner.state.lock();
        let idle: Vec<EntityKey> = state
            .slots
            .iter()
            .filter(|(k, s)| k.in_scope(scope) && !s.is_busy() && s.deferred.is_none())
            .map(|(k, _)| *k)
            .collect();
        for key in &idle {
            if let Some(mut slot) = state.slots.remove(key) {
                self.inner.clear(&mut slot, *key);
            }
        }
        debug!(scope = %scope.short(), released = idle.len(), "scope released");
        idle.len()
    }

    /// True while any key has an armed timer, an in-flight call, or an
    /// outstanding delete.
    pub fn has_pending_work(&self) -> bool {
        self.inner.state.lock().slots.values().any(Slot::is_busy)
    }

    /// Number of armed timers under `scope`.
    pub fn pending_count(&self, scope: &NotebookId) -> usize {
        self.inner
            .state
            .lock()
            .slots
            .iter()
            .filter(|(k, s)| k.in_scope(scope) && s.armed.is_some())
            .count()
    }

    /// Whether a create for `key` has succeeded.
    pub fn exists(&self, key: &EntityKey) -> bool {
        self.inner.state.lock().slots.get(key).is_some_and(|s| s.exists)
    }

    pub fn is_in_flight(&self, key: &EntityKey) -> bool {
        self.inner.state.lock().slots.get(key).is_some_and(|s| s.in_flight)
    }

    pub fn state(&self, key: &EntityKey) -> Option<SyncState> {
        self.inner.state.lock().slots.get(key).and_then(|s| s.state)
    }

    pub fn states(&self) -> HashMap<EntityKey, SyncState> {
        self.inner
            .state
            .lock()
            .slots
            .iter()
            .filter_map(|(k, s)| s.state.map(|state| (*k, state)))
            .collect()
    }

    pub fn overall_status(&self) -> OverallStatus {
        let state = self.inner.state.lock();
        aggregate(state.slots.values().filter_map(|s| s.state.as_ref()))
    }

    pub fn overall_status_for(&self, scope: &NotebookId) -> OverallStatus {
        let state = self.inner.state.lock();
        aggregate(
            state
                .slots
                .iter()
                .filter(|(k, _)| k.in_scope(scope))
                .filter_map(|(_, s)| s.state.as_ref()),
        )
    }

    fn is_scope_settled(&self, scope: &NotebookId) -> bool {
        self.inner
            .state
            .lock()
            .slots
            .iter()
            .filter(|(k, _)| k.in_scope(scope))
            .all(|(_, s)| s.is_settled())
    }

    /// Timer callback for `key`. Stale generations are ignored.
    async fn fire(&self, key: EntityKey, generation: u64) {
        let op = {
            let mut state = self.inner.state.lock();
            let Some(slot) = state.slots.get_mut(&key) else {
                return;
            };
            let Some(armed) = slot.armed.take_if(|a| a.generation == generation) else {
                trace!(%key, generation, "stale timer");
                return;
            };
            if slot.in_flight {
                debug!(%key, "upsert in flight, deferring");
                slot.deferred = Some(armed.op);
                return;
            }
            slot.in_flight = true;
            armed.op
        };
        self.drive(key, op).await;
    }

    /// Run `op` and then any operation deferred behind it. The caller has
    /// already set `in_flight` for `key`.
    async fn drive(&self, key: EntityKey, mut op: Upsert) {
        loop {
            let create = {
                let mut state = self.inner.state.lock();
                let slot = state.slots.entry(key).or_default();
                let create = op.is_new && !slot.exists;
                if !slot.deleted {
                    self.inner.publish(slot, key, SyncState::Syncing);
                }
                create
            };

            let store = self.inner.store.clone();
            let result = if create {
                self.inner.call(store.create(&key.scope, &op.payload)).await
            } else {
                self.inner
                    .call(store.update(&key.scope, &key.target, &op.payload))
                    .await
            };

            let mut state = self.inner.state.lock();
            let slot = state.slots.entry(key).or_default();
            match result {
                Ok(_) => {
                    if create {
                        slot.exists = true;
                    }
                    info!(%key, op = if create { "create" } else { "update" }, "synced");
                    if !slot.deleted && slot.deferred.is_none() {
                        let next = if slot.armed.is_some() {
                            SyncState::Pending
                        } else {
                            SyncState::Synced
                        };
                        self.inner.publish(slot, key, next);
                    }
                }
                Err(e) => {
                    warn!(%key, op = if create { "create" } else { "update" }, error = %e, "sync failed");
                    if !slot.deleted {
                        self.inner.publish(slot, key, SyncState::Error);
                    }
                }
            }

            match slot.deferred.take() {
                Some(next) => op = next,
                None => {
                    slot.in_flight = false;
                    break;
                }
            }
        }
        self.inner.mark_settled();
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SyncQueue")
            .field("slots", &state.slots.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Outcome of a [`SyncQueue::queue_delete`].
///
/// The delete runs whether or not this is awaited; awaiting yields its result.
#[must_use = "the delete runs regardless; await to observe its outcome or call detach()"]
pub struct DeleteHandle {
    join: JoinHandle<Result<(), RemoteError>>,
}

impl DeleteHandle {
    /// Let the delete finish in the background. Failures are logged.
    pub fn detach(self) {}
}

impl Future for DeleteHandle {
    type Output = Result<(), RemoteError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.join).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => {
                Poll::Ready(Err(RemoteError::Network(format!("delete task failed: {e}"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use folio_types::{Block, BlockId, EntityTarget};

    use super::*;
    use crate::remote::{MemoryStore, RemoteCall};

    const DEBOUNCE: Duration = Duration::from_millis(3000);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    async fn sleep_ms(n: u64) {
        tokio::time::sleep(ms(n)).await;
    }

    fn setup(store: &Arc<MemoryStore>) -> SyncQueue {
        SyncQueue::new(store.clone(), SyncConfig::default().with_debounce(DEBOUNCE))
    }

    fn block(id: BlockId, content: &str) -> Entity {
        Entity::Block(Block::paragraph(id).with_content(content))
    }

    fn content_of(call: &RemoteCall) -> Option<String> {
        call.entity().and_then(Entity::as_block).map(|b| b.content.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_edits_coalesces_into_last_payload() {
        let store = Arc::new(MemoryStore::new());
        let queue = setup(&store);
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);
        store.seed(scope, block(id, "original"));

        queue.queue_upsert(key, block(id, "one"), false);
        sleep_ms(500).await;
        queue.queue_upsert(key, block(id, "two"), false);
        sleep_ms(500).await;
        queue.queue_upsert(key, block(id, "three"), false);

        sleep_ms(2999).await;
        assert_eq!(store.call_count(), 0);
        assert_eq!(queue.state(&key), Some(SyncState::Pending));

        sleep_ms(2).await;
        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_update());
        assert_eq!(content_of(&calls[0]).as_deref(), Some("three"));
        assert_eq!(queue.state(&key), Some(SyncState::Synced));

        sleep_ms(10_000).await;
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_cancels_pending_update() {
        let store = Arc::new(MemoryStore::new());
        let queue = setup(&store);
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);
        store.seed(scope, block(id, "original"));

        queue.queue_upsert(key, block(id, "edit"), false);
        sleep_ms(100).await;
        let start = Instant::now();
        queue.queue_delete(key).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        sleep_ms(10_000).await;
        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_delete());
        assert!(!queue.has_pending_work());
        assert_eq!(queue.state(&key), None);
        assert_eq!(store.get(&scope, &key.target), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_create_goes_out_as_update() {
        let store = Arc::new(MemoryStore::with_latency(ms(100)));
        let queue = setup(&store);
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);

        queue.queue_upsert(key, block(id, "first"), true);
        sleep_ms(3000).await;
        sleep_ms(10).await;
        assert!(queue.is_in_flight(&key));
        assert!(!queue.exists(&key));

        // Caller still believes the block is new.
        queue.queue_upsert(key, block(id, "second"), true);
        sleep_ms(100).await;
        assert!(queue.exists(&key));
        assert_eq!(queue.state(&key), Some(SyncState::Pending));

        sleep_ms(3200).await;
        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].is_create());
        assert!(calls[1].is_update());
        assert_eq!(content_of(&calls[1]).as_deref(), Some("second"));
        assert_eq!(queue.state(&key), Some(SyncState::Synced));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_firing_during_create_waits_for_it() {
        let store = Arc::new(MemoryStore::with_latency(ms(5000)));
        let queue = setup(&store);
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);

        // t=0: armed; t=3000: create starts; t=8000: create settles.
        queue.queue_upsert(key, block(id, "first"), true);
        sleep_ms(3010).await;
        queue.queue_upsert(key, block(id, "second"), true);

        // t=6010: second timer fires while the create is still running.
        sleep_ms(3005).await;
        assert_eq!(store.call_count(), 1);
        assert!(queue.has_pending_work());
        assert_eq!(queue.pending_count(&scope), 0);

        // t=8000: create settles, deferred op goes out as an update.
        sleep_ms(2000).await;
        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].is_create());
        assert!(calls[1].is_update());
        assert_eq!(queue.state(&key), Some(SyncState::Syncing));

        sleep_ms(5000).await;
        assert_eq!(queue.state(&key), Some(SyncState::Synced));
        assert!(!queue.has_pending_work());
        assert_eq!(
            store.get(&scope, &key.target).and_then(|e| e.as_block().map(|b| b.content.clone())),
            Some("second".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exists_flag_turns_later_creates_into_updates() {
        let store = Arc::new(MemoryStore::new());
        let queue = setup(&store);
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);

        queue.queue_upsert(key, block(id, "a"), true);
        sleep_ms(3001).await;
        assert!(queue.exists(&key));

        queue.queue_upsert(key, block(id, "b"), true);
        sleep_ms(3001).await;

        let calls = store.calls();
        assert_eq!(calls.iter().filter(|c| c.is_create()).count(), 1);
        assert!(calls[1].is_update());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reports_error_without_retry() {
        let store = Arc::new(MemoryStore::new());
        let queue = setup(&store);
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);
        store.fail_next(1);

        queue.queue_upsert(key, block(id, "a"), true);
        sleep_ms(3001).await;
        assert_eq!(queue.state(&key), Some(SyncState::Error));
        assert_eq!(queue.overall_status(), OverallStatus::Error);
        assert!(!queue.exists(&key));
        assert!(!queue.has_pending_work());

        sleep_ms(30_000).await;
        assert_eq!(store.call_count(), 1);

        // The next edit re-arms the cycle.
        queue.queue_upsert(key, block(id, "b"), true);
        sleep_ms(3001).await;
        assert_eq!(queue.state(&key), Some(SyncState::Synced));
        assert!(store.calls()[1].is_create());
        assert_eq!(queue.overall_status(), OverallStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_follow_the_state_machine() {
        let store = Arc::new(MemoryStore::new());
        let queue = setup(&store);
        let mut events = queue.subscribe();
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);

        queue.queue_upsert(key, block(id, "a"), true);
        sleep_ms(3001).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.key(), &key);
            seen.push(event.state());
        }
        assert_eq!(
            seen,
            vec![Some(SyncState::Pending), Some(SyncState::Syncing), Some(SyncState::Synced)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_flush_sends_now_and_waits_for_in_flight() {
        let store = Arc::new(MemoryStore::with_latency(ms(200)));
        let queue = setup(&store);
        let scope = NotebookId::new();
        let other = NotebookId::new();
        let (a, b, c) = (BlockId::new(), BlockId::new(), BlockId::new());

        // `a` goes in flight at t=3000.
        queue.queue_upsert(EntityKey::block(scope, a), block(a, "a"), true);
        sleep_ms(3050).await;
        assert!(queue.is_in_flight(&EntityKey::block(scope, a)));

        queue.queue_upsert(EntityKey::block(scope, b), block(b, "b"), true);
        queue.queue_upsert(EntityKey::block(other, c), block(c, "c"), true);

        let start = Instant::now();
        queue.force_flush(&scope).await;
        assert_eq!(start.elapsed(), ms(200));

        assert!(store.get(&scope, &EntityTarget::Block(a)).is_some());
        assert!(store.get(&scope, &EntityTarget::Block(b)).is_some());
        assert_eq!(queue.pending_count(&scope), 0);
        assert_eq!(queue.overall_status_for(&scope), OverallStatus::Synced);

        // Other scopes are untouched.
        assert_eq!(queue.pending_count(&other), 1);
        assert!(queue.has_pending_work());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_flush_waits_for_failures_too() {
        let store = Arc::new(MemoryStore::with_latency(ms(50)));
        let queue = setup(&store);
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);
        store.fail_next(1);

        queue.queue_upsert(key, block(id, "a"), true);
        queue.force_flush(&scope).await;

        assert_eq!(queue.state(&key), Some(SyncState::Error));
        assert!(!queue.has_pending_work());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_flush_waits_for_outstanding_delete() {
        let store = Arc::new(MemoryStore::with_latency(ms(700)));
        let queue = setup(&store);
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);
        store.seed(scope, block(id, "x"));

        queue.queue_delete(key).detach();
        let start = Instant::now();
        queue.force_flush(&scope).await;

        assert_eq!(start.elapsed(), ms(700));
        assert!(store.get(&scope, &key.target).is_none());
        assert!(!queue.has_pending_work());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_flush_with_nothing_pending_returns_immediately() {
        let store = Arc::new(MemoryStore::new());
        let queue = setup(&store);
        let start = Instant::now();
        queue.force_flush(&NotebookId::new()).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_scope_discards_without_sending() {
        let store = Arc::new(MemoryStore::new());
        let queue = setup(&store);
        let scope = NotebookId::new();
        let other = NotebookId::new();
        let (a, b) = (BlockId::new(), BlockId::new());

        queue.queue_upsert(EntityKey::block(scope, a), block(a, "a"), true);
        queue.queue_upsert(EntityKey::notebook_name(scope), Entity::notebook_name("N"), false);
        queue.queue_upsert(EntityKey::block(other, b), block(b, "b"), true);
        assert_eq!(queue.pending_count(&scope), 2);

        queue.cancel_scope(&scope);
        assert_eq!(queue.pending_count(&scope), 0);
        assert_eq!(queue.state(&EntityKey::block(scope, a)), None);

        sleep_ms(10_000).await;
        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].target(), EntityTarget::Block(b));
        assert!(!queue.has_pending_work());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_scope_lets_in_flight_call_finish() {
        let store = Arc::new(MemoryStore::with_latency(ms(500)));
        let queue = setup(&store);
        let scope = NotebookId::new();
        let (a, b) = (BlockId::new(), BlockId::new());
        let flying = EntityKey::block(scope, a);

        queue.queue_upsert(flying, block(a, "a"), true);
        sleep_ms(3100).await;
        assert!(queue.is_in_flight(&flying));
        queue.queue_upsert(EntityKey::block(scope, b), block(b, "b"), true);

        queue.cancel_scope(&scope);
        assert_eq!(queue.pending_count(&scope), 0);
        assert!(queue.has_pending_work());

        sleep_ms(10_000).await;
        assert_eq!(store.calls_for(&EntityTarget::Block(a)).len(), 1);
        assert!(store.calls_for(&EntityTarget::Block(b)).is_empty());
        assert!(store.get(&scope, &EntityTarget::Block(a)).is_some());
        assert_eq!(queue.state(&flying), Some(SyncState::Synced));
        assert!(!queue.has_pending_work());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_scope_forgets_settled_keys_only() {
        let store = Arc::new(MemoryStore::new());
        let queue = setup(&store);
        let mut events = queue.subscribe();
        let scope = NotebookId::new();
        let other = NotebookId::new();
        let (a, b, c) = (BlockId::new(), BlockId::new(), BlockId::new());
        store.fail_next(1);

        queue.queue_upsert(EntityKey::block(scope, a), block(a, "a"), true);
        sleep_ms(3001).await;
        queue.queue_upsert(EntityKey::block(scope, b), block(b, "b"), true);
        queue.queue_upsert(EntityKey::block(other, c), block(c, "c"), true);
        sleep_ms(3001).await;
        assert_eq!(queue.state(&EntityKey::block(scope, a)), Some(SyncState::Error));
        assert_eq!(queue.overall_status(), OverallStatus::Error);

        // Re-arm `b` so one key in scope is still pending.
        queue.queue_upsert(EntityKey::block(scope, b), block(b, "b2"), false);
        while events.try_recv().is_ok() {}

        assert_eq!(queue.release_scope(&scope), 1);
        assert_eq!(queue.state(&EntityKey::block(scope, a)), None);
        assert_eq!(
            events.try_recv().ok(),
            Some(SyncEvent::Cleared { key: EntityKey::block(scope, a) })
        );
        assert_eq!(queue.state(&EntityKey::block(scope, b)), Some(SyncState::Pending));
        assert_eq!(queue.state(&EntityKey::block(other, c)), Some(SyncState::Synced));
        assert_eq!(queue.overall_status(), OverallStatus::Syncing);

        sleep_ms(3001).await;
        assert_eq!(queue.release_scope(&scope), 1);
        assert!(queue.states().keys().all(|k| k.in_scope(&other)));
        assert_eq!(queue.overall_status(), OverallStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_has_pending_work_tracks_timers_and_calls() {
        let store = Arc::new(MemoryStore::with_latency(ms(1000)));
        let queue = setup(&store);
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);

        assert!(!queue.has_pending_work());
        queue.queue_upsert(key, block(id, "a"), true);
        assert!(queue.has_pending_work());
        sleep_ms(3500).await;
        assert!(queue.is_in_flight(&key));
        assert!(queue.has_pending_work());
        sleep_ms(600).await;
        assert!(!queue.has_pending_work());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_propagates_to_caller() {
        let store = Arc::new(MemoryStore::new());
        let queue = setup(&store);
        let scope = NotebookId::new();
        let id = BlockId::new();
        store.seed(scope, block(id, "x"));
        store.fail_next(1);

        let err = queue.queue_delete(EntityKey::block(scope, id)).await.unwrap_err();
        assert_eq!(err, RemoteError::status(500, "injected failure"));
        assert!(store.get(&scope, &EntityTarget::Block(id)).is_some());
        assert!(!queue.has_pending_work());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_is_issued_while_upsert_in_flight() {
        let store = Arc::new(MemoryStore::with_latency(ms(500)));
        let queue = setup(&store);
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);
        store.seed(scope, block(id, "x"));

        queue.queue_upsert(key, block(id, "y"), false);
        sleep_ms(3100).await;
        assert!(queue.is_in_flight(&key));

        let delete = queue.queue_delete(key);
        sleep_ms(1).await;
        assert_eq!(store.calls().len(), 2);
        assert!(store.calls()[1].is_delete());

        delete.await.unwrap();
        sleep_ms(1000).await;
        // The upsert finished after the delete was issued; no state is resurrected.
        assert_eq!(queue.state(&key), None);
        assert!(!queue.has_pending_work());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_is_an_error() {
        let store = Arc::new(MemoryStore::with_latency(ms(10_000)));
        let config = SyncConfig::default()
            .with_debounce(DEBOUNCE)
            .with_request_timeout(Some(ms(1000)));
        let queue = SyncQueue::new(store.clone(), config);
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);

        queue.queue_upsert(key, block(id, "a"), true);
        sleep_ms(4001).await;
        assert_eq!(queue.state(&key), Some(SyncState::Error));
        assert!(!queue.has_pending_work());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_forgets_unsent_entity() {
        let store = Arc::new(MemoryStore::new());
        let queue = setup(&store);
        let scope = NotebookId::new();
        let id = BlockId::new();
        let key = EntityKey::block(scope, id);

        queue.queue_upsert(key, block(id, "draft"), true);
        queue.discard(&key);
        assert!(!queue.has_pending_work());
        assert!(queue.states().is_empty());

        sleep_ms(10_000).await;
        assert_eq!(store.call_count(), 0);
    }
}
