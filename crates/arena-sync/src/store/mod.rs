//! # State Store
//!
//! The canonical, observable model. Instantiable: every test or session owns
//! its own store.
//!
//! ## Atomicity
//!
//! Writers are serialized by a mutex. Each `apply` reduces the current
//! snapshot into a new one, swaps it in whole and queues the update while
//! still holding the lock. Notification happens after the lock is released,
//! so observers only ever see complete states, in version order.
//!
//! ## Observers
//!
//! - [`StateStore::subscribe`]: async receiver, dropped to unsubscribe.
//! - [`StateStore::on_update`]: synchronous callback run after each swap.
//!   Callbacks may call back into the store (`take_flag`, `apply`). Updates
//!   they cause are queued and delivered after the current one, by the same
//!   delivery loop.

use arena_telemetry::{
    log_room_event, DUPLICATE_EVENTS, EVENTS_APPLIED, INTEGRITY_VIOLATIONS, STALE_ROOMS,
    STORE_VERSION,
};
use arena_types::RoomId;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use crate::algorithms::reducer::{reduce, ApplyReport, ReducerConfig};
use crate::domain::{Delta, GameState, SyncError, UiFlag};

/// Default capacity of the update channel.
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Published after every successful apply.
#[derive(Debug, Clone)]
pub struct StoreUpdate {
    pub version: u64,
    /// Rooms the delta touched.
    pub rooms: Vec<RoomId>,
    pub snapshot: Arc<GameState>,
}

type Listener = dyn Fn(&StoreUpdate) + Send + Sync;
type ListenerMap = RwLock<BTreeMap<u64, Arc<Listener>>>;

struct Inner {
    state: RwLock<Arc<GameState>>,
    write_lock: Mutex<()>,
    config: ReducerConfig,
    sender: broadcast::Sender<StoreUpdate>,
    subscribers: Arc<AtomicUsize>,
    listeners: Arc<ListenerMap>,
    next_listener: AtomicU64,
    /// Updates swapped in but not yet delivered, in version order.
    outbox: Mutex<VecDeque<StoreUpdate>>,
    /// Set while one thread runs the delivery loop.
    delivering: AtomicBool,
}

/// Shared handle to one store instance.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(ReducerConfig::default())
    }
}

impl StateStore {
    pub fn new(config: ReducerConfig) -> Self {
        let (sender, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(Arc::new(GameState::default())),
                write_lock: Mutex::new(()),
                config,
                sender,
                subscribers: Arc::new(AtomicUsize::new(0)),
                listeners: Arc::new(RwLock::new(BTreeMap::new())),
                next_listener: AtomicU64::new(1),
                outbox: Mutex::new(VecDeque::new()),
                delivering: AtomicBool::new(false),
            }),
        }
    }

    /// Immutable view of the current state.
    pub fn snapshot(&self) -> Arc<GameState> {
        self.inner.state.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.state.read().version
    }

    /// Reduce `delta` into the state and notify observers.
    pub fn apply(&self, delta: Delta) -> ApplyReport {
        let report = {
            let _guard = self.inner.write_lock.lock();

            let current = self.snapshot();
            let reduction = reduce(&current, &delta, &self.inner.config);
            let mut next = reduction.state;
            let report = reduction.report;
            next.version = current.version + 1;
            let snapshot = Arc::new(next);
            *self.inner.state.write() = snapshot.clone();

            self.record(&delta, &report, &snapshot);
            self.enqueue(StoreUpdate {
                version: snapshot.version,
                rooms: report.rooms_touched.clone(),
                snapshot,
            });
            report
        };
        self.deliver();
        report
    }

    /// Consume a one-shot UI flag. Returns whether it was raised.
    pub fn take_flag(&self, room: RoomId, flag: UiFlag) -> bool {
        {
            let _guard = self.inner.write_lock.lock();

            let current = self.snapshot();
            let raised = current
                .room(room)
                .is_some_and(|rs| rs.flags.is_raised(flag));
            if !raised {
                return false;
            }

            let mut next = (*current).clone();
            if let Some(rs) = next.rooms.get_mut(&room) {
                rs.flags.take(flag);
            }
            next.version = current.version + 1;
            let snapshot = Arc::new(next);
            *self.inner.state.write() = snapshot.clone();
            self.enqueue(StoreUpdate {
                version: snapshot.version,
                rooms: vec![room],
                snapshot,
            });
        }
        self.deliver();
        true
    }

    /// Async subscription to updates. Drop it to unsubscribe.
    pub fn subscribe(&self) -> StoreSubscription {
        self.inner.subscribers.fetch_add(1, Ordering::SeqCst);
        StoreSubscription {
            receiver: self.inner.sender.subscribe(),
            subscribers: self.inner.subscribers.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.load(Ordering::SeqCst)
    }

    /// Register a synchronous listener.
    pub fn on_update<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&StoreUpdate) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.write().insert(id, Arc::new(listener));
        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Resolve once `predicate` holds for the current state, or fail with
    /// `Cancelled` after `timeout`.
    pub async fn wait_until<F>(
        &self,
        predicate: F,
        timeout: Duration,
    ) -> Result<Arc<GameState>, SyncError>
    where
        F: Fn(&GameState) -> bool,
    {
        // Subscribe before checking so no update slips between the two.
        let mut subscription = self.subscribe();
        let current = self.snapshot();
        if predicate(&current) {
            return Ok(current);
        }

        let wait = async {
            while let Some(update) = subscription.recv().await {
                if predicate(&update.snapshot) {
                    return Ok(update.snapshot);
                }
            }
            Err(SyncError::Cancelled)
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SyncError::Cancelled)?
    }

    /// Must be called with the writer lock held.
    fn enqueue(&self, update: StoreUpdate) {
        self.inner.outbox.lock().push_back(update);
    }

    /// Drain the outbox. One thread delivers at a time; a caller that finds
    /// the loop busy leaves its update to that loop.
    fn deliver(&self) {
        loop {
            if self
                .inner
                .delivering
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            {
                let _delivering = DeliveryGuard(&self.inner.delivering);
                loop {
                    let next = self.inner.outbox.lock().pop_front();
                    match next {
                        Some(update) => self.publish(update),
                        None => break,
                    }
                }
            }
            // Something may have been queued between the last pop and the
            // release of the flag.
            if self.inner.outbox.lock().is_empty() {
                return;
            }
        }
    }

    fn publish(&self, update: StoreUpdate) {
        let listeners: Vec<Arc<Listener>> =
            self.inner.listeners.read().values().cloned().collect();
        for listener in listeners {
            listener(&update);
        }
        // No receivers is fine.
        let _ = self.inner.sender.send(update);
    }

    fn record(&self, delta: &Delta, report: &ApplyReport, snapshot: &GameState) {
        STORE_VERSION.set(snapshot.version as f64);
        for kind in &report.applied {
            EVENTS_APPLIED.with_label_values(&[kind]).inc();
        }
        if report.duplicates > 0 {
            DUPLICATE_EVENTS.inc_by(report.duplicates as f64);
        }
        for violation in &report.violations {
            INTEGRITY_VIOLATIONS
                .with_label_values(&[violation.field.as_str()])
                .inc();
            log_room_event!(
                warn,
                "store",
                violation.room,
                "[arena-sync] Rejected data integrity violation",
                field = violation.field.as_str(),
                player = ?violation.player,
                detail = %violation.detail
            );
        }
        if matches!(delta, Delta::MarkStale { .. } | Delta::ClearStale { .. }) {
            let stale = snapshot.rooms.values().filter(|rs| rs.stale).count();
            STALE_ROOMS.set(stale as f64);
        }
        debug!(
            delta = delta.name(),
            version = snapshot.version,
            applied = report.applied.len(),
            duplicates = report.duplicates,
            "[arena-sync] Delta applied"
        );
    }
}

/// Clears the delivery flag even if a listener panics.
struct DeliveryGuard<'a>(&'a AtomicBool);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Receiver of store updates. Dropping it unsubscribes.
pub struct StoreSubscription {
    receiver: broadcast::Receiver<StoreUpdate>,
    subscribers: Arc<AtomicUsize>,
}

impl StoreSubscription {
    /// Next update, or `None` once the store is gone.
    ///
    /// A lagging subscriber skips ahead: every update carries the full
    /// snapshot, so only the latest matters.
    pub async fn recv(&mut self) -> Option<StoreUpdate> {
        loop {
            match self.receiver.recv().await {
                Ok(update) => return Some(update),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "Store subscriber lagged, skipping ahead");
                    continue;
                }
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<StoreUpdate> {
        loop {
            match self.receiver.try_recv() {
                Ok(update) => return Some(update),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        self.subscribers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registration of a synchronous listener.
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<ListenerMap>,
}

impl ListenerHandle {
    /// Remove the listener now.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().remove(&self.id);
        }
    }
}
