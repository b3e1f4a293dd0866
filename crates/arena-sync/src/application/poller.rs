//! # Snapshot Poller
//!
//! Reads authoritative room and player snapshots and applies them to the
//! store.
//!
//! Every remote read goes through a shared semaphore and the retry policy.
//! When retries run out the room is marked stale and its last snapshot is
//! kept; the next successful sync clears the mark.

use arena_telemetry::{log_room_event, HistogramTimer, SNAPSHOT_POLLS, SNAPSHOT_POLL_DURATION};
use arena_types::RoomId;
use futures::future::{join_all, try_join, try_join_all};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::algorithms::{normalize_player, normalize_room, retry_with_backoff, BackoffPolicy};
use crate::config::SyncConfig;
use crate::domain::{Delta, LedgerError, SyncError};
use crate::ports::LedgerReader;
use crate::store::StateStore;

const TRIGGER_CAPACITY: usize = 64;

/// Why the background loop should wake early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollRequest {
    /// Re-sync every watched room (page focus).
    All,
    /// Re-sync one room now (catch-up after an event gap).
    Room(RoomId),
    /// Add a room to the watched set and sync it.
    Watch(RoomId),
}

/// Wakes the background loop. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PollTrigger {
    sender: mpsc::Sender<PollRequest>,
}

impl PollTrigger {
    /// Sync every watched room now.
    pub fn poll_now(&self) {
        self.send(PollRequest::All);
    }

    /// Sync `room` now.
    pub fn catch_up(&self, room: RoomId) {
        self.send(PollRequest::Room(room));
    }

    pub fn watch(&self, room: RoomId) {
        self.send(PollRequest::Watch(room));
    }

    fn send(&self, request: PollRequest) {
        // A full queue already guarantees a wake-up.
        if self.sender.try_send(request).is_err() {
            debug!(?request, "Poll trigger queue full, coalescing");
        }
    }
}

/// Owned background poll loop. Dropping it stops the loop.
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Snapshot poller.
pub struct SnapshotPoller {
    reader: Arc<dyn LedgerReader>,
    store: StateStore,
    config: SyncConfig,
    policy: BackoffPolicy,
    reads: Arc<Semaphore>,
}

impl SnapshotPoller {
    pub fn new(reader: Arc<dyn LedgerReader>, store: StateStore, config: SyncConfig) -> Self {
        let reads = Arc::new(Semaphore::new(config.max_concurrent_reads.max(1)));
        Self::with_read_pool(reader, store, config, reads)
    }

    /// Share a read pool with other components.
    pub fn with_read_pool(
        reader: Arc<dyn LedgerReader>,
        store: StateStore,
        config: SyncConfig,
        reads: Arc<Semaphore>,
    ) -> Self {
        Self {
            reader,
            store,
            policy: BackoffPolicy::from_config(&config),
            config,
            reads,
        }
    }

    pub fn read_pool(&self) -> Arc<Semaphore> {
        self.reads.clone()
    }

    /// Fetch the room snapshot.
    pub async fn poll_room(&self, room: RoomId) -> Result<Delta, SyncError> {
        let info = self
            .read("room_info", || self.reader.room_info(room))
            .await?;
        Ok(Delta::RoomSnapshot(normalize_room(&info)?))
    }

    /// Fetch every player of the room as one roster.
    pub async fn poll_players(&self, room: RoomId) -> Result<Delta, SyncError> {
        let addresses = self
            .read("room_players", || self.reader.room_players(room))
            .await?;
        let infos = try_join_all(addresses.iter().map(|&address| {
            self.read("player_info", move || self.reader.player_info(room, address))
        }))
        .await?;
        Ok(Delta::PlayerRoster {
            room,
            players: infos.iter().map(normalize_player).collect(),
        })
    }

    /// Poll the room and its roster and apply both. Marks the room stale
    /// when a transient failure outlives its retries.
    pub async fn sync_room(&self, room: RoomId) -> Result<(), SyncError> {
        let _timer = HistogramTimer::new(&SNAPSHOT_POLL_DURATION);
        let polled = try_join(self.poll_room(room), self.poll_players(room)).await;

        match polled {
            Ok((snapshot, roster)) => {
                self.store.apply(snapshot);
                self.store.apply(roster);
                if self.is_stale(room) {
                    self.store.apply(Delta::ClearStale { room });
                    log_room_event!(info, "poller", room, "[arena-sync] Room recovered from stale");
                }
                SNAPSHOT_POLLS.with_label_values(&["ok"]).inc();
                Ok(())
            }
            Err(err) if err.is_transient() => {
                SNAPSHOT_POLLS.with_label_values(&["stale"]).inc();
                if !self.is_stale(room) {
                    self.store.apply(Delta::MarkStale { room });
                }
                log_room_event!(
                    warn,
                    "poller",
                    room,
                    "[arena-sync] Snapshot unavailable, keeping last known state",
                    error = %err
                );
                Err(err)
            }
            Err(err) => {
                SNAPSHOT_POLLS.with_label_values(&["failed"]).inc();
                log_room_event!(warn, "poller", room, "[arena-sync] Snapshot poll failed", error = %err);
                Err(err)
            }
        }
    }

    /// Sync several rooms concurrently. The read pool bounds how many remote
    /// reads are in flight.
    pub async fn sync_rooms(&self, rooms: &[RoomId]) -> Vec<(RoomId, Result<(), SyncError>)> {
        let results = join_all(rooms.iter().map(|&room| self.sync_room(room))).await;
        rooms.iter().copied().zip(results).collect()
    }

    /// Lobby: read the room count and apply every room snapshot.
    pub async fn discover_rooms(&self) -> Result<Vec<RoomId>, SyncError> {
        let count = self.read("room_count", || self.reader.room_count()).await?;
        let rooms: Vec<RoomId> = (1..=count).map(RoomId).collect();

        let results = join_all(rooms.iter().map(|&room| self.poll_room(room))).await;

        for (room, result) in rooms.iter().copied().zip(results) {
            match result {
                Ok(snapshot) => {
                    self.store.apply(snapshot);
                    if self.is_stale(room) {
                        self.store.apply(Delta::ClearStale { room });
                    }
                }
                Err(err) if err.is_transient() => {
                    if self.store.snapshot().room(room).is_some() && !self.is_stale(room) {
                        self.store.apply(Delta::MarkStale { room });
                    }
                    log_room_event!(warn, "poller", room, "[arena-sync] Lobby read failed", error = %err);
                }
                Err(err) => {
                    log_room_event!(warn, "poller", room, "[arena-sync] Lobby entry skipped", error = %err);
                }
            }
        }
        info!(rooms = count, "[arena-sync] Lobby discovered");
        Ok(rooms)
    }

    /// Start the background loop over `rooms`.
    pub fn spawn(self: Arc<Self>, rooms: Vec<RoomId>) -> (PollerHandle, PollTrigger) {
        let (sender, mut receiver) = mpsc::channel(TRIGGER_CAPACITY);
        let trigger = PollTrigger { sender };
        let interval = self.config.poll_interval();

        let task = tokio::spawn(async move {
            let mut watched: BTreeSet<RoomId> = rooms.into_iter().collect();
            let mut triggers_open = true;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(rooms = watched.len(), "[arena-sync] Snapshot poller started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let rooms: Vec<RoomId> = watched.iter().copied().collect();
                        self.sync_rooms(&rooms).await;
                    }
                    request = receiver.recv(), if triggers_open => match request {
                        Some(PollRequest::All) => {
                            let rooms: Vec<RoomId> = watched.iter().copied().collect();
                            self.sync_rooms(&rooms).await;
                        }
                        Some(PollRequest::Room(room)) => {
                            let _ = self.sync_room(room).await;
                        }
                        Some(PollRequest::Watch(room)) => {
                            watched.insert(room);
                            let _ = self.sync_room(room).await;
                        }
                        // Every trigger dropped; keep polling on the interval.
                        None => triggers_open = false,
                    },
                }
            }
        });

        (PollerHandle { task }, trigger)
    }

    fn is_stale(&self, room: RoomId) -> bool {
        self.store.snapshot().room(room).is_some_and(|rs| rs.stale)
    }

    /// One remote read: shared permit plus retry.
    async fn read<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let reads = &self.reads;
        let retried = retry_with_backoff(&self.policy, what, || {
            let call = op();
            async move {
                let _permit = reads
                    .acquire()
                    .await
                    .map_err(|_| LedgerError::Transient("read pool closed".into()))?;
                call.await
            }
        })
        .await?;
        if retried.attempts > 1 {
            SNAPSHOT_POLLS.with_label_values(&["retried"]).inc();
        }
        Ok(retried.value)
    }
}
