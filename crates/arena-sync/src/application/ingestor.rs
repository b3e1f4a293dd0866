//! # Event Ingestor
//!
//! Pulls arena logs for a room, first the recent history and then every new
//! block, and feeds them through the reducer.
//!
//! ## Gap freedom
//!
//! The cursor only moves past a block range once that range was fetched and
//! applied. A range that still fails after its retries is left in place, a
//! catch-up signal goes to the poller, and the same range is tried again on
//! the next follow tick.

use arena_telemetry::{log_room_event, CATCH_UP_SIGNALS, INTEGRITY_VIOLATIONS};
use arena_types::{LedgerLog, RoomId};
use futures::Stream;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::algorithms::{dedup_and_sort, normalize_logs, retry_with_backoff, ApplyReport, BackoffPolicy};
use crate::application::poller::PollTrigger;
use crate::config::SyncConfig;
use crate::domain::{Delta, LedgerError, NormalizedEvent, SyncError};
use crate::ports::{Clock, LedgerReader};
use crate::store::StateStore;

const BATCH_CHANNEL_CAPACITY: usize = 64;

struct Pull {
    /// Next block to fetch.
    cursor: Option<u64>,
    batches: Vec<EventBatch>,
    /// Range that failed, with the error.
    failure: Option<(u64, u64, SyncError)>,
}

/// One applied range of logs.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub room: RoomId,
    pub from_block: u64,
    pub to_block: u64,
    /// Events of the range, deduplicated within the batch, in canonical
    /// order. `report` tells which of them the store already had.
    pub events: Vec<NormalizedEvent>,
    pub report: ApplyReport,
}

/// Live feed of one room's batches. Dropping it stops the feed.
pub struct EventSubscription {
    room: RoomId,
    batches: ReceiverStream<EventBatch>,
    task: JoinHandle<()>,
}

impl EventSubscription {
    pub fn room(&self) -> RoomId {
        self.room
    }

    /// Next batch, or `None` once cancelled.
    pub async fn next_batch(&mut self) -> Option<EventBatch> {
        self.batches.next().await
    }

    /// Stop this subscription only.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Stream for EventSubscription {
    type Item = EventBatch;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.batches).poll_next(cx)
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Event ingestor.
pub struct EventIngestor {
    reader: Arc<dyn LedgerReader>,
    store: StateStore,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    policy: BackoffPolicy,
    reads: Arc<Semaphore>,
    catch_up: Option<PollTrigger>,
}

impl EventIngestor {
    pub fn new(
        reader: Arc<dyn LedgerReader>,
        store: StateStore,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            reader,
            store,
            clock,
            policy: BackoffPolicy::from_config(&config),
            reads: Arc::new(Semaphore::new(config.max_concurrent_reads.max(1))),
            config,
            catch_up: None,
        }
    }

    /// Share the poller's read pool.
    pub fn with_read_pool(mut self, reads: Arc<Semaphore>) -> Self {
        self.reads = reads;
        self
    }

    /// Where to send catch-up signals for ranges that cannot be fetched.
    pub fn with_catch_up(mut self, trigger: PollTrigger) -> Self {
        self.catch_up = Some(trigger);
        self
    }

    /// Apply raw logs for `room` directly. Logs of other rooms are ignored.
    pub fn ingest(&self, room: RoomId, logs: &[LedgerLog]) -> EventBatch {
        let logs: Vec<LedgerLog> = logs.iter().filter(|l| l.room_id == room).cloned().collect();
        let from_block = logs.iter().map(|l| l.block_number).min().unwrap_or(0);
        let to_block = logs.iter().map(|l| l.block_number).max().unwrap_or(0);
        self.ingest_range(room, from_block, to_block, &logs)
    }

    /// Follow `room` from `from_block`, or from the history window behind
    /// head when `None`.
    pub fn subscribe(self: &Arc<Self>, room: RoomId, from_block: Option<u64>) -> EventSubscription {
        let (sender, receiver) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let ingestor = self.clone();
        let task = tokio::spawn(async move {
            ingestor.follow(room, from_block, sender).await;
        });
        log_room_event!(info, "ingestor", room, "[arena-sync] Event subscription started", from_block = ?from_block);
        EventSubscription {
            room,
            batches: ReceiverStream::new(receiver),
            task,
        }
    }

    /// Fetch and apply everything from `from_block` (or the history window)
    /// up to head, once.
    pub async fn backfill(
        &self,
        room: RoomId,
        from_block: Option<u64>,
    ) -> Result<Vec<EventBatch>, SyncError> {
        let pull = self.pull(room, from_block).await;
        match pull.failure {
            Some((_, _, err)) => Err(err),
            None => Ok(pull.batches),
        }
    }

    async fn follow(&self, room: RoomId, from_block: Option<u64>, sender: mpsc::Sender<EventBatch>) {
        let mut cursor = from_block;
        loop {
            let pull = self.pull(room, cursor).await;
            cursor = pull.cursor;
            for batch in pull.batches {
                if !batch.events.is_empty() && sender.send(batch).await.is_err() {
                    debug!(room_id = %room, "Event subscriber gone");
                    return;
                }
            }
            if let Some((from, to, err)) = pull.failure {
                self.signal_catch_up(room, from, to, &err);
            }
            if sender.is_closed() {
                return;
            }
            tokio::time::sleep(self.config.follow_interval()).await;
        }
    }

    /// Walk the cursor to head in bounded chunks, stopping at the first
    /// range that cannot be fetched.
    async fn pull(&self, room: RoomId, cursor: Option<u64>) -> Pull {
        let head = match self.read("block_number", || self.reader.block_number()).await {
            Ok(head) => head,
            Err(err) => {
                let at = cursor.unwrap_or(0);
                return Pull {
                    cursor,
                    batches: Vec::new(),
                    failure: Some((at, at, err)),
                };
            }
        };

        let range = self.config.max_block_range.max(1);
        let mut next =
            cursor.unwrap_or_else(|| head.saturating_sub(self.config.history_window_blocks));
        let mut batches = Vec::new();
        while next <= head {
            let to = next.saturating_add(range - 1).min(head);
            match self.read("room_logs", || self.reader.room_logs(room, next, to)).await {
                Ok(logs) => {
                    batches.push(self.ingest_range(room, next, to, &logs));
                    next = to + 1;
                }
                Err(err) => {
                    return Pull {
                        cursor: Some(next),
                        batches,
                        failure: Some((next, to, err)),
                    };
                }
            }
        }
        Pull {
            cursor: Some(next),
            batches,
            failure: None,
        }
    }

    fn ingest_range(&self, room: RoomId, from_block: u64, to_block: u64, logs: &[LedgerLog]) -> EventBatch {
        let (events, violations) = normalize_logs(logs, self.clock.now_secs());
        for violation in &violations {
            INTEGRITY_VIOLATIONS
                .with_label_values(&[violation.field.as_str()])
                .inc();
            log_room_event!(warn, "ingestor", room, "[arena-sync] Undecodable log dropped", detail = %violation.detail);
        }

        // What the subscriber sees does not depend on what other feeds
        // already applied.
        let canonical = dedup_and_sort(&events, &HashSet::new());

        let mut report = self.store.apply(Delta::Events { room, events });
        report.violations.extend(violations);
        if !canonical.events.is_empty() {
            log_room_event!(
                debug,
                "ingestor",
                room,
                "[arena-sync] Applied event batch",
                from_block = from_block,
                to_block = to_block,
                events = canonical.events.len(),
                duplicates = report.duplicates
            );
        }
        EventBatch {
            room,
            from_block,
            to_block,
            events: canonical.events,
            report,
        }
    }

    fn signal_catch_up(&self, room: RoomId, from_block: u64, to_block: u64, err: &SyncError) {
        CATCH_UP_SIGNALS.inc();
        log_room_event!(
            warn,
            "ingestor",
            room,
            "[arena-sync] Log range unavailable, requesting catch-up",
            from_block = from_block,
            to_block = to_block,
            error = %err
        );
        if let Some(trigger) = &self.catch_up {
            trigger.catch_up(room);
        }
    }

    async fn read<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, LedgerError>>,
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
        Ok(retried.value)
    }
}

impl std::fmt::Debug for EventIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventIngestor")
            .field("catch_up", &self.catch_up.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedger;
    use crate::ports::ManualClock;
    use arena_types::{Address, LedgerEvent, Phase, Tier};
    use std::time::Duration;

    fn setup() -> (Arc<InMemoryLedger>, StateStore, Arc<EventIngestor>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
        let store = StateStore::default();
        let ingestor = Arc::new(EventIngestor::new(
            ledger.clone(),
            store.clone(),
            clock,
            SyncConfig::for_testing(),
        ));
        (ledger, store, ingestor)
    }

    fn chat(sender: u8, content: &str) -> LedgerEvent {
        LedgerEvent::NewMessage {
            sender: Address([sender; 20]),
            content: content.into(),
            timestamp: 1_000,
        }
    }

    #[tokio::test]
    async fn test_ingest_dedups_and_filters_rooms() {
        let (ledger, store, ingestor) = setup();
        let room = ledger.create_room(Address([1; 20]), Tier::Quick);
        let receipt = ledger.emit(room, vec![chat(2, "hi"), chat(3, "yo")]);

        let batch = ingestor.ingest(room, &receipt.logs);
        assert_eq!(batch.events.len(), 2);
        let again = ingestor.ingest(room, &receipt.logs);
        assert!(again.report.applied.is_empty());
        assert_eq!(again.report.duplicates, 2);
        assert_eq!(store.snapshot().room(room).unwrap().message_count(), 2);

        let other = ingestor.ingest(RoomId(99), &receipt.logs);
        assert!(other.events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_delivers_history_then_follows() {
        let (ledger, store, ingestor) = setup();
        let room = ledger.create_room(Address([1; 20]), Tier::Quick);
        ledger.emit(room, vec![chat(2, "early")]);

        let mut subscription = ingestor.subscribe(room, None);
        let first = subscription.next_batch().await.unwrap();
        assert_eq!(first.events.len(), 1);

        ledger.emit(room, vec![chat(3, "later")]);
        let second = subscription.next_batch().await.unwrap();
        assert_eq!(second.events.len(), 1);
        assert!(second.from_block > first.to_block);
        assert_eq!(store.snapshot().room(room).unwrap().message_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_queried_in_chunks() {
        let (ledger, store, ingestor) = setup();
        let room = ledger.create_room(Address([1; 20]), Tier::Quick);
        ledger.emit(room, vec![chat(2, "a")]);
        ledger.advance_blocks(250);
        ledger.emit(room, vec![chat(2, "b")]);

        let mut subscription = ingestor.subscribe(room, Some(0));
        let mut total = 0;
        while total < 2 {
            let batch = subscription.next_batch().await.unwrap();
            assert!(batch.to_block - batch.from_block < 100);
            total += batch.events.len();
        }
        assert_eq!(store.snapshot().room(room).unwrap().message_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_range_is_retried_without_gap() {
        let (ledger, store, ingestor) = setup();
        let room = ledger.create_room(Address([1; 20]), Tier::Quick);
        ledger.emit(room, vec![chat(2, "kept")]);
        ledger.fail_next_log_reads(5);

        let mut subscription = ingestor.subscribe(room, Some(0));
        let batch = subscription.next_batch().await.unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(store.snapshot().room(room).unwrap().message_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_signal_reaches_poller() {
        let (ledger, store, _) = setup();
        let room = ledger.create_room(Address([1; 20]), Tier::Quick);
        let poller = Arc::new(crate::application::SnapshotPoller::new(
            ledger.clone(),
            store.clone(),
            SyncConfig::for_testing(),
        ));
        let (_handle, trigger) = poller.spawn(Vec::new());
        let ingestor = Arc::new(
            EventIngestor::new(
                ledger.clone(),
                store.clone(),
                Arc::new(ManualClock::new(1_000)),
                SyncConfig::for_testing(),
            )
            .with_catch_up(trigger),
        );

        ledger.fail_next_log_reads(3);
        let _subscription = ingestor.subscribe(room, Some(0));
        store
            .wait_until(|s| s.room(room).is_some_and(|rs| rs.room.is_some()), Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backfill_reports_failure_after_partial_progress() {
        let (ledger, store, ingestor) = setup();
        let room = ledger.create_room(Address([1; 20]), Tier::Quick);
        ledger.emit(room, vec![chat(2, "one")]);
        let batches = ingestor.backfill(room, None).await.unwrap();
        assert_eq!(batches.iter().map(|b| b.events.len()).sum::<usize>(), 1);

        ledger.fail_next_log_reads(10);
        assert!(ingestor.backfill(room, None).await.unwrap_err().is_transient());
        assert_eq!(store.snapshot().room(room).unwrap().message_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_only_that_subscription() {
        let (ledger, _, ingestor) = setup();
        let room = ledger.create_room(Address([1; 20]), Tier::Quick);
        let first = ingestor.subscribe(room, Some(0));
        let mut second = ingestor.subscribe(room, Some(0));
        first.cancel();

        ledger.set_phase(room, Phase::Phase1, 1).unwrap();
        let batch = second.next_batch().await.unwrap();
        assert_eq!(batch.events.len(), 1);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(first.is_finished());
    }
}
