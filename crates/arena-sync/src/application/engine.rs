//! # Sync Engine
//!
//! Wires one store to every service over a single ledger connection.

use arena_types::RoomId;
use std::sync::Arc;

use crate::application::{
    ActionSubmitter, EventIngestor, PollTrigger, PollerHandle, SessionAuthorizer, SnapshotPoller,
};
use crate::config::SyncConfig;
use crate::ports::{Clock, LedgerReader, LedgerWriter, SessionRegistry};
use crate::store::StateStore;

/// The assembled client. Cloning the handles is cheap; the store is shared.
pub struct SyncEngine {
    pub store: StateStore,
    pub poller: Arc<SnapshotPoller>,
    pub ingestor: Arc<EventIngestor>,
    pub authorizer: Arc<SessionAuthorizer>,
    pub submitter: Arc<ActionSubmitter>,
    pub config: SyncConfig,
    background: Option<(PollerHandle, PollTrigger)>,
}

impl SyncEngine {
    /// Foreground engine: nothing runs until called.
    pub fn new<L>(ledger: Arc<L>, clock: Arc<dyn Clock>, config: SyncConfig) -> Self
    where
        L: LedgerReader + LedgerWriter + SessionRegistry + 'static,
    {
        let store = StateStore::new(config.reducer_config());
        let poller = SnapshotPoller::new(ledger.clone(), store.clone(), config.clone());
        let reads = poller.read_pool();
        let ingestor = EventIngestor::new(ledger.clone(), store.clone(), clock.clone(), config.clone())
            .with_read_pool(reads);
        let authorizer = Arc::new(SessionAuthorizer::new(
            ledger.clone(),
            clock.clone(),
            config.session_status_max_age_secs,
        ));
        let submitter =
            ActionSubmitter::new(ledger, authorizer.clone(), store.clone(), clock, config.clone());

        Self {
            store,
            poller: Arc::new(poller),
            ingestor: Arc::new(ingestor),
            authorizer,
            submitter: Arc::new(submitter),
            config,
            background: None,
        }
    }

    /// Engine with a running poll loop over `rooms`. The ingestor's catch-up
    /// signals and the submitter's join confirmations go to that loop.
    /// Must be called inside a tokio runtime.
    pub fn start<L>(ledger: Arc<L>, clock: Arc<dyn Clock>, config: SyncConfig, rooms: Vec<RoomId>) -> Self
    where
        L: LedgerReader + LedgerWriter + SessionRegistry + 'static,
    {
        let mut engine = Self::new(ledger.clone(), clock.clone(), config.clone());
        let (handle, trigger) = engine.poller.clone().spawn(rooms);

        let ingestor = EventIngestor::new(ledger.clone(), engine.store.clone(), clock.clone(), config.clone())
            .with_read_pool(engine.poller.read_pool())
            .with_catch_up(trigger.clone());
        let submitter = ActionSubmitter::new(
            ledger,
            engine.authorizer.clone(),
            engine.store.clone(),
            clock,
            config,
        )
        .with_poll_trigger(trigger.clone());

        engine.ingestor = Arc::new(ingestor);
        engine.submitter = Arc::new(submitter);
        engine.background = Some((handle, trigger));
        engine
    }

    /// Trigger of the background loop, if started.
    pub fn poll_trigger(&self) -> Option<&PollTrigger> {
        self.background.as_ref().map(|(_, trigger)| trigger)
    }

    /// Stop the background loop. Subscriptions are owned by their holders.
    pub fn shutdown(&mut self) {
        if let Some((handle, _)) = self.background.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedger;
    use crate::ports::ManualClock;
    use arena_types::{Address, Tier};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_started_engine_polls_watched_rooms() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
        let room = ledger.create_room(Address([1; 20]), Tier::Standard);

        let mut engine = SyncEngine::start(ledger, clock, SyncConfig::for_testing(), vec![room]);
        engine
            .store
            .wait_until(|s| s.room(room).is_some(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(engine.poll_trigger().is_some());
        engine.shutdown();
        assert!(engine.poll_trigger().is_none());
    }
}
