//! # Arena Sync
//!
//! Game-state synchronization for the Turing Arena battle royale.
//!
//! The ledger is the source of truth and reaches the client two ways:
//! periodic snapshots (room and player reads) and the event log (chat,
//! votes, eliminations, phase changes). Both feed one reducer, which owns
//! every mutation of the [`StateStore`]. Outgoing actions show up
//! immediately as optimistic entries and are reconciled against the log.
//!
//! ## Guarantees
//!
//! | Property | How |
//! |----------|-----|
//! | Delivery-order independence | Events are deduplicated by `(tx_hash, log_index)` and applied in `(block, log_index)` order |
//! | No regressions | Monotonic fields reject backwards snapshots as integrity violations |
//! | No gaps | The event cursor advances only past applied ranges |
//! | One write per key | Writes hold the session key's lock via [`SessionCapability`] |
//!
//! ## Module Structure
//!
//! ```text
//! arena-sync/
//! ├── domain/          # Room, Player, GameState, deltas, errors, invariants, session keys
//! ├── algorithms/      # Reducer, normalization, ordering, backoff
//! ├── store/           # StateStore: atomic swaps and observers
//! ├── ports/           # Ledger and clock traits
//! ├── adapters/        # InMemoryLedger
//! ├── application/     # Poller, ingestor, authorizer, submitter, engine
//! └── config.rs        # SyncConfig
//! ```

#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod store;

pub use adapters::InMemoryLedger;
pub use algorithms::{reduce, ApplyReport, BackoffPolicy, ReducerConfig, Reduction};
pub use application::{
    ActionIntent, ActionOutcome, ActionSubmitter, EventBatch, EventIngestor, EventSubscription,
    PollTrigger, PollerHandle, SessionAuthorizer, SnapshotPoller, SyncEngine,
};
pub use config::{SyncConfig, MAX_MESSAGE_LEN};
pub use domain::{
    Delta, EntryStatus, GameState, IntegrityViolation, LedgerError, LocalId, MonotonicField,
    Player, Room, RoomFilter, RoomState, SessionCapability, SessionHandle, SessionState,
    SessionStatus, SyncError, UiFlag,
};
pub use ports::{Clock, LedgerReader, LedgerWriter, ManualClock, SessionRegistry, SystemClock};
pub use store::{ListenerHandle, StateStore, StoreSubscription, StoreUpdate};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
