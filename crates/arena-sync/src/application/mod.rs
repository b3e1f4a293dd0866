//! # Application Module
//!
//! Services that drive the store from the ledger and back.

pub mod authorizer;
pub mod engine;
pub mod ingestor;
pub mod poller;
pub mod submitter;

pub use authorizer::SessionAuthorizer;
pub use engine::SyncEngine;
pub use ingestor::{EventBatch, EventIngestor, EventSubscription};
pub use poller::{PollRequest, PollTrigger, PollerHandle, SnapshotPoller};
pub use submitter::{ActionIntent, ActionOutcome, ActionSubmitter, ROOM_FEE_RANGE, ROOM_SIZE_RANGE};
