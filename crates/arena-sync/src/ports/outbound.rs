//! # Outbound Ports
//!
//! The ledger is reached through three traits so the services can run
//! against a node client or the in-memory ledger alike.

use arena_types::{
    Address, LedgerLog, LedgerWrite, PlayerInfo, RoomId, RoomInfo, SessionRecord, TxReceipt,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::{LedgerError, SessionCapability};

/// Read side of the arena contract.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Number of rooms created so far. Room ids run `1..=count`.
    async fn room_count(&self) -> Result<u64, LedgerError>;

    async fn room_info(&self, room: RoomId) -> Result<RoomInfo, LedgerError>;

    async fn player_info(&self, room: RoomId, player: Address) -> Result<PlayerInfo, LedgerError>;

    /// Addresses of everyone who joined `room`.
    async fn room_players(&self, room: RoomId) -> Result<Vec<Address>, LedgerError>;

    /// Current head block.
    async fn block_number(&self) -> Result<u64, LedgerError>;

    /// Arena logs for `room` in the inclusive block range `from..=to`.
    async fn room_logs(
        &self,
        room: RoomId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LedgerLog>, LedgerError>;
}

/// Session-key registry.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn session_record(&self, key: Address) -> Result<SessionRecord, LedgerError>;
}

/// Write side. Implementations sign through the capability and must not
/// retry on their own.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn submit(
        &self,
        capability: &SessionCapability,
        write: LedgerWrite,
    ) -> Result<TxReceipt, LedgerError>;
}

/// Wall clock in unix seconds.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Settable clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(now_secs),
        }
    }

    pub fn set(&self, now_secs: u64) {
        self.now.store(now_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
