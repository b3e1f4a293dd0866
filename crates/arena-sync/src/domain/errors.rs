//! # Domain Errors
//!
//! Error taxonomy of the sync engine. Every failure crossing the action or
//! command boundary is one of these, never a panic.

use arena_types::{Address, RoomId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::value_objects::LocalId;

/// Field whose monotonic rule a snapshot or event tried to break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonotonicField {
    Phase,
    Round,
    Tier,
    ActiveFlags,
    Counts,
    IsAlive,
    VerifiedHuman,
    SuccessfulVotes,
    EliminationRank,
    /// A raw code the client cannot decode.
    Encoding,
}

impl MonotonicField {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            MonotonicField::Phase => "phase",
            MonotonicField::Round => "round",
            MonotonicField::Tier => "tier",
            MonotonicField::ActiveFlags => "active_flags",
            MonotonicField::Counts => "counts",
            MonotonicField::IsAlive => "is_alive",
            MonotonicField::VerifiedHuman => "verified_human",
            MonotonicField::SuccessfulVotes => "successful_votes",
            MonotonicField::EliminationRank => "elimination_rank",
            MonotonicField::Encoding => "encoding",
        }
    }
}

/// A rejected regression. The prior value was kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    pub room: RoomId,
    pub player: Option<Address>,
    pub field: MonotonicField,
    pub detail: String,
}

impl IntegrityViolation {
    pub fn room(room: RoomId, field: MonotonicField, detail: impl Into<String>) -> Self {
        Self {
            room,
            player: None,
            field,
            detail: detail.into(),
        }
    }

    pub fn player(
        room: RoomId,
        player: Address,
        field: MonotonicField,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            room,
            player: Some(player),
            field,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.player {
            Some(player) => write!(
                f,
                "room {} player {}: {} ({})",
                self.room,
                player,
                self.field.as_str(),
                self.detail
            ),
            None => write!(
                f,
                "room {}: {} ({})",
                self.room,
                self.field.as_str(),
                self.detail
            ),
        }
    }
}

/// Errors returned by ledger adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Network failure or timeout; safe to retry reads.
    #[error("Transient ledger failure: {0}")]
    Transient(String),

    /// The write was mined and reverted.
    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("Session key not registered: {0}")]
    SessionNotFound(Address),
}

/// Sync engine error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network or timeout failure that outlived its retries.
    #[error("Transient remote failure: {0}")]
    TransientRemote(String),

    /// Rejected locally before any remote call.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Session key cannot authorize writes.
    #[error("Session not authorized: {reason} (remaining {remaining_secs}s, usage {usage_count}/{max_usage})")]
    Authorization {
        reason: String,
        remaining_secs: u64,
        usage_count: u64,
        max_usage: u64,
    },

    /// Write reverted on the ledger; the optimistic entry was rolled back.
    #[error("Rejected by ledger: {reason}")]
    RemoteRejection { reason: String },

    /// Optimistic entry not confirmed in time; kept as unconfirmed.
    ///
    /// `submit` still returns `Ok(ActionOutcome::Unconfirmed)` since the
    /// write went through; `ActionOutcome::timeout_error` yields this value.
    #[error("Entry {local_id} not confirmed after {waited_ms}ms")]
    ReconciliationTimeout { local_id: LocalId, waited_ms: u64 },

    #[error("Data integrity violation: {0}")]
    DataIntegrityViolation(IntegrityViolation),

    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether the poller may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientRemote(_))
    }
}

impl From<LedgerError> for SyncError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Transient(msg) => SyncError::TransientRemote(msg),
            LedgerError::Reverted(reason) => SyncError::RemoteRejection { reason },
            LedgerError::RoomNotFound(room) => SyncError::RoomNotFound(room),
            LedgerError::SessionNotFound(key) => SyncError::Authorization {
                reason: format!("session key {} is not registered", key),
                remaining_secs: 0,
                usage_count: 0,
                max_usage: 0,
            },
        }
    }
}

impl From<IntegrityViolation> for SyncError {
    fn from(violation: IntegrityViolation) -> Self {
        SyncError::DataIntegrityViolation(violation)
    }
}
