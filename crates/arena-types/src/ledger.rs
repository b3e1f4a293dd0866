//! # Raw Ledger Records
//!
//! What the arena contract hands back from reads, event-log queries and
//! write receipts. Codes are kept raw here (`u8` phase/tier, rank `0` for
//! "unset"); `arena-sync` normalizes them into typed domain values.

use serde::{Deserialize, Serialize};

use crate::entities::{Address, DedupKey, EventPosition, RoomId, Tier, TxHash, U256};

// =============================================================================
// SNAPSHOT READS
// =============================================================================

/// Room snapshot as returned by the contract's room-info read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub creator: Address,
    /// Raw tier code (0..=2).
    pub tier: u8,
    /// Raw phase code (0..=4).
    pub phase: u8,
    pub entry_fee: U256,
    pub prize_pool: U256,
    pub start_block: u64,
    pub current_round: u64,
    pub max_players: u32,
    pub player_count: u32,
    pub alive_count: u32,
    pub eliminated_count: u32,
    pub is_active: bool,
    pub is_ended: bool,
}

/// Player snapshot as returned by the contract's player-info read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub address: Address,
    /// Opaque, decayed by the contract.
    pub humanity_score: i64,
    pub is_alive: bool,
    pub is_verified_human: bool,
    pub join_block: u64,
    pub elimination_block: u64,
    /// `0` while the player is unranked.
    pub elimination_rank: u32,
    pub last_action_block: u64,
    pub action_count: u64,
    pub successful_votes: u64,
}

/// Session-key registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub owner: Address,
    /// Unix seconds.
    pub expires_at: u64,
    pub max_usage: u64,
    pub usage_count: u64,
    pub is_revoked: bool,
}

impl SessionRecord {
    /// `now < expiry AND usage < max AND !revoked`.
    pub fn is_valid_at(&self, now_secs: u64) -> bool {
        now_secs < self.expires_at && self.usage_count < self.max_usage && !self.is_revoked
    }
}

// =============================================================================
// EVENT LOG
// =============================================================================

/// Decoded payload of one arena log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    NewMessage {
        sender: Address,
        content: String,
        /// Block timestamp, unix seconds.
        timestamp: u64,
    },
    VoteCast {
        voter: Address,
        suspect: Address,
        round: u64,
    },
    PlayerEliminated {
        player: Address,
        eliminated_by: Address,
        reason: String,
        final_score: i64,
        timestamp: u64,
    },
    PhaseAdvanced {
        /// Raw phase code.
        phase: u8,
        round: u64,
    },
}

impl LedgerEvent {
    /// Log topic name, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::NewMessage { .. } => "NewMessage",
            LedgerEvent::VoteCast { .. } => "VoteCast",
            LedgerEvent::PlayerEliminated { .. } => "PlayerEliminated",
            LedgerEvent::PhaseAdvanced { .. } => "PhaseAdvanced",
        }
    }
}

/// One arena log with its ledger coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLog {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub log_index: u32,
    pub room_id: RoomId,
    pub event: LedgerEvent,
}

impl LedgerLog {
    /// Canonical order key.
    pub fn position(&self) -> EventPosition {
        EventPosition::new(self.block_number, self.log_index)
    }

    /// Identity for deduplication.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            tx_hash: self.tx_hash,
            log_index: self.log_index,
        }
    }
}

// =============================================================================
// WRITES
// =============================================================================

/// A state-changing call against the arena contract (or its payment token).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerWrite {
    PostMessage { room: RoomId, content: String },
    CastVote { room: RoomId, suspect: Address },
    /// Payment-token allowance for the arena contract.
    ApproveEntryFee { amount: U256 },
    JoinRoom { room: RoomId, entry_fee: U256 },
    ClaimReward { room: RoomId },
    CreateRoom {
        tier: Tier,
        max_players: u32,
        entry_fee: U256,
    },
}

impl LedgerWrite {
    /// Method name, for diagnostics.
    pub fn method(&self) -> &'static str {
        match self {
            LedgerWrite::PostMessage { .. } => "postMessage",
            LedgerWrite::CastVote { .. } => "castVote",
            LedgerWrite::ApproveEntryFee { .. } => "approve",
            LedgerWrite::JoinRoom { .. } => "joinRoom",
            LedgerWrite::ClaimReward { .. } => "claimReward",
            LedgerWrite::CreateRoom { .. } => "createRoom",
        }
    }
}

/// Receipt of a mined write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// Arena logs emitted by the transaction.
    pub logs: Vec<LedgerLog>,
}
