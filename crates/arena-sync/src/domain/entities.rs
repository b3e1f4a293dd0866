//! # Domain Entities
//!
//! The store's model: rooms, players, chat, votes, eliminations and pending
//! actions, grouped per room in [`RoomState`] and across rooms in
//! [`GameState`].

use arena_types::{Address, DedupKey, EventPosition, Phase, RoomId, Tier, U256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::value_objects::{
    ActionKind, EntryStatus, LocalId, MessageKind, RoomFilter, ScoreBand, UiFlag,
    SUSPECT_THRESHOLD,
};

// =============================================================================
// ROOM & PLAYER
// =============================================================================

/// Authoritative room fields, as last accepted from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub creator: Address,
    pub tier: Tier,
    pub phase: Phase,
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

impl Room {
    /// Recompute the active/ended pair from the phase.
    pub fn sync_activity(&mut self) {
        self.is_active = self.phase.is_active();
        self.is_ended = self.phase.is_ended();
    }

    /// Lobby room with free seats.
    pub fn is_joinable(&self) -> bool {
        self.phase == Phase::Waiting && self.player_count < self.max_players
    }
}

/// Per-room player record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub address: Address,
    pub humanity_score: i64,
    pub is_alive: bool,
    pub is_verified_human: bool,
    pub join_block: u64,
    pub elimination_block: u64,
    /// `None` until the ledger ranks the elimination.
    pub elimination_rank: Option<u32>,
    pub last_action_block: u64,
    pub action_count: u64,
    pub successful_votes: u64,
}

impl Player {
    pub fn score_band(&self) -> ScoreBand {
        ScoreBand::from_score(self.humanity_score)
    }

    pub fn is_suspected(&self) -> bool {
        self.humanity_score < SUSPECT_THRESHOLD
    }
}

// =============================================================================
// ROOM LOG ENTRIES
// =============================================================================

/// A chat line, confirmed or provisional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub sender: Address,
    pub content: String,
    pub kind: MessageKind,
    /// Unix seconds.
    pub timestamp: u64,
    pub status: EntryStatus,
    /// Set once confirmed.
    pub position: Option<EventPosition>,
    /// Set once confirmed.
    pub dedup_key: Option<DedupKey>,
    /// Set for entries that started as optimistic.
    pub local_id: Option<LocalId>,
}

/// One cast vote. The list of these is an append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub voter: Address,
    pub suspect: Address,
    pub round: u64,
    pub timestamp: u64,
    pub status: EntryStatus,
    pub position: Option<EventPosition>,
    pub dedup_key: Option<DedupKey>,
    pub local_id: Option<LocalId>,
}

/// Kill-feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elimination {
    pub player: Address,
    pub eliminated_by: Address,
    pub reason: String,
    pub final_score: i64,
    pub timestamp: u64,
    pub position: EventPosition,
}

/// Provisional action with no log entry of its own (joins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub local_id: LocalId,
    pub kind: ActionKind,
    pub actor: Address,
    pub created_at: u64,
    pub status: EntryStatus,
}

/// Sort key for lists mixing confirmed and provisional entries:
/// confirmed by position first, provisional after by submission time.
pub(crate) fn entry_order(
    position: Option<EventPosition>,
    timestamp: u64,
) -> (bool, Option<EventPosition>, u64) {
    (position.is_none(), position, timestamp)
}

// =============================================================================
// UI FLAGS
// =============================================================================

/// One-shot triggers, raised once per transition and reset on consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UiFlags {
    pub countdown: bool,
    pub phase_transition: bool,
    pub victory: bool,
    pub kill_feed: bool,
}

impl UiFlags {
    fn slot(&mut self, flag: UiFlag) -> &mut bool {
        match flag {
            UiFlag::Countdown => &mut self.countdown,
            UiFlag::PhaseTransition => &mut self.phase_transition,
            UiFlag::Victory => &mut self.victory,
            UiFlag::KillFeed => &mut self.kill_feed,
        }
    }

    pub fn raise(&mut self, flag: UiFlag) {
        *self.slot(flag) = true;
    }

    /// Read and reset.
    pub fn take(&mut self, flag: UiFlag) -> bool {
        std::mem::replace(self.slot(flag), false)
    }

    pub fn is_raised(&self, flag: UiFlag) -> bool {
        match flag {
            UiFlag::Countdown => self.countdown,
            UiFlag::PhaseTransition => self.phase_transition,
            UiFlag::Victory => self.victory,
            UiFlag::KillFeed => self.kill_feed,
        }
    }

    /// Flags raised by moving from `from` to `to`.
    pub fn raise_for_transition(&mut self, from: Phase, to: Phase) {
        if to <= from {
            return;
        }
        self.raise(UiFlag::PhaseTransition);
        if from == Phase::Waiting {
            self.raise(UiFlag::Countdown);
        }
        if to == Phase::Ended {
            self.raise(UiFlag::Victory);
        }
    }
}

// =============================================================================
// AGGREGATES
// =============================================================================

/// Everything known about one room.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomState {
    /// `None` until the first accepted room snapshot.
    pub room: Option<Room>,
    pub players: BTreeMap<Address, Player>,
    /// Sorted: confirmed by position, then provisional by time.
    pub messages: Vec<ChatEntry>,
    /// Vote audit trail, same order as `messages`.
    pub votes: Vec<VoteRecord>,
    /// Newest first, bounded.
    pub kill_feed: Vec<Elimination>,
    /// Every player seen in an elimination event.
    pub eliminated: BTreeSet<Address>,
    pub pending_actions: Vec<PendingAction>,
    /// Dedup keys already applied.
    pub seen: HashSet<DedupKey>,
    /// Highest phase announced by events.
    pub event_phase: Phase,
    /// Highest round announced by events.
    pub event_round: u64,
    pub last_event: Option<EventPosition>,
    /// Last poll exhausted its retries; data may be old.
    pub stale: bool,
    pub flags: UiFlags,
}

impl RoomState {
    /// Effective phase: snapshot and events combined.
    pub fn phase(&self) -> Phase {
        self.room
            .as_ref()
            .map_or(self.event_phase, |room| room.phase.max(self.event_phase))
    }

    pub fn current_round(&self) -> u64 {
        self.room
            .as_ref()
            .map_or(self.event_round, |room| room.current_round.max(self.event_round))
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// The last `limit` chat lines, oldest first.
    pub fn recent_messages(&self, limit: usize) -> &[ChatEntry] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }

    /// Number of players holding an elimination rank.
    pub fn ranked_count(&self) -> u32 {
        self.players
            .values()
            .filter(|p| p.elimination_rank.is_some())
            .count() as u32
    }

    /// Confirmed votes per suspect for `round`, counting each voter's
    /// latest vote only.
    pub fn tally(&self, round: u64) -> BTreeMap<Address, u32> {
        let mut latest: BTreeMap<Address, &VoteRecord> = BTreeMap::new();
        for vote in self
            .votes
            .iter()
            .filter(|v| v.round == round && v.status == EntryStatus::Confirmed)
        {
            // Audit trail is position-sorted, so later entries win.
            latest.insert(vote.voter, vote);
        }
        let mut counts = BTreeMap::new();
        for vote in latest.values() {
            *counts.entry(vote.suspect).or_insert(0) += 1;
        }
        counts
    }

    /// Status of the optimistic entry `local_id`, wherever it lives.
    pub fn entry_status(&self, local_id: LocalId) -> Option<EntryStatus> {
        self.messages
            .iter()
            .find(|m| m.local_id == Some(local_id))
            .map(|m| m.status)
            .or_else(|| {
                self.votes
                    .iter()
                    .find(|v| v.local_id == Some(local_id))
                    .map(|v| v.status)
            })
            .or_else(|| {
                self.pending_actions
                    .iter()
                    .find(|a| a.local_id == local_id)
                    .map(|a| a.status)
            })
    }
}

/// Whole-client state. Cheap to share behind an `Arc`, replaced on every
/// apply.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameState {
    pub rooms: BTreeMap<RoomId, RoomState>,
    /// The player this client acts as.
    pub local_player: Option<Address>,
    /// Number of deltas applied.
    pub version: u64,
}

impl GameState {
    pub fn room(&self, id: RoomId) -> Option<&RoomState> {
        self.rooms.get(&id)
    }

    /// Rooms with a snapshot whose phase passes `filter`, by id.
    pub fn rooms_matching(&self, filter: RoomFilter) -> Vec<&Room> {
        self.rooms
            .values()
            .filter(|state| filter.matches(state.phase()))
            .filter_map(|state| state.room.as_ref())
            .collect()
    }

    /// The local player's record in `room`.
    pub fn local_player_in(&self, room: RoomId) -> Option<&Player> {
        let address = self.local_player?;
        self.room(room)?.players.get(&address)
    }
}
