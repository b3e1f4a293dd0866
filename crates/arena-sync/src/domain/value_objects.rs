//! # Value Objects
//!
//! Normalized events, reducer deltas and the small display enums derived
//! from raw ledger data.

use arena_types::{Address, DedupKey, EventPosition, Phase, RoomId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::entities::{Player, Room};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identity of an optimistic entry, assigned locally at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(pub Uuid);

impl LocalId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// DISPLAY CLASSIFICATION
// =============================================================================

/// How a chat line is rendered, decided by its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Chat,
    System,
    Elimination,
}

impl MessageKind {
    /// `[ELIMINATED]`/`[KILL]` are eliminations; `[SYSTEM]`, `[VOTE]`,
    /// `[PHASE]` and any other bracket prefix are system lines.
    pub fn classify(content: &str) -> Self {
        if content.starts_with("[ELIMINATED]") || content.starts_with("[KILL]") {
            MessageKind::Elimination
        } else if content.starts_with('[') {
            MessageKind::System
        } else {
            MessageKind::Chat
        }
    }
}

/// Humanity-score display band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreBand {
    Healthy,
    Warning,
    Critical,
}

impl ScoreBand {
    /// `> 60` healthy, `> 30` warning, otherwise critical.
    pub fn from_score(score: i64) -> Self {
        if score > 60 {
            ScoreBand::Healthy
        } else if score > 30 {
            ScoreBand::Warning
        } else {
            ScoreBand::Critical
        }
    }
}

/// Below this score a player is flagged as a suspected bot.
pub const SUSPECT_THRESHOLD: i64 = 40;

/// Lobby filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoomFilter {
    #[default]
    All,
    Waiting,
    Active,
    Ended,
}

impl RoomFilter {
    /// Whether a room in `phase` passes this filter.
    pub fn matches(self, phase: Phase) -> bool {
        match self {
            RoomFilter::All => true,
            RoomFilter::Waiting => phase == Phase::Waiting,
            RoomFilter::Active => phase.is_active(),
            RoomFilter::Ended => phase.is_ended(),
        }
    }
}

/// Lifecycle of a locally visible entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Backed by a ledger event.
    Confirmed,
    /// Submitted locally, awaiting confirmation.
    Pending,
    /// Confirmation wait timed out; kept until the ledger resolves it.
    Unconfirmed,
}

/// Kinds of action an agent or player can submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Chat,
    Vote,
    Join,
    Claim,
    CreateRoom,
}

impl ActionKind {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Chat => "chat",
            ActionKind::Vote => "vote",
            ActionKind::Join => "join",
            ActionKind::Claim => "claim",
            ActionKind::CreateRoom => "create_room",
        }
    }
}

/// One-shot UI triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UiFlag {
    /// Room left the lobby.
    Countdown,
    /// Any phase advance.
    PhaseTransition,
    /// Room reached `Ended`.
    Victory,
    /// A new elimination entered the kill feed.
    KillFeed,
}

// =============================================================================
// NORMALIZED EVENTS
// =============================================================================

/// Payload of a normalized ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    Chat {
        sender: Address,
        content: String,
        kind: MessageKind,
    },
    Vote {
        voter: Address,
        suspect: Address,
        round: u64,
    },
    Elimination {
        player: Address,
        eliminated_by: Address,
        reason: String,
        final_score: i64,
    },
    PhaseAdvanced {
        phase: Phase,
        round: u64,
    },
}

impl EventPayload {
    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Chat { .. } => "chat",
            EventPayload::Vote { .. } => "vote",
            EventPayload::Elimination { .. } => "elimination",
            EventPayload::PhaseAdvanced { .. } => "phase",
        }
    }
}

/// A ledger event with typed payload and its ordering coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub room: RoomId,
    pub position: EventPosition,
    pub key: DedupKey,
    /// Unix seconds; block time, or receive time when the log has none.
    pub timestamp: u64,
    pub payload: EventPayload,
}

// =============================================================================
// DELTAS
// =============================================================================

/// What an optimistic entry stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimisticKind {
    Chat { sender: Address, content: String },
    Vote {
        voter: Address,
        suspect: Address,
        round: u64,
    },
    Join { player: Address },
}

/// A provisional entry inserted before the ledger confirms the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisticEntry {
    pub local_id: LocalId,
    pub room: RoomId,
    /// Unix seconds at submission.
    pub created_at: u64,
    pub kind: OptimisticKind,
}

/// The only input the reducer accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Delta {
    RoomSnapshot(Room),
    PlayerSnapshot { room: RoomId, player: Player },
    /// Whole roster, validated as one batch.
    PlayerRoster { room: RoomId, players: Vec<Player> },
    Events { room: RoomId, events: Vec<NormalizedEvent> },
    Optimistic(OptimisticEntry),
    /// The write's receipt already carried the confirming event.
    OptimisticReconciled {
        room: RoomId,
        local_id: LocalId,
        event: NormalizedEvent,
    },
    OptimisticFailed { room: RoomId, local_id: LocalId },
    OptimisticUnconfirmed { room: RoomId, local_id: LocalId },
    MarkStale { room: RoomId },
    ClearStale { room: RoomId },
    SetLocalPlayer(Option<Address>),
}

impl Delta {
    /// The room this delta touches, if any.
    pub fn room(&self) -> Option<RoomId> {
        match self {
            Delta::RoomSnapshot(room) => Some(room.id),
            Delta::PlayerSnapshot { room, .. }
            | Delta::PlayerRoster { room, .. }
            | Delta::Events { room, .. }
            | Delta::OptimisticReconciled { room, .. }
            | Delta::OptimisticFailed { room, .. }
            | Delta::OptimisticUnconfirmed { room, .. }
            | Delta::MarkStale { room }
            | Delta::ClearStale { room } => Some(*room),
            Delta::Optimistic(entry) => Some(entry.room),
            Delta::SetLocalPlayer(_) => None,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Delta::RoomSnapshot(_) => "room_snapshot",
            Delta::PlayerSnapshot { .. } => "player_snapshot",
            Delta::PlayerRoster { .. } => "player_roster",
            Delta::Events { .. } => "events",
            Delta::Optimistic(_) => "optimistic",
            Delta::OptimisticReconciled { .. } => "optimistic_reconciled",
            Delta::OptimisticFailed { .. } => "optimistic_failed",
            Delta::OptimisticUnconfirmed { .. } => "optimistic_unconfirmed",
            Delta::MarkStale { .. } => "mark_stale",
            Delta::ClearStale { .. } => "clear_stale",
            Delta::SetLocalPlayer(_) => "set_local_player",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_classification() {
        assert_eq!(MessageKind::classify("gm everyone"), MessageKind::Chat);
        assert_eq!(MessageKind::classify("[SYSTEM] Phase 2"), MessageKind::System);
        assert_eq!(MessageKind::classify("[VOTE] 0xabc"), MessageKind::System);
        assert_eq!(MessageKind::classify("[PHASE] advanced"), MessageKind::System);
        assert_eq!(MessageKind::classify("[KILL] 0xdef"), MessageKind::Elimination);
        assert_eq!(MessageKind::classify("[ELIMINATED] 0x1"), MessageKind::Elimination);
        assert_eq!(MessageKind::classify("[whatever]"), MessageKind::System);
    }

    #[test]
    fn test_score_bands() {
        assert_eq!(ScoreBand::from_score(61), ScoreBand::Healthy);
        assert_eq!(ScoreBand::from_score(60), ScoreBand::Warning);
        assert_eq!(ScoreBand::from_score(31), ScoreBand::Warning);
        assert_eq!(ScoreBand::from_score(30), ScoreBand::Critical);
        assert_eq!(ScoreBand::from_score(-5), ScoreBand::Critical);
    }

    #[test]
    fn test_room_filter() {
        assert!(RoomFilter::All.matches(Phase::Ended));
        assert!(RoomFilter::Waiting.matches(Phase::Waiting));
        assert!(!RoomFilter::Waiting.matches(Phase::Phase1));
        assert!(RoomFilter::Active.matches(Phase::Phase3));
        assert!(RoomFilter::Ended.matches(Phase::Ended));
    }

    #[test]
    fn test_local_ids_are_unique() {
        assert_ne!(LocalId::new(), LocalId::new());
    }
}
