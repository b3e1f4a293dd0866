//! Payloads returned by the read commands.

use arena_sync::domain::{ChatEntry, Elimination, MessageKind, ScoreBand};
use arena_sync::{EntryStatus, Player, Room, RoomState, SessionStatus};
use arena_types::{Address, Phase, RoomId, Tier};
use serde::Serialize;

use super::amount::format_token_amount;

/// Kill-feed entries included in a status payload.
pub const STATUS_KILL_FEED: usize = 5;

/// `get_arena_status` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArenaStatus {
    pub room: RoomSummary,
    pub players: Vec<PlayerView>,
    pub recent_chat: Vec<ChatView>,
    /// Votes per suspect in the current round, most votes first.
    pub tally: Vec<TallyView>,
    pub kill_feed: Vec<KillView>,
    /// The last poll failed; the data may lag the ledger.
    pub stale: bool,
}

impl ArenaStatus {
    pub fn from_room(summary: &Room, rs: &RoomState, chat_limit: usize) -> Self {
        let round = rs.current_round();
        let mut tally: Vec<TallyView> = rs
            .tally(round)
            .into_iter()
            .map(|(suspect, votes)| TallyView { suspect, votes })
            .collect();
        tally.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.suspect.cmp(&b.suspect)));

        Self {
            room: RoomSummary::new(summary, rs.phase(), round),
            players: rs.players.values().map(PlayerView::from).collect(),
            recent_chat: rs
                .recent_messages(chat_limit)
                .iter()
                .map(ChatView::from)
                .collect(),
            tally,
            kill_feed: rs
                .kill_feed
                .iter()
                .take(STATUS_KILL_FEED)
                .map(KillView::from)
                .collect(),
            stale: rs.stale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub tier: Tier,
    pub phase: Phase,
    pub phase_label: &'static str,
    pub round: u64,
    /// Decimal tokens.
    pub entry_fee: String,
    /// Decimal tokens.
    pub prize_pool: String,
    pub max_players: u32,
    pub player_count: u32,
    pub alive_count: u32,
    pub is_active: bool,
    pub is_ended: bool,
    /// Still in the lobby with a free seat.
    pub joinable: bool,
}

impl RoomSummary {
    fn new(room: &Room, phase: Phase, round: u64) -> Self {
        Self {
            id: room.id,
            tier: room.tier,
            phase,
            phase_label: phase.label(),
            round,
            entry_fee: format_token_amount(room.entry_fee),
            prize_pool: format_token_amount(room.prize_pool),
            max_players: room.max_players,
            player_count: room.player_count,
            alive_count: room.alive_count,
            is_active: phase.is_active(),
            is_ended: phase.is_ended(),
            // Events may have moved the phase past the last snapshot.
            joinable: phase == Phase::Waiting && room.is_joinable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerView {
    pub address: Address,
    pub humanity_score: i64,
    pub score_band: ScoreBand,
    pub suspected: bool,
    pub is_alive: bool,
    pub is_verified_human: bool,
    pub elimination_rank: Option<u32>,
    pub action_count: u64,
    pub successful_votes: u64,
}

impl From<&Player> for PlayerView {
    fn from(p: &Player) -> Self {
        Self {
            address: p.address,
            humanity_score: p.humanity_score,
            score_band: p.score_band(),
            suspected: p.is_suspected(),
            is_alive: p.is_alive,
            is_verified_human: p.is_verified_human,
            elimination_rank: p.elimination_rank,
            action_count: p.action_count,
            successful_votes: p.successful_votes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatView {
    pub sender: Address,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: u64,
    pub status: EntryStatus,
}

impl From<&ChatEntry> for ChatView {
    fn from(m: &ChatEntry) -> Self {
        Self {
            sender: m.sender,
            content: m.content.clone(),
            kind: m.kind,
            timestamp: m.timestamp,
            status: m.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TallyView {
    pub suspect: Address,
    pub votes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KillView {
    pub player: Address,
    pub eliminated_by: Address,
    pub reason: String,
    pub final_score: i64,
    pub timestamp: u64,
}

impl From<&Elimination> for KillView {
    fn from(e: &Elimination) -> Self {
        Self {
            player: e.player,
            eliminated_by: e.eliminated_by,
            reason: e.reason.clone(),
            final_score: e.final_score,
            timestamp: e.timestamp,
        }
    }
}

/// `check_session_status` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub session_key: Address,
    pub owner: Address,
    pub state: &'static str,
    pub is_valid: bool,
    pub remaining_seconds: u64,
    pub remaining_minutes: u64,
    pub usage_count: u64,
    pub max_usage: u64,
    pub expires_at: u64,
}

impl From<&SessionStatus> for SessionView {
    fn from(s: &SessionStatus) -> Self {
        Self {
            session_key: s.key,
            owner: s.owner,
            state: s.state.as_str(),
            is_valid: s.valid,
            remaining_seconds: s.remaining_secs,
            remaining_minutes: s.remaining_secs / 60,
            usage_count: s.usage_count,
            max_usage: s.max_usage,
            expires_at: s.expires_at,
        }
    }
}
