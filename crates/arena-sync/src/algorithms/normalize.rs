//! # Normalization
//!
//! Raw ledger records → typed domain values. Undecodable codes become
//! integrity violations instead of panics.

use arena_types::{LedgerEvent, LedgerLog, Phase, PlayerInfo, RoomInfo, Tier};

use crate::domain::{
    EventPayload, IntegrityViolation, MessageKind, MonotonicField, NormalizedEvent, Player, Room,
};

/// Decode a room snapshot.
pub fn normalize_room(info: &RoomInfo) -> Result<Room, IntegrityViolation> {
    let phase = Phase::from_code(info.phase).map_err(|e| {
        IntegrityViolation::room(info.id, MonotonicField::Encoding, e.to_string())
    })?;
    let tier = Tier::from_code(info.tier).map_err(|e| {
        IntegrityViolation::room(info.id, MonotonicField::Encoding, e.to_string())
    })?;
    Ok(Room {
        id: info.id,
        creator: info.creator,
        tier,
        phase,
        entry_fee: info.entry_fee,
        prize_pool: info.prize_pool,
        start_block: info.start_block,
        current_round: info.current_round,
        max_players: info.max_players,
        player_count: info.player_count,
        alive_count: info.alive_count,
        eliminated_count: info.eliminated_count,
        is_active: info.is_active,
        is_ended: info.is_ended,
    })
}

/// Decode a player snapshot. Rank `0` means unranked.
pub fn normalize_player(info: &PlayerInfo) -> Player {
    Player {
        address: info.address,
        humanity_score: info.humanity_score,
        is_alive: info.is_alive,
        is_verified_human: info.is_verified_human,
        join_block: info.join_block,
        elimination_block: info.elimination_block,
        elimination_rank: (info.elimination_rank != 0).then_some(info.elimination_rank),
        last_action_block: info.last_action_block,
        action_count: info.action_count,
        successful_votes: info.successful_votes,
    }
}

/// Decode one log. Logs without a block time are stamped `received_at`.
pub fn normalize_log(
    log: &LedgerLog,
    received_at: u64,
) -> Result<NormalizedEvent, IntegrityViolation> {
    let (timestamp, payload) = match &log.event {
        LedgerEvent::NewMessage {
            sender,
            content,
            timestamp,
        } => (
            *timestamp,
            EventPayload::Chat {
                sender: *sender,
                content: content.clone(),
                kind: MessageKind::classify(content),
            },
        ),
        LedgerEvent::VoteCast {
            voter,
            suspect,
            round,
        } => (
            received_at,
            EventPayload::Vote {
                voter: *voter,
                suspect: *suspect,
                round: *round,
            },
        ),
        LedgerEvent::PlayerEliminated {
            player,
            eliminated_by,
            reason,
            final_score,
            timestamp,
        } => (
            *timestamp,
            EventPayload::Elimination {
                player: *player,
                eliminated_by: *eliminated_by,
                reason: reason.clone(),
                final_score: *final_score,
            },
        ),
        LedgerEvent::PhaseAdvanced { phase, round } => {
            let phase = Phase::from_code(*phase).map_err(|e| {
                IntegrityViolation::room(log.room_id, MonotonicField::Encoding, e.to_string())
            })?;
            (
                received_at,
                EventPayload::PhaseAdvanced {
                    phase,
                    round: *round,
                },
            )
        }
    };

    Ok(NormalizedEvent {
        room: log.room_id,
        position: log.position(),
        key: log.dedup_key(),
        timestamp,
        payload,
    })
}

/// Decode a batch, splitting out the logs that could not be decoded.
pub fn normalize_logs(
    logs: &[LedgerLog],
    received_at: u64,
) -> (Vec<NormalizedEvent>, Vec<IntegrityViolation>) {
    let mut events = Vec::with_capacity(logs.len());
    let mut violations = Vec::new();
    for log in logs {
        match normalize_log(log, received_at) {
            Ok(event) => events.push(event),
            Err(violation) => violations.push(violation),
        }
    }
    (events, violations)
}
