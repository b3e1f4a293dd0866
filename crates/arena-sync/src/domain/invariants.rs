//! # Domain Invariants
//!
//! Rules that must hold for every state the store ever publishes.

use arena_types::Phase;

use super::entities::{Room, RoomState};

/// Kill-feed entries retained per room.
pub const KILL_FEED_LIMIT: usize = 50;

/// Phase never moves backwards.
pub fn invariant_phase_monotonic(previous: Phase, next: Phase) -> bool {
    next >= previous
}

/// `is_active` and `is_ended` agree with the phase: both false in the lobby,
/// active in Phase1..=Phase3, ended in Ended.
pub fn invariant_activity_flags(phase: Phase, is_active: bool, is_ended: bool) -> bool {
    is_active == phase.is_active() && is_ended == phase.is_ended()
}

/// `alive_count <= player_count`.
pub fn invariant_counts(room: &Room) -> bool {
    room.alive_count <= room.player_count
}

/// Assigned elimination ranks are exactly `1..=k`.
pub fn invariant_rank_bijection(state: &RoomState) -> bool {
    let mut ranks: Vec<u32> = state
        .players
        .values()
        .filter_map(|p| p.elimination_rank)
        .collect();
    ranks.sort_unstable();
    ranks.iter().enumerate().all(|(i, &r)| r as usize == i + 1)
}

/// No two chat entries or votes share a dedup key.
pub fn invariant_unique_keys(state: &RoomState) -> bool {
    let mut keys: Vec<_> = state
        .messages
        .iter()
        .filter_map(|m| m.dedup_key)
        .chain(state.votes.iter().filter_map(|v| v.dedup_key))
        .collect();
    let total = keys.len();
    keys.sort_unstable();
    keys.dedup();
    keys.len() == total
}

/// Ranked or event-eliminated players are dead.
pub fn invariant_no_resurrection(state: &RoomState) -> bool {
    state.players.values().all(|p| {
        !(p.is_alive && (p.elimination_rank.is_some() || state.eliminated.contains(&p.address)))
    })
}

/// All of the above for one room.
pub fn check_room(state: &RoomState) -> bool {
    let room_ok = state.room.as_ref().map_or(true, |room| {
        invariant_counts(room)
            && invariant_activity_flags(room.phase, room.is_active, room.is_ended)
    });
    room_ok
        && invariant_rank_bijection(state)
        && invariant_unique_keys(state)
        && invariant_no_resurrection(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Player;
    use arena_types::Address;

    fn ranked(byte: u8, rank: Option<u32>) -> Player {
        Player {
            address: Address([byte; 20]),
            humanity_score: 50,
            is_alive: rank.is_none(),
            is_verified_human: false,
            join_block: 1,
            elimination_block: 0,
            elimination_rank: rank,
            last_action_block: 0,
            action_count: 0,
            successful_votes: 0,
        }
    }

    #[test]
    fn test_activity_flags() {
        assert!(invariant_activity_flags(Phase::Waiting, false, false));
        assert!(invariant_activity_flags(Phase::Phase2, true, false));
        assert!(invariant_activity_flags(Phase::Ended, false, true));
        assert!(!invariant_activity_flags(Phase::Ended, true, true));
        assert!(!invariant_activity_flags(Phase::Waiting, true, false));
    }

    #[test]
    fn test_rank_bijection() {
        let mut state = RoomState::default();
        for (b, r) in [(1, Some(2)), (2, Some(1)), (3, None)] {
            let p = ranked(b, r);
            state.players.insert(p.address, p);
        }
        assert!(invariant_rank_bijection(&state));

        let gap = ranked(4, Some(4));
        state.players.insert(gap.address, gap);
        assert!(!invariant_rank_bijection(&state));
    }

    #[test]
    fn test_phase_monotonic() {
        assert!(invariant_phase_monotonic(Phase::Phase1, Phase::Phase1));
        assert!(invariant_phase_monotonic(Phase::Phase1, Phase::Ended));
        assert!(!invariant_phase_monotonic(Phase::Phase2, Phase::Waiting));
    }
}
