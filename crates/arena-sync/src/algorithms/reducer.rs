//! # Reducer
//!
//! `reduce(state, delta) -> state'`, pure. The only code that decides how a
//! snapshot, an event batch or an optimistic entry changes the model.
//!
//! ## Rules
//!
//! - Snapshots overwrite authoritative fields, but a monotonic regression
//!   rejects the snapshot (prior value kept) and is reported.
//! - Event batches are deduplicated and sorted before they are applied.
//!   Every event effect is an insertion into a position-sorted list or a
//!   monotonic latch, so delivery order never changes the result.
//! - Optimistic entries are converted in place by their confirmation, or
//!   removed on failure.

use arena_types::{Address, RoomId};

use crate::domain::{
    entry_order, invariant_activity_flags, invariant_counts, invariant_phase_monotonic,
    ActionKind, ChatEntry, Delta, Elimination, EntryStatus, EventPayload, GameState,
    IntegrityViolation, LocalId, MessageKind, MonotonicField, NormalizedEvent, OptimisticEntry,
    OptimisticKind, PendingAction, Player, Room, RoomState, UiFlag, VoteRecord, KILL_FEED_LIMIT,
};

use super::ordering::dedup_and_sort;

/// Reducer tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReducerConfig {
    /// Max distance between an optimistic entry and its event, in seconds.
    pub reconciliation_window_secs: u64,
    pub kill_feed_limit: usize,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            reconciliation_window_secs: 120,
            kill_feed_limit: KILL_FEED_LIMIT,
        }
    }
}

/// What one reduction did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplyReport {
    /// Kind label of every event applied.
    pub applied: Vec<&'static str>,
    /// Events dropped as already seen.
    pub duplicates: usize,
    /// Optimistic entries confirmed by this reduction.
    pub reconciled: Vec<LocalId>,
    /// Rejected regressions.
    pub violations: Vec<IntegrityViolation>,
    pub rooms_touched: Vec<RoomId>,
}

/// Next state plus its report.
#[derive(Debug, Clone)]
pub struct Reduction {
    pub state: GameState,
    pub report: ApplyReport,
}

/// Apply one delta.
pub fn reduce(state: &GameState, delta: &Delta, config: &ReducerConfig) -> Reduction {
    let mut next = state.clone();
    let mut report = ApplyReport::default();

    if let Delta::SetLocalPlayer(address) = delta {
        next.local_player = *address;
        return Reduction {
            state: next,
            report,
        };
    }

    let Some(room_id) = delta.room() else {
        return Reduction {
            state: next,
            report,
        };
    };
    report.rooms_touched.push(room_id);
    let rs = next.rooms.entry(room_id).or_default();

    match delta {
        Delta::RoomSnapshot(snapshot) => apply_room_snapshot(rs, snapshot, &mut report),
        Delta::PlayerSnapshot { player, .. } => {
            apply_players(rs, room_id, std::slice::from_ref(player), &mut report)
        }
        Delta::PlayerRoster { players, .. } => apply_players(rs, room_id, players, &mut report),
        Delta::Events { events, .. } => {
            let batch = dedup_and_sort(events, &rs.seen);
            report.duplicates += batch.duplicates;
            for event in &batch.events {
                apply_event(rs, event, None, config, &mut report);
            }
        }
        Delta::Optimistic(entry) => insert_optimistic(rs, entry, &mut report),
        Delta::OptimisticReconciled {
            local_id, event, ..
        } => {
            if rs.seen.contains(&event.key) {
                report.duplicates += 1;
            } else {
                apply_event(rs, event, Some(*local_id), config, &mut report);
            }
        }
        Delta::OptimisticFailed { local_id, .. } => roll_back(rs, *local_id),
        Delta::OptimisticUnconfirmed { local_id, .. } => mark_unconfirmed(rs, *local_id),
        Delta::MarkStale { .. } => rs.stale = true,
        Delta::ClearStale { .. } => rs.stale = false,
        Delta::SetLocalPlayer(_) => {}
    }

    Reduction {
        state: next,
        report,
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

fn check_room_snapshot(previous: Option<&Room>, snapshot: &Room) -> Option<IntegrityViolation> {
    let id = snapshot.id;
    if !invariant_activity_flags(snapshot.phase, snapshot.is_active, snapshot.is_ended) {
        return Some(IntegrityViolation::room(
            id,
            MonotonicField::ActiveFlags,
            format!(
                "{:?} with is_active={} is_ended={}",
                snapshot.phase, snapshot.is_active, snapshot.is_ended
            ),
        ));
    }
    if !invariant_counts(snapshot) {
        return Some(IntegrityViolation::room(
            id,
            MonotonicField::Counts,
            format!(
                "alive {} exceeds players {}",
                snapshot.alive_count, snapshot.player_count
            ),
        ));
    }
    let previous = previous?;
    if !invariant_phase_monotonic(previous.phase, snapshot.phase) {
        return Some(IntegrityViolation::room(
            id,
            MonotonicField::Phase,
            format!("{:?} -> {:?}", previous.phase, snapshot.phase),
        ));
    }
    if snapshot.current_round < previous.current_round {
        return Some(IntegrityViolation::room(
            id,
            MonotonicField::Round,
            format!("{} -> {}", previous.current_round, snapshot.current_round),
        ));
    }
    if snapshot.tier != previous.tier {
        return Some(IntegrityViolation::room(
            id,
            MonotonicField::Tier,
            format!("{:?} -> {:?}", previous.tier, snapshot.tier),
        ));
    }
    None
}

fn apply_room_snapshot(rs: &mut RoomState, snapshot: &Room, report: &mut ApplyReport) {
    if let Some(violation) = check_room_snapshot(rs.room.as_ref(), snapshot) {
        report.violations.push(violation);
        return;
    }

    // First sighting with nothing else known is a baseline, not a transition.
    let baseline = rs.room.is_none() && rs.last_event.is_none();
    let before = rs.phase();

    let mut room = snapshot.clone();
    if rs.event_phase > room.phase {
        room.phase = rs.event_phase;
        room.sync_activity();
    }
    room.current_round = room.current_round.max(rs.event_round);
    rs.room = Some(room);

    if !baseline {
        rs.flags.raise_for_transition(before, rs.phase());
    }
}

fn check_player(
    rs: &RoomState,
    room: RoomId,
    snapshot: &Player,
    ranked: u32,
) -> Option<IntegrityViolation> {
    let addr = snapshot.address;
    let violation =
        |field: MonotonicField, detail: String| Some(IntegrityViolation::player(room, addr, field, detail));

    if snapshot.elimination_rank.is_some() && snapshot.is_alive {
        return violation(MonotonicField::IsAlive, "ranked player reported alive".into());
    }

    let previous_rank = match rs.players.get(&addr) {
        Some(previous) => {
            if !previous.is_alive && snapshot.is_alive {
                return violation(MonotonicField::IsAlive, "eliminated player reported alive".into());
            }
            if previous.is_verified_human && !snapshot.is_verified_human {
                return violation(MonotonicField::VerifiedHuman, "verification reverted".into());
            }
            if snapshot.successful_votes < previous.successful_votes {
                return violation(
                    MonotonicField::SuccessfulVotes,
                    format!(
                        "{} -> {}",
                        previous.successful_votes, snapshot.successful_votes
                    ),
                );
            }
            previous.elimination_rank
        }
        None => None,
    };

    match (previous_rank, snapshot.elimination_rank) {
        (Some(a), Some(b)) if a != b => {
            violation(MonotonicField::EliminationRank, format!("rank {} -> {}", a, b))
        }
        (Some(a), None) => violation(MonotonicField::EliminationRank, format!("rank {} removed", a)),
        (None, Some(r)) if r != ranked + 1 => violation(
            MonotonicField::EliminationRank,
            format!("rank {} does not extend 1..={}", r, ranked),
        ),
        _ => None,
    }
}

fn apply_players(rs: &mut RoomState, room: RoomId, players: &[Player], report: &mut ApplyReport) {
    // New ranks must arrive in ascending order to extend 1..=k.
    let mut sorted: Vec<&Player> = players.iter().collect();
    sorted.sort_by_key(|p| (p.elimination_rank.unwrap_or(u32::MAX), p.address));

    let mut ranked = rs.ranked_count();
    for snapshot in sorted {
        if let Some(violation) = check_player(rs, room, snapshot, ranked) {
            report.violations.push(violation);
            continue;
        }

        let addr = snapshot.address;
        let newly_ranked = snapshot.elimination_rank.is_some()
            && rs
                .players
                .get(&addr)
                .map_or(true, |p| p.elimination_rank.is_none());
        if newly_ranked {
            ranked += 1;
        }

        let mut player = snapshot.clone();
        if rs.eliminated.contains(&addr) {
            player.is_alive = false;
        }
        rs.players.insert(addr, player);

        // Presence in the roster confirms a pending join.
        rs.pending_actions
            .retain(|a| !(a.kind == ActionKind::Join && a.actor == addr));
    }
}

// =============================================================================
// EVENTS
// =============================================================================

fn within(a: u64, b: u64, window: u64) -> bool {
    a.abs_diff(b) <= window
}

fn find_chat(
    rs: &RoomState,
    target: Option<LocalId>,
    sender: Address,
    content: &str,
    timestamp: u64,
    window: u64,
) -> Option<usize> {
    let targeted = target.and_then(|id| {
        rs.messages
            .iter()
            .position(|m| m.local_id == Some(id) && m.status != EntryStatus::Confirmed)
    });
    // Provisional entries sort by submission time, so the first match is
    // the earliest.
    targeted.or_else(|| {
        rs.messages.iter().position(|m| {
            m.status != EntryStatus::Confirmed
                && m.sender == sender
                && m.content == content
                && within(m.timestamp, timestamp, window)
        })
    })
}

fn find_vote(
    rs: &RoomState,
    target: Option<LocalId>,
    voter: Address,
    suspect: Address,
    timestamp: u64,
    window: u64,
) -> Option<usize> {
    let targeted = target.and_then(|id| {
        rs.votes
            .iter()
            .position(|v| v.local_id == Some(id) && v.status != EntryStatus::Confirmed)
    });
    targeted.or_else(|| {
        rs.votes.iter().position(|v| {
            v.status != EntryStatus::Confirmed
                && v.voter == voter
                && v.suspect == suspect
                && within(v.timestamp, timestamp, window)
        })
    })
}

fn apply_event(
    rs: &mut RoomState,
    event: &NormalizedEvent,
    target: Option<LocalId>,
    config: &ReducerConfig,
    report: &mut ApplyReport,
) {
    rs.seen.insert(event.key);
    rs.last_event = rs.last_event.max(Some(event.position));
    report.applied.push(event.payload.kind());
    let window = config.reconciliation_window_secs;

    match &event.payload {
        EventPayload::Chat {
            sender,
            content,
            kind,
        } => {
            match find_chat(rs, target, *sender, content, event.timestamp, window) {
                Some(i) => {
                    let entry = &mut rs.messages[i];
                    entry.status = EntryStatus::Confirmed;
                    entry.position = Some(event.position);
                    entry.dedup_key = Some(event.key);
                    entry.timestamp = event.timestamp;
                    if let Some(id) = entry.local_id {
                        report.reconciled.push(id);
                    }
                }
                None => rs.messages.push(ChatEntry {
                    sender: *sender,
                    content: content.clone(),
                    kind: *kind,
                    timestamp: event.timestamp,
                    status: EntryStatus::Confirmed,
                    position: Some(event.position),
                    dedup_key: Some(event.key),
                    local_id: None,
                }),
            }
            rs.messages
                .sort_by_key(|m| entry_order(m.position, m.timestamp));
        }
        EventPayload::Vote {
            voter,
            suspect,
            round,
        } => {
            match find_vote(rs, target, *voter, *suspect, event.timestamp, window) {
                Some(i) => {
                    let vote = &mut rs.votes[i];
                    vote.status = EntryStatus::Confirmed;
                    vote.round = *round;
                    vote.position = Some(event.position);
                    vote.dedup_key = Some(event.key);
                    vote.timestamp = event.timestamp;
                    if let Some(id) = vote.local_id {
                        report.reconciled.push(id);
                    }
                }
                None => rs.votes.push(VoteRecord {
                    voter: *voter,
                    suspect: *suspect,
                    round: *round,
                    timestamp: event.timestamp,
                    status: EntryStatus::Confirmed,
                    position: Some(event.position),
                    dedup_key: Some(event.key),
                    local_id: None,
                }),
            }
            rs.votes.sort_by_key(|v| entry_order(v.position, v.timestamp));
        }
        EventPayload::Elimination {
            player,
            eliminated_by,
            reason,
            final_score,
        } => {
            rs.eliminated.insert(*player);
            if let Some(p) = rs.players.get_mut(player) {
                p.is_alive = false;
            }
            rs.kill_feed.push(Elimination {
                player: *player,
                eliminated_by: *eliminated_by,
                reason: reason.clone(),
                final_score: *final_score,
                timestamp: event.timestamp,
                position: event.position,
            });
            // Newest first
            rs.kill_feed
                .sort_by(|a, b| b.position.cmp(&a.position));
            rs.kill_feed.truncate(config.kill_feed_limit);
            rs.flags.raise(UiFlag::KillFeed);
        }
        EventPayload::PhaseAdvanced { phase, round } => {
            let before = rs.phase();
            rs.event_phase = rs.event_phase.max(*phase);
            rs.event_round = rs.event_round.max(*round);
            if let Some(room) = rs.room.as_mut() {
                room.phase = room.phase.max(*phase);
                room.current_round = room.current_round.max(*round);
                room.sync_activity();
            }
            rs.flags.raise_for_transition(before, rs.phase());
        }
    }
}

// =============================================================================
// OPTIMISTIC ENTRIES
// =============================================================================

fn insert_optimistic(rs: &mut RoomState, entry: &OptimisticEntry, report: &mut ApplyReport) {
    if rs.entry_status(entry.local_id).is_some() {
        report.duplicates += 1;
        return;
    }
    match &entry.kind {
        OptimisticKind::Chat { sender, content } => {
            rs.messages.push(ChatEntry {
                sender: *sender,
                content: content.clone(),
                kind: MessageKind::classify(content),
                timestamp: entry.created_at,
                status: EntryStatus::Pending,
                position: None,
                dedup_key: None,
                local_id: Some(entry.local_id),
            });
            rs.messages
                .sort_by_key(|m| entry_order(m.position, m.timestamp));
        }
        OptimisticKind::Vote {
            voter,
            suspect,
            round,
        } => {
            rs.votes.push(VoteRecord {
                voter: *voter,
                suspect: *suspect,
                round: *round,
                timestamp: entry.created_at,
                status: EntryStatus::Pending,
                position: None,
                dedup_key: None,
                local_id: Some(entry.local_id),
            });
            rs.votes.sort_by_key(|v| entry_order(v.position, v.timestamp));
        }
        OptimisticKind::Join { player } => rs.pending_actions.push(PendingAction {
            local_id: entry.local_id,
            kind: ActionKind::Join,
            actor: *player,
            created_at: entry.created_at,
            status: EntryStatus::Pending,
        }),
    }
}

/// Compensating removal. Confirmed entries stay: confirmation wins.
fn roll_back(rs: &mut RoomState, local_id: LocalId) {
    let provisional = |status: EntryStatus| status != EntryStatus::Confirmed;
    rs.messages
        .retain(|m| !(m.local_id == Some(local_id) && provisional(m.status)));
    rs.votes
        .retain(|v| !(v.local_id == Some(local_id) && provisional(v.status)));
    rs.pending_actions
        .retain(|a| !(a.local_id == local_id && provisional(a.status)));
}

fn mark_unconfirmed(rs: &mut RoomState, local_id: LocalId) {
    let demote = |status: &mut EntryStatus| {
        if *status == EntryStatus::Pending {
            *status = EntryStatus::Unconfirmed;
        }
    };
    rs.messages
        .iter_mut()
        .filter(|m| m.local_id == Some(local_id))
        .for_each(|m| demote(&mut m.status));
    rs.votes
        .iter_mut()
        .filter(|v| v.local_id == Some(local_id))
        .for_each(|v| demote(&mut v.status));
    rs.pending_actions
        .iter_mut()
        .filter(|a| a.local_id == local_id)
        .for_each(|a| demote(&mut a.status));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{check_room, invariant_rank_bijection};
    use arena_types::{DedupKey, EventPosition, Phase, Tier, TxHash, U256};

    const ROOM: RoomId = RoomId(1);

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    fn room(phase: Phase, round: u64) -> Room {
        let mut room = Room {
            id: ROOM,
            creator: addr(1),
            tier: Tier::Quick,
            phase,
            entry_fee: U256::from(10u64),
            prize_pool: U256::zero(),
            start_block: 1,
            current_round: round,
            max_players: 10,
            player_count: 3,
            alive_count: 3,
            eliminated_count: 0,
            is_active: false,
            is_ended: false,
        };
        room.sync_activity();
        room
    }

    fn player(b: u8, rank: Option<u32>) -> Player {
        Player {
            address: addr(b),
            humanity_score: 100,
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

    fn event(block: u64, index: u32, payload: EventPayload) -> NormalizedEvent {
        NormalizedEvent {
            room: ROOM,
            position: EventPosition::new(block, index),
            key: DedupKey {
                tx_hash: TxHash([block as u8; 32]),
                log_index: index,
            },
            timestamp: 1_000 + block,
            payload,
        }
    }

    fn chat(block: u64, sender: u8, content: &str) -> NormalizedEvent {
        event(
            block,
            0,
            EventPayload::Chat {
                sender: addr(sender),
                content: content.into(),
                kind: MessageKind::classify(content),
            },
        )
    }

    fn apply(state: &GameState, delta: Delta) -> Reduction {
        reduce(state, &delta, &ReducerConfig::default())
    }

    fn events(list: Vec<NormalizedEvent>) -> Delta {
        Delta::Events {
            room: ROOM,
            events: list,
        }
    }

    #[test]
    fn test_first_snapshot_is_a_baseline() {
        let r = apply(&GameState::default(), Delta::RoomSnapshot(room(Phase::Phase2, 2)));
        let rs = r.state.room(ROOM).unwrap();
        assert_eq!(rs.phase(), Phase::Phase2);
        assert_eq!(rs.flags, Default::default());
        assert!(r.report.violations.is_empty());
    }

    #[test]
    fn test_phase_regression_rejected_prior_kept() {
        let s = apply(&GameState::default(), Delta::RoomSnapshot(room(Phase::Phase2, 2))).state;
        let r = apply(&s, Delta::RoomSnapshot(room(Phase::Phase1, 2)));
        assert_eq!(r.report.violations.len(), 1);
        assert_eq!(r.report.violations[0].field, MonotonicField::Phase);
        assert_eq!(r.state.room(ROOM).unwrap().phase(), Phase::Phase2);
    }

    #[test]
    fn test_inconsistent_activity_flags_rejected() {
        let mut bad = room(Phase::Ended, 3);
        bad.is_active = true;
        let r = apply(&GameState::default(), Delta::RoomSnapshot(bad));
        assert_eq!(r.report.violations[0].field, MonotonicField::ActiveFlags);
        assert!(r.state.room(ROOM).unwrap().room.is_none());
    }

    #[test]
    fn test_round_regression_rejected() {
        let s = apply(&GameState::default(), Delta::RoomSnapshot(room(Phase::Phase1, 3))).state;
        let r = apply(&s, Delta::RoomSnapshot(room(Phase::Phase1, 2)));
        assert_eq!(r.report.violations[0].field, MonotonicField::Round);
    }

    #[test]
    fn test_phase_event_raises_and_lower_event_is_noop() {
        let s = apply(&GameState::default(), Delta::RoomSnapshot(room(Phase::Waiting, 0))).state;
        let r = apply(
            &s,
            events(vec![event(
                5,
                0,
                EventPayload::PhaseAdvanced {
                    phase: Phase::Phase2,
                    round: 2,
                },
            )]),
        );
        let rs = r.state.room(ROOM).unwrap();
        assert_eq!(rs.phase(), Phase::Phase2);
        assert!(rs.flags.countdown && rs.flags.phase_transition);
        let room = rs.room.as_ref().unwrap();
        assert!(room.is_active && !room.is_ended);

        let r = apply(
            &r.state,
            events(vec![event(
                6,
                0,
                EventPayload::PhaseAdvanced {
                    phase: Phase::Phase1,
                    round: 1,
                },
            )]),
        );
        assert!(r.report.violations.is_empty());
        assert_eq!(r.state.room(ROOM).unwrap().phase(), Phase::Phase2);
        assert_eq!(r.state.room(ROOM).unwrap().current_round(), 2);
    }

    #[test]
    fn test_duplicate_chat_event_yields_one_entry() {
        let e = chat(3, 2, "hello");
        let s = apply(&GameState::default(), events(vec![e.clone(), e.clone()])).state;
        let r = apply(&s, events(vec![e]));
        assert_eq!(r.report.duplicates, 1);
        assert_eq!(r.state.room(ROOM).unwrap().message_count(), 1);
    }

    #[test]
    fn test_optimistic_chat_replaced_in_place() {
        let local_id = LocalId::new();
        let s = apply(
            &GameState::default(),
            Delta::Optimistic(OptimisticEntry {
                local_id,
                room: ROOM,
                created_at: 1_000,
                kind: OptimisticKind::Chat {
                    sender: addr(2),
                    content: "hello".into(),
                },
            }),
        )
        .state;
        assert_eq!(
            s.room(ROOM).unwrap().entry_status(local_id),
            Some(EntryStatus::Pending)
        );

        let r = apply(&s, events(vec![chat(3, 2, "hello")]));
        let rs = r.state.room(ROOM).unwrap();
        assert_eq!(rs.message_count(), 1);
        assert_eq!(rs.entry_status(local_id), Some(EntryStatus::Confirmed));
        assert_eq!(r.report.reconciled, vec![local_id]);
    }

    fn pending_chat(local_id: LocalId, created_at: u64, content: &str) -> Delta {
        Delta::Optimistic(OptimisticEntry {
            local_id,
            room: ROOM,
            created_at,
            kind: OptimisticKind::Chat {
                sender: addr(2),
                content: content.into(),
            },
        })
    }

    /// Chat lines without their local ids.
    fn chat_lines(state: &GameState) -> Vec<(Address, String, EntryStatus, Option<EventPosition>)> {
        state
            .room(ROOM)
            .unwrap()
            .messages
            .iter()
            .map(|m| (m.sender, m.content.clone(), m.status, m.position))
            .collect()
    }

    #[test]
    fn test_identical_pending_chats_confirm_in_either_order() {
        let (first, second) = (LocalId::new(), LocalId::new());
        let mut s = apply(&GameState::default(), pending_chat(first, 1_000, "gg")).state;
        s = apply(&s, pending_chat(second, 1_001, "gg")).state;

        let forward = apply(&s, events(vec![chat(5, 2, "gg")]));
        let forward_again = apply(&forward.state, events(vec![chat(6, 2, "gg")]));

        let reversed = apply(&s, events(vec![chat(6, 2, "gg")]));
        let reversed_again = apply(&reversed.state, events(vec![chat(5, 2, "gg")]));

        // Untargeted confirmations treat identical provisional lines as
        // interchangeable: the earliest pending line takes whichever event
        // arrives first. The visible chat is the same either way.
        assert_eq!(forward.report.reconciled, vec![first]);
        assert_eq!(reversed.report.reconciled, vec![first]);
        assert_eq!(reversed_again.report.reconciled, vec![second]);
        assert_eq!(chat_lines(&forward_again.state), chat_lines(&reversed_again.state));

        let rs = reversed_again.state.room(ROOM).unwrap();
        assert_eq!(rs.message_count(), 2);
        assert_eq!(rs.entry_status(first), Some(EntryStatus::Confirmed));
        assert_eq!(rs.entry_status(second), Some(EntryStatus::Confirmed));
        assert_eq!(
            rs.messages.iter().map(|m| m.position).collect::<Vec<_>>(),
            vec![Some(EventPosition::new(5, 0)), Some(EventPosition::new(6, 0))]
        );
    }

    #[test]
    fn test_targeted_confirmation_pairs_exactly() {
        let (first, second) = (LocalId::new(), LocalId::new());
        let mut s = apply(&GameState::default(), pending_chat(first, 1_000, "gg")).state;
        s = apply(&s, pending_chat(second, 1_001, "gg")).state;

        // The second write's receipt arrives before the first's event.
        s = apply(
            &s,
            Delta::OptimisticReconciled {
                room: ROOM,
                local_id: second,
                event: chat(6, 2, "gg"),
            },
        )
        .state;
        s = apply(&s, events(vec![chat(5, 2, "gg")])).state;

        let rs = s.room(ROOM).unwrap();
        let position_of = |id| {
            rs.messages
                .iter()
                .find(|m| m.local_id == Some(id))
                .and_then(|m| m.position)
        };
        assert_eq!(position_of(first), Some(EventPosition::new(5, 0)));
        assert_eq!(position_of(second), Some(EventPosition::new(6, 0)));
    }

    #[test]
    fn test_optimistic_outside_window_not_matched() {
        let local_id = LocalId::new();
        let s = apply(
            &GameState::default(),
            Delta::Optimistic(OptimisticEntry {
                local_id,
                room: ROOM,
                created_at: 1,
                kind: OptimisticKind::Chat {
                    sender: addr(2),
                    content: "hello".into(),
                },
            }),
        )
        .state;
        let r = apply(&s, events(vec![chat(3, 2, "hello")]));
        assert_eq!(r.state.room(ROOM).unwrap().message_count(), 2);
    }

    #[test]
    fn test_earliest_pending_entry_wins() {
        let first = LocalId::new();
        let second = LocalId::new();
        let mut s = GameState::default();
        for (id, at) in [(second, 1_002), (first, 1_001)] {
            s = apply(
                &s,
                Delta::Optimistic(OptimisticEntry {
                    local_id: id,
                    room: ROOM,
                    created_at: at,
                    kind: OptimisticKind::Chat {
                        sender: addr(2),
                        content: "gg".into(),
                    },
                }),
            )
            .state;
        }
        let r = apply(&s, events(vec![chat(3, 2, "gg")]));
        let rs = r.state.room(ROOM).unwrap();
        assert_eq!(rs.entry_status(first), Some(EntryStatus::Confirmed));
        assert_eq!(rs.entry_status(second), Some(EntryStatus::Pending));
    }

    #[test]
    fn test_rollback_and_unconfirmed() {
        let local_id = LocalId::new();
        let entry = Delta::Optimistic(OptimisticEntry {
            local_id,
            room: ROOM,
            created_at: 5,
            kind: OptimisticKind::Vote {
                voter: addr(2),
                suspect: addr(3),
                round: 1,
            },
        });
        let s = apply(&GameState::default(), entry).state;
        let s = apply(&s, Delta::OptimisticUnconfirmed { room: ROOM, local_id }).state;
        assert_eq!(
            s.room(ROOM).unwrap().entry_status(local_id),
            Some(EntryStatus::Unconfirmed)
        );
        let s = apply(&s, Delta::OptimisticFailed { room: ROOM, local_id }).state;
        assert_eq!(s.room(ROOM).unwrap().entry_status(local_id), None);
    }

    #[test]
    fn test_reconciled_delta_targets_entry_and_dedups_later_delivery() {
        let local_id = LocalId::new();
        let s = apply(
            &GameState::default(),
            Delta::Optimistic(OptimisticEntry {
                local_id,
                room: ROOM,
                created_at: 1_003,
                kind: OptimisticKind::Chat {
                    sender: addr(2),
                    content: "hi".into(),
                },
            }),
        )
        .state;
        let e = chat(3, 2, "hi");
        let s = apply(
            &s,
            Delta::OptimisticReconciled {
                room: ROOM,
                local_id,
                event: e.clone(),
            },
        )
        .state;
        let r = apply(&s, events(vec![e]));
        assert_eq!(r.report.duplicates, 1);
        assert_eq!(r.state.room(ROOM).unwrap().message_count(), 1);
    }

    #[test]
    fn test_vote_correction_counts_latest_only() {
        let vote = |block, suspect| {
            event(
                block,
                0,
                EventPayload::Vote {
                    voter: addr(2),
                    suspect: addr(suspect),
                    round: 1,
                },
            )
        };
        let r = apply(&GameState::default(), events(vec![vote(9, 4), vote(8, 3)]));
        let rs = r.state.room(ROOM).unwrap();
        assert_eq!(rs.votes.len(), 2);
        let tally = rs.tally(1);
        assert_eq!(tally.get(&addr(4)), Some(&1));
        assert_eq!(tally.get(&addr(3)), None);
    }

    #[test]
    fn test_elimination_latches_and_precedes_roster() {
        let elim = event(
            4,
            0,
            EventPayload::Elimination {
                player: addr(5),
                eliminated_by: addr(6),
                reason: "voted out".into(),
                final_score: 0,
            },
        );
        let s = apply(&GameState::default(), events(vec![elim])).state;
        let rs = s.room(ROOM).unwrap();
        assert!(rs.flags.kill_feed);
        assert_eq!(rs.kill_feed.len(), 1);

        // Roster still shows the player alive: created dead, no violation.
        let r = apply(
            &s,
            Delta::PlayerRoster {
                room: ROOM,
                players: vec![player(5, None)],
            },
        );
        assert!(r.report.violations.is_empty());
        assert!(!r.state.room(ROOM).unwrap().players[&addr(5)].is_alive);

        // Later "alive" snapshot is a resurrection.
        let r = apply(
            &r.state,
            Delta::PlayerSnapshot {
                room: ROOM,
                player: player(5, None),
            },
        );
        assert_eq!(r.report.violations[0].field, MonotonicField::IsAlive);
    }

    #[test]
    fn test_roster_ranks_extend_contiguously() {
        let r = apply(
            &GameState::default(),
            Delta::PlayerRoster {
                room: ROOM,
                players: vec![player(3, Some(2)), player(2, Some(1)), player(4, None)],
            },
        );
        assert!(r.report.violations.is_empty());
        assert!(invariant_rank_bijection(r.state.room(ROOM).unwrap()));

        let r = apply(
            &r.state,
            Delta::PlayerRoster {
                room: ROOM,
                players: vec![player(4, Some(4))],
            },
        );
        assert_eq!(r.report.violations[0].field, MonotonicField::EliminationRank);
        assert!(r.state.room(ROOM).unwrap().players[&addr(4)].is_alive);
    }

    #[test]
    fn test_duplicate_rank_in_batch_rejected() {
        let r = apply(
            &GameState::default(),
            Delta::PlayerRoster {
                room: ROOM,
                players: vec![player(2, Some(1)), player(3, Some(1))],
            },
        );
        assert_eq!(r.report.violations.len(), 1);
        assert!(invariant_rank_bijection(r.state.room(ROOM).unwrap()));
    }

    #[test]
    fn test_rank_change_rejected() {
        let s = apply(
            &GameState::default(),
            Delta::PlayerRoster {
                room: ROOM,
                players: vec![player(2, Some(1)), player(3, Some(2))],
            },
        )
        .state;
        let r = apply(
            &s,
            Delta::PlayerSnapshot {
                room: ROOM,
                player: player(2, Some(2)),
            },
        );
        assert_eq!(r.report.violations.len(), 1);
        assert_eq!(
            r.state.room(ROOM).unwrap().players[&addr(2)].elimination_rank,
            Some(1)
        );
    }

    #[test]
    fn test_verified_and_votes_monotonic() {
        let mut p = player(2, None);
        p.is_verified_human = true;
        p.successful_votes = 3;
        let s = apply(
            &GameState::default(),
            Delta::PlayerSnapshot {
                room: ROOM,
                player: p.clone(),
            },
        )
        .state;

        let mut unverified = p.clone();
        unverified.is_verified_human = false;
        let r = apply(
            &s,
            Delta::PlayerSnapshot {
                room: ROOM,
                player: unverified,
            },
        );
        assert_eq!(r.report.violations[0].field, MonotonicField::VerifiedHuman);

        let mut fewer = p;
        fewer.successful_votes = 1;
        let r = apply(
            &s,
            Delta::PlayerSnapshot {
                room: ROOM,
                player: fewer,
            },
        );
        assert_eq!(r.report.violations[0].field, MonotonicField::SuccessfulVotes);
    }

    #[test]
    fn test_roster_confirms_pending_join() {
        let local_id = LocalId::new();
        let s = apply(
            &GameState::default(),
            Delta::Optimistic(OptimisticEntry {
                local_id,
                room: ROOM,
                created_at: 1,
                kind: OptimisticKind::Join { player: addr(7) },
            }),
        )
        .state;
        assert!(s.room(ROOM).unwrap().entry_status(local_id).is_some());
        let s = apply(
            &s,
            Delta::PlayerRoster {
                room: ROOM,
                players: vec![player(7, None)],
            },
        )
        .state;
        let rs = s.room(ROOM).unwrap();
        assert!(rs.pending_actions.is_empty());
        assert!(rs.players.contains_key(&addr(7)));
        assert!(check_room(rs));
    }

    #[test]
    fn test_stale_marking_and_local_player() {
        let s = apply(&GameState::default(), Delta::MarkStale { room: ROOM }).state;
        assert!(s.room(ROOM).unwrap().stale);
        let s = apply(&s, Delta::ClearStale { room: ROOM }).state;
        assert!(!s.room(ROOM).unwrap().stale);
        let s = apply(&s, Delta::SetLocalPlayer(Some(addr(9)))).state;
        assert_eq!(s.local_player, Some(addr(9)));
    }

    #[test]
    fn test_full_phase_sequence_ends_consistent() {
        let mut s = apply(&GameState::default(), Delta::RoomSnapshot(room(Phase::Waiting, 0))).state;
        let mut seen = vec![s.room(ROOM).unwrap().phase()];
        for (i, phase) in [Phase::Phase1, Phase::Phase2, Phase::Phase3, Phase::Ended]
            .into_iter()
            .enumerate()
        {
            s = apply(&s, Delta::RoomSnapshot(room(phase, i as u64 + 1))).state;
            seen.push(s.room(ROOM).unwrap().phase());
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        let rs = s.room(ROOM).unwrap();
        let room = rs.room.as_ref().unwrap();
        assert!(!room.is_active && room.is_ended);
        assert!(rs.flags.victory && rs.flags.countdown && rs.flags.phase_transition);
    }
}
