//! End-to-end scenarios against the in-memory ledger.
//!
//! Test categories:
//! 1. Lifecycle: phases, eliminations, flags, ranks
//! 2. Delivery: duplicates, reordering, stale rooms
//! 3. Actions: validation, optimistic entries, rollback, late confirmation
//! 4. Sessions: usage exhaustion, expiry, approve-then-join

use arena_sync::domain::{check_room, SessionSecret};
use arena_sync::{
    ActionIntent, ActionOutcome, Delta, EntryStatus, InMemoryLedger, ManualClock, RoomFilter,
    SyncConfig, SyncEngine, SyncError, UiFlag,
};
use arena_types::{tokens_to_units, Address, LedgerEvent, LedgerWrite, Phase, RoomId, SessionRecord, Tier};
use std::sync::Arc;

// =============================================================================
// TEST HELPERS
// =============================================================================

const SESSION_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

const ME: Address = Address([0xA1; 20]);
const BOB: Address = Address([0xB0; 20]);
const CAROL: Address = Address([0xC0; 20]);
const CREATOR: Address = Address([0x01; 20]);

struct Arena {
    clock: Arc<ManualClock>,
    ledger: Arc<InMemoryLedger>,
    engine: SyncEngine,
    room: RoomId,
    key: Address,
}

fn session_record(max_usage: u64, expires_at: u64) -> SessionRecord {
    SessionRecord {
        owner: ME,
        expires_at,
        max_usage,
        usage_count: 0,
        is_revoked: false,
    }
}

async fn arena_with(max_usage: u64, start: bool) -> Arena {
    let clock = Arc::new(ManualClock::new(1_000));
    let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
    let room = ledger.create_room(CREATOR, Tier::Quick);
    for player in [ME, BOB, CAROL] {
        ledger.add_player(room, player).unwrap();
    }

    let key = SessionSecret::from_hex(SESSION_KEY).unwrap().address();
    ledger.register_session(key, session_record(max_usage, 10_000));

    let engine = if start {
        SyncEngine::start(
            ledger.clone(),
            clock.clone(),
            SyncConfig::for_testing(),
            vec![room],
        )
    } else {
        SyncEngine::new(ledger.clone(), clock.clone(), SyncConfig::for_testing())
    };
    engine.authorizer.initialize(SESSION_KEY).await.unwrap();
    engine.poller.sync_room(room).await.unwrap();
    engine.store.apply(Delta::SetLocalPlayer(Some(ME)));

    Arena {
        clock,
        ledger,
        engine,
        room,
        key,
    }
}

async fn arena() -> Arena {
    arena_with(100, false).await
}

fn chat(room: RoomId, content: &str) -> ActionIntent {
    ActionIntent::Chat {
        room,
        content: content.to_string(),
    }
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_phase_scenario_raises_each_flag() {
    let a = arena().await;
    let store = &a.engine.store;
    let baseline = store.snapshot();
    let rs = baseline.room(a.room).unwrap();
    assert!(!rs.flags.is_raised(UiFlag::Countdown));
    assert_eq!(rs.phase(), Phase::Waiting);

    a.ledger.set_phase(a.room, Phase::Phase1, 1).unwrap();
    a.engine.ingestor.backfill(a.room, None).await.unwrap();
    assert!(store.take_flag(a.room, UiFlag::Countdown));
    assert!(store.take_flag(a.room, UiFlag::PhaseTransition));
    assert!(!store.take_flag(a.room, UiFlag::Countdown));

    a.ledger.eliminate(a.room, BOB, CAROL, "voted out").unwrap();
    a.ledger.set_phase(a.room, Phase::Phase2, 2).unwrap();
    a.ledger.set_phase(a.room, Phase::Phase3, 3).unwrap();
    a.ledger.eliminate(a.room, CAROL, ME, "voted out").unwrap();
    a.ledger.set_phase(a.room, Phase::Ended, 3).unwrap();
    a.engine.ingestor.backfill(a.room, None).await.unwrap();

    let state = store.snapshot();
    let rs = state.room(a.room).unwrap();
    assert_eq!(rs.phase(), Phase::Ended);
    assert!(rs.flags.is_raised(UiFlag::KillFeed));
    assert!(rs.flags.is_raised(UiFlag::PhaseTransition));
    assert!(rs.flags.is_raised(UiFlag::Victory));
    assert!(!rs.flags.is_raised(UiFlag::Countdown));
    assert_eq!(rs.kill_feed.len(), 2);
    assert_eq!(rs.kill_feed[0].player, CAROL);
    assert!(!rs.players[&BOB].is_alive);

    a.engine.poller.sync_room(a.room).await.unwrap();
    let state = store.snapshot();
    let rs = state.room(a.room).unwrap();
    assert_eq!(rs.players[&BOB].elimination_rank, Some(1));
    assert_eq!(rs.players[&CAROL].elimination_rank, Some(2));
    assert_eq!(rs.players[&ME].elimination_rank, None);
    assert!(check_room(rs));
    assert_eq!(state.rooms_matching(RoomFilter::Ended).len(), 1);
    assert!(state.rooms_matching(RoomFilter::Active).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_phase_never_regresses_on_stale_snapshot() {
    let a = arena().await;
    a.ledger.set_phase(a.room, Phase::Phase2, 2).unwrap();
    a.engine.ingestor.backfill(a.room, None).await.unwrap();

    // Ledger node lags behind the events already seen.
    a.ledger
        .update_room(a.room, |info| {
            info.phase = Phase::Phase1.code();
            info.current_round = 1;
            info.is_active = true;
        })
        .unwrap();
    let _ = a.engine.poller.sync_room(a.room).await;

    let state = a.engine.store.snapshot();
    assert_eq!(state.room(a.room).unwrap().phase(), Phase::Phase2);
}

#[tokio::test(start_paused = true)]
async fn test_local_player_view() {
    let a = arena().await;
    let state = a.engine.store.snapshot();
    let me = state.local_player_in(a.room).unwrap();
    assert!(me.is_alive);
    assert!(state.local_player_in(RoomId(99)).is_none());
}

// =============================================================================
// DELIVERY
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_duplicate_and_reversed_delivery_applies_once_in_order() {
    let a = arena().await;
    for (i, sender) in [BOB, CAROL, BOB].into_iter().enumerate() {
        a.ledger.emit(
            a.room,
            vec![LedgerEvent::NewMessage {
                sender,
                content: format!("line {}", i),
                timestamp: 1_000 + i as u64,
            }],
        );
    }
    a.ledger.set_duplicate_delivery(true);
    a.ledger.set_reverse_delivery(true);

    a.engine.ingestor.backfill(a.room, None).await.unwrap();
    a.engine.ingestor.backfill(a.room, None).await.unwrap();

    let state = a.engine.store.snapshot();
    let rs = state.room(a.room).unwrap();
    let lines: Vec<&str> = rs.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(lines, vec!["line 0", "line 1", "line 2"]);
    assert!(check_room(rs));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_chat_event_is_shown_once() {
    let a = arena().await;
    let receipt = a.ledger.emit(
        a.room,
        vec![LedgerEvent::NewMessage {
            sender: BOB,
            content: "gm".into(),
            timestamp: 1_000,
        }],
    );
    let batch = a.engine.ingestor.ingest(a.room, &receipt.logs);
    assert_eq!(batch.report.applied, vec!["chat"]);

    let again = a.engine.ingestor.ingest(a.room, &receipt.logs);
    assert!(again.report.applied.is_empty());
    assert_eq!(again.report.duplicates, 1);
    assert_eq!(a.engine.store.snapshot().room(a.room).unwrap().message_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_room_goes_stale_and_recovers() {
    let a = arena().await;
    a.ledger.set_unreachable(a.room, true);

    let err = a.engine.poller.sync_room(a.room).await.unwrap_err();
    assert!(err.is_transient());
    let state = a.engine.store.snapshot();
    let rs = state.room(a.room).unwrap();
    assert!(rs.stale);
    assert!(rs.room.is_some());

    a.ledger.set_unreachable(a.room, false);
    a.engine.poller.sync_room(a.room).await.unwrap();
    assert!(!a.engine.store.snapshot().room(a.room).unwrap().stale);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_room_is_not_found_and_not_stale() {
    let a = arena().await;
    let err = a.engine.poller.sync_room(RoomId(42)).await.unwrap_err();
    assert!(matches!(err, SyncError::RoomNotFound(_)));
    assert!(a.engine.store.snapshot().room(RoomId(42)).is_none());
}

// =============================================================================
// ACTIONS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_overlong_chat_rejected_without_remote_call() {
    let a = arena().await;
    let version = a.engine.store.version();

    let err = a
        .engine
        .submitter
        .submit(chat(a.room, &"x".repeat(281)))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidInput(_)));
    assert!(a.ledger.submitted_writes().is_empty());
    assert_eq!(a.engine.store.version(), version);
    assert_eq!(a.ledger.session(a.key).unwrap().usage_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_overlong_emoji_chat_rejected_without_remote_call() {
    let a = arena().await;
    let version = a.engine.store.version();

    // 141 emoji are 282 UTF-16 units.
    let err = a
        .engine
        .submitter
        .submit(chat(a.room, &"😀".repeat(141)))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidInput(_)));
    assert!(a.ledger.submitted_writes().is_empty());
    assert_eq!(a.engine.store.version(), version);

    let outcome = a
        .engine
        .submitter
        .submit(chat(a.room, &"😀".repeat(140)))
        .await
        .unwrap();
    assert!(outcome.is_confirmed());
}

#[tokio::test(start_paused = true)]
async fn test_chat_at_limit_is_accepted() {
    let a = arena().await;
    let outcome = a
        .engine
        .submitter
        .submit(chat(a.room, &"x".repeat(280)))
        .await
        .unwrap();
    assert!(outcome.is_confirmed());
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_chat_is_replaced_by_its_event() {
    let a = arena().await;
    let outcome = a
        .engine
        .submitter
        .submit(chat(a.room, "i am definitely human"))
        .await
        .unwrap();
    let ActionOutcome::Confirmed {
        local_id: Some(local_id),
        ..
    } = outcome
    else {
        panic!("expected a confirmed chat, got {:?}", outcome);
    };

    // The same log arrives again through the event stream.
    a.engine.ingestor.backfill(a.room, None).await.unwrap();

    let state = a.engine.store.snapshot();
    let rs = state.room(a.room).unwrap();
    assert_eq!(rs.message_count(), 1);
    let entry = &rs.messages[0];
    assert_eq!(entry.status, EntryStatus::Confirmed);
    assert_eq!(entry.local_id, Some(local_id));
    assert_eq!(entry.sender, ME);
    assert!(entry.dedup_key.is_some());
    assert_eq!(a.ledger.session(a.key).unwrap().usage_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reverted_chat_is_rolled_back() {
    let a = arena().await;
    a.ledger.revert_next_write("spam filter");

    let err = a
        .engine
        .submitter
        .submit(chat(a.room, "buy my token"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SyncError::RemoteRejection {
            reason: "spam filter".into()
        }
    );
    let state = a.engine.store.snapshot();
    assert_eq!(state.room(a.room).unwrap().message_count(), 0);
    assert!(a.ledger.submitted_writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_write_failure_is_rolled_back_and_not_retried() {
    let a = arena().await;
    a.ledger.fail_next_writes(1);

    let err = a
        .engine
        .submitter
        .submit(chat(a.room, "hello?"))
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert!(a.ledger.submitted_writes().is_empty());
    assert_eq!(a.engine.store.snapshot().room(a.room).unwrap().message_count(), 0);

    // Nothing was retried behind the caller's back; the next attempt goes through.
    let outcome = a.engine.submitter.submit(chat(a.room, "hello?")).await.unwrap();
    assert!(outcome.is_confirmed());
    assert_eq!(a.ledger.submitted_writes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_chat_reconciles_when_log_arrives() {
    let a = arena().await;
    a.ledger.set_withhold_logs(true);

    let outcome = a
        .engine
        .submitter
        .submit(chat(a.room, "is anyone there"))
        .await
        .unwrap();
    assert!(matches!(
        outcome.timeout_error(),
        Some(SyncError::ReconciliationTimeout { waited_ms: 500, .. })
    ));
    let ActionOutcome::Unconfirmed { local_id, .. } = outcome else {
        panic!("expected an unconfirmed chat, got {:?}", outcome);
    };
    let status = a
        .engine
        .store
        .snapshot()
        .room(a.room)
        .unwrap()
        .entry_status(local_id);
    assert_eq!(status, Some(EntryStatus::Unconfirmed));

    a.clock.advance(5);
    a.ledger.release_withheld().unwrap();
    a.engine.ingestor.backfill(a.room, None).await.unwrap();

    let state = a.engine.store.snapshot();
    let rs = state.room(a.room).unwrap();
    assert_eq!(rs.message_count(), 1);
    assert_eq!(rs.entry_status(local_id), Some(EntryStatus::Confirmed));
}

#[tokio::test(start_paused = true)]
async fn test_vote_correction_counts_latest_vote_only() {
    let a = arena().await;
    a.ledger.set_phase(a.room, Phase::Phase1, 1).unwrap();
    a.engine.poller.sync_room(a.room).await.unwrap();

    let submitter = &a.engine.submitter;
    submitter
        .submit(ActionIntent::Vote {
            room: a.room,
            suspect: BOB,
        })
        .await
        .unwrap();
    submitter
        .submit(ActionIntent::Vote {
            room: a.room,
            suspect: CAROL,
        })
        .await
        .unwrap();
    a.ledger.emit(
        a.room,
        vec![LedgerEvent::VoteCast {
            voter: BOB,
            suspect: CAROL,
            round: 1,
        }],
    );
    a.engine.ingestor.backfill(a.room, None).await.unwrap();

    let state = a.engine.store.snapshot();
    let rs = state.room(a.room).unwrap();
    let tally = rs.tally(1);
    assert_eq!(tally.get(&CAROL), Some(&2));
    assert_eq!(tally.get(&BOB), None);
    // The audit trail keeps the corrected vote.
    assert_eq!(rs.votes.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_vote_outside_active_phase_is_rejected() {
    let a = arena().await;
    let err = a
        .engine
        .submitter
        .submit(ActionIntent::Vote {
            room: a.room,
            suspect: BOB,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RemoteRejection { .. }));
    assert!(a.engine.store.snapshot().room(a.room).unwrap().votes.is_empty());
}

// =============================================================================
// SESSIONS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_exhausted_session_blocks_before_any_entry() {
    let a = arena_with(1, false).await;
    a.engine.submitter.submit(chat(a.room, "first")).await.unwrap();
    let version = a.engine.store.version();

    let err = a
        .engine
        .submitter
        .submit(chat(a.room, "second"))
        .await
        .unwrap_err();

    let SyncError::Authorization {
        usage_count,
        max_usage,
        ..
    } = err
    else {
        panic!("expected an authorization error, got {:?}", err);
    };
    assert_eq!((usage_count, max_usage), (1, 1));
    assert_eq!(a.engine.store.version(), version);
    assert_eq!(a.ledger.submitted_writes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_session_blocks_writes() {
    let a = arena().await;
    a.clock.set(10_000);

    let err = a
        .engine
        .submitter
        .submit(chat(a.room, "too late"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Authorization { .. }));
    assert!(!a.engine.authorizer.is_valid());
    assert!(a.ledger.submitted_writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_join_approves_then_joins_and_confirms_from_roster() {
    let mut a = arena_with(100, true).await;
    let lobby = a.ledger.create_room(CREATOR, Tier::Quick);
    a.ledger.set_require_allowance(true);
    a.engine.poller.sync_room(lobby).await.unwrap();
    let fee = tokens_to_units(Tier::Quick.default_entry_fee());

    let outcome = a
        .engine
        .submitter
        .submit(ActionIntent::Join {
            room: lobby,
            entry_fee: fee,
        })
        .await
        .unwrap();

    assert!(outcome.is_confirmed());
    assert_eq!(
        a.ledger.submitted_writes(),
        vec![
            LedgerWrite::ApproveEntryFee { amount: fee },
            LedgerWrite::JoinRoom {
                room: lobby,
                entry_fee: fee
            },
        ]
    );
    assert_eq!(a.ledger.session(a.key).unwrap().usage_count, 2);
    assert!(a.ledger.allowance(ME).is_zero());
    assert!(a
        .engine
        .store
        .snapshot()
        .room(lobby)
        .unwrap()
        .players
        .contains_key(&ME));
    a.engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_join_with_wrong_fee_is_rejected() {
    let a = arena().await;
    let lobby = a.ledger.create_room(CREATOR, Tier::Quick);
    a.engine.poller.sync_room(lobby).await.unwrap();

    let err = a
        .engine
        .submitter
        .submit(ActionIntent::Join {
            room: lobby,
            entry_fee: tokens_to_units(1),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::RemoteRejection { .. }));
    let state = a.engine.store.snapshot();
    assert!(state.room(lobby).unwrap().pending_actions.is_empty());
}
