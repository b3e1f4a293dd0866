//! # Action Submitter
//!
//! Turns a player intent into a ledger write with an optimistic entry.
//!
//! ## Protocol
//!
//! 1. Validate locally. Nothing remote happens for an invalid intent.
//! 2. Obtain a session capability.
//! 3. Insert the optimistic entry (chat, vote, join).
//! 4. Submit under the capability's write lock; count one usage per write.
//! 5. Confirm from the receipt, or wait for the store to confirm. A timeout
//!    demotes the entry to `Unconfirmed` and keeps it.
//! 6. Any write failure rolls the entry back. Writes are never retried here.

use arena_telemetry::{log_room_event, log_tx_event, ACTIONS, RECONCILIATION_TIMEOUTS};
use arena_types::{tokens_to_units, Address, LedgerWrite, RoomId, Tier, TxHash, TxReceipt, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::algorithms::normalize_logs;
use crate::application::authorizer::SessionAuthorizer;
use crate::application::poller::PollTrigger;
use crate::config::SyncConfig;
use crate::domain::{
    ActionKind, Delta, EntryStatus, EventPayload, LocalId, NormalizedEvent, OptimisticEntry,
    OptimisticKind, SessionCapability, SyncError,
};
use crate::ports::{Clock, LedgerWriter};
use crate::store::StateStore;

/// Player counts a new room may have.
pub const ROOM_SIZE_RANGE: std::ops::RangeInclusive<u32> = 3..=50;
/// Entry fees a new room may charge, in whole tokens.
pub const ROOM_FEE_RANGE: std::ops::RangeInclusive<u64> = 1..=100;

/// What the player wants to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionIntent {
    Chat { room: RoomId, content: String },
    Vote { room: RoomId, suspect: Address },
    Join { room: RoomId, entry_fee: U256 },
    Claim { room: RoomId },
    CreateRoom {
        tier: Tier,
        max_players: u32,
        /// Whole tokens.
        entry_fee: u64,
    },
}

impl ActionIntent {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionIntent::Chat { .. } => ActionKind::Chat,
            ActionIntent::Vote { .. } => ActionKind::Vote,
            ActionIntent::Join { .. } => ActionKind::Join,
            ActionIntent::Claim { .. } => ActionKind::Claim,
            ActionIntent::CreateRoom { .. } => ActionKind::CreateRoom,
        }
    }

    pub fn room(&self) -> Option<RoomId> {
        match self {
            ActionIntent::Chat { room, .. }
            | ActionIntent::Vote { room, .. }
            | ActionIntent::Join { room, .. }
            | ActionIntent::Claim { room } => Some(*room),
            ActionIntent::CreateRoom { .. } => None,
        }
    }

    /// Local checks that need no remote state.
    pub fn validate(&self, max_message_len: usize) -> Result<(), SyncError> {
        match self {
            ActionIntent::Chat { content, .. } => {
                if content.trim().is_empty() {
                    return Err(SyncError::InvalidInput("message is empty".into()));
                }
                // UTF-16 code units, as the contract and the web client count.
                let len = content.encode_utf16().count();
                if len > max_message_len {
                    return Err(SyncError::InvalidInput(format!(
                        "message too long ({} > {} UTF-16 units)",
                        len, max_message_len
                    )));
                }
            }
            ActionIntent::Vote { suspect, .. } => {
                if suspect.is_zero() {
                    return Err(SyncError::InvalidInput("vote target is the zero address".into()));
                }
            }
            ActionIntent::Join { entry_fee, .. } => {
                if entry_fee.is_zero() {
                    return Err(SyncError::InvalidInput("entry fee required to join".into()));
                }
            }
            ActionIntent::Claim { .. } => {}
            ActionIntent::CreateRoom {
                max_players,
                entry_fee,
                ..
            } => {
                if !ROOM_SIZE_RANGE.contains(max_players) {
                    return Err(SyncError::InvalidInput(format!(
                        "max players must be within {}..={}",
                        ROOM_SIZE_RANGE.start(),
                        ROOM_SIZE_RANGE.end()
                    )));
                }
                if !ROOM_FEE_RANGE.contains(entry_fee) {
                    return Err(SyncError::InvalidInput(format!(
                        "entry fee must be within {}..={} tokens",
                        ROOM_FEE_RANGE.start(),
                        ROOM_FEE_RANGE.end()
                    )));
                }
            }
        }
        Ok(())
    }

    fn write(&self) -> LedgerWrite {
        match self {
            ActionIntent::Chat { room, content } => LedgerWrite::PostMessage {
                room: *room,
                content: content.clone(),
            },
            ActionIntent::Vote { room, suspect } => LedgerWrite::CastVote {
                room: *room,
                suspect: *suspect,
            },
            ActionIntent::Join { room, entry_fee } => LedgerWrite::JoinRoom {
                room: *room,
                entry_fee: *entry_fee,
            },
            ActionIntent::Claim { room } => LedgerWrite::ClaimReward { room: *room },
            ActionIntent::CreateRoom {
                tier,
                max_players,
                entry_fee,
            } => LedgerWrite::CreateRoom {
                tier: *tier,
                max_players: *max_players,
                entry_fee: tokens_to_units(*entry_fee),
            },
        }
    }
}

/// Result of a submitted action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The ledger event (or receipt) confirmed the action.
    Confirmed {
        tx_hash: TxHash,
        local_id: Option<LocalId>,
    },
    /// Mined, but the confirming event was not seen in time. The entry is
    /// kept as unconfirmed and may still reconcile later.
    Unconfirmed {
        tx_hash: TxHash,
        local_id: LocalId,
        waited_ms: u64,
    },
}

impl ActionOutcome {
    pub fn tx_hash(&self) -> TxHash {
        match self {
            ActionOutcome::Confirmed { tx_hash, .. } | ActionOutcome::Unconfirmed { tx_hash, .. } => {
                *tx_hash
            }
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, ActionOutcome::Confirmed { .. })
    }

    /// The timeout an unconfirmed outcome stands for. The write itself
    /// succeeded, so callers decide whether this is fatal.
    pub fn timeout_error(&self) -> Option<SyncError> {
        match self {
            ActionOutcome::Unconfirmed {
                local_id,
                waited_ms,
                ..
            } => Some(SyncError::ReconciliationTimeout {
                local_id: *local_id,
                waited_ms: *waited_ms,
            }),
            ActionOutcome::Confirmed { .. } => None,
        }
    }
}

/// Action submitter.
pub struct ActionSubmitter {
    writer: Arc<dyn LedgerWriter>,
    authorizer: Arc<SessionAuthorizer>,
    store: StateStore,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    poll_trigger: Option<PollTrigger>,
}

impl ActionSubmitter {
    pub fn new(
        writer: Arc<dyn LedgerWriter>,
        authorizer: Arc<SessionAuthorizer>,
        store: StateStore,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            writer,
            authorizer,
            store,
            clock,
            config,
            poll_trigger: None,
        }
    }

    /// Ask the poller for a fresh roster after a join.
    pub fn with_poll_trigger(mut self, trigger: PollTrigger) -> Self {
        self.poll_trigger = Some(trigger);
        self
    }

    pub async fn submit(&self, intent: ActionIntent) -> Result<ActionOutcome, SyncError> {
        let kind = intent.kind();
        let result = self.run(&intent).await;
        let outcome = match &result {
            Ok(ActionOutcome::Confirmed { .. }) => "confirmed",
            Ok(ActionOutcome::Unconfirmed { .. }) => "unconfirmed",
            Err(SyncError::InvalidInput(_)) => "invalid",
            Err(SyncError::Authorization { .. }) => "unauthorized",
            Err(SyncError::RemoteRejection { .. }) => "rejected",
            Err(SyncError::TransientRemote(_)) => "transient",
            Err(_) => "failed",
        };
        ACTIONS.with_label_values(&[kind.as_str(), outcome]).inc();
        result
    }

    async fn run(&self, intent: &ActionIntent) -> Result<ActionOutcome, SyncError> {
        intent.validate(self.config.max_message_len)?;
        let capability = self.authorizer.authorize().await?;
        let owner = capability.owner();

        let local_id = LocalId::new();
        let optimistic = self.optimistic_kind(intent, owner).map(|kind| OptimisticEntry {
            local_id,
            room: intent.room().unwrap_or_default(),
            created_at: self.clock.now_secs(),
            kind,
        });
        if let Some(entry) = &optimistic {
            self.store.apply(Delta::Optimistic(entry.clone()));
        }

        let receipt = match self.write(&capability, intent).await {
            Ok(receipt) => receipt,
            Err(err) => {
                if let Some(entry) = &optimistic {
                    self.store.apply(Delta::OptimisticFailed {
                        room: entry.room,
                        local_id,
                    });
                }
                if let Some(room) = intent.room() {
                    log_room_event!(
                        warn,
                        "submitter",
                        room,
                        "[arena-sync] Action failed, optimistic entry rolled back",
                        action = intent.kind().as_str(),
                        error = %err
                    );
                }
                return Err(err);
            }
        };
        // Release the key for the next write before waiting.
        drop(capability);

        let Some(entry) = optimistic else {
            return Ok(ActionOutcome::Confirmed {
                tx_hash: receipt.tx_hash,
                local_id: None,
            });
        };
        self.confirm(entry, owner, &receipt).await
    }

    fn optimistic_kind(&self, intent: &ActionIntent, owner: Address) -> Option<OptimisticKind> {
        match intent {
            ActionIntent::Chat { content, .. } => Some(OptimisticKind::Chat {
                sender: owner,
                content: content.clone(),
            }),
            ActionIntent::Vote { room, suspect } => {
                let round = self
                    .store
                    .snapshot()
                    .room(*room)
                    .map(|rs| rs.current_round())
                    .unwrap_or_default();
                Some(OptimisticKind::Vote {
                    voter: owner,
                    suspect: *suspect,
                    round,
                })
            }
            ActionIntent::Join { .. } => Some(OptimisticKind::Join { player: owner }),
            ActionIntent::Claim { .. } | ActionIntent::CreateRoom { .. } => None,
        }
    }

    /// All ledger writes for `intent`, inside one critical section.
    async fn write(
        &self,
        capability: &SessionCapability,
        intent: &ActionIntent,
    ) -> Result<TxReceipt, SyncError> {
        if let ActionIntent::Join { entry_fee, .. } = intent {
            if self.config.approve_before_join {
                self.write_one(capability, LedgerWrite::ApproveEntryFee { amount: *entry_fee })
                    .await?;
            }
        }
        self.write_one(capability, intent.write()).await
    }

    async fn write_one(
        &self,
        capability: &SessionCapability,
        write: LedgerWrite,
    ) -> Result<TxReceipt, SyncError> {
        let method = write.method();
        let receipt = self.writer.submit(capability, write).await?;
        self.authorizer.record_usage(capability.generation());
        log_tx_event!(
            info,
            "submitter",
            "[arena-sync] Write mined",
            receipt.tx_hash,
            method = method,
            block = receipt.block_number
        );
        Ok(receipt)
    }

    async fn confirm(
        &self,
        entry: OptimisticEntry,
        owner: Address,
        receipt: &TxReceipt,
    ) -> Result<ActionOutcome, SyncError> {
        let room = entry.room;
        let local_id = entry.local_id;
        let confirmed = ActionOutcome::Confirmed {
            tx_hash: receipt.tx_hash,
            local_id: Some(local_id),
        };

        let logs: Vec<_> = receipt
            .logs
            .iter()
            .filter(|log| log.room_id == room)
            .cloned()
            .collect();
        let (mut events, _) = normalize_logs(&logs, self.clock.now_secs());
        if let Some(i) = events.iter().position(|e| confirms(&entry.kind, e)) {
            let event = events.remove(i);
            self.store.apply(Delta::OptimisticReconciled {
                room,
                local_id,
                event,
            });
            if !events.is_empty() {
                self.store.apply(Delta::Events { room, events });
            }
            return Ok(confirmed);
        }

        if let (OptimisticKind::Join { .. }, Some(trigger)) = (&entry.kind, &self.poll_trigger) {
            trigger.catch_up(room);
        }

        let timeout = self.config.confirmation_timeout();
        let is_confirmed = |state: &crate::domain::GameState| {
            let Some(rs) = state.room(room) else {
                return false;
            };
            match &entry.kind {
                OptimisticKind::Join { player } => rs.players.contains_key(player),
                _ => rs.entry_status(local_id) == Some(EntryStatus::Confirmed),
            }
        };
        match self.store.wait_until(is_confirmed, timeout).await {
            Ok(_) => Ok(confirmed),
            Err(_) => {
                self.store
                    .apply(Delta::OptimisticUnconfirmed { room, local_id });
                RECONCILIATION_TIMEOUTS.inc();
                let waited_ms = timeout.as_millis() as u64;
                log_room_event!(
                    warn,
                    "submitter",
                    room,
                    "[arena-sync] Action not confirmed in time, kept as unconfirmed",
                    local_id = %local_id,
                    owner = %owner,
                    waited_ms = waited_ms
                );
                Ok(ActionOutcome::Unconfirmed {
                    tx_hash: receipt.tx_hash,
                    local_id,
                    waited_ms,
                })
            }
        }
    }
}

/// Whether `event` is the ledger echo of the optimistic `kind`.
fn confirms(kind: &OptimisticKind, event: &NormalizedEvent) -> bool {
    match (kind, &event.payload) {
        (
            OptimisticKind::Chat { sender, content },
            EventPayload::Chat {
                sender: s,
                content: c,
                ..
            },
        ) => sender == s && content == c,
        (
            OptimisticKind::Vote { voter, suspect, .. },
            EventPayload::Vote {
                voter: v,
                suspect: t,
                ..
            },
        ) => voter == v && suspect == t,
        _ => false,
    }
}
