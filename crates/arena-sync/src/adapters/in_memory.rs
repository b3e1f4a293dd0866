//! # In-Memory Ledger
//!
//! A single-process arena contract implementing every ledger port. Used by
//! the test suites and for local development without a node.
//!
//! Besides the contract rules it supports:
//! - fault injection for reads, log queries and writes
//! - per-room outages
//! - duplicate and reversed log delivery
//! - withholding a write's logs until released, to exercise the
//!   confirmation timeout

use arena_types::{
    Address, LedgerEvent, LedgerLog, LedgerWrite, Phase, PlayerInfo, RoomId, RoomInfo,
    SessionRecord, Tier, TxHash, TxReceipt, U256,
    tokens_to_units,
};
use async_trait::async_trait;
use k256::ecdsa::VerifyingKey;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::config::MAX_MESSAGE_LEN;
use crate::domain::{
    address_from_pubkey, keccak256, write_digest, LedgerError, SessionCapability,
};
use crate::ports::{Clock, LedgerReader, LedgerWriter, SessionRegistry, SystemClock};

/// Humanity score every player starts with.
pub const STARTING_HUMANITY: i64 = 100;

#[derive(Debug, Default)]
struct Faults {
    failing_reads: u32,
    failing_log_reads: u32,
    failing_writes: u32,
    revert_next: Option<String>,
    unreachable: HashSet<RoomId>,
    duplicate_logs: bool,
    reverse_logs: bool,
    withhold_logs: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    head: u64,
    tx_counter: u64,
    rooms: BTreeMap<RoomId, RoomInfo>,
    /// Join order per room.
    roster: BTreeMap<RoomId, Vec<Address>>,
    players: HashMap<(RoomId, Address), PlayerInfo>,
    logs: Vec<LedgerLog>,
    withheld: Vec<(RoomId, LedgerEvent)>,
    sessions: HashMap<Address, SessionRecord>,
    allowances: HashMap<Address, U256>,
    claimed: HashSet<(RoomId, Address)>,
    require_allowance: bool,
    writes: Vec<LedgerWrite>,
    read_calls: u64,
    faults: Faults,
}

impl LedgerState {
    fn next_tx_hash(&mut self) -> TxHash {
        self.tx_counter += 1;
        TxHash(keccak256(&self.tx_counter.to_be_bytes()))
    }

    /// Mine one block holding `events` as a single transaction.
    fn mine(&mut self, events: Vec<(RoomId, LedgerEvent)>) -> TxReceipt {
        self.head += 1;
        let tx_hash = self.next_tx_hash();
        let block_number = self.head;
        let logs: Vec<LedgerLog> = events
            .into_iter()
            .enumerate()
            .map(|(index, (room_id, event))| LedgerLog {
                tx_hash,
                block_number,
                log_index: index as u32,
                room_id,
                event,
            })
            .collect();
        self.logs.extend(logs.iter().cloned());
        TxReceipt {
            tx_hash,
            block_number,
            logs,
        }
    }

    fn check_read(&mut self, room: Option<RoomId>) -> Result<(), LedgerError> {
        self.read_calls += 1;
        if let Some(room) = room {
            if self.faults.unreachable.contains(&room) {
                return Err(LedgerError::Transient(format!("room {} unreachable", room)));
            }
        }
        if self.faults.failing_reads > 0 {
            self.faults.failing_reads -= 1;
            return Err(LedgerError::Transient("injected read failure".into()));
        }
        Ok(())
    }

    fn room_mut(&mut self, room: RoomId) -> Result<&mut RoomInfo, LedgerError> {
        self.rooms.get_mut(&room).ok_or(LedgerError::RoomNotFound(room))
    }

    fn alive_player(&self, room: RoomId, player: Address) -> Result<&PlayerInfo, LedgerError> {
        match self.players.get(&(room, player)) {
            Some(info) if info.is_alive => Ok(info),
            Some(_) => Err(LedgerError::Reverted("player is eliminated".into())),
            None => Err(LedgerError::Reverted("not a player in this room".into())),
        }
    }

    fn touch_player(&mut self, room: RoomId, player: Address) {
        let head = self.head + 1;
        if let Some(info) = self.players.get_mut(&(room, player)) {
            info.action_count += 1;
            info.last_action_block = head;
        }
    }

    /// Contract rules for one write. Returns the logs it emits.
    fn execute(
        &mut self,
        sender: Address,
        write: &LedgerWrite,
        now: u64,
    ) -> Result<Vec<(RoomId, LedgerEvent)>, LedgerError> {
        match write {
            LedgerWrite::PostMessage { room, content } => {
                let info = self.rooms.get(room).ok_or(LedgerError::RoomNotFound(*room))?;
                if info.is_ended {
                    return Err(LedgerError::Reverted("room has ended".into()));
                }
                if content.is_empty() || content.encode_utf16().count() > MAX_MESSAGE_LEN {
                    return Err(LedgerError::Reverted("invalid message length".into()));
                }
                self.alive_player(*room, sender)?;
                self.touch_player(*room, sender);
                Ok(vec![(
                    *room,
                    LedgerEvent::NewMessage {
                        sender,
                        content: content.clone(),
                        timestamp: now,
                    },
                )])
            }
            LedgerWrite::CastVote { room, suspect } => {
                let info = self.rooms.get(room).ok_or(LedgerError::RoomNotFound(*room))?;
                if !info.is_active {
                    return Err(LedgerError::Reverted("voting is closed".into()));
                }
                let round = info.current_round;
                if *suspect == sender {
                    return Err(LedgerError::Reverted("cannot vote for yourself".into()));
                }
                self.alive_player(*room, sender)?;
                self.alive_player(*room, *suspect)
                    .map_err(|_| LedgerError::Reverted("suspect is not an alive player".into()))?;
                self.touch_player(*room, sender);
                Ok(vec![(
                    *room,
                    LedgerEvent::VoteCast {
                        voter: sender,
                        suspect: *suspect,
                        round,
                    },
                )])
            }
            LedgerWrite::ApproveEntryFee { amount } => {
                self.allowances.insert(sender, *amount);
                Ok(Vec::new())
            }
            LedgerWrite::JoinRoom { room, entry_fee } => {
                let require_allowance = self.require_allowance;
                let allowance = self.allowances.get(&sender).copied().unwrap_or_default();
                if self.players.contains_key(&(*room, sender)) {
                    return Err(LedgerError::Reverted("already joined".into()));
                }
                let join_block = self.head + 1;
                let info = self.room_mut(*room)?;
                if info.phase != Phase::Waiting.code() {
                    return Err(LedgerError::Reverted("room is not accepting players".into()));
                }
                if info.player_count >= info.max_players {
                    return Err(LedgerError::Reverted("room is full".into()));
                }
                if *entry_fee != info.entry_fee {
                    return Err(LedgerError::Reverted("incorrect entry fee".into()));
                }
                if require_allowance && allowance < *entry_fee {
                    return Err(LedgerError::Reverted("insufficient allowance".into()));
                }
                info.player_count += 1;
                info.alive_count += 1;
                info.prize_pool = info.prize_pool.saturating_add(*entry_fee);
                if require_allowance {
                    self.allowances.insert(sender, allowance - *entry_fee);
                }
                self.roster.entry(*room).or_default().push(sender);
                self.players.insert(
                    (*room, sender),
                    PlayerInfo {
                        address: sender,
                        humanity_score: STARTING_HUMANITY,
                        is_alive: true,
                        is_verified_human: false,
                        join_block,
                        elimination_block: 0,
                        elimination_rank: 0,
                        last_action_block: join_block,
                        action_count: 0,
                        successful_votes: 0,
                    },
                );
                Ok(Vec::new())
            }
            LedgerWrite::ClaimReward { room } => {
                let info = self.rooms.get(room).ok_or(LedgerError::RoomNotFound(*room))?;
                if !info.is_ended {
                    return Err(LedgerError::Reverted("room has not ended".into()));
                }
                if !self.players.contains_key(&(*room, sender)) {
                    return Err(LedgerError::Reverted("not a player in this room".into()));
                }
                if !self.claimed.insert((*room, sender)) {
                    return Err(LedgerError::Reverted("reward already claimed".into()));
                }
                Ok(Vec::new())
            }
            LedgerWrite::CreateRoom {
                tier,
                max_players,
                entry_fee,
            } => {
                let id = RoomId(self.rooms.len() as u64 + 1);
                let start_block = self.head + 1;
                self.rooms
                    .insert(id, waiting_room(id, sender, *tier, *max_players, *entry_fee, start_block));
                Ok(Vec::new())
            }
        }
    }
}

fn waiting_room(
    id: RoomId,
    creator: Address,
    tier: Tier,
    max_players: u32,
    entry_fee: U256,
    start_block: u64,
) -> RoomInfo {
    RoomInfo {
        id,
        creator,
        tier: tier.code(),
        phase: Phase::Waiting.code(),
        entry_fee,
        prize_pool: U256::zero(),
        start_block,
        current_round: 0,
        max_players,
        player_count: 0,
        alive_count: 0,
        eliminated_count: 0,
        is_active: false,
        is_ended: false,
    }
}

/// In-memory arena contract and session registry.
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            clock,
        }
    }

    // -------------------------------------------------------------------------
    // Scenario setup
    // -------------------------------------------------------------------------

    /// Create a waiting room with the tier's default fee and capacity.
    pub fn create_room(&self, creator: Address, tier: Tier) -> RoomId {
        self.create_room_with(
            creator,
            tier,
            tier.default_max_players(),
            tokens_to_units(tier.default_entry_fee()),
        )
    }

    pub fn create_room_with(
        &self,
        creator: Address,
        tier: Tier,
        max_players: u32,
        entry_fee: U256,
    ) -> RoomId {
        let mut state = self.state.lock();
        state.head += 1;
        let id = RoomId(state.rooms.len() as u64 + 1);
        let start_block = state.head;
        state.rooms.insert(
            id,
            waiting_room(id, creator, tier, max_players, entry_fee, start_block),
        );
        id
    }

    /// Seat a player directly, bypassing fees.
    pub fn add_player(&self, room: RoomId, player: Address) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        let join_block = state.head;
        let info = state.room_mut(room)?;
        info.player_count += 1;
        info.alive_count += 1;
        state.roster.entry(room).or_default().push(player);
        state.players.insert(
            (room, player),
            PlayerInfo {
                address: player,
                humanity_score: STARTING_HUMANITY,
                is_alive: true,
                is_verified_human: false,
                join_block,
                elimination_block: 0,
                elimination_rank: 0,
                last_action_block: join_block,
                action_count: 0,
                successful_votes: 0,
            },
        );
        Ok(())
    }

    /// Edit a player record in place.
    pub fn update_player<F>(&self, room: RoomId, player: Address, edit: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut PlayerInfo),
    {
        let mut state = self.state.lock();
        let info = state
            .players
            .get_mut(&(room, player))
            .ok_or(LedgerError::RoomNotFound(room))?;
        edit(info);
        Ok(())
    }

    /// Edit a room record in place, bypassing contract rules.
    pub fn update_room<F>(&self, room: RoomId, edit: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut RoomInfo),
    {
        let mut state = self.state.lock();
        edit(state.room_mut(room)?);
        Ok(())
    }

    /// Move a room to `phase` and emit `PhaseAdvanced`.
    pub fn set_phase(&self, room: RoomId, phase: Phase, round: u64) -> Result<LedgerLog, LedgerError> {
        let mut state = self.state.lock();
        let info = state.room_mut(room)?;
        info.phase = phase.code();
        info.current_round = round;
        info.is_active = phase.is_active();
        info.is_ended = phase.is_ended();
        let receipt = state.mine(vec![(
            room,
            LedgerEvent::PhaseAdvanced {
                phase: phase.code(),
                round,
            },
        )]);
        Ok(first_log(receipt))
    }

    /// Eliminate a player, assign the next rank and emit `PlayerEliminated`.
    pub fn eliminate(
        &self,
        room: RoomId,
        player: Address,
        eliminated_by: Address,
        reason: &str,
    ) -> Result<LedgerLog, LedgerError> {
        let now = self.clock.now_secs();
        let mut state = self.state.lock();
        let block = state.head + 1;
        let info = state.room_mut(room)?;
        info.alive_count = info.alive_count.saturating_sub(1);
        info.eliminated_count += 1;
        let rank = info.eliminated_count;
        let final_score = {
            let record = state
                .players
                .get_mut(&(room, player))
                .ok_or_else(|| LedgerError::Reverted("not a player in this room".into()))?;
            record.is_alive = false;
            record.elimination_block = block;
            record.elimination_rank = rank;
            record.humanity_score
        };
        let receipt = state.mine(vec![(
            room,
            LedgerEvent::PlayerEliminated {
                player,
                eliminated_by,
                reason: reason.to_string(),
                final_score,
                timestamp: now,
            },
        )]);
        Ok(first_log(receipt))
    }

    /// Mine one transaction carrying `events` for `room`.
    pub fn emit(&self, room: RoomId, events: Vec<LedgerEvent>) -> TxReceipt {
        let mut state = self.state.lock();
        state.mine(events.into_iter().map(|e| (room, e)).collect())
    }

    pub fn advance_blocks(&self, count: u64) {
        self.state.lock().head += count;
    }

    pub fn head(&self) -> u64 {
        self.state.lock().head
    }

    pub fn register_session(&self, key: Address, record: SessionRecord) {
        self.state.lock().sessions.insert(key, record);
    }

    pub fn revoke_session(&self, key: Address) {
        if let Some(record) = self.state.lock().sessions.get_mut(&key) {
            record.is_revoked = true;
        }
    }

    pub fn session(&self, key: Address) -> Option<SessionRecord> {
        self.state.lock().sessions.get(&key).cloned()
    }

    /// Make joins consume a prior `approve`.
    pub fn set_require_allowance(&self, required: bool) {
        self.state.lock().require_allowance = required;
    }

    pub fn allowance(&self, owner: Address) -> U256 {
        self.state
            .lock()
            .allowances
            .get(&owner)
            .copied()
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Fault injection
    // -------------------------------------------------------------------------

    /// Fail the next `count` snapshot reads with a transient error.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().faults.failing_reads = count;
    }

    /// Fail the next `count` log queries with a transient error.
    pub fn fail_next_log_reads(&self, count: u32) {
        self.state.lock().faults.failing_log_reads = count;
    }

    /// Fail the next `count` writes with a transient error.
    pub fn fail_next_writes(&self, count: u32) {
        self.state.lock().faults.failing_writes = count;
    }

    /// Revert the next write with `reason`.
    pub fn revert_next_write(&self, reason: &str) {
        self.state.lock().faults.revert_next = Some(reason.to_string());
    }

    /// Every read touching `room` fails until cleared.
    pub fn set_unreachable(&self, room: RoomId, unreachable: bool) {
        let mut state = self.state.lock();
        if unreachable {
            state.faults.unreachable.insert(room);
        } else {
            state.faults.unreachable.remove(&room);
        }
    }

    /// Deliver every log twice.
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.state.lock().faults.duplicate_logs = enabled;
    }

    /// Deliver logs newest first.
    pub fn set_reverse_delivery(&self, enabled: bool) {
        self.state.lock().faults.reverse_logs = enabled;
    }

    /// Hold back the logs of subsequent writes: receipts come back empty and
    /// the logs stay invisible until [`release_withheld`](Self::release_withheld).
    pub fn set_withhold_logs(&self, enabled: bool) {
        self.state.lock().faults.withhold_logs = enabled;
    }

    /// Mine every withheld log in one new block.
    pub fn release_withheld(&self) -> Option<TxReceipt> {
        let mut state = self.state.lock();
        if state.withheld.is_empty() {
            return None;
        }
        let events = std::mem::take(&mut state.withheld);
        Some(state.mine(events))
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Writes that were accepted, in order.
    pub fn submitted_writes(&self) -> Vec<LedgerWrite> {
        self.state.lock().writes.clone()
    }

    /// Snapshot reads attempted, failed ones included.
    pub fn read_calls(&self) -> u64 {
        self.state.lock().read_calls
    }
}

fn first_log(receipt: TxReceipt) -> LedgerLog {
    let mut logs = receipt.logs;
    logs.swap_remove(0)
}

#[async_trait]
impl LedgerReader for InMemoryLedger {
    async fn room_count(&self) -> Result<u64, LedgerError> {
        let mut state = self.state.lock();
        state.check_read(None)?;
        Ok(state.rooms.len() as u64)
    }

    async fn room_info(&self, room: RoomId) -> Result<RoomInfo, LedgerError> {
        let mut state = self.state.lock();
        state.check_read(Some(room))?;
        state
            .rooms
            .get(&room)
            .cloned()
            .ok_or(LedgerError::RoomNotFound(room))
    }

    async fn player_info(&self, room: RoomId, player: Address) -> Result<PlayerInfo, LedgerError> {
        let mut state = self.state.lock();
        state.check_read(Some(room))?;
        state
            .players
            .get(&(room, player))
            .cloned()
            .ok_or(LedgerError::RoomNotFound(room))
    }

    async fn room_players(&self, room: RoomId) -> Result<Vec<Address>, LedgerError> {
        let mut state = self.state.lock();
        state.check_read(Some(room))?;
        if !state.rooms.contains_key(&room) {
            return Err(LedgerError::RoomNotFound(room));
        }
        Ok(state.roster.get(&room).cloned().unwrap_or_default())
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        Ok(self.state.lock().head)
    }

    async fn room_logs(
        &self,
        room: RoomId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LedgerLog>, LedgerError> {
        let mut state = self.state.lock();
        if state.faults.failing_log_reads > 0 {
            state.faults.failing_log_reads -= 1;
            return Err(LedgerError::Transient("injected log query failure".into()));
        }
        if state.faults.unreachable.contains(&room) {
            return Err(LedgerError::Transient(format!("room {} unreachable", room)));
        }

        let mut logs: Vec<LedgerLog> = state
            .logs
            .iter()
            .filter(|log| {
                log.room_id == room
                    && log.block_number >= from_block
                    && log.block_number <= to_block
            })
            .cloned()
            .collect();
        if state.faults.reverse_logs {
            logs.reverse();
        }
        if state.faults.duplicate_logs {
            logs = logs.into_iter().flat_map(|log| [log.clone(), log]).collect();
        }
        Ok(logs)
    }
}

#[async_trait]
impl SessionRegistry for InMemoryLedger {
    async fn session_record(&self, key: Address) -> Result<SessionRecord, LedgerError> {
        self.state
            .lock()
            .sessions
            .get(&key)
            .cloned()
            .ok_or(LedgerError::SessionNotFound(key))
    }
}

#[async_trait]
impl LedgerWriter for InMemoryLedger {
    async fn submit(
        &self,
        capability: &SessionCapability,
        write: LedgerWrite,
    ) -> Result<TxReceipt, LedgerError> {
        // Signature check happens before touching contract state.
        let digest = write_digest(&write).map_err(|e| LedgerError::Reverted(e.to_string()))?;
        let (signature, recovery_id) = capability
            .sign(&write)
            .map_err(|e| LedgerError::Reverted(e.to_string()))?;
        let recovered = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
            .map_err(|_| LedgerError::Reverted("invalid signature".into()))?;
        let key = address_from_pubkey(&recovered);
        if key != capability.key() {
            return Err(LedgerError::Reverted("signature does not match session key".into()));
        }

        let now = self.clock.now_secs();
        let mut state = self.state.lock();

        if state.faults.failing_writes > 0 {
            state.faults.failing_writes -= 1;
            return Err(LedgerError::Transient("injected write failure".into()));
        }

        let record = state
            .sessions
            .get(&key)
            .cloned()
            .ok_or(LedgerError::SessionNotFound(key))?;
        if record.is_revoked {
            return Err(LedgerError::Reverted("session revoked".into()));
        }
        if now >= record.expires_at {
            return Err(LedgerError::Reverted("session expired".into()));
        }
        if record.usage_count >= record.max_usage {
            return Err(LedgerError::Reverted("session usage exhausted".into()));
        }

        if let Some(reason) = state.faults.revert_next.take() {
            return Err(LedgerError::Reverted(reason));
        }

        let events = state.execute(record.owner, &write, now)?;
        if let Some(session) = state.sessions.get_mut(&key) {
            session.usage_count += 1;
        }
        state.writes.push(write.clone());

        let receipt = if state.faults.withhold_logs && !events.is_empty() {
            state.withheld.extend(events);
            state.mine(Vec::new())
        } else {
            state.mine(events)
        };
        debug!(
            method = write.method(),
            tx_hash = %receipt.tx_hash,
            block = receipt.block_number,
            logs = receipt.logs.len(),
            "In-memory ledger mined write"
        );
        Ok(receipt)
    }
}
