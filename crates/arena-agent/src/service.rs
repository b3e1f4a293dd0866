//! Agent gateway: decodes commands and runs them against a sync engine.

use arena_sync::{ActionIntent, ActionOutcome, Delta, SyncEngine, SyncError};
use arena_telemetry::{metric_inc, AGENT_REQUESTS};
use arena_types::{Address, RoomId, U256};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::domain::{
    parse_token_amount, ActionParams, ActionType, AgentResponse, ApiError, ApiResult,
    ArenaStatus, ArenaStatusParams, InitSessionParams, Method, RequestEnvelope, SessionStatusParams,
    SessionView,
};

/// `action_onchain` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub action: ActionType,
    pub room_id: RoomId,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
    /// Set when the write went through but was not seen confirmed in time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<ApiError>,
}

/// `init_session` result. Never carries key material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInit {
    pub session_key: Address,
    pub generation: u64,
    /// `None` when the registry could not be reached yet.
    pub status: Option<SessionView>,
}

/// Serves agent commands over one engine.
pub struct AgentGateway {
    engine: SyncEngine,
    /// Last block whose events were pulled, per room.
    cursors: Mutex<HashMap<RoomId, u64>>,
}

impl AgentGateway {
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            engine,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Handle one raw request line.
    pub async fn handle_json(&self, raw: &str) -> AgentResponse {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => return AgentResponse::failure(None, ApiError::parse_error(e.to_string())),
        };
        let id = value.get("id").cloned().filter(|id| !id.is_null());
        match serde_json::from_value::<RequestEnvelope>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => AgentResponse::failure(id, ApiError::invalid_request(e.to_string())),
        }
    }

    /// Handle one decoded request.
    pub async fn handle(&self, request: RequestEnvelope) -> AgentResponse {
        let id = request.id.clone();
        let (label, result) = match Method::from_name(&request.method) {
            Some(method) => (method.name(), self.dispatch(method, &request).await),
            None => ("unknown", Err(ApiError::method_not_found(&request.method))),
        };

        match result {
            Ok(value) => {
                metric_inc!(AGENT_REQUESTS, &[label, "ok"]);
                debug!(method = label, "[arena-agent] Command succeeded");
                AgentResponse::success(id, value)
            }
            Err(error) => {
                metric_inc!(AGENT_REQUESTS, &[label, "error"]);
                warn!(
                    method = label,
                    code = error.code,
                    error = %error.message,
                    "[arena-agent] Command failed"
                );
                AgentResponse::failure(id, error)
            }
        }
    }

    async fn dispatch(
        &self,
        method: Method,
        request: &RequestEnvelope,
    ) -> ApiResult<serde_json::Value> {
        match method {
            Method::GetArenaStatus => {
                let params: ArenaStatusParams = request.params()?;
                let status = self.arena_status(params.room_id.resolve()?).await?;
                Ok(serde_json::to_value(status)?)
            }
            Method::ActionOnchain => {
                let params: ActionParams = request.params()?;
                Ok(serde_json::to_value(self.action(&params).await?)?)
            }
            Method::CheckSessionStatus => {
                let _: SessionStatusParams = request.params()?;
                Ok(serde_json::to_value(self.session_status().await?)?)
            }
            Method::InitSession => {
                let params: InitSessionParams = request.params()?;
                Ok(serde_json::to_value(self.init_session(&params).await?)?)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Refresh `room` and summarize it. A failed refresh falls back to the
    /// last known state, flagged stale.
    pub async fn arena_status(&self, room: RoomId) -> ApiResult<ArenaStatus> {
        match self.engine.poller.sync_room(room).await {
            Ok(()) => {}
            Err(err @ SyncError::RoomNotFound(_)) => return Err(err.into()),
            Err(err) => {
                warn!(room_id = %room, error = %err, "[arena-agent] Serving last known room state");
            }
        }
        self.pull_events(room).await;

        let state = self.engine.store.snapshot();
        let summary = state
            .room(room)
            .and_then(|rs| rs.room.as_ref().map(|summary| (rs, summary)));
        let Some((rs, summary)) = summary else {
            return Err(ApiError::resource_unavailable(format!(
                "room {} has not been loaded yet",
                room
            )));
        };
        Ok(ArenaStatus::from_room(
            summary,
            rs,
            self.engine.config.recent_chat_limit,
        ))
    }

    pub async fn action(&self, params: &ActionParams) -> ApiResult<ActionResult> {
        if self.engine.authorizer.current().is_none() {
            return Err(ApiError::session_not_initialized());
        }
        let room = params.room_id.resolve()?;
        self.ensure_room(room).await?;

        let intent = match params.action {
            ActionType::Chat => ActionIntent::Chat {
                room,
                content: params.content()?.to_string(),
            },
            ActionType::Vote => ActionIntent::Vote {
                room,
                suspect: params.target()?,
            },
            ActionType::Join => ActionIntent::Join {
                room,
                entry_fee: self.entry_fee(room, params.entry_fee.as_deref())?,
            },
            ActionType::Claim => ActionIntent::Claim { room },
        };

        let outcome = self.engine.submitter.submit(intent).await?;
        info!(
            room_id = %room,
            action = ?params.action,
            tx_hash = %outcome.tx_hash(),
            confirmed = outcome.is_confirmed(),
            "[arena-agent] Action submitted"
        );
        Ok(ActionResult {
            action: params.action,
            room_id: room,
            warning: outcome.timeout_error().map(ApiError::from),
            outcome,
        })
    }

    pub async fn session_status(&self) -> ApiResult<SessionView> {
        if self.engine.authorizer.current().is_none() {
            return Err(ApiError::session_not_initialized());
        }
        let status = self.engine.authorizer.status().await?;
        Ok(SessionView::from(&status))
    }

    /// Install a new session key. The owner recorded for the key becomes
    /// the local player.
    pub async fn init_session(&self, params: &InitSessionParams) -> ApiResult<SessionInit> {
        let handle = self.engine.authorizer.initialize(&params.private_key).await?;
        let status = handle.last_status.as_ref().map(SessionView::from);
        if let Some(owner) = handle.last_status.as_ref().map(|s| s.owner) {
            self.engine.store.apply(Delta::SetLocalPlayer(Some(owner)));
        }
        info!(
            session_key = %handle.key,
            generation = handle.generation,
            "[arena-agent] Session key initialized"
        );
        Ok(SessionInit {
            session_key: handle.key,
            generation: handle.generation,
            status,
        })
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Load `room` once so writes see its current round.
    async fn ensure_room(&self, room: RoomId) -> ApiResult<()> {
        let known = self
            .engine
            .store
            .snapshot()
            .room(room)
            .is_some_and(|rs| rs.room.is_some());
        if known {
            return Ok(());
        }
        match self.engine.poller.sync_room(room).await {
            Err(err @ SyncError::RoomNotFound(_)) => Err(err.into()),
            Err(err) => {
                warn!(room_id = %room, error = %err, "[arena-agent] Room not loaded before action");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Explicit fee, or the room's fee as last seen.
    fn entry_fee(&self, room: RoomId, raw: Option<&str>) -> ApiResult<U256> {
        if let Some(raw) = raw {
            return parse_token_amount(raw);
        }
        self.engine
            .store
            .snapshot()
            .room(room)
            .and_then(|rs| rs.room.as_ref())
            .map(|summary| summary.entry_fee)
            .ok_or_else(|| ApiError::invalid_params("entry_fee is required for JOIN"))
    }

    /// Apply new events for `room` since the last pull.
    async fn pull_events(&self, room: RoomId) {
        let from = self.cursors.lock().get(&room).map(|block| block + 1);
        match self.engine.ingestor.backfill(room, from).await {
            Ok(batches) => {
                if let Some(last) = batches.iter().map(|b| b.to_block).max() {
                    self.cursors.lock().insert(room, last);
                }
            }
            Err(err) => {
                warn!(room_id = %room, error = %err, "[arena-agent] Event pull failed");
            }
        }
    }
}
