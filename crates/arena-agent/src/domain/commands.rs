//! Request envelope and per-command parameters.
//!
//! One request is a JSON object `{"id"?, "method", "params"?}`. Parameter
//! names are snake_case; the camelCase spellings used by older agent
//! tooling are accepted as aliases.

use arena_types::{Address, RoomId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};

/// The commands an agent can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetArenaStatus,
    ActionOnchain,
    CheckSessionStatus,
    InitSession,
}

impl Method {
    pub const ALL: [Method; 4] = [
        Method::GetArenaStatus,
        Method::ActionOnchain,
        Method::CheckSessionStatus,
        Method::InitSession,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::GetArenaStatus => "get_arena_status",
            Method::ActionOnchain => "action_onchain",
            Method::CheckSessionStatus => "check_session_status",
            Method::InitSession => "init_session",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}

/// Raw request before dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    /// Echoed back unchanged.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RequestEnvelope {
    /// Decode `params` into a command's parameter struct. Missing params
    /// count as `{}`.
    pub fn params<T: DeserializeOwned>(&self) -> ApiResult<T> {
        let params = if self.params.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            self.params.clone()
        };
        serde_json::from_value(params).map_err(|e| ApiError::invalid_params(e.to_string()))
    }
}

/// The reply to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl AgentResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<serde_json::Value>, error: ApiError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

// =============================================================================
// PARAMETERS
// =============================================================================

/// Room id as a JSON number or a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RoomIdParam {
    Number(u64),
    Text(String),
}

impl RoomIdParam {
    pub fn resolve(&self) -> ApiResult<RoomId> {
        let id = match self {
            RoomIdParam::Number(id) => *id,
            RoomIdParam::Text(raw) => raw
                .trim()
                .trim_start_matches('#')
                .parse()
                .map_err(|_| ApiError::invalid_params(format!("'{}' is not a room id", raw)))?,
        };
        if id == 0 {
            return Err(ApiError::invalid_params("room ids start at 1"));
        }
        Ok(RoomId(id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArenaStatusParams {
    #[serde(alias = "roomId")]
    pub room_id: RoomIdParam,
}

/// On-chain action kinds exposed to agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    #[serde(alias = "chat")]
    Chat,
    #[serde(alias = "vote")]
    Vote,
    #[serde(alias = "join")]
    Join,
    #[serde(alias = "claim")]
    Claim,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionParams {
    #[serde(rename = "type")]
    pub action: ActionType,
    #[serde(alias = "roomId")]
    pub room_id: RoomIdParam,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    /// Decimal token amount, e.g. "10".
    #[serde(default, alias = "entryFee")]
    pub entry_fee: Option<String>,
}

impl ActionParams {
    pub fn content(&self) -> ApiResult<&str> {
        self.content
            .as_deref()
            .ok_or_else(|| ApiError::invalid_params("content is required for CHAT"))
    }

    pub fn target(&self) -> ApiResult<Address> {
        let raw = self
            .target
            .as_deref()
            .ok_or_else(|| ApiError::invalid_params("target is required for VOTE"))?;
        raw.trim()
            .parse()
            .map_err(|e| ApiError::invalid_params(format!("target: {}", e)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionStatusParams {}

#[derive(Clone, Deserialize)]
pub struct InitSessionParams {
    #[serde(alias = "privateKey")]
    pub private_key: String,
}

impl std::fmt::Debug for InitSessionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitSessionParams")
            .field("private_key", &"<redacted>")
            .finish()
    }
}
