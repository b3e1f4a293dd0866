//! Agent error types with JSON-RPC style error codes.

use arena_sync::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes returned to agents.
pub mod codes {
    // JSON-RPC 2.0 standard errors
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Server errors
    pub const SERVER_ERROR: i32 = -32000;
    pub const RESOURCE_NOT_FOUND: i32 = -32001;
    pub const RESOURCE_UNAVAILABLE: i32 = -32002;
    pub const TIMEOUT: i32 = -32006;

    // Session and ledger errors
    pub const UNAUTHORIZED: i32 = -32010;
    pub const EXECUTION_ERROR: i32 = -32015;
    pub const DATA_INTEGRITY: i32 = -32020;
}

/// Error returned to an agent
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub code: i32,
    pub message: String,
    /// Structured detail, e.g. session usage numbers
    pub data: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Line is not valid JSON
    pub fn parse_error(details: impl Into<String>) -> Self {
        Self::new(codes::PARSE_ERROR, format!("Parse error: {}", details.into()))
    }

    /// JSON, but not a command envelope
    pub fn invalid_request(details: impl Into<String>) -> Self {
        Self::new(
            codes::INVALID_REQUEST,
            format!("Invalid request: {}", details.into()),
        )
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(details: impl Into<String>) -> Self {
        Self::new(
            codes::INVALID_PARAMS,
            format!("Invalid params: {}", details.into()),
        )
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(
            codes::INTERNAL_ERROR,
            format!("Internal error: {}", details.into()),
        )
    }

    pub fn resource_not_found(resource: impl Into<String>) -> Self {
        Self::new(
            codes::RESOURCE_NOT_FOUND,
            format!("Resource not found: {}", resource.into()),
        )
    }

    pub fn resource_unavailable(details: impl Into<String>) -> Self {
        Self::new(
            codes::RESOURCE_UNAVAILABLE,
            format!("Resource unavailable: {}", details.into()),
        )
    }

    /// No session key has been initialized yet
    pub fn session_not_initialized() -> Self {
        Self::new(
            codes::UNAUTHORIZED,
            "Unauthorized: session key not initialized, call init_session first",
        )
    }

    /// Write reverted on the ledger
    pub fn execution_error(reason: impl Into<String>) -> Self {
        Self::new(
            codes::EXECUTION_ERROR,
            format!("Execution reverted: {}", reason.into()),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl Serialize for ApiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ApiError", 3)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if let Some(ref data) = self.data {
            state.serialize_field("data", data)?;
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for ApiError {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ErrorHelper {
            code: i32,
            message: String,
            data: Option<serde_json::Value>,
        }

        let helper = ErrorHelper::deserialize(deserializer)?;
        Ok(ApiError {
            code: helper.code,
            message: helper.message,
            data: helper.data,
        })
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_syntax() || e.is_eof() {
            ApiError::parse_error(e.to_string())
        } else {
            ApiError::invalid_params(e.to_string())
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::TransientRemote(msg) => ApiError::resource_unavailable(msg),
            SyncError::InvalidInput(msg) => ApiError::invalid_params(msg),
            SyncError::Authorization {
                reason,
                remaining_secs,
                usage_count,
                max_usage,
            } => ApiError::with_data(
                codes::UNAUTHORIZED,
                format!("Unauthorized: {}", reason),
                serde_json::json!({
                    "remaining_secs": remaining_secs,
                    "usage_count": usage_count,
                    "max_usage": max_usage,
                }),
            ),
            SyncError::RemoteRejection { reason } => ApiError::execution_error(reason),
            SyncError::ReconciliationTimeout {
                local_id,
                waited_ms,
            } => ApiError::with_data(
                codes::TIMEOUT,
                format!("Request timeout: entry {} not confirmed", local_id),
                serde_json::json!({ "local_id": local_id, "waited_ms": waited_ms }),
            ),
            SyncError::DataIntegrityViolation(violation) => ApiError::new(
                codes::DATA_INTEGRITY,
                format!("Data integrity violation: {}", violation),
            ),
            SyncError::RoomNotFound(room) => ApiError::resource_not_found(format!("room {}", room)),
            SyncError::Cancelled => ApiError::new(codes::SERVER_ERROR, "Operation cancelled"),
        }
    }
}

/// Result type for agent commands
pub type ApiResult<T> = Result<T, ApiError>;

/// Transport-level failures
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}
