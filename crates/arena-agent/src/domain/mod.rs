//! # Domain Layer
//!
//! Commands, response payloads, token amounts and errors.

pub mod amount;
pub mod commands;
pub mod error;
pub mod status;

pub use amount::{format_token_amount, parse_token_amount};
pub use commands::*;
pub use error::{codes, AgentError, ApiError, ApiResult};
pub use status::*;
