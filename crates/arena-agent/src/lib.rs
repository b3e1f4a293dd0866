//! # Arena Agent
//!
//! JSON command surface that lets an autonomous agent play the Turing Arena
//! through a [`SyncEngine`](arena_sync::SyncEngine).
//!
//! ## Commands
//!
//! | Method | Params | Result |
//! |--------|--------|--------|
//! | `get_arena_status` | `room_id` | Room summary, players, last chat lines, current tally, stale flag |
//! | `action_onchain` | `type` (CHAT/VOTE/JOIN/CLAIM), `room_id`, `content?`, `target?`, `entry_fee?` | Transaction hash and confirmation status |
//! | `check_session_status` | none | Session key usage and remaining time |
//! | `init_session` | `private_key` | Session key address and generation |
//!
//! Every response is `{"ok": true, "result": ...}` or
//! `{"ok": false, "error": {"code", "message", "data"?}}`. A request `id`, if
//! given, is echoed back.
//!
//! ## Module Structure
//!
//! ```text
//! arena-agent/
//! ├── domain/          # Commands, payloads, token amounts, ApiError
//! ├── service.rs       # AgentGateway: dispatch and command handlers
//! └── transport.rs     # Line-delimited JSON over any async stream
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let engine = SyncEngine::start(ledger, clock, SyncConfig::from_env(), rooms);
//! let gateway = AgentGateway::new(engine);
//! let stdin = tokio::io::BufReader::new(tokio::io::stdin());
//! arena_agent::serve(&gateway, stdin, tokio::io::stdout()).await?;
//! ```

#![warn(clippy::all)]

pub mod domain;
pub mod service;
pub mod transport;

pub use domain::{codes, AgentError, AgentResponse, ApiError, ApiResult, ArenaStatus, Method};
pub use service::{ActionResult, AgentGateway, SessionInit};
pub use transport::serve;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
