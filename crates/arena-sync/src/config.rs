//! # Sync Configuration
//!
//! Tunables for polling, event ingestion, action confirmation and session
//! checks. Every field has a default and most can be overridden from the
//! environment.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::algorithms::reducer::ReducerConfig;
use crate::domain::{SyncError, KILL_FEED_LIMIT};

/// Maximum chat payload accepted by the contract.
pub const MAX_MESSAGE_LEN: usize = 280;

/// Sync engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between background snapshot polls.
    pub poll_interval_ms: u64,

    /// First retry delay; doubled per attempt.
    pub retry_base_delay_ms: u64,

    /// Ceiling for a single retry delay.
    pub retry_max_delay_ms: u64,

    /// Attempts per remote read before giving up.
    pub max_retry_attempts: u32,

    /// Remote reads in flight at once, across all rooms.
    pub max_concurrent_reads: usize,

    /// Blocks behind head fetched on first subscribe.
    pub history_window_blocks: u64,

    /// Largest block range per log query.
    pub max_block_range: u64,

    /// Interval between log queries while following head.
    pub follow_interval_ms: u64,

    /// How long a submitted action waits for its confirming event.
    pub confirmation_timeout_ms: u64,

    /// Tolerance when matching an optimistic entry to its event.
    pub reconciliation_window_secs: u64,

    /// A session status older than this is not trusted.
    pub session_status_max_age_secs: u64,

    /// Chat payload limit, in characters.
    pub max_message_len: usize,

    /// Chat lines included in agent status payloads.
    pub recent_chat_limit: usize,

    /// Kill-feed entries retained per room.
    pub kill_feed_limit: usize,

    /// Approve the entry fee on the payment token before joining.
    pub approve_before_join: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 4_000,
            retry_base_delay_ms: 250,
            retry_max_delay_ms: 8_000,
            max_retry_attempts: 5,
            max_concurrent_reads: 8,
            history_window_blocks: 5_000,
            max_block_range: 1_000,
            follow_interval_ms: 1_000,
            confirmation_timeout_ms: 30_000,
            reconciliation_window_secs: 120,
            session_status_max_age_secs: 60,
            max_message_len: MAX_MESSAGE_LEN,
            recent_chat_limit: 20,
            kill_feed_limit: KILL_FEED_LIMIT,
            approve_before_join: true,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl SyncConfig {
    /// Create a config for testing (short intervals, few retries).
    pub fn for_testing() -> Self {
        Self {
            poll_interval_ms: 100,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 40,
            max_retry_attempts: 3,
            max_concurrent_reads: 4,
            history_window_blocks: 5_000,
            max_block_range: 100,
            follow_interval_ms: 20,
            confirmation_timeout_ms: 500,
            reconciliation_window_secs: 120,
            session_status_max_age_secs: 60,
            max_message_len: MAX_MESSAGE_LEN,
            recent_chat_limit: 20,
            kill_feed_limit: KILL_FEED_LIMIT,
            approve_before_join: true,
        }
    }

    /// Defaults overridden by `ARENA_*` environment variables.
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval_ms: env_or("ARENA_POLL_INTERVAL_MS", d.poll_interval_ms),
            retry_base_delay_ms: env_or("ARENA_RETRY_BASE_MS", d.retry_base_delay_ms),
            retry_max_delay_ms: env_or("ARENA_RETRY_MAX_MS", d.retry_max_delay_ms),
            max_retry_attempts: env_or("ARENA_MAX_RETRIES", d.max_retry_attempts),
            max_concurrent_reads: env_or("ARENA_MAX_CONCURRENT_READS", d.max_concurrent_reads),
            history_window_blocks: env_or("ARENA_HISTORY_WINDOW", d.history_window_blocks),
            max_block_range: env_or("ARENA_MAX_BLOCK_RANGE", d.max_block_range),
            follow_interval_ms: env_or("ARENA_FOLLOW_INTERVAL_MS", d.follow_interval_ms),
            confirmation_timeout_ms: env_or("ARENA_CONFIRM_TIMEOUT_MS", d.confirmation_timeout_ms),
            reconciliation_window_secs: env_or(
                "ARENA_RECONCILE_WINDOW_SECS",
                d.reconciliation_window_secs,
            ),
            session_status_max_age_secs: env_or(
                "ARENA_SESSION_MAX_AGE_SECS",
                d.session_status_max_age_secs,
            ),
            approve_before_join: env_or("ARENA_APPROVE_BEFORE_JOIN", d.approve_before_join),
            ..d
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), SyncError> {
        let fail = |msg: &str| Err(SyncError::InvalidInput(format!("config: {}", msg)));
        if self.max_concurrent_reads == 0 {
            return fail("max_concurrent_reads must be at least 1");
        }
        if self.max_retry_attempts == 0 {
            return fail("max_retry_attempts must be at least 1");
        }
        if self.max_block_range == 0 {
            return fail("max_block_range must be at least 1");
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return fail("retry_base_delay_ms exceeds retry_max_delay_ms");
        }
        if self.poll_interval_ms == 0 || self.follow_interval_ms == 0 {
            return fail("intervals must be non-zero");
        }
        if self.max_message_len == 0 {
            return fail("max_message_len must be at least 1");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn follow_interval(&self) -> Duration {
        Duration::from_millis(self.follow_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    /// The subset the reducer needs.
    pub fn reducer_config(&self) -> ReducerConfig {
        ReducerConfig {
            reconciliation_window_secs: self.reconciliation_window_secs,
            kill_feed_limit: self.kill_feed_limit,
        }
    }
}
