//! # Session Authorizer
//!
//! Owns the session key and decides whether a write may go out.
//!
//! One key instance is active at a time. `initialize` replaces it and moves
//! the previous handle to history. A terminal state (expired, exhausted,
//! revoked) latches for the instance; only a new `initialize` produces a
//! valid key again.
//!
//! Writes are granted as a [`SessionCapability`], which holds the key's
//! write lock, so at most one write per key is in flight.

use arena_telemetry::SESSION_REFRESHES;
use arena_types::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{
    SessionCapability, SessionHandle, SessionSecret, SessionState, SessionStatus, SyncError,
};
use crate::ports::{Clock, SessionRegistry};

struct ActiveSession {
    handle: SessionHandle,
    secret: Arc<SessionSecret>,
    state: SessionState,
}

#[derive(Default)]
struct AuthorizerState {
    active: Option<ActiveSession>,
    history: Vec<SessionHandle>,
    next_generation: u64,
    /// Shared by every instance of the same key.
    write_locks: HashMap<Address, Arc<tokio::sync::Mutex<()>>>,
}

/// Session-key manager.
pub struct SessionAuthorizer {
    registry: Arc<dyn SessionRegistry>,
    clock: Arc<dyn Clock>,
    max_status_age_secs: u64,
    state: Mutex<AuthorizerState>,
}

impl SessionAuthorizer {
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        clock: Arc<dyn Clock>,
        max_status_age_secs: u64,
    ) -> Self {
        Self {
            registry,
            clock,
            max_status_age_secs,
            state: Mutex::new(AuthorizerState::default()),
        }
    }

    /// Install a new session key from its hex private key and fetch its
    /// status. A registry failure leaves the key installed with no status.
    pub async fn initialize(&self, private_key: &str) -> Result<SessionHandle, SyncError> {
        let secret = Arc::new(SessionSecret::from_hex(private_key)?);
        let key = secret.address();
        let now = self.clock.now_secs();

        {
            let mut state = self.state.lock();
            state.next_generation += 1;
            let handle = SessionHandle {
                generation: state.next_generation,
                key,
                initialized_at: now,
                last_status: None,
            };
            if let Some(previous) = state.active.take() {
                state.history.push(previous.handle);
            }
            state
                .write_locks
                .entry(key)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())));
            state.active = Some(ActiveSession {
                handle,
                secret,
                state: SessionState::Uninitialized,
            });
        }
        info!(key = %key, "[arena-sync] Session key initialized");

        if let Err(err) = self.status().await {
            warn!(key = %key, error = %err, "[arena-sync] Initial session status unavailable");
        }
        self.current().ok_or_else(not_initialized)
    }

    /// Refresh the active key's status from the registry.
    pub async fn status(&self) -> Result<SessionStatus, SyncError> {
        let (key, generation) = {
            let state = self.state.lock();
            let active = state.active.as_ref().ok_or_else(not_initialized)?;
            (active.handle.key, active.handle.generation)
        };

        let record = self.registry.session_record(key).await?;
        let now = self.clock.now_secs();

        let mut state = self.state.lock();
        let active = state
            .active
            .as_mut()
            .filter(|a| a.handle.generation == generation)
            .ok_or(SyncError::Cancelled)?;
        let status = SessionStatus::from_record(key, &record, active.state, now);
        if status.state != active.state && status.state.is_terminal() {
            warn!(
                key = %key,
                state = status.state.as_str(),
                "[arena-sync] Session key reached a terminal state"
            );
        }
        active.state = status.state;
        active.handle.last_status = Some(status.clone());
        SESSION_REFRESHES
            .with_label_values(&[status.state.as_str()])
            .inc();
        Ok(status)
    }

    /// Validity from the last fetched status and the local clock only.
    pub fn is_valid(&self) -> bool {
        let now = self.clock.now_secs();
        self.state
            .lock()
            .active
            .as_ref()
            .and_then(|a| a.handle.last_status.as_ref())
            .is_some_and(|status| status.is_valid_at(now, self.max_status_age_secs))
    }

    /// Last fetched status of the active key.
    pub fn last_status(&self) -> Option<SessionStatus> {
        self.state
            .lock()
            .active
            .as_ref()
            .and_then(|a| a.handle.last_status.clone())
    }

    pub fn current(&self) -> Option<SessionHandle> {
        self.state.lock().active.as_ref().map(|a| a.handle.clone())
    }

    /// Superseded handles, oldest first.
    pub fn history(&self) -> Vec<SessionHandle> {
        self.state.lock().history.clone()
    }

    /// Grant a write capability, refreshing a stale or missing status first.
    pub async fn authorize(&self) -> Result<SessionCapability, SyncError> {
        if !self.is_valid() {
            let terminal = self.state.lock().active.as_ref().map(|a| a.state.is_terminal());
            match terminal {
                None => return Err(not_initialized()),
                Some(true) => return Err(self.denial()),
                Some(false) => {
                    self.status().await?;
                }
            }
            if !self.is_valid() {
                return Err(self.denial());
            }
        }

        let (secret, generation, lock) = {
            let state = self.state.lock();
            let active = state.active.as_ref().ok_or_else(not_initialized)?;
            let lock = state
                .write_locks
                .get(&active.handle.key)
                .cloned()
                .ok_or_else(not_initialized)?;
            (active.secret.clone(), active.handle.generation, lock)
        };
        let guard = lock.lock_owned().await;

        // The previous holder may have used the last write.
        let now = self.clock.now_secs();
        let owner = {
            let state = self.state.lock();
            let active = state
                .active
                .as_ref()
                .filter(|a| a.handle.generation == generation)
                .ok_or(SyncError::Cancelled)?;
            active
                .handle
                .last_status
                .as_ref()
                .filter(|status| status.is_valid_at(now, self.max_status_age_secs))
                .map(|status| status.owner)
        };
        match owner {
            Some(owner) => Ok(SessionCapability::new(secret, owner, generation, guard)),
            None => Err(self.denial()),
        }
    }

    /// Count one successful write against the instance `generation`.
    pub fn record_usage(&self, generation: u64) {
        let mut state = self.state.lock();
        let Some(active) = state
            .active
            .as_mut()
            .filter(|a| a.handle.generation == generation)
        else {
            return;
        };
        if let Some(status) = active.handle.last_status.as_mut() {
            status.usage_count += 1;
            if status.usage_count >= status.max_usage {
                status.state = status.state.advance(SessionState::Exhausted);
                status.valid = false;
                active.state = status.state;
            }
        }
    }

    fn denial(&self) -> SyncError {
        let now = self.clock.now_secs();
        let state = self.state.lock();
        match state
            .active
            .as_ref()
            .and_then(|a| a.handle.last_status.as_ref())
        {
            Some(status) => {
                let reason = if status.state == SessionState::Valid {
                    "session status is stale"
                } else {
                    status.state.as_str()
                };
                status.authorization_error(format!("session key {}", reason), now)
            }
            None => SyncError::Authorization {
                reason: "session status unavailable".into(),
                remaining_secs: 0,
                usage_count: 0,
                max_usage: 0,
            },
        }
    }
}

fn not_initialized() -> SyncError {
    SyncError::Authorization {
        reason: "session key not initialized".into(),
        remaining_secs: 0,
        usage_count: 0,
        max_usage: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedger;
    use crate::ports::ManualClock;
    use arena_types::SessionRecord;

    const KEY_ONE: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";
    const KEY_TWO: &str = "0x0000000000000000000000000000000000000000000000000000000000000002";
    const OWNER: Address = Address([9; 20]);

    fn setup(max_usage: u64) -> (Arc<InMemoryLedger>, Arc<ManualClock>, SessionAuthorizer) {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
        for key in [KEY_ONE, KEY_TWO] {
            let address = SessionSecret::from_hex(key).unwrap().address();
            ledger.register_session(
                address,
                SessionRecord {
                    owner: OWNER,
                    expires_at: 2_000,
                    max_usage,
                    usage_count: 0,
                    is_revoked: false,
                },
            );
        }
        let authorizer = SessionAuthorizer::new(ledger.clone(), clock.clone(), 60);
        (ledger, clock, authorizer)
    }

    #[tokio::test]
    async fn test_uninitialized_rejects() {
        let (_, _, authorizer) = setup(5);
        assert!(!authorizer.is_valid());
        assert!(matches!(
            authorizer.authorize().await,
            Err(SyncError::Authorization { .. })
        ));
    }

    #[tokio::test]
    async fn test_initialize_fetches_status() {
        let (_, _, authorizer) = setup(5);
        let handle = authorizer.initialize(KEY_ONE).await.unwrap();
        let status = handle.last_status.unwrap();
        assert_eq!(status.state, SessionState::Valid);
        assert_eq!(status.remaining_secs, 1_000);
        assert_eq!(status.owner, OWNER);
        assert!(authorizer.is_valid());
    }

    #[tokio::test]
    async fn test_stale_status_is_not_trusted() {
        let (_, clock, authorizer) = setup(5);
        authorizer.initialize(KEY_ONE).await.unwrap();
        clock.advance(61);
        assert!(!authorizer.is_valid());
        // authorize refreshes and succeeds
        let capability = authorizer.authorize().await.unwrap();
        assert_eq!(capability.owner(), OWNER);
    }

    #[tokio::test]
    async fn test_expiry_latches_until_reinitialized() {
        let (ledger, clock, authorizer) = setup(5);
        authorizer.initialize(KEY_ONE).await.unwrap();
        clock.set(2_000);
        assert_eq!(authorizer.status().await.unwrap().state, SessionState::Expired);

        // Extending the registry entry does not revive this instance.
        let key = SessionSecret::from_hex(KEY_ONE).unwrap().address();
        let mut record = ledger.session(key).unwrap();
        record.expires_at = 5_000;
        ledger.register_session(key, record);
        assert_eq!(authorizer.status().await.unwrap().state, SessionState::Expired);
        assert!(authorizer.authorize().await.is_err());

        authorizer.initialize(KEY_ONE).await.unwrap();
        assert!(authorizer.authorize().await.is_ok());
        assert_eq!(authorizer.history().len(), 1);
    }

    #[tokio::test]
    async fn test_usage_exhausts_locally() {
        let (_, _, authorizer) = setup(1);
        authorizer.initialize(KEY_ONE).await.unwrap();
        let capability = authorizer.authorize().await.unwrap();
        authorizer.record_usage(capability.generation());
        drop(capability);
        let err = authorizer.authorize().await.unwrap_err();
        match err {
            SyncError::Authorization {
                usage_count,
                max_usage,
                ..
            } => {
                assert_eq!((usage_count, max_usage), (1, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_superseded_usage_is_ignored() {
        let (_, _, authorizer) = setup(1);
        authorizer.initialize(KEY_ONE).await.unwrap();
        let old = authorizer.current().unwrap().generation;
        authorizer.initialize(KEY_TWO).await.unwrap();
        authorizer.record_usage(old);
        assert!(authorizer.is_valid());
        assert_eq!(authorizer.history()[0].generation, old);
    }

    #[tokio::test]
    async fn test_revoked_is_terminal() {
        let (ledger, _, authorizer) = setup(5);
        authorizer.initialize(KEY_ONE).await.unwrap();
        ledger.revoke_session(SessionSecret::from_hex(KEY_ONE).unwrap().address());
        let status = authorizer.status().await.unwrap();
        assert_eq!(status.state, SessionState::Revoked);
        assert!(!status.valid);
        assert!(!authorizer.is_valid());
    }

    #[tokio::test]
    async fn test_unregistered_key_initializes_without_status() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
        let authorizer = SessionAuthorizer::new(ledger, clock, 60);
        let handle = authorizer.initialize(KEY_ONE).await.unwrap();
        assert!(handle.last_status.is_none());
        assert!(authorizer.authorize().await.is_err());
    }

    #[tokio::test]
    async fn test_one_capability_per_key_at_a_time() {
        let (_, _, authorizer) = setup(5);
        let authorizer = Arc::new(authorizer);
        authorizer.initialize(KEY_ONE).await.unwrap();
        let first = authorizer.authorize().await.unwrap();

        let contender = authorizer.clone();
        let second = tokio::spawn(async move { contender.authorize().await.map(|c| c.generation()) });
        tokio::task::yield_now().await;
        assert!(!second.is_finished());
        drop(first);
        assert!(second.await.unwrap().is_ok());
    }
}
