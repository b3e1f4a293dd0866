//! # Session Keys
//!
//! A session key is a delegated secp256k1 key registered on the ledger with
//! an expiry, a usage budget and a revocation flag.
//!
//! ## State Machine
//!
//! ```text
//! Uninitialized ──initialize──→ Valid ──→ Expired | Exhausted | Revoked
//! ```
//!
//! Terminal states latch for the key instance. Only a new `initialize`
//! produces a new `Valid` instance.

use arena_types::{Address, LedgerWrite, SessionRecord};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use zeroize::Zeroizing;

use super::errors::SyncError;

/// Lifecycle state of one key instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Uninitialized,
    Valid,
    Expired,
    Exhausted,
    Revoked,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Expired | SessionState::Exhausted | SessionState::Revoked
        )
    }

    /// State implied by a registry record at `now_secs`. Revocation wins,
    /// then usage, then time.
    pub fn from_record(record: &SessionRecord, now_secs: u64) -> Self {
        if record.is_revoked {
            SessionState::Revoked
        } else if record.usage_count >= record.max_usage {
            SessionState::Exhausted
        } else if now_secs >= record.expires_at {
            SessionState::Expired
        } else {
            SessionState::Valid
        }
    }

    /// Next state: terminal states never leave.
    pub fn advance(self, observed: SessionState) -> SessionState {
        if self.is_terminal() {
            self
        } else {
            observed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Valid => "valid",
            SessionState::Expired => "expired",
            SessionState::Exhausted => "exhausted",
            SessionState::Revoked => "revoked",
        }
    }
}

/// Last known status of the active key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub key: Address,
    pub owner: Address,
    pub expires_at: u64,
    pub remaining_secs: u64,
    pub usage_count: u64,
    pub max_usage: u64,
    pub valid: bool,
    pub state: SessionState,
    /// Local clock at fetch time, unix seconds.
    pub fetched_at: u64,
}

impl SessionStatus {
    /// Build a status from a fresh registry read, honoring a latched
    /// terminal state.
    pub fn from_record(
        key: Address,
        record: &SessionRecord,
        previous: SessionState,
        now_secs: u64,
    ) -> Self {
        let state = previous.advance(SessionState::from_record(record, now_secs));
        Self {
            key,
            owner: record.owner,
            expires_at: record.expires_at,
            remaining_secs: record.expires_at.saturating_sub(now_secs),
            usage_count: record.usage_count,
            max_usage: record.max_usage,
            valid: state == SessionState::Valid,
            state,
            fetched_at: now_secs,
        }
    }

    /// Validity at `now_secs` using only this status.
    pub fn is_valid_at(&self, now_secs: u64, max_age_secs: u64) -> bool {
        self.state == SessionState::Valid
            && now_secs < self.expires_at
            && self.usage_count < self.max_usage
            && now_secs.saturating_sub(self.fetched_at) <= max_age_secs
    }

    /// The error surfaced when this status blocks a write.
    pub fn authorization_error(&self, reason: impl Into<String>, now_secs: u64) -> SyncError {
        SyncError::Authorization {
            reason: reason.into(),
            remaining_secs: self.expires_at.saturating_sub(now_secs),
            usage_count: self.usage_count,
            max_usage: self.max_usage,
        }
    }
}

/// Record of one initialized key, live or superseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Increases with every `initialize`.
    pub generation: u64,
    pub key: Address,
    pub initialized_at: u64,
    pub last_status: Option<SessionStatus>,
}

// =============================================================================
// KEY MATERIAL
// =============================================================================

/// Session private key. The raw bytes are wiped on drop.
pub struct SessionSecret {
    signing_key: SigningKey,
    address: Address,
}

impl SessionSecret {
    /// Parse a `0x`-prefixed (or bare) hex private key.
    pub fn from_hex(private_key: &str) -> Result<Self, SyncError> {
        let trimmed = private_key.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = Zeroizing::new(
            hex::decode(trimmed)
                .map_err(|_| SyncError::InvalidInput("private key is not valid hex".into()))?,
        );
        if bytes.len() != 32 {
            return Err(SyncError::InvalidInput(
                "private key must be 32 bytes".into(),
            ));
        }
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|_| SyncError::InvalidInput("private key is not a valid scalar".into()))?;
        let address = address_of(&signing_key);
        Ok(Self {
            signing_key,
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Recoverable signature over a 32-byte digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<(Signature, RecoveryId), SyncError> {
        self.signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| SyncError::InvalidInput(format!("signing failed: {}", e)))
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSecret")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Keccak-256.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Address of a signing key.
pub fn address_of(signing_key: &SigningKey) -> Address {
    address_from_pubkey(signing_key.verifying_key())
}

/// Ethereum-style address: last 20 bytes of keccak(uncompressed pubkey).
pub fn address_from_pubkey(public_key: &VerifyingKey) -> Address {
    let encoded = public_key.to_encoded_point(false);
    // Skip the 0x04 prefix
    let hash = keccak256(&encoded.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}

/// Digest a write is signed over.
pub fn write_digest(write: &LedgerWrite) -> Result<[u8; 32], SyncError> {
    let encoded = serde_json::to_vec(write)
        .map_err(|e| SyncError::InvalidInput(format!("unencodable write: {}", e)))?;
    Ok(keccak256(&encoded))
}

// =============================================================================
// CAPABILITY
// =============================================================================

/// Permission to perform exactly the writes issued while it is held.
///
/// Holding one means the key was valid when it was granted and that no other
/// write for the same key is in flight: the capability owns the key's write
/// lock until dropped.
pub struct SessionCapability {
    secret: Arc<SessionSecret>,
    owner: Address,
    generation: u64,
    _write_lock: OwnedMutexGuard<()>,
}

impl SessionCapability {
    pub(crate) fn new(
        secret: Arc<SessionSecret>,
        owner: Address,
        generation: u64,
        write_lock: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            secret,
            owner,
            generation,
            _write_lock: write_lock,
        }
    }

    /// Session key address.
    pub fn key(&self) -> Address {
        self.secret.address()
    }

    /// Player the key acts for.
    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Sign a write with the session key.
    pub fn sign(&self, write: &LedgerWrite) -> Result<(Signature, RecoveryId), SyncError> {
        self.secret.sign_digest(&write_digest(write)?)
    }
}

impl fmt::Debug for SessionCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCapability")
            .field("key", &self.key())
            .field("owner", &self.owner)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_ONE: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

    fn record(expires_at: u64, usage: u64, max: u64, revoked: bool) -> SessionRecord {
        SessionRecord {
            owner: Address([1; 20]),
            expires_at,
            max_usage: max,
            usage_count: usage,
            is_revoked: revoked,
        }
    }

    #[test]
    fn test_address_derivation_matches_known_vector() {
        let secret = SessionSecret::from_hex(KEY_ONE).unwrap();
        assert_eq!(
            secret.address().to_string(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_bad_private_keys_rejected() {
        assert!(SessionSecret::from_hex("0xzz").is_err());
        assert!(SessionSecret::from_hex("0x01").is_err());
        // Zero is not a valid scalar
        assert!(SessionSecret::from_hex(&format!("0x{}", "00".repeat(32))).is_err());
    }

    #[test]
    fn test_state_from_record_priority() {
        assert_eq!(
            SessionState::from_record(&record(100, 10, 10, true), 200),
            SessionState::Revoked
        );
        assert_eq!(
            SessionState::from_record(&record(100, 10, 10, false), 200),
            SessionState::Exhausted
        );
        assert_eq!(
            SessionState::from_record(&record(100, 0, 10, false), 100),
            SessionState::Expired
        );
        assert_eq!(
            SessionState::from_record(&record(100, 0, 10, false), 99),
            SessionState::Valid
        );
    }

    #[test]
    fn test_terminal_states_latch() {
        assert_eq!(
            SessionState::Revoked.advance(SessionState::Valid),
            SessionState::Revoked
        );
        assert_eq!(
            SessionState::Valid.advance(SessionState::Expired),
            SessionState::Expired
        );
    }

    #[test]
    fn test_status_staleness() {
        let status = SessionStatus::from_record(
            Address([2; 20]),
            &record(1_000, 0, 5, false),
            SessionState::Uninitialized,
            100,
        );
        assert!(status.is_valid_at(150, 60));
        assert!(!status.is_valid_at(161, 60));
        assert_eq!(status.remaining_secs, 900);
    }

    #[test]
    fn test_signature_recovers_session_address() {
        let secret = SessionSecret::from_hex(KEY_ONE).unwrap();
        let write = LedgerWrite::ClaimReward {
            room: arena_types::RoomId(1),
        };
        let digest = write_digest(&write).unwrap();
        let (signature, recovery) = secret.sign_digest(&digest).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(&digest, &signature, recovery).unwrap();
        assert_eq!(address_from_pubkey(&recovered), secret.address());
    }
}
