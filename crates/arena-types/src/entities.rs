//! # Core Identifiers and Enums
//!
//! ## Clusters
//!
//! - **Identity**: `RoomId`, `Address`, `TxHash`
//! - **Ordering**: `EventPosition`, `DedupKey`
//! - **Game enums**: `Phase` (strictly ordered), `Tier` (fixed at creation)
//! - **Amounts**: `U256` base units with 18 decimals

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::TypesError;

// Re-export U256 from primitive-types for use across all crates
pub use primitive_types::U256;

/// Decimals of the payment token used for entry fees and prize pools.
pub const TOKEN_DECIMALS: usize = 18;

/// Convert a whole-token amount into base units.
pub fn tokens_to_units(tokens: u64) -> U256 {
    U256::from(tokens) * U256::exp10(TOKEN_DECIMALS)
}

fn parse_hex<const N: usize>(value: &str) -> Result<[u8; N], TypesError> {
    let invalid = || TypesError::InvalidHex {
        value: value.to_string(),
        expected_bytes: N,
    };
    let trimmed = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    let bytes = hex::decode(trimmed).map_err(|_| invalid())?;
    bytes.try_into().map_err(|_| invalid())
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Ledger-assigned room identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for RoomId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A 20-byte account address.
///
/// The text form is lowercase `0x` hex; parsing accepts either case, so two
/// spellings of the same account compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Whether this is the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Abbreviated form for feeds and logs: `0x1234...abcd`.
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}...{}", &full[..6], &full[full.len() - 4..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex::<20>(s.trim()).map(Self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A 32-byte transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for TxHash {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex::<32>(s.trim()).map(Self)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// ORDERING
// =============================================================================

/// Where a log sits in the ledger: block number, then log index.
///
/// Field order matters: the derived `Ord` is the canonical event order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventPosition {
    /// Block (sequence) number.
    pub block_number: u64,
    /// Index of the log within the block.
    pub log_index: u32,
}

impl EventPosition {
    /// Create a position.
    pub fn new(block_number: u64, log_index: u32) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

/// Exclusive identity of a confirmed ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey {
    /// Transaction that emitted the log.
    pub tx_hash: TxHash,
    /// Log index within the block.
    pub log_index: u32,
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.log_index)
    }
}

// =============================================================================
// GAME ENUMS
// =============================================================================

/// Room lifecycle stage. Declaration order is the only legal direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Phase {
    /// Lobby: players may join.
    #[default]
    Waiting,
    /// First elimination phase.
    Phase1,
    /// Second elimination phase.
    Phase2,
    /// Final elimination phase.
    Phase3,
    /// Game over; retained for historical display.
    Ended,
}

impl Phase {
    /// Decode the contract's phase code.
    pub fn from_code(code: u8) -> Result<Self, TypesError> {
        match code {
            0 => Ok(Phase::Waiting),
            1 => Ok(Phase::Phase1),
            2 => Ok(Phase::Phase2),
            3 => Ok(Phase::Phase3),
            4 => Ok(Phase::Ended),
            other => Err(TypesError::UnknownPhase(other)),
        }
    }

    /// The contract's phase code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Phase1..=Phase3.
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Phase1 | Phase::Phase2 | Phase::Phase3)
    }

    /// Terminal phase.
    pub fn is_ended(self) -> bool {
        self == Phase::Ended
    }

    /// HUD label.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Waiting => "WAITING",
            Phase::Phase1 => "PHASE 1",
            Phase::Phase2 => "PHASE 2",
            Phase::Phase3 => "PHASE 3",
            Phase::Ended => "ENDED",
        }
    }
}

impl TryFrom<u8> for Phase {
    type Error = TypesError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Phase::from_code(code)
    }
}

/// Stake/size class of a room, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Bronze: fast rounds, smaller stakes.
    Quick,
    /// Silver: balanced.
    Standard,
    /// Gold: high stakes, extended battle.
    Epic,
}

impl Tier {
    /// Decode the contract's tier code.
    pub fn from_code(code: u8) -> Result<Self, TypesError> {
        match code {
            0 => Ok(Tier::Quick),
            1 => Ok(Tier::Standard),
            2 => Ok(Tier::Epic),
            other => Err(TypesError::UnknownTier(other)),
        }
    }

    /// The contract's tier code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Tier::Quick => "Quick",
            Tier::Standard => "Standard",
            Tier::Epic => "Epic",
        }
    }

    /// Suggested entry fee in whole tokens.
    pub fn default_entry_fee(self) -> u64 {
        match self {
            Tier::Quick => 10,
            Tier::Standard => 50,
            Tier::Epic => 100,
        }
    }

    /// Suggested room capacity.
    pub fn default_max_players(self) -> u32 {
        match self {
            Tier::Quick => 10,
            Tier::Standard => 20,
            Tier::Epic => 50,
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = TypesError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Tier::from_code(code)
    }
}
