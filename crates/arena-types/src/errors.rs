//! # Type Errors
//!
//! Failures while parsing identifiers or decoding raw ledger codes.

use thiserror::Error;

/// Errors raised by the shared types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// Text is not a `0x`-prefixed (or bare) hex string of the right width.
    #[error("Invalid hex value '{value}': expected {expected_bytes} bytes")]
    InvalidHex {
        /// The rejected input.
        value: String,
        /// Width the type requires.
        expected_bytes: usize,
    },

    /// A phase code outside `0..=4`.
    #[error("Unknown phase code: {0}")]
    UnknownPhase(u8),

    /// A tier code outside `0..=2`.
    #[error("Unknown tier code: {0}")]
    UnknownTier(u8),
}
