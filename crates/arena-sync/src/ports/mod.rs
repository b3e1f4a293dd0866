//! # Ports
//!
//! Traits for everything outside the process: ledger reads, the session
//! registry, ledger writes and the clock.

pub mod outbound;

pub use outbound::{Clock, LedgerReader, LedgerWriter, ManualClock, SessionRegistry, SystemClock};
