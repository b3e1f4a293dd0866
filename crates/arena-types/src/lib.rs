//! # Arena Types Crate
//!
//! Identifiers, ordered enums and the raw ledger records consumed by the
//! arena synchronization engine.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every type that crosses the ledger boundary
//!   is defined here.
//! - **Raw in, typed out**: ledger records keep the contract's raw codes
//!   (`u8` phase/tier, `0` for "unset" rank). Normalization into typed domain
//!   values happens in `arena-sync`, where a bad code can be rejected.

pub mod entities;
pub mod errors;
pub mod ledger;

pub use entities::*;
pub use errors::*;
pub use ledger::*;
