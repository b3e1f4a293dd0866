//! # Adapters
//!
//! Port implementations.

pub mod in_memory;

pub use in_memory::{InMemoryLedger, STARTING_HUMANITY};
