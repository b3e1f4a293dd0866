//! # Domain Layer
//!
//! Entities, value objects, errors, invariants and the session-key model.

pub mod entities;
pub mod errors;
pub mod invariants;
pub mod session;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use invariants::*;
pub use session::*;
pub use value_objects::*;
