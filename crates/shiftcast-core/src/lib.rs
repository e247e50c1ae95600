//! shiftcast-core: shared types, ids, errors, configuration, and offset math.
//!
//! This crate is the foundational dependency for all other shiftcast crates,
//! providing type-safe identifiers, a unified error type, the YAML
//! configuration model, and the timezone offset computation that anchors
//! time-shifted playback.

pub mod config;
pub mod error;
pub mod ids;
pub mod offset;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::SessionId;
