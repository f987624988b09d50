//! toxstream Core
//!
//! Core types and utilities shared across toxstream components.
//!
//! This crate provides:
//! - Record types flowing through the pipeline (messages, keyed records,
//!   predictions, joined records)
//! - Error types and result handling
//! - Fixed event-time windowing used by the join stage

pub mod error;
pub mod types;
pub mod window;

pub use error::{Error, Result};
pub use types::{JoinedRecord, KeyedRecord, Label, Message, Prediction, ToxicAlert};
pub use window::FixedWindows;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{JoinedRecord, KeyedRecord, Label, Message, Prediction, ToxicAlert};
    pub use crate::window::FixedWindows;
}
