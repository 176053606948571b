//! # tipledger-core
//!
//! Core types, traits, and abstractions for the tipledger reconciliation
//! engine.
//!
//! This crate provides the foundational data structures and trait
//! definitions that the storage and engine crates depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;
pub mod upload_safety;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, ServerEvent};
pub use models::*;
pub use traits::*;
pub use upload_safety::{sanitize_filename, validate_upload, ValidationResult};
