//! Shared types for the achievement cache
//!
//! - models: provider, record and achievement detail types
//! - decisions: pure rules used by the store and the legacy importer
//! - constants: sentinels and metadata keys

pub mod constants;
pub mod decisions;
pub mod error;
pub mod models;

pub use error::ValidationError;
pub use models::*;
