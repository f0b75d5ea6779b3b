//! Validation errors for caller-supplied keys

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("cache key must not be empty")]
    EmptyCacheKey,
    #[error("metadata key must not be empty")]
    EmptyMetadataKey,
    #[error("external library id must not be empty")]
    EmptyLibraryId,
}
