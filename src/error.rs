//! Error types for the systolic memory mapper

use thiserror::Error;

/// Result type for mapping operations
pub type MappingResult<T> = Result<T, MappingError>;

/// Mapping errors
///
/// Every variant aborts the mapping of the whole kernel; infeasible tiles
/// are not errors and simply leave the group in global memory.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Lexer error at position {position}: {message}")]
    LexerError { position: usize, message: String },

    #[error("Parse error: {message}")]
    ParseError { message: String },

    #[error("Non-affine expression: {message}")]
    NonAffine { message: String },

    #[error("Unknown name: {name}")]
    UnknownName { name: String },

    #[error("Invalid kernel description: {message}")]
    InvalidKernel { message: String },

    #[error("Integer overflow while combining constraints")]
    Overflow,

    #[error("isl returned an unexpected result: {message}")]
    Isl { message: String },

    #[error("Unable to map array reference group {group} of array {array} to registers")]
    ForcedPrivateInfeasible { array: String, group: usize },

    #[error("Malformed kernel JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl MappingError {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        MappingError::ParseError { message: msg.into() }
    }

    pub fn non_affine(msg: impl Into<String>) -> Self {
        MappingError::NonAffine { message: msg.into() }
    }

    pub fn unknown(name: impl Into<String>) -> Self {
        MappingError::UnknownName { name: name.into() }
    }

    pub fn invalid_kernel(msg: impl Into<String>) -> Self {
        MappingError::InvalidKernel { message: msg.into() }
    }

    pub fn isl(msg: impl Into<String>) -> Self {
        MappingError::Isl { message: msg.into() }
    }

    /// Whether the error is an internal failure of the constraint engine
    /// rather than a problem with the input.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            MappingError::Overflow | MappingError::Isl { .. }
        )
    }
}
