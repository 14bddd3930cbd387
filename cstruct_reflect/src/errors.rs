use cstruct_layout::{AbiSkewError, ConfigError};
use thiserror::Error;

/// Result alias used across the reflection crate.
pub type ReflectResult<T> = Result<T, ReflectError>;

/// A host value could not be written into a field. Recoverable; nothing was partially written
/// outside the offending field.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoercionError {
    #[error("field '{field}' expects {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: &'static str,
    },

    #[error("value {value} out of range for field '{field}' ({min}..={max})")]
    OutOfRange {
        field: String,
        value: i128,
        min: i128,
        max: i128,
    },

    #[error("field '{field}' expects {expected} elements, got {actual}")]
    LengthMismatch {
        field: String,
        expected: u64,
        actual: u64,
    },

    #[error("record '{record}' has no field '{field}'")]
    UnknownField { record: String, field: String },

    #[error("field '{field}' only accepts ASCII text")]
    NonAscii { field: String },

    #[error("enum '{enum_name}' has no variant '{variant}' (field '{field}')")]
    UnknownVariant {
        field: String,
        enum_name: String,
        variant: String,
    },
}

/// Top-level errors produced by the reflection runtime.
#[derive(Debug, Error)]
pub enum ReflectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    AbiSkew(#[from] AbiSkewError),

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    /// Requested type is not among the resolved records.
    #[error("type '{type_name}' not found")]
    UnknownType { type_name: String },

    #[error("record '{record}' has no field '{field}'")]
    UnknownField { record: String, field: String },

    #[error("type '{type_name}' requires {required} bytes but only {available} available")]
    BufferTooSmall {
        type_name: String,
        required: u64,
        available: u64,
    },
}
