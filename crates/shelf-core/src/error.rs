//! Error types for attribute operations.

use thiserror::Error;

/// Errors raised while applying or merging an operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    #[error("cannot merge {op} with a previous {previous}")]
    Incompatible {
        op: &'static str,
        previous: &'static str,
    },

    #[error("cannot apply {op} to a {found} value")]
    TypeMismatch { op: &'static str, found: &'static str },

    #[error("relation targets class {found}, expected {expected}")]
    RelationClass { expected: String, found: String },

    #[error("relation target {0} has not been saved")]
    UnsavedTarget(String),

    #[error("relation operation needs at least one target")]
    EmptyRelation,

    #[error("increment produced a non-finite number")]
    NonFiniteNumber,
}

pub type Result<T> = std::result::Result<T, OpError>;
