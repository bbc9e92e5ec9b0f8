//! Error types for the state layer.

use crate::record::SaveToken;
use shelf_core::OpError;
use thiserror::Error;

/// Errors that can occur while reading or mutating object state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// An operation cannot be combined with what is already queued on the
    /// key, or cannot be applied to its current value. Nothing was changed.
    #[error("merge conflict on `{key}`: {source}")]
    MergeConflict { key: String, source: OpError },

    #[error("unknown object: {0}")]
    UnknownIdentity(String),

    /// A second save was started while one is still in flight. This is a
    /// sequencing bug in the caller, not something to retry.
    #[error("a save is already in flight for {0}")]
    SaveInFlightConflict(String),

    #[error("save {token} is not in flight for {identity}")]
    StaleSaveToken { identity: String, token: SaveToken },

    #[error("identity already has state: {0}")]
    IdentityTaken(String),
}

pub type Result<T> = std::result::Result<T, StateError>;
