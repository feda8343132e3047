//! Error types.
//!
//! Most misuse of the reactive API is reported with a `tracing` warning and
//! turned into a no-op (writing to a readonly container, writing to a
//! getter-only memo). The operations here have no sensible no-op, so they
//! return an error instead.

use thiserror::Error;

use crate::reactive::TargetKind;

/// Errors returned by reactive operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// `destruct` was called on an atom whose value is not an object.
    #[error("atom with primitive value doesn't have destruct method")]
    NotAnObject,

    /// A collection view was requested on a plain object or array.
    #[error("expected a map or set target, found {found}")]
    NotACollection { found: TargetKind },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;
