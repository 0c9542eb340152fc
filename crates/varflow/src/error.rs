//! Error type shared by arrays, the engine and the combinators.

use crate::value::Structure;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A loop carry or branch output changed structure between calls.
    #[error("{context}: expected structure {expected}, found {found}")]
    StructureMismatch {
        context: &'static str,
        expected: Structure,
        found: Structure,
    },

    #[error("ifelse needs one more branch than conditions, got {conditions} conditions and {branches} branches")]
    BranchCount { conditions: usize, branches: usize },

    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("shapes {lhs:?} and {rhs:?} cannot be broadcast together")]
    Broadcast { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("batch sizes {lhs} and {rhs} differ")]
    BatchMismatch { lhs: usize, rhs: usize },

    #[error("index {index} out of bounds for leading axis of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("leading axes disagree: expected length {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("scan needs either per-step operands or an explicit length")]
    MissingLength,

    #[error("a scalar has no leading axis")]
    ScalarAxis,

    #[error("cannot stack an empty sequence of arrays")]
    EmptyStack,

    #[error("predicate must be a scalar, found shape {shape:?}")]
    NotAPredicate { shape: Vec<usize> },

    #[error("{0}: expected an array")]
    NotAnArray(&'static str),

    #[error("{0}: expected a tuple")]
    NotATuple(&'static str),

    #[error("values are already batched; nested vmap is not supported")]
    NestedBatch,

    #[error("invalid settings: {0}")]
    Config(String),

    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Error raised from user code (loop bodies, branches, models).
    pub fn msg(message: impl std::fmt::Display) -> Self {
        Error::Message(message.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
