use std::fmt;

use thiserror::Error;

use crate::loader::LoaderError;

/// Raised when a native function receives a value of the wrong type from script code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentTypeError {
    pub function: String,
    pub position: usize,
    pub expected: &'static str,
    pub received: &'static str,
}

impl fmt::Display for ArgumentTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bad argument #{} to '{}' (expected a {} value, got {})",
            self.position, self.function, self.expected, self.received
        )
    }
}

impl std::error::Error for ArgumentTypeError {}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Load(#[from] LoaderError),
    #[error("failed to compile class '{identity}': {message}")]
    Compile { identity: String, message: String },
    #[error("class index {index} out of bounds (registry holds {count})")]
    Index { index: usize, count: usize },
    #[error("class '{identity}' is already registered")]
    Duplicate { identity: String },
    #[error(transparent)]
    ArgumentType(#[from] ArgumentTypeError),
    #[error("{0}")]
    Thrown(String),
    #[error("script runtime has been shut down")]
    Shutdown,
}

impl BridgeError {
    pub fn thrown(message: impl Into<String>) -> Self {
        BridgeError::Thrown(message.into())
    }

    pub fn is_compile(&self) -> bool {
        matches!(self, BridgeError::Compile { .. } | BridgeError::Load(_))
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
