use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

/// The result type used across the engine.
pub type Result<T> = std::result::Result<T, EngineErr>;

/// Coarse classification of an `EngineErr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The layer or engine was configured with inconsistent values, construction can't complete.
    Configuration,
    /// The enclave arena is exhausted.
    Allocation,
    /// A weight shard failed MAC verification.
    Integrity,
    /// The layer was driven out of order or in an unsupported mode.
    Misuse,
    /// A tensor handed to forward/backward has the wrong extent.
    Shape,
}

/// The engine's error type.
#[derive(Debug)]
pub enum EngineErr {
    InvalidConfig(String),
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShardFactor {
        h_in: usize,
        shard_factor: usize,
    },
    Json(serde_json::Error),
    OutOfMemory {
        requested: usize,
        available: usize,
    },
    Integrity {
        layer: String,
        shard: usize,
    },
    Misuse(&'static str),
    Shape(ShapeError),
    InvalidInput {
        what: &'static str,
        got: usize,
        expected: usize,
    },
}

impl EngineErr {
    /// Returns which class of failure this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_)
            | Self::SizeMismatch { .. }
            | Self::ShardFactor { .. }
            | Self::Json(_) => ErrorKind::Configuration,
            Self::OutOfMemory { .. } => ErrorKind::Allocation,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Misuse(_) => ErrorKind::Misuse,
            Self::Shape(_) | Self::InvalidInput { .. } => ErrorKind::Shape,
        }
    }
}

impl Display for EngineErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch for {what}: got {got}, expected {expected}"),
            Self::ShardFactor { h_in, shard_factor } => write!(
                f,
                "shard factor {shard_factor} does not evenly divide the input width {h_in}"
            ),
            Self::Json(e) => write!(f, "malformed config: {e}"),
            Self::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "enclave pool exhausted: requested {requested} bytes, {available} available"
            ),
            Self::Integrity { layer, shard } => {
                write!(f, "MAC verification failed for shard {shard} of layer {layer}")
            }
            Self::Misuse(msg) => write!(f, "precondition violated: {msg}"),
            Self::Shape(e) => write!(f, "shape error: {e}"),
            Self::InvalidInput {
                what,
                got,
                expected,
            } => write!(f, "invalid {what}: got {got}, expected {expected}"),
        }
    }
}

impl Error for EngineErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for EngineErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<serde_json::Error> for EngineErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
