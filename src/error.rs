//! Error types for the remote-rollouts library.

use std::fmt;

/// Result type for remote-rollouts operations.
pub type Result<T> = std::result::Result<T, RolloutError>;

/// Errors surfaced to callers of the channel and the roller.
///
/// Variants are `Clone` because a transport fault observed by the background
/// listener is stored once and re-raised on every subsequent `drain()` call,
/// and `PartialEq` so callers can check they keep receiving the same fault.
#[derive(Debug, Clone, PartialEq)]
pub enum RolloutError {
    /// Could not reach the transport at construction time.
    Connection {
        addr: String,
        message: String,
    },
    /// The transport failed after construction (subscription dropped,
    /// publish refused, bus shut down). Once latched by the listener this
    /// poisons the channel permanently.
    Transport {
        message: String,
    },
    /// Invalid configuration (zero horizon, empty prefix, etc.)
    InvalidConfig {
        field: &'static str,
        message: &'static str,
    },
}

impl fmt::Display for RolloutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection { addr, message } => {
                write!(f, "Connection to '{}' failed: {}", addr, message)
            }
            Self::Transport { message } => {
                write!(f, "Transport failure: {}", message)
            }
            Self::InvalidConfig { field, message } => {
                write!(f, "Invalid configuration for '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for RolloutError {}

impl From<redis::RedisError> for RolloutError {
    fn from(err: redis::RedisError) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}
