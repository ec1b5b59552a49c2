//! Runtime Error Types
//!
//! Every failure the runtime can report. Nothing in here unwinds the scheduler:
//! errors surface either as log events or as rejected replies.

use std::time::Duration;
use thiserror::Error;

/// Main runtime error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A request was not answered before its deadline
    #[error("Request {tag} timed out after {}ms", elapsed.as_millis())]
    Timeout { tag: u64, elapsed: Duration },

    /// Output pin has no usable target
    #[error("Pin '{pin}' of actor '{actor}' is not wired to a {wanted} target")]
    Unwired {
        actor: String,
        pin: String,
        wanted: &'static str,
    },

    /// Wireless destination could not be resolved by name
    #[error("Unknown destination '{destination}' (pin '{pin}')")]
    UnknownDestination { destination: String, pin: String },

    /// Malformed wiring string
    #[error("Syntax error in '{input}': {reason}")]
    Syntax { input: String, reason: String },

    /// Invalid descriptor or runtime configuration
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Behavior factory failed to build an instance
    #[error("Behavior construction failed for '{actor}': {message}")]
    Construction { actor: String, message: String },

    /// A pending request was dropped without an answer (fan-out shrank or runtime stopped)
    #[error("Request {tag} abandoned: {reason}")]
    Abandoned { tag: u64, reason: String },

    /// Runtime needs an executor it does not have
    #[error("Executor unavailable: {message}")]
    Executor { message: String },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    pub fn timeout(tag: u64, elapsed: Duration) -> Self {
        Self::Timeout { tag, elapsed }
    }

    pub fn unwired(actor: impl Into<String>, pin: impl Into<String>, wanted: &'static str) -> Self {
        Self::Unwired {
            actor: actor.into(),
            pin: pin.into(),
            wanted,
        }
    }

    pub fn unknown_destination(destination: impl Into<String>, pin: impl Into<String>) -> Self {
        Self::UnknownDestination {
            destination: destination.into(),
            pin: pin.into(),
        }
    }

    pub fn syntax(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Syntax {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn construction(actor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Construction {
            actor: actor.into(),
            message: message.into(),
        }
    }

    pub fn abandoned(tag: u64, reason: impl Into<String>) -> Self {
        Self::Abandoned {
            tag,
            reason: reason.into(),
        }
    }

    pub fn executor(message: impl Into<String>) -> Self {
        Self::Executor {
            message: message.into(),
        }
    }

    /// True for the timeout rejection produced by the correlation sweep
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Short category label for structured logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Unwired { .. } => "unwired",
            Self::UnknownDestination { .. } => "unknown_destination",
            Self::Syntax { .. } => "syntax",
            Self::Configuration { .. } => "configuration",
            Self::Construction { .. } => "construction",
            Self::Abandoned { .. } => "abandoned",
            Self::Executor { .. } => "executor",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_carries_elapsed() {
        let err = RuntimeError::timeout(7, Duration::from_millis(52));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Request 7 timed out after 52ms");
        assert_eq!(err.category(), "timeout");
    }

    #[test]
    fn test_configuration_field() {
        let err = RuntimeError::configuration("fast interval cannot be zero", Some("fast_interval_ms"));
        match err {
            RuntimeError::Configuration { field, .. } => {
                assert_eq!(field.as_deref(), Some("fast_interval_ms"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
