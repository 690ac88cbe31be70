//! Error types for hwbridge.

use crate::buffer::BufferId;
use crate::component::{ComponentState, PortDirection};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using hwbridge's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hwbridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No free buffer became available on a port within the deadline.
    #[error("{port} port exhausted: no free buffer within {waited:?}")]
    ResourceExhausted {
        /// Port whose pool was exhausted.
        port: PortDirection,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A bounded wait exceeded its deadline.
    #[error("timed out after {waited:?} waiting for {operation}")]
    Timeout {
        /// What was being waited for.
        operation: &'static str,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A buffer id is not present in the table.
    #[error("buffer {0} not found")]
    NotFound(BufferId),

    /// A completion was reported for a buffer in an unexpected ownership state.
    #[error("buffer {0} completion conflicts with its ownership state")]
    BusyConflict(BufferId),

    /// A transition was requested from a state that does not allow it.
    #[error("invalid state transition {from} -> {to}")]
    StateMismatch {
        /// Current state.
        from: ComponentState,
        /// Requested state.
        to: ComponentState,
    },

    /// The component reported an error event.
    #[error("component error 0x{code:08x}")]
    Component {
        /// Driver-specific error code.
        code: u32,
    },

    /// The component instance is no longer usable.
    #[error("component lost: {0}")]
    ComponentLost(String),

    /// The port is flushing or disabled and does not accept buffers.
    #[error("{0} port is flushing or disabled")]
    Flushing(PortDirection),

    /// Downstream delivery of an output buffer failed.
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    /// Caller passed an invalid argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error came from a bounded wait running out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ResourceExhausted { .. })
    }

    /// Whether the component instance that produced this error must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Component { .. } | Self::ComponentLost(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let timeout = Error::Timeout {
            operation: "state Idle",
            waited: Duration::from_millis(5),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_fatal());

        let exhausted = Error::ResourceExhausted {
            port: PortDirection::Input,
            waited: Duration::from_secs(1),
        };
        assert!(exhausted.is_timeout());

        assert!(Error::Component { code: 0x8000_1001 }.is_fatal());
        assert!(Error::ComponentLost("gone".into()).is_fatal());
        assert!(!Error::NotFound(BufferId(3)).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = Error::StateMismatch {
            from: ComponentState::Loaded,
            to: ComponentState::Executing,
        };
        assert_eq!(err.to_string(), "invalid state transition Loaded -> Executing");
        assert_eq!(
            Error::Component { code: 0x1001 }.to_string(),
            "component error 0x00001001"
        );
        assert_eq!(Error::NotFound(BufferId(7)).to_string(), "buffer 7 not found");
    }
}
