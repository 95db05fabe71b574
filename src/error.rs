//! Error types for callgate

use thiserror::Error;

/// Errors that can occur during protection setup and guarded dispatch
#[derive(Debug, Error)]
pub enum GuardError {
    /// A protected operation was invoked from outside the protector's
    /// recognized source ranges
    #[error(
        "`{caller}` is protected by `{protector}` and can only execute when a \
         `{protector}` operation is on the call stack"
    )]
    Violation {
        /// Label of the immediate caller
        caller: String,
        /// Display name of the protector interface
        protector: String,
    },

    /// Protection could not be installed or enforced as configured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Dispatch target does not exist or is not public
    #[error("Unknown operation '{operation}' on interface '{interface}'")]
    UnknownOperation {
        /// Interface the dispatch was attempted on
        interface: String,
        /// Requested operation name
        operation: String,
    },

    /// A synchronization primitive was poisoned by a panicking thread
    #[error("Lock error: {0}")]
    Lock(String),
}

impl GuardError {
    /// Check if this is a caller violation
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Violation { .. })
    }
}

/// Result type alias for guard operations
pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_display() {
        let err = GuardError::Violation {
            caller: "<main>".to_string(),
            protector: "Gateway".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "`<main>` is protected by `Gateway` and can only execute when a \
             `Gateway` operation is on the call stack"
        );
        assert!(err.is_violation());
    }

    #[test]
    fn test_unknown_operation_display() {
        let err = GuardError::UnknownOperation {
            interface: "Store".to_string(),
            operation: "write".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unknown operation 'write' on interface 'Store'"
        );
        assert!(!err.is_violation());
    }
}
