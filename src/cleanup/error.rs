// Cleanup error taxonomy
// Shutdown itself never propagates these; they end up in reports and logs

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the cleanup subsystem
#[derive(Debug, Error)]
pub enum CleanupError {
    /// A task or callback returned an error
    #[error("cleanup action failed: {0}")]
    Task(String),

    /// A task or callback panicked
    #[error("cleanup action panicked: {0}")]
    Panicked(String),

    /// A task did not finish inside its time budget
    #[error("cleanup task timed out after {0:?}")]
    TimedOut(Duration),

    /// The worker thread for a bounded task could not be started
    #[error("failed to spawn cleanup worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// Exit hooks were already installed for this coordinator
    #[error("process hooks are already installed")]
    HooksAlreadyInstalled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CleanupError {
    /// Build an error from a panic payload caught by `catch_unwind`
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        CleanupError::Panicked(message)
    }
}

/// Result alias for cleanup operations
pub type Result<T> = std::result::Result<T, CleanupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_str() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let err = CleanupError::from_panic(payload);
        assert_eq!(err.to_string(), "cleanup action panicked: boom");
    }

    #[test]
    fn test_panic_payload_string() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bad state"));
        assert!(matches!(
            CleanupError::from_panic(payload),
            CleanupError::Panicked(msg) if msg == "bad state"
        ));
    }
}
