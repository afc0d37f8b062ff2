//! Error types for the recorder runtime

use crate::state::WorkerState;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur in runtime operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// Registry or coordinator used before `init`
    #[error("runtime not initialized")]
    NotInitialized,

    /// Shutdown coordinator installed twice
    #[error("shutdown coordinator already installed")]
    AlreadyInstalled,

    /// Caller passed an invalid argument (empty label, oversized content, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A mutex was poisoned by a panicking holder
    #[error("lock poisoned")]
    LockError,

    /// Label already registered
    #[error("duplicate worker label")]
    Duplicate,

    /// No entry with the given label
    #[error("worker not found")]
    NotFound,

    /// State change not in the allowed-transition table
    #[error("invalid state transition {from} -> {to}")]
    InvalidStateTransition { from: WorkerState, to: WorkerState },

    /// OS thread spawn or event creation failed
    #[error("worker creation failed")]
    CreationFailed,

    /// Queue entry allocation failed
    #[error("allocation failed")]
    AllocationFailed,

    /// Pop attempted by a thread that does not own the inbox
    #[error("caller does not own this inbox")]
    Unauthorized,

    /// Inbox stayed full past the push timeout
    #[error("queue full")]
    QueueFull,

    /// Inbox stayed empty past the pop timeout
    #[error("queue empty")]
    QueueEmpty,

    /// Bounded wait elapsed
    #[error("operation timed out")]
    Timeout,

    /// OS-level wait primitive failed
    #[error("wait failed")]
    WaitError,

    /// Worker liveness probe failed
    #[error("status check failed")]
    StatusCheckFailed,

    /// Teardown left resources behind
    #[error("cleanup error")]
    CleanupError,

    /// The OS refused a handler or primitive installation
    #[error("system failure: {0}")]
    SystemFailure(&'static str),
}

impl<T> From<std::sync::PoisonError<T>> for RuntimeError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        RuntimeError::LockError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = RuntimeError::QueueFull;
        assert_eq!(format!("{}", e), "queue full");

        let e = RuntimeError::InvalidStateTransition {
            from: WorkerState::Terminated,
            to: WorkerState::Running,
        };
        assert_eq!(
            format!("{}", e),
            "invalid state transition Terminated -> Running"
        );
    }

    #[test]
    fn test_poison_conversion() {
        use std::sync::{Arc, Mutex};
        let m = Arc::new(Mutex::new(0u32));
        let m2 = Arc::clone(&m);
        let _ = std::thread::spawn(move || {
            let _guard = m2.lock().unwrap();
            panic!("poison it");
        })
        .join();

        let err: RuntimeError = m.lock().unwrap_err().into();
        assert_eq!(err, RuntimeError::LockError);
    }
}
