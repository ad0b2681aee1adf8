//! Connection error types
//!
//! Local recovery is the default policy: handler faults and rejected
//! submissions are logged and counted, never propagated. The only error
//! a caller of the connection facade observes is `ClientRejected`.

/// Boxed error returned by user handlers.
///
/// Handler failures are caught at the dispatch boundary, logged, and
/// never allowed to tear down the connection.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias for connection operations
pub type Result<T> = std::result::Result<T, ConnectionError>;

/// Error type for connection-level operations
#[derive(Debug, Clone)]
pub enum ConnectionError {
    /// The application denied the session during connect
    ClientRejected(Option<String>),
    /// The worker pool could not accept a submission
    TaskRejected,
    /// The connection is closed or closing; codec permits are drained
    Closed,
    /// Operation requires an attached scope but none is bound
    NoScope,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::ClientRejected(Some(reason)) => {
                write!(f, "Client rejected: {}", reason)
            }
            ConnectionError::ClientRejected(None) => write!(f, "Client rejected"),
            ConnectionError::TaskRejected => write!(f, "Task submission rejected"),
            ConnectionError::Closed => write!(f, "Connection is closed"),
            ConnectionError::NoScope => write!(f, "Connection has no scope"),
        }
    }
}

impl std::error::Error for ConnectionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_rejected_with_reason() {
        let err = ConnectionError::ClientRejected(Some("auth failed".into()));
        assert_eq!(err.to_string(), "Client rejected: auth failed");
    }

    #[test]
    fn test_display_rejected_without_reason() {
        let err = ConnectionError::ClientRejected(None);
        assert_eq!(err.to_string(), "Client rejected");
    }

    #[test]
    fn test_display_closed() {
        assert_eq!(ConnectionError::Closed.to_string(), "Connection is closed");
    }
}
