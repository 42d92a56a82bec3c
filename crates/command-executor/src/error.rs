//! Error types for command execution

use thiserror::Error;

/// Unified error type for command execution
#[derive(Error, Debug)]
pub enum Error {
    /// An operation that requires a running process was issued before `start`
    #[error("process has not been started")]
    NotStarted,

    /// `start` was called more than once, or a setter was used after `start`
    #[error("process has already been started")]
    AlreadyStarted,

    /// The process exited before the operation could be applied
    #[error("process has already exited")]
    AlreadyExited,

    /// The executor's cancellation token fired before the process exited
    #[error("operation cancelled: {reason}")]
    Cancelled {
        /// What was interrupted
        reason: String,
    },

    /// Failed to spawn a process
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// The signal has no mapping on the target platform
    #[error("signal {signal} is not recognised on {platform}")]
    UnknownSignal {
        /// The raw signal number
        signal: i32,
        /// The platform whose table was consulted
        platform: String,
    },

    /// Failed to send signal to process
    #[error("failed to send signal {signal}: {reason}")]
    SignalFailed {
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// The executor was configured with values it cannot use
    #[error("invalid executor configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration
        reason: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Nix error (Unix signal handling)
    #[cfg(unix)]
    #[error(transparent)]
    Nix(#[from] nix::Error),

    /// Several related failures, e.g. a run failure followed by a cleanup failure
    #[error("{}", join_messages(.0))]
    Multiple(Vec<Error>),
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    /// Create a signal failed error
    pub fn signal_failed(signal: i32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            signal,
            reason: reason.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Add substrate context to a spawn failure
    pub fn with_layer_context(self, layer: impl Into<String>) -> Self {
        match self {
            Error::SpawnFailed { reason } => Error::SpawnFailed {
                reason: format!("{} layer: {}", layer.into(), reason),
            },
            other => other,
        }
    }

    /// Fold a list of errors into one: `None` when empty, the error itself
    /// when there is exactly one, [`Error::Multiple`] otherwise.
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple(errors)),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_empty_is_none() {
        assert!(Error::aggregate(Vec::new()).is_none());
    }

    #[test]
    fn test_aggregate_single_is_unwrapped() {
        let err = Error::aggregate(vec![Error::NotStarted]).unwrap();
        assert!(matches!(err, Error::NotStarted));
    }

    #[test]
    fn test_aggregate_multiple_joins_messages() {
        let err = Error::aggregate(vec![
            Error::spawn_failed("image missing"),
            Error::signal_failed(9, "no such process"),
        ])
        .unwrap();

        let message = err.to_string();
        assert!(message.contains("image missing"));
        assert!(message.contains("no such process"));
    }

    #[test]
    fn test_layer_context_only_touches_spawn_failures() {
        let err = Error::spawn_failed("denied").with_layer_context("Docker");
        assert_eq!(err.to_string(), "failed to spawn process: Docker layer: denied");

        let err = Error::AlreadyExited.with_layer_context("Docker");
        assert!(matches!(err, Error::AlreadyExited));
    }
}
