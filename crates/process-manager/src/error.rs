//! Error types for process supervision

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The error vocabulary shared by local and remote callers.
///
/// Every [`Error`] projects onto one of these, and the string form travels
/// across the wire so a remote client can rebuild the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A request or option failed validation
    InvalidArgument,
    /// Unknown process or logger
    NotFound,
    /// Operation needs a started process
    NotStarted,
    /// Operation needs a process that has not started
    AlreadyStarted,
    /// Operation needs a process that has not completed
    AlreadyComplete,
    /// The operation's context was cancelled
    Cancelled,
    /// The operation ran out of time
    Timeout,
    /// The substrate refused to launch the command
    SpawnFailed,
    /// Standard stream plumbing or other I/O failed
    IoFailure,
    /// A wire message could not be decoded
    Decode,
    /// A value could not be encoded for the wire
    Encode,
    /// The operation is not available through this interface
    NotSupported,
    /// The id is already in use
    Conflict,
}

impl ErrorKind {
    /// Stable name used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::NotStarted => "NotStarted",
            ErrorKind::AlreadyStarted => "AlreadyStarted",
            ErrorKind::AlreadyComplete => "AlreadyComplete",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::SpawnFailed => "SpawnFailed",
            ErrorKind::IoFailure => "IOFailure",
            ErrorKind::Decode => "Decode",
            ErrorKind::Encode => "Encode",
            ErrorKind::NotSupported => "NotSupported",
            ErrorKind::Conflict => "Conflict",
        }
    }

    /// Every kind, in declaration order
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::InvalidArgument,
        ErrorKind::NotFound,
        ErrorKind::NotStarted,
        ErrorKind::AlreadyStarted,
        ErrorKind::AlreadyComplete,
        ErrorKind::Cancelled,
        ErrorKind::Timeout,
        ErrorKind::SpawnFailed,
        ErrorKind::IoFailure,
        ErrorKind::Decode,
        ErrorKind::Encode,
        ErrorKind::NotSupported,
        ErrorKind::Conflict,
    ];
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ErrorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::decode(format!("unknown error kind '{}'", s)))
    }
}

/// Process supervision error type
#[derive(Error, Debug)]
pub enum Error {
    /// Validation failure
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown process or logger
    #[error("not found: {0}")]
    NotFound(String),

    /// Process has not been started
    #[error("process has not been started")]
    NotStarted,

    /// Process has already been started
    #[error("process has already been started")]
    AlreadyStarted,

    /// Process has already completed
    #[error("process has already completed")]
    AlreadyComplete,

    /// Operation was cancelled
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Operation timed out
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The command could not be launched
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed wire message
    #[error("decode error: {0}")]
    Decode(String),

    /// Value not representable on the wire
    #[error("encode error: {0}")]
    Encode(String),

    /// Operation unavailable through this interface
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Duplicate id
    #[error("conflict: {0}")]
    Conflict(String),

    /// Executor failure
    #[error("executor error: {0}")]
    Executor(#[from] command_executor::Error),

    /// Several related failures reported together
    #[error("{}", join_messages(.0))]
    Aggregate(Vec<Error>),

    /// An error reported by a remote peer
    #[error("{message}")]
    Remote {
        /// Kind as reported by the peer
        kind: ErrorKind,
        /// The peer's message
        message: String,
    },
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a cancellation error
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Create a decode error
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode(reason.into())
    }

    /// Create an encode error
    pub fn encode(reason: impl Into<String>) -> Self {
        Self::Encode(reason.into())
    }

    /// Create a not supported error
    pub fn not_supported(what: impl Into<String>) -> Self {
        Self::NotSupported(what.into())
    }

    /// Rebuild an error reported by a peer
    pub fn remote(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Remote {
            kind,
            message: message.into(),
        }
    }

    /// Fold a list of errors: `None` when empty, the error itself when
    /// there is exactly one, [`Error::Aggregate`] otherwise.
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate(errors)),
        }
    }

    /// Project onto the shared error vocabulary
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::NotStarted => ErrorKind::NotStarted,
            Error::AlreadyStarted => ErrorKind::AlreadyStarted,
            Error::AlreadyComplete => ErrorKind::AlreadyComplete,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::SpawnFailed(_) => ErrorKind::SpawnFailed,
            Error::Io(_) => ErrorKind::IoFailure,
            Error::Decode(_) => ErrorKind::Decode,
            Error::Encode(_) => ErrorKind::Encode,
            Error::NotSupported(_) => ErrorKind::NotSupported,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Executor(e) => executor_kind(e),
            Error::Aggregate(errors) => errors
                .first()
                .map(Error::kind)
                .unwrap_or(ErrorKind::IoFailure),
            Error::Remote { kind, .. } => *kind,
        }
    }
}

fn executor_kind(error: &command_executor::Error) -> ErrorKind {
    use command_executor::Error as E;
    match error {
        E::NotStarted => ErrorKind::NotStarted,
        E::AlreadyStarted => ErrorKind::AlreadyStarted,
        E::AlreadyExited => ErrorKind::AlreadyComplete,
        E::Cancelled { .. } => ErrorKind::Cancelled,
        E::SpawnFailed { .. } => ErrorKind::SpawnFailed,
        E::UnknownSignal { .. } | E::InvalidConfig { .. } => ErrorKind::InvalidArgument,
        E::Multiple(errors) => errors
            .first()
            .map(executor_kind)
            .unwrap_or(ErrorKind::IoFailure),
        _ => ErrorKind::IoFailure,
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
        assert!("Bogus".parse::<ErrorKind>().is_err());
        assert_eq!(ErrorKind::IoFailure.to_string(), "IOFailure");
    }

    #[test]
    fn test_executor_errors_project_onto_kinds() {
        let err = Error::from(command_executor::Error::AlreadyExited);
        assert_eq!(err.kind(), ErrorKind::AlreadyComplete);

        let err = Error::from(command_executor::Error::spawn_failed("no such image"));
        assert_eq!(err.kind(), ErrorKind::SpawnFailed);

        let err = Error::from(command_executor::Error::UnknownSignal {
            signal: 99,
            platform: "linux".into(),
        });
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_remote_error_keeps_kind_and_message() {
        let err = Error::remote(ErrorKind::NotFound, "no process 'abc'");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "no process 'abc'");
    }

    #[test]
    fn test_aggregate_uses_first_kind() {
        let err = Error::aggregate(vec![
            Error::SpawnFailed("exec format error".into()),
            Error::Io(std::io::Error::other("cleanup failed")),
        ])
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::SpawnFailed);
        assert!(err.to_string().contains("cleanup failed"));
    }
}
