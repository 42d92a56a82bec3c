//! Error types for encoding and decoding wire messages

use thiserror::Error;

/// Wire protocol error type
#[derive(Error, Debug)]
pub enum Error {
    /// The first key of a command document is not a known command
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// A required field is absent
    #[error("{command}: missing field '{field}'")]
    MissingField {
        /// Command being decoded
        command: String,
        /// Absent field
        field: &'static str,
    },

    /// A field is present but unusable
    #[error("{command}: invalid field '{field}': {reason}")]
    InvalidField {
        /// Command being decoded
        command: String,
        /// Offending field
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// A value with no wire representation
    #[error("cannot encode {0}")]
    Unencodable(String),

    /// A command document without any key
    #[error("empty command document")]
    EmptyDocument,

    /// A reply did not match the command it answers
    #[error("unexpected reply for '{command}'")]
    UnexpectedReply {
        /// Command whose reply was malformed
        command: String,
    },

    /// Message header carried an operation this codec does not speak
    #[error("unsupported op code {0}")]
    UnsupportedOpCode(i32),

    /// Frame or message length outside the accepted range
    #[error("message of {size} bytes exceeds limit of {max}")]
    TooLarge {
        /// Declared size
        size: usize,
        /// Largest accepted size
        max: usize,
    },

    /// A truncated or inconsistent message
    #[error("malformed message: {0}")]
    Malformed(String),

    /// BSON decoding failed
    #[error("bson decode error: {0}")]
    BsonDecode(#[from] bson::de::Error),

    /// BSON encoding failed
    #[error("bson encode error: {0}")]
    BsonEncode(#[from] bson::ser::Error),

    /// Protobuf decoding failed
    #[error("protobuf decode error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),

    /// Reading or writing the connection failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a missing field error
    pub fn missing(command: impl Into<String>, field: &'static str) -> Self {
        Self::MissingField {
            command: command.into(),
            field,
        }
    }

    /// Create an invalid field error
    pub fn invalid(command: impl Into<String>, field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            command: command.into(),
            field,
            reason: reason.into(),
        }
    }

    /// Whether this failure came from producing bytes rather than reading them
    pub fn is_encode(&self) -> bool {
        matches!(self, Error::BsonEncode(_) | Error::Unencodable(_))
    }
}

impl From<Error> for process_manager::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(e) => process_manager::Error::Io(e),
            e if e.is_encode() => process_manager::Error::encode(e.to_string()),
            e => process_manager::Error::decode(e.to_string()),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
