//! Wire protocol of the remote process service.
//!
//! Every remote operation is a [`Request`] answered by a [`Response`]. Two
//! encodings carry them:
//!
//! - [`framed`]: length-prefixed protobuf frames ([`proto`]) with streamed
//!   listings and chunked file uploads.
//! - [`mongo`] + [`bson_codec`]: command documents inside legacy MongoDB
//!   `OP_QUERY`/`OP_COMMAND` messages answered with `OP_REPLY`, so database
//!   shells and drivers can talk to the service.
//!
//! Both encodings project failures onto the manager's error kinds so a
//! client sees the same error a local caller would.

pub mod bson_codec;
pub mod command;
pub mod convert;
pub mod error;
pub mod framed;
pub mod message;
pub mod mongo;
pub mod proto;

pub use command::{CommandName, ReplyKind};
pub use error::{Error, Result};
pub use framed::{FrameFlag, MAX_FRAME_SIZE};
pub use message::{ArchiveFormat, ArchiveOptions, DownloadInfo, MongoDbDownloadOptions, Reply, Request, Response};
pub use mongo::{MAX_MESSAGE_SIZE, Message, MessageHeader};
