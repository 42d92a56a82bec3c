//! Legacy MongoDB wire protocol framing.
//!
//! Every message starts with a 16-byte little-endian header
//! `(messageLength, requestID, responseTo, opCode)`. Requests arrive as
//! `OP_QUERY` or `OP_COMMAND`; replies leave as `OP_REPLY` carrying exactly
//! one document.

use bson::Document;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::io::{Cursor, Read};

use crate::error::{Error, Result};

/// `OP_REPLY`
pub const OP_REPLY: i32 = 1;
/// `OP_QUERY`
pub const OP_QUERY: i32 = 2004;
/// `OP_COMMAND`
pub const OP_COMMAND: i32 = 2010;

/// Largest message accepted in either direction
pub const MAX_MESSAGE_SIZE: usize = 48 * 1024 * 1024;

const HEADER_LEN: usize = 16;

/// The fixed message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    /// Total length including the header
    pub message_length: i32,
    /// Sender-chosen id
    pub request_id: i32,
    /// Id of the request this answers
    pub response_to: i32,
    /// Message kind
    pub op_code: i32,
}

/// A decoded message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A query against `<db>.$cmd`, whose document is the command
    Query {
        /// Header as received
        header: MessageHeader,
        /// Query flags
        flags: i32,
        /// Namespace, conventionally `admin.$cmd`
        collection: String,
        /// The command document
        query: Document,
    },
    /// A command message
    Command {
        /// Header as received
        header: MessageHeader,
        /// Target database
        database: String,
        /// Command name as declared by the sender
        command_name: String,
        /// Command document
        args: Document,
        /// Sender metadata
        metadata: Document,
    },
    /// A reply carrying one document
    Reply {
        /// Header as received
        header: MessageHeader,
        /// Reply flags
        flags: i32,
        /// Result document
        document: Document,
    },
}

impl Message {
    /// Header of any message
    pub fn header(&self) -> MessageHeader {
        match self {
            Message::Query { header, .. } | Message::Command { header, .. } | Message::Reply { header, .. } => {
                *header
            }
        }
    }

    /// A command query against `admin.$cmd`
    pub fn query(request_id: i32, query: Document) -> Self {
        Message::Query {
            header: MessageHeader {
                request_id,
                op_code: OP_QUERY,
                ..MessageHeader::default()
            },
            flags: 0,
            collection: "admin.$cmd".to_string(),
            query,
        }
    }

    /// A reply to the message with id `response_to`
    pub fn reply(request_id: i32, response_to: i32, document: Document) -> Self {
        Message::Reply {
            header: MessageHeader {
                request_id,
                response_to,
                op_code: OP_REPLY,
                ..MessageHeader::default()
            },
            flags: 0,
            document,
        }
    }

    /// The command document of a request; `None` for replies
    pub fn command_document(&self) -> Option<&Document> {
        match self {
            Message::Query { query, .. } => Some(query),
            Message::Command { args, .. } => Some(args),
            Message::Reply { .. } => None,
        }
    }

    /// Serialize, filling in the header length
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header = self.header();
        let mut body = Vec::new();
        match self {
            Message::Query {
                flags,
                collection,
                query,
                ..
            } => {
                body.extend_from_slice(&flags.to_le_bytes());
                write_cstring(&mut body, collection)?;
                body.extend_from_slice(&0i32.to_le_bytes());
                body.extend_from_slice(&(-1i32).to_le_bytes());
                query.to_writer(&mut body)?;
            }
            Message::Command {
                database,
                command_name,
                args,
                metadata,
                ..
            } => {
                write_cstring(&mut body, database)?;
                write_cstring(&mut body, command_name)?;
                args.to_writer(&mut body)?;
                metadata.to_writer(&mut body)?;
            }
            Message::Reply { flags, document, .. } => {
                body.extend_from_slice(&flags.to_le_bytes());
                body.extend_from_slice(&0i64.to_le_bytes());
                body.extend_from_slice(&0i32.to_le_bytes());
                body.extend_from_slice(&1i32.to_le_bytes());
                document.to_writer(&mut body)?;
            }
        }

        let total = HEADER_LEN + body.len();
        if total > MAX_MESSAGE_SIZE {
            return Err(Error::TooLarge {
                size: total,
                max: MAX_MESSAGE_SIZE,
            });
        }
        let mut bytes = Vec::with_capacity(total);
        bytes.extend_from_slice(&(total as i32).to_le_bytes());
        bytes.extend_from_slice(&header.request_id.to_le_bytes());
        bytes.extend_from_slice(&header.response_to.to_le_bytes());
        bytes.extend_from_slice(&header.op_code.to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Parse one complete message body following `header`
    pub fn parse(header: MessageHeader, body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body);
        let message = match header.op_code {
            OP_QUERY => {
                let flags = read_i32(&mut cursor)?;
                let collection = read_cstring(&mut cursor)?;
                let _skip = read_i32(&mut cursor)?;
                let _limit = read_i32(&mut cursor)?;
                let query = Document::from_reader(&mut cursor)?;
                // An optional field selector may follow; commands ignore it
                Message::Query {
                    header,
                    flags,
                    collection,
                    query,
                }
            }
            OP_COMMAND => {
                let database = read_cstring(&mut cursor)?;
                let command_name = read_cstring(&mut cursor)?;
                let args = Document::from_reader(&mut cursor)?;
                let metadata = if (cursor.position() as usize) < body.len() {
                    Document::from_reader(&mut cursor)?
                } else {
                    Document::new()
                };
                Message::Command {
                    header,
                    database,
                    command_name,
                    args,
                    metadata,
                }
            }
            OP_REPLY => {
                let flags = read_i32(&mut cursor)?;
                let mut cursor_id = [0u8; 8];
                cursor.read_exact(&mut cursor_id)?;
                let _starting_from = read_i32(&mut cursor)?;
                let returned = read_i32(&mut cursor)?;
                if returned != 1 {
                    return Err(Error::Malformed(format!("reply carries {} documents", returned)));
                }
                let document = Document::from_reader(&mut cursor)?;
                Message::Reply {
                    header,
                    flags,
                    document,
                }
            }
            other => return Err(Error::UnsupportedOpCode(other)),
        };
        Ok(message)
    }
}

/// Read one message. `Ok(None)` means the peer closed the connection between
/// messages.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Message>> {
    let mut header_bytes = [0u8; HEADER_LEN];
    let read = read_full(reader, &mut header_bytes).await?;
    if read == 0 {
        return Ok(None);
    }
    if read < HEADER_LEN {
        return Err(Error::Malformed("truncated message header".into()));
    }

    let field = |at: usize| i32::from_le_bytes([header_bytes[at], header_bytes[at + 1], header_bytes[at + 2], header_bytes[at + 3]]);
    let header = MessageHeader {
        message_length: field(0),
        request_id: field(4),
        response_to: field(8),
        op_code: field(12),
    };

    let length = usize::try_from(header.message_length)
        .map_err(|_| Error::Malformed(format!("negative message length {}", header.message_length)))?;
    if length < HEADER_LEN {
        return Err(Error::Malformed(format!("message length {} shorter than header", length)));
    }
    if length > MAX_MESSAGE_SIZE {
        return Err(Error::TooLarge {
            size: length,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut body = vec![0u8; length - HEADER_LEN];
    reader.read_exact(&mut body).await?;
    Message::parse(header, &body).map(Some)
}

/// Write one message and flush
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let bytes = message.to_bytes()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Fill `buf`, stopping early only at end of stream
pub(crate) async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn read_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32> {
    let mut bytes = [0u8; 4];
    cursor.read_exact(&mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}

fn read_cstring(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        cursor.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }
    String::from_utf8(bytes).map_err(|e| Error::Malformed(e.to_string()))
}

fn write_cstring(out: &mut Vec<u8>, value: &str) -> Result<()> {
    if value.as_bytes().contains(&0) {
        return Err(Error::Malformed(format!("'{}' contains a NUL byte", value)));
    }
    out.extend_from_slice(value.as_bytes());
    out.push(0);
    Ok(())
}
