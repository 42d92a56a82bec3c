//! Length-prefixed protobuf frames.
//!
//! A frame is `[flag: u8][length: u32 big-endian][message]`. A request is one
//! or more [`RpcRequest`] frames, the last flagged [`FrameFlag::End`];
//! `write_file` streams its content in chunks this way. A response is one or
//! more [`RpcResponse`] frames: listings send one process per frame followed
//! by a status frame.

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use prost::Message as _;
use std::str::FromStr;
use tracing::trace;

use process_manager::{LogStream, WriteFileInfo};

use crate::command::{CommandName, ReplyKind};
use crate::convert;
use crate::error::{Error, Result};
use crate::message::{Reply, Request, Response};
use crate::mongo::read_full;
use crate::proto::{RpcRequest, RpcResponse};

/// Largest frame accepted in either direction
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes of file content carried per `write_file` frame
pub const WRITE_FILE_CHUNK: usize = 64 * 1024;

/// Whether more frames of the same message follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameFlag {
    /// Another frame follows
    More = 0,
    /// Last frame of the message
    End = 1,
}

impl TryFrom<u8> for FrameFlag {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FrameFlag::More),
            1 => Ok(FrameFlag::End),
            other => Err(Error::Malformed(format!("unknown frame flag {}", other))),
        }
    }
}

fn required<T>(value: Option<T>, command: CommandName, field: &'static str) -> Result<T> {
    value.ok_or_else(|| Error::missing(command.as_str(), field))
}

fn non_empty(value: String, command: CommandName, field: &'static str) -> Result<String> {
    if value.is_empty() {
        return Err(Error::missing(command.as_str(), field));
    }
    Ok(value)
}

/// Encode a request as a single message
pub fn encode_request(request: &Request) -> Result<RpcRequest> {
    let mut message = RpcRequest {
        command: request.command().as_str().to_string(),
        ..Default::default()
    };
    if let Some(id) = request.process_id() {
        message.id = id.to_string();
    }

    match request {
        Request::Id
        | Request::Clear
        | Request::Close
        | Request::LoggingCacheClear
        | Request::LoggingCacheSize => {}
        Request::CreateProcess(options) => message.options = Some(options.into()),
        Request::List(filter) => message.filter = crate::proto::FilterSpecifications::from(*filter).into(),
        Request::Group(tag) => message.tag = tag.clone(),
        Request::WriteFile(info) => message.write_file = Some(info.into()),
        Request::ConfigureCache(options) => message.cache = Some(options.into()),
        Request::DownloadFile(info) => message.download = Some(info.into()),
        Request::DownloadMongodb(options) => message.mongodb = Some(options.into()),
        Request::GetLogStream { count, .. } => message.count = *count as u64,
        Request::SignalEvent(event) => message.id = event.clone(),
        Request::SendMessages(payload) => message.payload = Some(payload.try_into()?),
        Request::Signal { signal, .. } => message.signal = *signal,
        Request::RegisterSignalTriggerId { trigger, .. } => {
            message.trigger = crate::proto::SignalTriggerId::from(*trigger).into();
        }
        Request::Tag { tag, .. } => message.tag = tag.clone(),
        Request::LoggingCacheCreate { id, output } => {
            message.id = id.clone();
            message.output = Some(output.into());
        }
        Request::LoggingCacheGet(id)
        | Request::LoggingCacheRemove(id)
        | Request::LoggingCacheCloseAndRemove(id) => message.id = id.clone(),
        Request::LoggingCachePrune(before) => message.before = Some(convert::timestamp(before)),
        Request::Get(_)
        | Request::GetBuildloggerUrls(_)
        | Request::Info(_)
        | Request::Running(_)
        | Request::Complete(_)
        | Request::Wait(_)
        | Request::Respawn(_)
        | Request::GetTags(_)
        | Request::ResetTags(_) => {}
    }
    Ok(message)
}

/// Split a request into the frames sent for it
pub fn request_frames(request: &Request) -> Result<Vec<RpcRequest>> {
    let Request::WriteFile(info) = request else {
        return Ok(vec![encode_request(request)?]);
    };
    if info.content.len() <= WRITE_FILE_CHUNK {
        return Ok(vec![encode_request(request)?]);
    }

    let frames = info
        .content
        .chunks(WRITE_FILE_CHUNK)
        .enumerate()
        .map(|(index, chunk)| RpcRequest {
            command: CommandName::WriteFile.as_str().to_string(),
            write_file: Some(crate::proto::WriteFileInfo {
                path: info.path.clone(),
                content: chunk.to_vec(),
                append: index > 0 || info.append,
                perm: info.perm,
            }),
            ..Default::default()
        })
        .collect();
    Ok(frames)
}

/// Decode one request message
pub fn decode_request(message: RpcRequest) -> Result<Request> {
    let command = CommandName::from_str(&message.command)?;
    let id = || non_empty(message.id.clone(), command, "id");

    let request = match command {
        CommandName::Id => Request::Id,
        CommandName::CreateProcess => {
            Request::CreateProcess(required(message.options.clone(), command, "options")?.try_into()?)
        }
        CommandName::List => Request::List(convert::filter(message.filter)?),
        CommandName::Group => Request::Group(message.tag.clone()),
        CommandName::Get => Request::Get(id()?),
        CommandName::Clear => Request::Clear,
        CommandName::Close => Request::Close,
        CommandName::WriteFile => {
            Request::WriteFile(WriteFileInfo::from(required(message.write_file.clone(), command, "write_file")?))
        }
        CommandName::ConfigureCache => {
            Request::ConfigureCache(required(message.cache, command, "cache")?.into())
        }
        CommandName::DownloadFile => {
            Request::DownloadFile(required(message.download.clone(), command, "download")?.try_into()?)
        }
        CommandName::DownloadMongodb => {
            Request::DownloadMongodb(required(message.mongodb.clone(), command, "mongodb")?.into())
        }
        CommandName::GetLogStream => Request::GetLogStream {
            id: id()?,
            count: usize::try_from(message.count)
                .map_err(|e| Error::invalid(command.as_str(), "count", e.to_string()))?,
        },
        CommandName::GetBuildloggerUrls => Request::GetBuildloggerUrls(id()?),
        CommandName::SignalEvent => Request::SignalEvent(message.id.clone()),
        CommandName::SendMessages => {
            Request::SendMessages(required(message.payload.clone(), command, "payload")?.try_into()?)
        }
        CommandName::Info => Request::Info(id()?),
        CommandName::Running => Request::Running(id()?),
        CommandName::Complete => Request::Complete(id()?),
        CommandName::Wait => Request::Wait(id()?),
        CommandName::Respawn => Request::Respawn(id()?),
        CommandName::Signal => {
            if message.signal == 0 {
                return Err(Error::missing(command.as_str(), "signal"));
            }
            Request::Signal {
                id: id()?,
                signal: message.signal,
            }
        }
        CommandName::RegisterSignalTriggerId => Request::RegisterSignalTriggerId {
            id: id()?,
            trigger: convert::signal_trigger_id(message.trigger)?,
        },
        CommandName::Tag => Request::Tag {
            id: id()?,
            tag: message.tag.clone(),
        },
        CommandName::GetTags => Request::GetTags(id()?),
        CommandName::ResetTags => Request::ResetTags(id()?),
        CommandName::LoggingCacheCreate => Request::LoggingCacheCreate {
            id: id()?,
            output: message.output.clone().map(TryInto::try_into).transpose()?.unwrap_or_default(),
        },
        CommandName::LoggingCacheGet => Request::LoggingCacheGet(id()?),
        CommandName::LoggingCacheRemove => Request::LoggingCacheRemove(id()?),
        CommandName::LoggingCacheCloseAndRemove => Request::LoggingCacheCloseAndRemove(id()?),
        CommandName::LoggingCacheClear => Request::LoggingCacheClear,
        CommandName::LoggingCachePrune => {
            Request::LoggingCachePrune(convert::datetime(required(message.before, command, "before")?)?)
        }
        CommandName::LoggingCacheSize => Request::LoggingCacheSize,
    };
    Ok(request)
}

fn status(response: &Response) -> RpcResponse {
    RpcResponse {
        ok: response.ok,
        errmsg: response.errmsg.clone(),
        code_name: response.code_name.clone(),
        ..Default::default()
    }
}

/// Encode the response to `command` as the frames sent for it
pub fn encode_response(command: CommandName, response: &Response) -> Vec<RpcResponse> {
    let mut last = status(response);
    if !response.ok {
        return vec![last];
    }

    match &response.reply {
        Reply::Empty => {}
        Reply::Id(id) => last.id = id.clone(),
        Reply::Info(info) => last.info = Some(info.as_ref().into()),
        Reply::Infos(infos) => {
            let mut frames: Vec<RpcResponse> = infos
                .iter()
                .map(|info| RpcResponse {
                    ok: true,
                    infos: vec![info.into()],
                    ..Default::default()
                })
                .collect();
            frames.push(last);
            return frames;
        }
        Reply::Flag(flag) => last.flag = *flag,
        Reply::ExitCode(code) => last.exit_code = *code,
        Reply::Tags(tags) => last.tags = tags.clone(),
        Reply::LogStream(stream) => {
            last.logs = stream.logs.clone();
            last.done = stream.done;
        }
        Reply::Urls(urls) => last.urls = urls.clone(),
        Reply::Logger(logger) => last.logger = Some(logger.into()),
        Reply::Size(size) => last.size = *size as u64,
    }
    debug_assert!(command.reply_kind() == response.reply.kind() || response.reply == Reply::Empty);
    vec![last]
}

/// Decode the frames answering `command`. The last frame carries the status.
pub fn decode_response(command: CommandName, frames: Vec<RpcResponse>) -> Result<Response> {
    let mut frames = frames;
    let last = frames.pop().ok_or_else(|| Error::UnexpectedReply {
        command: command.as_str().to_string(),
    })?;
    if !last.ok {
        return Ok(Response {
            ok: false,
            errmsg: last.errmsg,
            code_name: last.code_name,
            reply: Reply::Empty,
        });
    }

    let reply = match command.reply_kind() {
        ReplyKind::Empty => Reply::Empty,
        ReplyKind::Id => Reply::Id(last.id),
        ReplyKind::Info => Reply::Info(Box::new(required(last.info, command, "info")?.try_into()?)),
        ReplyKind::Infos => {
            let infos = frames
                .into_iter()
                .chain(std::iter::once(last))
                .flat_map(|frame| frame.infos)
                .map(TryInto::try_into)
                .collect::<Result<Vec<_>>>()?;
            Reply::Infos(infos)
        }
        ReplyKind::Flag => Reply::Flag(last.flag),
        ReplyKind::ExitCode => Reply::ExitCode(last.exit_code),
        ReplyKind::Tags => Reply::Tags(last.tags),
        ReplyKind::LogStream => Reply::LogStream(LogStream {
            logs: last.logs,
            done: last.done,
        }),
        ReplyKind::Urls => Reply::Urls(last.urls),
        ReplyKind::Logger => Reply::Logger(required(last.logger, command, "logger")?.try_into()?),
        ReplyKind::Size => Reply::Size(
            usize::try_from(last.size).map_err(|e| Error::invalid(command.as_str(), "size", e.to_string()))?,
        ),
    };
    Ok(Response::success(reply))
}

/// Write one frame and flush
pub async fn write_frame<W, M>(writer: &mut W, flag: FrameFlag, message: &M) -> Result<()>
where
    W: AsyncWrite + Unpin,
    M: prost::Message,
{
    let length = message.encoded_len();
    if length > MAX_FRAME_SIZE {
        return Err(Error::TooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut bytes = Vec::with_capacity(5 + length);
    bytes.push(flag as u8);
    bytes.extend_from_slice(&(length as u32).to_be_bytes());
    message
        .encode(&mut bytes)
        .map_err(|e| Error::Unencodable(e.to_string()))?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the connection between
/// frames.
pub async fn read_frame<R, M>(reader: &mut R) -> Result<Option<(FrameFlag, M)>>
where
    R: AsyncRead + Unpin,
    M: prost::Message + Default,
{
    let mut header = [0u8; 5];
    let read = read_full(reader, &mut header).await?;
    if read == 0 {
        return Ok(None);
    }
    if read < header.len() {
        return Err(Error::Malformed("truncated frame header".into()));
    }

    let flag = FrameFlag::try_from(header[0])?;
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(Error::TooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    trace!(?flag, length, "read frame");
    Ok(Some((flag, M::decode(body.as_slice())?)))
}

/// Write every frame of a request
pub async fn write_request<W: AsyncWrite + Unpin>(writer: &mut W, request: &Request) -> Result<()> {
    let frames = request_frames(request)?;
    let count = frames.len();
    for (index, frame) in frames.iter().enumerate() {
        let flag = if index + 1 == count { FrameFlag::End } else { FrameFlag::More };
        write_frame(writer, flag, frame).await?;
    }
    Ok(())
}

/// Write every frame of the response to `command`
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    command: CommandName,
    response: &Response,
) -> Result<()> {
    let frames = encode_response(command, response);
    let count = frames.len();
    for (index, frame) in frames.iter().enumerate() {
        let flag = if index + 1 == count { FrameFlag::End } else { FrameFlag::More };
        write_frame(writer, flag, frame).await?;
    }
    Ok(())
}

/// Read the frames answering `command` through the closing one
pub async fn read_response<R: AsyncRead + Unpin>(reader: &mut R, command: CommandName) -> Result<Response> {
    let mut frames = Vec::new();
    loop {
        let Some((flag, frame)) = read_frame::<_, RpcResponse>(reader).await? else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-response",
            )));
        };
        frames.push(frame);
        if flag == FrameFlag::End {
            break;
        }
    }
    decode_response(command, frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use process_manager::{CreateOptions, Filter, ProcessInfo};

    #[test]
    fn test_large_write_file_is_chunked() {
        let content: Vec<u8> = (0..WRITE_FILE_CHUNK * 2 + 10).map(|i| (i % 251) as u8).collect();
        let request = Request::WriteFile(WriteFileInfo {
            path: "/tmp/out".into(),
            content: content.clone(),
            append: false,
            perm: 0o644,
        });
        let frames = request_frames(&request).unwrap();
        assert_eq!(frames.len(), 3);

        let chunks: Vec<_> = frames.iter().map(|f| f.write_file.clone().unwrap()).collect();
        assert!(!chunks[0].append);
        assert!(chunks[1].append && chunks[2].append);
        let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.content).collect();
        assert_eq!(joined, content);
    }

    #[test]
    fn test_empty_write_file_is_one_frame() {
        let request = Request::WriteFile(WriteFileInfo {
            path: "/tmp/empty".into(),
            ..WriteFileInfo::default()
        });
        assert_eq!(request_frames(&request).unwrap().len(), 1);
    }

    #[test]
    fn test_listing_streams_one_frame_per_process() {
        let infos: Vec<ProcessInfo> = (0..3)
            .map(|i| ProcessInfo::started(format!("p{}", i), 100 + i, CreateOptions::new(["true"])))
            .collect();
        let response = Response::success(Reply::Infos(infos.clone()));
        let frames = encode_response(CommandName::List, &response);
        assert_eq!(frames.len(), 4);
        assert!(frames[3].infos.is_empty());

        let decoded = decode_response(CommandName::List, frames).unwrap();
        assert_eq!(decoded.reply, Reply::Infos(infos));
    }

    #[test]
    fn test_missing_fields_are_reported() {
        let message = RpcRequest {
            command: "signal".into(),
            id: "p1".into(),
            ..Default::default()
        };
        let err = decode_request(message).unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "signal", .. }));

        let message = RpcRequest {
            command: "info".into(),
            ..Default::default()
        };
        assert!(matches!(decode_request(message).unwrap_err(), Error::MissingField { field: "id", .. }));

        let message = RpcRequest {
            command: "list".into(),
            filter: crate::proto::FilterSpecifications::from(Filter::Failed).into(),
            ..Default::default()
        };
        assert_eq!(decode_request(message).unwrap(), Request::List(Filter::Failed));
    }

    #[smol_potat::test]
    async fn test_frames_over_a_stream() {
        let mut wire = Vec::new();
        write_request(&mut wire, &Request::Wait("p1".into())).await.unwrap();
        write_response(&mut wire, CommandName::Wait, &Response::success(Reply::ExitCode(3)))
            .await
            .unwrap();

        let mut reader = futures::io::Cursor::new(wire);
        let (flag, message) = read_frame::<_, RpcRequest>(&mut reader).await.unwrap().unwrap();
        assert_eq!(flag, FrameFlag::End);
        assert_eq!(decode_request(message).unwrap(), Request::Wait("p1".into()));

        let response = read_response(&mut reader, CommandName::Wait).await.unwrap();
        assert_eq!(response.reply, Reply::ExitCode(3));
        assert!(read_frame::<_, RpcRequest>(&mut reader).await.unwrap().is_none());
    }

    #[smol_potat::test]
    async fn test_oversized_frame_is_refused() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&((MAX_FRAME_SIZE + 1) as u32).to_be_bytes());
        let err = read_frame::<_, RpcRequest>(&mut futures::io::Cursor::new(bytes))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooLarge { .. }));
    }
}
