//! Framed protobuf connections

use async_net::TcpStream;
use futures::future::{Either, select};
use futures::io::{AsyncRead, AsyncWrite};
use process_manager::{Error, ProcessInfo};
use std::net::SocketAddr;
use std::pin::pin;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wire_protocol::framed::{self, FrameFlag};
use wire_protocol::proto::{RpcRequest, RpcResponse};
use wire_protocol::{CommandName, Reply, Request, Response};

use super::{Shared, until_disconnect};

/// Answer requests from one peer until it disconnects or the server stops
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Shared,
    token: CancellationToken,
) -> wire_protocol::Result<()> {
    let watch = stream.clone();
    let mut reader = stream.clone();
    let mut writer = stream;

    loop {
        let next = {
            let read = pin!(framed::read_frame::<_, RpcRequest>(&mut reader));
            let stopped = pin!(token.cancelled());
            match select(read, stopped).await {
                Either::Left((next, _)) => next?,
                Either::Right(_) => return Ok(()),
            }
        };
        let Some((flag, message)) = next else {
            return Ok(());
        };
        debug!(%peer, command = %message.command, "framed request");

        let request_token = token.child_token();
        let command = match CommandName::from_str(&message.command) {
            Ok(command) => command,
            Err(e) => {
                if flag == FrameFlag::More {
                    skip_rest(&mut reader).await?;
                }
                write_failure(&mut writer, &e.into()).await?;
                continue;
            }
        };

        if command == CommandName::WriteFile {
            let response = upload(&mut reader, &shared, flag, message, &request_token).await?;
            framed::write_response(&mut writer, command, &response).await?;
            continue;
        }
        if flag == FrameFlag::More {
            skip_rest(&mut reader).await?;
            let err = Error::decode(format!("{} does not take a request stream", command));
            framed::write_response(&mut writer, command, &Response::failure(&err)).await?;
            continue;
        }

        let request = match framed::decode_request(message) {
            Ok(request) => request,
            Err(e) => {
                framed::write_response(&mut writer, command, &Response::failure(&e.into())).await?;
                continue;
            }
        };
        let answered = until_disconnect(&watch, &request_token, async {
            let response = Response::from(shared.execute(request, &request_token).await);
            match &response.reply {
                Reply::Infos(infos) if response.ok => stream_listing(&mut writer, command, infos, &request_token).await,
                _ => framed::write_response(&mut writer, command, &response).await,
            }
        });
        answered.await?;
    }
}

/// Apply `write_file` chunks in arrival order. After the first failure the
/// remaining chunks are read and dropped.
async fn upload<R: AsyncRead + Unpin>(
    reader: &mut R,
    shared: &Shared,
    first_flag: FrameFlag,
    first: RpcRequest,
    token: &CancellationToken,
) -> wire_protocol::Result<Response> {
    let mut flag = first_flag;
    let mut message = first;
    let mut outcome = Ok(Reply::Empty);
    let mut chunks = 0usize;

    loop {
        if outcome.is_ok() {
            outcome = match framed::decode_request(message) {
                Ok(request @ Request::WriteFile(_)) => {
                    chunks += 1;
                    shared.execute(request, token).await
                }
                Ok(other) => Err(Error::decode(format!("{} inside a write_file stream", other.command()))),
                Err(e) => Err(e.into()),
            };
        }
        if flag == FrameFlag::End {
            break;
        }
        let Some((next_flag, next)) = framed::read_frame::<_, RpcRequest>(reader).await? else {
            return Err(wire_protocol::Error::Malformed("connection closed during upload".into()));
        };
        flag = next_flag;
        message = next;
    }

    debug!(chunks, ok = outcome.is_ok(), "write_file stream applied");
    Ok(Response::from(outcome))
}

/// One frame per process, then a status frame. Stops with `Cancelled` when
/// the request is cancelled mid-stream.
async fn stream_listing<W: AsyncWrite + Unpin>(
    writer: &mut W,
    command: CommandName,
    infos: &[ProcessInfo],
    token: &CancellationToken,
) -> wire_protocol::Result<()> {
    for info in infos {
        if token.is_cancelled() {
            let err = Error::cancelled(format!("{} stream cancelled", command));
            return framed::write_response(writer, command, &Response::failure(&err)).await;
        }
        let frame = RpcResponse {
            ok: true,
            infos: vec![info.into()],
            ..Default::default()
        };
        framed::write_frame(writer, FrameFlag::More, &frame).await?;
    }
    framed::write_response(writer, command, &Response::success(Reply::Empty)).await
}

async fn skip_rest<R: AsyncRead + Unpin>(reader: &mut R) -> wire_protocol::Result<()> {
    while let Some((flag, _)) = framed::read_frame::<_, RpcRequest>(reader).await? {
        if flag == FrameFlag::End {
            return Ok(());
        }
    }
    Ok(())
}

async fn write_failure<W: AsyncWrite + Unpin>(writer: &mut W, error: &Error) -> wire_protocol::Result<()> {
    let response = Response::failure(error);
    let frame = RpcResponse {
        ok: false,
        errmsg: response.errmsg,
        code_name: response.code_name,
        ..Default::default()
    };
    framed::write_frame(writer, FrameFlag::End, &frame).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;
    use process_manager::CreateOptions;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Collects written bytes and cancels `token` at the first flush
    struct CancelAfterFirstFrame {
        bytes: Vec<u8>,
        token: CancellationToken,
    }

    impl AsyncWrite for CancelAfterFirstFrame {
        fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            self.bytes.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.token.cancel();
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[smol_potat::test]
    async fn test_listing_stops_when_cancelled_mid_stream() {
        let infos: Vec<ProcessInfo> = (0..3)
            .map(|n| ProcessInfo::started(format!("p{}", n), 100 + n, CreateOptions::new(["true"])))
            .collect();
        let token = CancellationToken::new();
        let mut writer = CancelAfterFirstFrame {
            bytes: Vec::new(),
            token: token.clone(),
        };

        stream_listing(&mut writer, CommandName::List, &infos, &token).await.unwrap();

        let mut reader = Cursor::new(writer.bytes);
        let (flag, first) = framed::read_frame::<_, RpcResponse>(&mut reader).await.unwrap().unwrap();
        assert_eq!(flag, FrameFlag::More);
        assert_eq!(first.infos.len(), 1);
        assert_eq!(first.infos[0].id, "p0");

        let (flag, last) = framed::read_frame::<_, RpcResponse>(&mut reader).await.unwrap().unwrap();
        assert_eq!(flag, FrameFlag::End);
        assert!(!last.ok);
        assert_eq!(last.code_name, "Cancelled");

        // Nothing follows the terminal frame
        assert!(framed::read_frame::<_, RpcResponse>(&mut reader).await.unwrap().is_none());
    }

    #[smol_potat::test]
    async fn test_listing_runs_to_completion() {
        let infos = vec![ProcessInfo::started("only", 7, CreateOptions::new(["true"]))];
        let mut bytes = Vec::new();
        stream_listing(&mut bytes, CommandName::Group, &infos, &CancellationToken::new())
            .await
            .unwrap();

        let mut reader = Cursor::new(bytes);
        let response = framed::read_response(&mut reader, CommandName::Group).await.unwrap();
        match response.reply {
            Reply::Infos(infos) => assert_eq!(infos[0].id, "only"),
            other => panic!("unexpected reply {:?}", other),
        }
    }
}
