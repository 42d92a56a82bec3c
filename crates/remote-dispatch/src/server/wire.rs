//! Command-document connections over legacy database messages

use async_net::TcpStream;
use bson::{Document, doc};
use futures::future::{Either, select};
use process_manager::Error;
use std::net::SocketAddr;
use std::pin::pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wire_protocol::mongo::{self, Message};
use wire_protocol::{CommandName, MAX_MESSAGE_SIZE, Response, bson_codec};

use super::{Shared, until_disconnect};

/// Highest wire version reported to drivers during the handshake
const MAX_WIRE_VERSION: i32 = 6;

const MAX_DOCUMENT_SIZE: i32 = 16 * 1024 * 1024;

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
    let mut next_id = 0i32;

    loop {
        let next = {
            let read = pin!(mongo::read_message(&mut reader));
            let stopped = pin!(token.cancelled());
            match select(read, stopped).await {
                Either::Left((next, _)) => next?,
                Either::Right(_) => return Ok(()),
            }
        };
        let Some(message) = next else {
            return Ok(());
        };
        let request_id = message.header().request_id;
        let Some(document) = message.command_document() else {
            warn!(%peer, "ignoring reply sent by a client");
            continue;
        };

        let request_token = token.child_token();
        let reply = until_disconnect(&watch, &request_token, answer(document, peer, &shared, &request_token)).await;
        next_id = next_id.wrapping_add(1);
        mongo::write_message(&mut writer, &Message::reply(next_id, request_id, reply)).await?;
    }
}

async fn answer(document: &Document, peer: SocketAddr, shared: &Shared, token: &CancellationToken) -> Document {
    let name = match bson_codec::command_name(document) {
        Ok(name) => name,
        Err(e) => return failure(&e.into()),
    };
    debug!(%peer, command = name, "command document");

    if let Some(reply) = handshake(name, peer) {
        return reply;
    }
    let command: CommandName = match name.parse() {
        Ok(command) => command,
        Err(e) => return failure(&e.into()),
    };

    let response = match bson_codec::decode_request(document) {
        Ok(request) => Response::from(shared.execute(request, token).await),
        Err(e) => Response::failure(&e.into()),
    };
    match bson_codec::encode_response(command, &response) {
        Ok(reply) => reply,
        Err(e) => failure(&e.into()),
    }
}

fn failure(error: &Error) -> Document {
    doc! {
        "ok": 0.0,
        "errmsg": error.to_string(),
        "codeName": error.kind().as_str(),
    }
}

/// Replies to the commands drivers and shells send before any real work
fn handshake(name: &str, peer: SocketAddr) -> Option<Document> {
    let max_message = MAX_MESSAGE_SIZE as i32;
    let max_document = MAX_DOCUMENT_SIZE;
    let reply = match name {
        "isMaster" | "ismaster" | "hello" => doc! {
            "ok": 1.0,
            "ismaster": true,
            "isWritablePrimary": true,
            "maxBsonObjectSize": max_document,
            "maxMessageSizeBytes": max_message,
            "minWireVersion": 0,
            "maxWireVersion": MAX_WIRE_VERSION,
        },
        "whatsmyuri" => doc! { "ok": 1.0, "you": peer.to_string() },
        "buildInfo" | "buildinfo" => doc! { "ok": 1.0, "version": env!("CARGO_PKG_VERSION") },
        "ping" => doc! { "ok": 1.0 },
        _ => return None,
    };
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_commands() {
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let hello = handshake("isMaster", peer).unwrap();
        assert!(hello.get_bool("ismaster").unwrap());
        assert_eq!(handshake("whatsmyuri", peer).unwrap().get_str("you").unwrap(), "127.0.0.1:5000");
        assert!(handshake("create_process", peer).is_none());
    }

    #[test]
    fn test_failure_document_names_kind() {
        let document = failure(&Error::not_found("process 'x'"));
        assert_eq!(document.get_f64("ok").unwrap(), 0.0);
        assert_eq!(document.get_str("codeName").unwrap(), "NotFound");
    }
}
