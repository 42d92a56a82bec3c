//! Command-document transport

use async_net::TcpStream;
use async_trait::async_trait;
use process_manager::Result;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tracing::debug;
use wire_protocol::mongo::{self, Message};
use wire_protocol::{Request, Response, bson_codec};

use super::{Pool, Transport, timed_out, within};
use crate::config::Protocol;

/// Sends each request as a command query and reads the matching reply
#[derive(Debug)]
pub struct WireTransport {
    pool: Pool,
    next_id: AtomicI32,
}

impl WireTransport {
    /// A transport for `addr`; connections open on demand
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            pool: Pool::new(addr.into()),
            next_id: AtomicI32::new(1),
        }
    }
}

async fn exchange(stream: &mut TcpStream, request: &Request, request_id: i32) -> wire_protocol::Result<Response> {
    let command = request.command();
    let document = bson_codec::encode_request(request)?;
    mongo::write_message(stream, &Message::query(request_id, document)).await?;

    let Some(message) = mongo::read_message(stream).await? else {
        return Err(wire_protocol::Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before the reply",
        )));
    };
    match message {
        Message::Reply { header, document, .. } if header.response_to == request_id => {
            bson_codec::decode_response(command, &document)
        }
        _ => Err(wire_protocol::Error::UnexpectedReply {
            command: command.to_string(),
        }),
    }
}

#[async_trait]
impl Transport for WireTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Wire
    }

    async fn call(&self, request: &Request, timeout: Duration) -> Result<Response> {
        let mut stream = self.pool.checkout(timeout).await?;

        let command = request.command();
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(%command, request_id, "command document call");
        match within(exchange(&mut stream, request, request_id), timeout).await {
            Some(Ok(response)) => {
                self.pool.checkin(stream).await;
                Ok(response)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(timed_out(command, timeout)),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
