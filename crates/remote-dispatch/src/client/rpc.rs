//! Framed protobuf transport

use async_net::TcpStream;
use async_trait::async_trait;
use process_manager::Result;
use std::time::Duration;
use tracing::debug;
use wire_protocol::{Request, Response, framed};

use super::{Pool, Transport, timed_out, within};
use crate::config::Protocol;

/// Speaks length-prefixed protobuf frames, one exchange per pooled connection
#[derive(Debug)]
pub struct RpcTransport {
    pool: Pool,
}

impl RpcTransport {
    /// A transport for `addr`; connections open on demand
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            pool: Pool::new(addr.into()),
        }
    }
}

async fn exchange(stream: &mut TcpStream, request: &Request) -> wire_protocol::Result<Response> {
    framed::write_request(stream, request).await?;
    framed::read_response(stream, request.command()).await
}

#[async_trait]
impl Transport for RpcTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Rpc
    }

    async fn call(&self, request: &Request, timeout: Duration) -> Result<Response> {
        let mut stream = self.pool.checkout(timeout).await?;

        let command = request.command();
        debug!(%command, "framed call");
        match within(exchange(&mut stream, request), timeout).await {
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
