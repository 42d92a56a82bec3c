//! Remote managers, processes and logging caches.
//!
//! The types here implement the same traits as their local counterparts and
//! marshal every call through a [`Transport`]. Operations that only make
//! sense in-process (registering foreign processes, closure triggers) fail
//! with `NotSupported`.

mod cache;
mod manager;
mod rpc;
mod wire;

pub use cache::RemoteLoggingCache;
pub use manager::{RemoteManager, RemoteProcess};
pub use rpc::RpcTransport;
pub use wire::WireTransport;

use async_net::TcpStream;
use async_trait::async_trait;
use futures::future::{Either, select};
use futures::lock::Mutex;
use process_manager::{Error, Result};
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use wire_protocol::{CommandName, Reply, Request, Response};

use crate::config::{ClientConfig, Protocol};

/// One request/response exchange with a remote service
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Encoding spoken
    fn protocol(&self) -> Protocol;

    /// Send `request` and read its response, giving up after `timeout`
    async fn call(&self, request: &Request, timeout: Duration) -> Result<Response>;

    /// Drop the connection; later calls fail
    async fn close(&self);
}

/// The transport for `config`'s protocol
pub fn transport(config: &ClientConfig) -> Arc<dyn Transport> {
    match config.protocol {
        Protocol::Rpc => Arc::new(RpcTransport::new(config.addr.clone())),
        Protocol::Wire => Arc::new(WireTransport::new(config.addr.clone())),
    }
}

/// Idle connections kept for reuse
const MAX_IDLE: usize = 4;

/// Connections to one service, shared by both transports.
///
/// Each call checks a stream out for the length of one exchange, so calls
/// from the same client run side by side on separate connections. A stream
/// goes back only when its exchange finished cleanly, so a timed-out or
/// failed exchange never leaves half a response for the next call.
#[derive(Debug)]
pub(crate) struct Pool {
    addr: String,
    state: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<TcpStream>,
    closed: bool,
}

impl Pool {
    pub(crate) fn new(addr: String) -> Self {
        Self {
            addr,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// An idle stream, or a fresh connection when none is free
    pub(crate) async fn checkout(&self, timeout: Duration) -> Result<TcpStream> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(Error::Io(io::Error::new(io::ErrorKind::NotConnected, "connection closed")));
            }
            if let Some(stream) = state.idle.pop() {
                return Ok(stream);
            }
        }
        let stream = within(TcpStream::connect(self.addr.as_str()), timeout)
            .await
            .ok_or_else(|| Error::Timeout(format!("connecting to {}", self.addr)))??;
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "connected");
        Ok(stream)
    }

    /// Return a stream whose exchange completed
    pub(crate) async fn checkin(&self, stream: TcpStream) {
        let mut state = self.state.lock().await;
        if !state.closed && state.idle.len() < MAX_IDLE {
            state.idle.push(stream);
        }
    }

    /// Drop idle streams and refuse later checkouts
    pub(crate) async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.idle.clear();
    }
}

/// `Some(output)` when `future` finishes within `limit`
pub(crate) async fn within<F: Future>(future: F, limit: Duration) -> Option<F::Output> {
    let future = pin!(future);
    let timer = pin!(smol::Timer::after(limit));
    match select(future, timer).await {
        Either::Left((output, _)) => Some(output),
        Either::Right(_) => None,
    }
}

pub(crate) fn timed_out(command: CommandName, limit: Duration) -> Error {
    Error::Timeout(format!("{} got no response within {:?}", command, limit))
}

/// A transport plus the per-call timeout
#[derive(Debug, Clone)]
pub(crate) struct Client {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Client {
    pub(crate) fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Perform `request`, turning a failed response back into an error
    pub(crate) async fn call(&self, request: Request) -> Result<Reply> {
        self.transport.call(&request, self.timeout).await?.into_result()
    }

    /// Perform a request whose reply carries nothing
    pub(crate) async fn call_empty(&self, request: Request) -> Result<()> {
        let command = request.command();
        match self.call(request).await? {
            Reply::Empty => Ok(()),
            other => Err(unexpected(command, &other)),
        }
    }
}

pub(crate) fn unexpected(command: CommandName, reply: &Reply) -> Error {
    Error::decode(format!("unexpected {:?} reply to {}", reply.kind(), command))
}
