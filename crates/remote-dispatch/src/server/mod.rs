//! TCP servers for both encodings.
//!
//! Each server accepts connections until shut down, spawns one task per
//! connection and answers that connection's requests in order. Every request
//! runs under its own cancellation token, cancelled when the request timeout
//! elapses, the peer disconnects or the server shuts down.

pub mod rpc;
pub mod wire;

use async_net::{TcpListener, TcpStream};
use futures::future::{self, Either, select};
use process_manager::{Error, Result};
use std::net::SocketAddr;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wire_protocol::{Reply, Request};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;

/// Settings shared by every connection of a server
#[derive(Debug, Clone)]
pub(crate) struct Shared {
    pub dispatcher: Arc<Dispatcher>,
    pub request_timeout: Duration,
}

impl Shared {
    /// Run one request under `token`, cancelling it when the timeout elapses
    pub async fn execute(&self, request: Request, token: &CancellationToken) -> Result<Reply> {
        let command = request.command();
        let work = pin!(self.dispatcher.dispatch(request));
        let timer = pin!(smol::Timer::after(self.request_timeout));
        let cancelled = pin!(token.cancelled());

        match select(work, select(timer, cancelled)).await {
            Either::Left((result, _)) => result,
            Either::Right((Either::Left(_), _)) => {
                token.cancel();
                Err(Error::Timeout(format!(
                    "{} did not finish within {:?}",
                    command, self.request_timeout
                )))
            }
            Either::Right((Either::Right(_), _)) => Err(Error::cancelled(format!("{} was cancelled", command))),
        }
    }
}

/// Resolves once the peer closes its end of `stream`. Bytes sent ahead of
/// the reply are left unread and keep it pending.
async fn peer_gone(stream: &TcpStream) {
    let mut byte = [0u8; 1];
    match stream.peek(&mut byte).await {
        Ok(0) | Err(_) => {}
        Ok(_) => future::pending::<()>().await,
    }
}

/// Drive `work` to completion, cancelling `token` first if the peer on
/// `stream` goes away meanwhile
pub(crate) async fn until_disconnect<F: Future>(stream: &TcpStream, token: &CancellationToken, work: F) -> F::Output {
    let mut work = pin!(work);
    let gone = pin!(peer_gone(stream));
    match select(work.as_mut(), gone).await {
        Either::Left((output, _)) => output,
        Either::Right(_) => {
            debug!(peer = ?stream.peer_addr().ok(), "peer disconnected, cancelling request");
            token.cancel();
            work.await
        }
    }
}

/// Running servers. Dropping the handle leaves them running.
#[derive(Debug)]
pub struct ServerHandle {
    token: CancellationToken,
    rpc_addr: Option<SocketAddr>,
    wire_addr: Option<SocketAddr>,
}

impl ServerHandle {
    /// Bound address of the framed transport
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.rpc_addr
    }

    /// Bound address of the command-document transport
    pub fn wire_addr(&self) -> Option<SocketAddr> {
        self.wire_addr
    }

    /// Stop accepting and cancel in-flight requests
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether [`ServerHandle::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

async fn accept_loop<F, Fut>(listener: TcpListener, shared: Shared, token: CancellationToken, handler: F)
where
    F: Fn(TcpStream, SocketAddr, Shared, CancellationToken) -> Fut,
    Fut: Future<Output = wire_protocol::Result<()>> + Send + 'static,
{
    loop {
        let accepted = {
            let accept = pin!(listener.accept());
            let stopped = pin!(token.cancelled());
            match select(accept, stopped).await {
                Either::Left((accepted, _)) => accepted,
                Either::Right(_) => break,
            }
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted connection");
                let connection = handler(stream, peer, shared.clone(), token.child_token());
                smol::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!(%peer, error = %e, "connection ended with an error");
                    }
                    debug!(%peer, "connection closed");
                })
                .detach();
            }
            Err(e) => error!(error = %e, "failed to accept connection"),
        }
    }
    debug!("stopped accepting connections");
}

async fn bind(addr: &str) -> crate::Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|source| crate::Error::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Bind the configured listeners and serve `dispatcher` on them
pub async fn serve(config: &ServerConfig, dispatcher: Dispatcher) -> crate::Result<ServerHandle> {
    let shared = Shared {
        dispatcher: Arc::new(dispatcher),
        request_timeout: config.request_timeout,
    };
    let token = CancellationToken::new();

    let mut handle = ServerHandle {
        token: token.clone(),
        rpc_addr: None,
        wire_addr: None,
    };

    if let Some(addr) = &config.rpc_addr {
        let listener = bind(addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "serving framed protocol");
        smol::spawn(accept_loop(listener, shared.clone(), token.child_token(), rpc::handle_connection)).detach();
        handle.rpc_addr = Some(local);
    }

    if let Some(addr) = &config.wire_addr {
        let listener = match bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                token.cancel();
                return Err(e);
            }
        };
        let local = listener.local_addr()?;
        info!(addr = %local, "serving command documents");
        smol::spawn(accept_loop(listener, shared, token.child_token(), wire::handle_connection)).detach();
        handle.wire_addr = Some(local);
    }

    Ok(handle)
}
