//! Remote access to process managers.
//!
//! The server half wraps any [`Manager`](process_manager::Manager) in a
//! [`Dispatcher`] and serves it over TCP in two encodings at once: framed
//! protobuf and legacy database command documents. The client half offers
//! [`RemoteManager`], [`RemoteProcess`] and [`RemoteLoggingCache`], which
//! implement the same traits as the local types, so code written against
//! the traits works unchanged against a remote host.
//!
//! ```no_run
//! use process_manager::{CreateOptions, LocalManager, Manager, ManagerOptions, Process};
//! use remote_dispatch::{ClientConfig, Dispatcher, Protocol, RemoteManager, ServerConfig, serve};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let manager = LocalManager::new(ManagerOptions::default())?;
//! let server = serve(&ServerConfig::default(), Dispatcher::new(Arc::new(manager))).await?;
//!
//! let addr = server.wire_addr().expect("wire transport enabled").to_string();
//! let remote = RemoteManager::connect(&ClientConfig::new(addr, Protocol::Wire)).await?;
//! let process = remote.create_process(CreateOptions::new(["true"])).await?;
//! assert_eq!(process.wait().await?, 0);
//!
//! remote.close_connection().await;
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod server;

pub use client::{RemoteLoggingCache, RemoteManager, RemoteProcess, RpcTransport, Transport, WireTransport};
pub use collaborators::{Collaborators, Unsupported};
pub use config::{ClientConfig, DEFAULT_REQUEST_TIMEOUT, Protocol, ServerConfig};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use server::{ServerHandle, serve};
