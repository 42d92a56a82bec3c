//! Common test utilities

#![allow(dead_code)]

use process_manager::logging::{LoggerConfig, OutputOptions};
use process_manager::{CreateOptions, LocalManager, Manager, ManagerOptions, ProcessRef};
use remote_dispatch::{
    ClientConfig, Collaborators, Dispatcher, Protocol, RemoteManager, ServerConfig, ServerHandle, serve,
};
use std::future::Future;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

static TRACING: Once = Once::new();

/// Both client encodings
pub const PROTOCOLS: [Protocol; 2] = [Protocol::Rpc, Protocol::Wire];

/// Install a fmt subscriber once per test binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}

/// Both transports on ephemeral loopback ports
pub fn loopback_config() -> ServerConfig {
    ServerConfig {
        rpc_addr: Some("127.0.0.1:0".to_string()),
        wire_addr: Some("127.0.0.1:0".to_string()),
        close_grace_period: Duration::from_secs(1),
        ..ServerConfig::default()
    }
}

/// A local manager served on both transports
pub struct Service {
    pub local: Arc<LocalManager>,
    pub manager: Arc<dyn Manager>,
    pub server: ServerHandle,
}

impl Service {
    /// Serve a fresh manager with the default collaborators
    pub async fn start() -> Self {
        Self::start_with(loopback_config(), None).await
    }

    /// Serve a fresh manager configured by `config`
    pub async fn start_with(config: ServerConfig, collaborators: Option<Arc<dyn Collaborators>>) -> Self {
        init_tracing();
        let local = Arc::new(
            LocalManager::new(ManagerOptions {
                close_grace_period: Duration::from_secs(1),
                ..config.manager_options()
            })
            .expect("manager"),
        );
        let manager: Arc<dyn Manager> = local.clone();
        let mut dispatcher = Dispatcher::new(manager.clone());
        if let Some(collaborators) = collaborators {
            dispatcher = dispatcher.with_collaborators(collaborators);
        }
        let server = serve(&config, dispatcher).await.expect("serve");
        Self { local, manager, server }
    }

    /// Client settings for `protocol`
    pub fn client_config(&self, protocol: Protocol) -> ClientConfig {
        let addr = match protocol {
            Protocol::Rpc => self.server.rpc_addr(),
            Protocol::Wire => self.server.wire_addr(),
        };
        ClientConfig::new(addr.expect("transport enabled").to_string(), protocol)
    }

    /// A remote manager speaking `protocol`
    pub async fn connect(&self, protocol: Protocol) -> RemoteManager {
        RemoteManager::connect(&self.client_config(protocol))
            .await
            .expect("connect")
    }

    /// Close the manager and stop serving
    pub async fn stop(self) {
        let _ = self.manager.close().await;
        self.server.shutdown();
    }
}

/// Options for `args` logging into a 100-line in-memory sink
pub fn in_memory<I, S>(args: I) -> CreateOptions
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut options = CreateOptions::new(args);
    options.output = OutputOptions::with_loggers(vec![LoggerConfig::in_memory(100)]);
    options
}

/// Read every line a process logs until its stream reports done
pub async fn collect_logs(process: &ProcessRef) -> Vec<String> {
    let mut lines = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let stream = process.log_stream(100).await.expect("log stream");
        lines.extend(stream.logs);
        if stream.done || Instant::now() > deadline {
            return lines;
        }
        smol::Timer::after(Duration::from_millis(20)).await;
    }
}

/// Poll `check` until it holds or `limit` passes
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        smol::Timer::after(Duration::from_millis(20)).await;
    }
    false
}
