//! Common test utilities

#![allow(dead_code)]

use process_manager::logging::{LoggerConfig, OutputOptions};
use process_manager::{CreateOptions, ImplementationHint, LocalManager, ManagerOptions, ProcessRef};
use std::future::Future;
use std::sync::Once;
use std::time::{Duration, Instant};

static TRACING: Once = Once::new();

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

/// A manager with a short close grace period
pub fn manager() -> LocalManager {
    init_tracing();
    LocalManager::new(ManagerOptions {
        close_grace_period: Duration::from_secs(1),
        ..ManagerOptions::default()
    })
    .expect("manager")
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

/// The same options with each implementation strategy
pub fn each_strategy(options: CreateOptions) -> Vec<CreateOptions> {
    [ImplementationHint::Basic, ImplementationHint::Blocking]
        .into_iter()
        .map(|hint| CreateOptions {
            implementation: hint,
            ..options.clone()
        })
        .collect()
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
