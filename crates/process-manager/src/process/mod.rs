//! Processes: identity, triggers, tags and timeouts over an executor
//!
//! Two strategies implement [`Process`] and behave identically:
//! [`BasicProcess`] guards its state with a lock, [`BlockingProcess`] hands
//! every operation to an owning task. [`new_process`] picks one from the
//! options' implementation hint.

mod basic;
mod blocking;
mod launch;
mod state;
mod triggers;

pub use basic::BasicProcess;
pub use blocking::BlockingProcess;
pub use triggers::{ProcessTrigger, SignalTrigger, SignalTriggerId};

use async_trait::async_trait;
use command_executor::Signal;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::info::{LogStream, ProcessInfo};
use crate::logging::ResolvedOutput;
use crate::options::{CreateOptions, ImplementationHint};

/// Shared handle to a process
pub type ProcessRef = Arc<dyn Process>;

/// What a process needs from its manager to launch (and relaunch) itself
#[derive(Debug, Clone)]
pub struct SpawnContext {
    /// Exported to children as `MANAGER_ID`
    pub manager_id: String,
    /// Parent of every process token; cancelling it kills the processes
    pub token: CancellationToken,
}

impl SpawnContext {
    /// A context for `manager_id` rooted at `token`
    pub fn new(manager_id: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            manager_id: manager_id.into(),
            token,
        }
    }
}

/// A supervised process, local or remote
#[async_trait]
pub trait Process: Send + Sync + fmt::Debug {
    /// Id assigned at creation
    fn id(&self) -> &str;

    /// Current snapshot
    async fn info(&self) -> Result<ProcessInfo>;

    /// Whether the process is still running
    async fn running(&self) -> Result<bool>;

    /// Whether the process has exited and its triggers have fired
    async fn complete(&self) -> Result<bool>;

    /// Deliver `signal` unless a signal trigger suppresses it
    async fn signal(&self, signal: Signal) -> Result<()>;

    /// Wait for completion and return the exit code
    async fn wait(&self) -> Result<i32>;

    /// Start a fresh process from a copy of this one's options
    async fn respawn(&self) -> Result<ProcessRef>;

    /// Run `trigger` on completion. Fails with `AlreadyComplete` when too late.
    async fn register_trigger(&self, trigger: ProcessTrigger) -> Result<()>;

    /// Consult `trigger` before every signal
    async fn register_signal_trigger(&self, trigger: SignalTrigger) -> Result<()>;

    /// Register a well-known signal trigger
    async fn register_signal_trigger_id(&self, id: SignalTriggerId) -> Result<()> {
        self.register_signal_trigger(id.trigger()).await
    }

    /// Add a tag
    async fn tag(&self, tag: &str) -> Result<()>;

    /// Current tags in insertion order
    async fn get_tags(&self) -> Result<Vec<String>>;

    /// Remove every tag
    async fn reset_tags(&self) -> Result<()>;

    /// Drain up to `count` unread lines from the in-memory loggers
    async fn log_stream(&self, count: usize) -> Result<LogStream>;
}

/// Validate `options` and start a process with the strategy they ask for
pub async fn new_process(options: CreateOptions, ctx: &SpawnContext) -> Result<ProcessRef> {
    let process: ProcessRef = match options.implementation.resolve() {
        ImplementationHint::Blocking => Arc::new(BlockingProcess::start(options, ctx.clone()).await?),
        _ => Arc::new(BasicProcess::start(options, ctx.clone()).await?),
    };
    Ok(process)
}

fn drain_logs(output: &ResolvedOutput, count: usize, complete: bool) -> LogStream {
    let mut logs = Vec::new();
    for sink in output.in_memory() {
        if logs.len() >= count {
            break;
        }
        logs.extend(sink.drain(count - logs.len()));
    }
    let done = complete && output.in_memory().all(|sink| sink.is_empty());
    LogStream { logs, done }
}
