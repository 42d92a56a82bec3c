//! Process manager for supervising many processes at once.
//!
//! The manager is the central registry: it creates processes, indexes them
//! by id, answers tag and filter queries, launches follow-up processes and
//! shuts everything down on close.

use async_trait::async_trait;
use command_executor::Signal;
use futures::future::{Either, join_all, select};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};
use crate::files::{WriteFileInfo, write_file};
use crate::info::ProcessInfo;
use crate::logging::{CacheOptions, LocalLoggingCache, LoggingCache};
use crate::options::{CreateOptions, Filter};
use crate::process::{ProcessRef, ProcessTrigger, SpawnContext, new_process};
use crate::sync::{read, write};

/// Default pause between SIGTERM and SIGKILL during [`Manager::close`]
pub const DEFAULT_CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Operations on a process manager, local or remote
#[async_trait]
pub trait Manager: Send + Sync + fmt::Debug {
    /// Manager id
    fn id(&self) -> &str;

    /// Validate `options`, start a process and track it
    async fn create_process(&self, options: CreateOptions) -> Result<ProcessRef>;

    /// Track a process created elsewhere
    async fn register(&self, process: ProcessRef) -> Result<()>;

    /// Processes passing `filter`
    async fn list(&self, filter: Filter) -> Result<Vec<ProcessRef>>;

    /// Processes carrying `tag`
    async fn group(&self, tag: &str) -> Result<Vec<ProcessRef>>;

    /// The process with `id`
    async fn get(&self, id: &str) -> Result<ProcessRef>;

    /// Forget completed processes
    async fn clear(&self) -> Result<()>;

    /// Terminate every live process and stop background work
    async fn close(&self) -> Result<()>;

    /// This manager's logging cache
    fn logging_cache(&self) -> Arc<dyn LoggingCache>;

    /// Write a file on the manager's host
    async fn write_file(&self, info: WriteFileInfo) -> Result<()>;

    /// Reconfigure the logging cache
    async fn configure_cache(&self, options: CacheOptions) -> Result<()>;
}

/// Settings for a [`LocalManager`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerOptions {
    /// Manager id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Pause between SIGTERM and SIGKILL on close
    #[serde(default = "default_grace_period", with = "duration_secs")]
    pub close_grace_period: Duration,
    /// Logging cache tuning
    #[serde(default)]
    pub cache: CacheOptions,
}

fn default_grace_period() -> Duration {
    DEFAULT_CLOSE_GRACE_PERIOD
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            id: None,
            close_grace_period: DEFAULT_CLOSE_GRACE_PERIOD,
            cache: CacheOptions::default(),
        }
    }
}

/// Serialise a duration as (possibly fractional) seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialise as seconds
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    /// Deserialise from seconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug)]
struct ManagerInner {
    id: String,
    options: ManagerOptions,
    token: CancellationToken,
    processes: RwLock<IndexMap<String, ProcessRef>>,
    cache: LocalLoggingCache,
    closed: AtomicBool,
}

/// In-process manager
#[derive(Debug, Clone)]
pub struct LocalManager {
    inner: Arc<ManagerInner>,
}

impl LocalManager {
    /// Create a manager
    pub fn new(options: ManagerOptions) -> Result<Self> {
        let id = options
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let token = CancellationToken::new();
        let cache = LocalLoggingCache::new(id.clone(), options.cache, token.child_token())?;

        info!(manager = %id, "created process manager");
        Ok(Self {
            inner: Arc::new(ManagerInner {
                id,
                options,
                token,
                processes: RwLock::new(IndexMap::new()),
                cache,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// The in-process logging cache
    pub fn local_cache(&self) -> &LocalLoggingCache {
        &self.inner.cache
    }

    fn context(&self) -> SpawnContext {
        SpawnContext::new(self.inner.id.clone(), self.inner.token.clone())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::cancelled(format!("manager {} is closed", self.inner.id)));
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<ProcessRef> {
        read(&self.inner.processes).values().cloned().collect()
    }

    /// Insert `process` and hook its completion
    async fn track(&self, process: ProcessRef) -> Result<()> {
        {
            let mut processes = write(&self.inner.processes);
            if processes.contains_key(process.id()) {
                return Err(Error::Conflict(format!("process '{}' is already registered", process.id())));
            }
            processes.insert(process.id().to_string(), process.clone());
        }

        let manager = Arc::downgrade(&self.inner);
        let trigger: ProcessTrigger = Box::new(move |info: &ProcessInfo| {
            on_complete(&manager, info);
            Ok(())
        });

        match process.register_trigger(trigger).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyComplete => {
                // Lost the race with exit; run the completion work here
                let info = process.info().await?;
                on_complete(&Arc::downgrade(&self.inner), &info);
                Ok(())
            }
            Err(e) => {
                warn!(process = %process.id(), error = %e, "failed to register completion trigger");
                if !process.complete().await.unwrap_or(true) {
                    if let Err(kill) = process.signal(Signal::KILL).await {
                        warn!(process = %process.id(), error = %kill, "failed to kill untracked process");
                    }
                }
                write(&self.inner.processes).shift_remove(process.id());
                Err(e)
            }
        }
    }

    async fn wait_all(processes: &[ProcessRef], limit: Duration) -> bool {
        let all = pin!(join_all(processes.iter().map(|process| process.wait())));
        let timer = pin!(smol::Timer::after(limit));
        matches!(select(all, timer).await, Either::Left(_))
    }

    async fn running(processes: &[ProcessRef]) -> Vec<ProcessRef> {
        let mut live = Vec::new();
        for process in processes {
            if process.running().await.unwrap_or(false) {
                live.push(process.clone());
            }
        }
        live
    }

    async fn signal_all(processes: &[ProcessRef], signal: Signal) {
        for process in processes {
            match process.signal(signal).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyComplete => {}
                Err(e) => warn!(process = %process.id(), %signal, error = %e, "failed to signal process on close"),
            }
        }
    }
}

/// Launch the follow-ups matching how a process ended
fn on_complete(manager: &Weak<ManagerInner>, info: &ProcessInfo) {
    debug!(process = %info.id, code = info.exit_code, "process completed");
    let follow_ups = if info.timed_out {
        &info.options.on_timeout
    } else if info.successful {
        &info.options.on_success
    } else {
        &info.options.on_failure
    };
    if follow_ups.is_empty() {
        return;
    }
    let Some(inner) = manager.upgrade() else {
        return;
    };

    let manager = LocalManager { inner };
    for options in follow_ups.iter().cloned() {
        let manager = manager.clone();
        let parent = info.id.clone();
        smol::spawn(async move {
            match manager.create_process(options).await {
                Ok(process) => debug!(parent = %parent, process = %process.id(), "launched follow-up"),
                Err(e) => warn!(parent = %parent, error = %e, "failed to launch follow-up"),
            }
        })
        .detach();
    }
}

#[async_trait]
impl Manager for LocalManager {
    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn create_process(&self, options: CreateOptions) -> Result<ProcessRef> {
        self.ensure_open()?;
        let process = new_process(options, &self.context()).await?;
        self.track(process.clone()).await?;
        Ok(process)
    }

    async fn register(&self, process: ProcessRef) -> Result<()> {
        self.ensure_open()?;
        self.track(process).await
    }

    async fn list(&self, filter: Filter) -> Result<Vec<ProcessRef>> {
        let mut matched = Vec::new();
        for process in self.snapshot() {
            if filter.matches(&process.info().await?) {
                matched.push(process);
            }
        }
        Ok(matched)
    }

    async fn group(&self, tag: &str) -> Result<Vec<ProcessRef>> {
        let mut matched = Vec::new();
        for process in self.snapshot() {
            if process.get_tags().await?.iter().any(|t| t == tag) {
                matched.push(process);
            }
        }
        Ok(matched)
    }

    async fn get(&self, id: &str) -> Result<ProcessRef> {
        read(&self.inner.processes)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no process with id '{}'", id)))
    }

    async fn clear(&self) -> Result<()> {
        let mut finished = Vec::new();
        for process in self.snapshot() {
            if process.complete().await? {
                finished.push(process.id().to_string());
            }
        }
        let mut processes = write(&self.inner.processes);
        for id in &finished {
            processes.shift_remove(id);
        }
        debug!(manager = %self.inner.id, removed = finished.len(), "cleared completed processes");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(manager = %self.inner.id, "closing process manager");

        let processes = self.snapshot();
        let live = Self::running(&processes).await;
        if !live.is_empty() {
            Self::signal_all(&live, Signal::TERM).await;
            if !Self::wait_all(&live, self.inner.options.close_grace_period).await {
                let stubborn = Self::running(&live).await;
                warn!(manager = %self.inner.id, count = stubborn.len(), "processes ignored SIGTERM, killing");
                Self::signal_all(&stubborn, Signal::KILL).await;
                if !Self::wait_all(&stubborn, self.inner.options.close_grace_period).await {
                    warn!(manager = %self.inner.id, "processes still running after SIGKILL");
                }
            }
        }

        self.inner.token.cancel();
        if let Err(e) = self.inner.cache.clear().await {
            warn!(manager = %self.inner.id, error = %e, "failed to clear logging cache on close");
        }
        Ok(())
    }

    fn logging_cache(&self) -> Arc<dyn LoggingCache> {
        Arc::new(self.inner.cache.clone())
    }

    async fn write_file(&self, info: WriteFileInfo) -> Result<()> {
        write_file(&info).await
    }

    async fn configure_cache(&self, options: CacheOptions) -> Result<()> {
        self.inner.cache.configure(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_options_defaults() {
        let options: ManagerOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, ManagerOptions::default());
        assert_eq!(options.close_grace_period, DEFAULT_CLOSE_GRACE_PERIOD);

        let options: ManagerOptions =
            serde_json::from_str(r#"{"id":"m1","close_grace_period":0.5}"#).unwrap();
        assert_eq!(options.id.as_deref(), Some("m1"));
        assert_eq!(options.close_grace_period, Duration::from_millis(500));
    }

    #[smol_potat::test]
    async fn test_get_unknown_is_not_found() {
        let manager = LocalManager::new(ManagerOptions::default()).unwrap();
        let err = manager.get("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[smol_potat::test]
    async fn test_create_rejected_after_close() {
        let manager = LocalManager::new(ManagerOptions::default()).unwrap();
        manager.close().await.unwrap();
        manager.close().await.unwrap();
        let err = manager
            .create_process(CreateOptions::new(["true"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
