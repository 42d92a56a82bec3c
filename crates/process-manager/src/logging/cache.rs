//! The manager-scoped logging cache
//!
//! A named collection of resolved output sinks that remote clients can
//! address directly. Entries remember when they were last used; a background
//! pruner evicts the least recently used ones once the cache grows past its
//! configured size.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{Either, select};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::output::{OutputOptions, ResolvedOutput};
use super::payload::LoggingPayload;
use crate::error::{Error, Result};
use crate::sync::{lock, read, write};

/// Default number of cached loggers before the pruner evicts
pub const DEFAULT_MAX_SIZE: usize = 1000;
/// Default interval between prune passes
pub const DEFAULT_PRUNE_DELAY: Duration = Duration::from_secs(20 * 60);

/// Tuning for a logging cache. Zero values select the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Refuse new loggers and stop pruning
    #[serde(default)]
    pub disabled: bool,
    /// Entries kept before eviction starts
    #[serde(default)]
    pub max_size: i64,
    /// Seconds between prune passes
    #[serde(default)]
    pub prune_delay_secs: i64,
}

impl CacheOptions {
    /// Reject negative values and fill in defaults
    pub fn validate(self) -> Result<Self> {
        if self.max_size < 0 {
            return Err(Error::invalid("cache max size must not be negative"));
        }
        if self.prune_delay_secs < 0 {
            return Err(Error::invalid("cache prune delay must not be negative"));
        }
        Ok(Self {
            disabled: self.disabled,
            max_size: if self.max_size == 0 {
                DEFAULT_MAX_SIZE as i64
            } else {
                self.max_size
            },
            prune_delay_secs: if self.prune_delay_secs == 0 {
                DEFAULT_PRUNE_DELAY.as_secs() as i64
            } else {
                self.prune_delay_secs
            },
        })
    }

    /// Effective maximum size
    pub fn max_size(&self) -> usize {
        if self.max_size <= 0 {
            DEFAULT_MAX_SIZE
        } else {
            self.max_size as usize
        }
    }

    /// Effective prune interval
    pub fn prune_delay(&self) -> Duration {
        if self.prune_delay_secs <= 0 {
            DEFAULT_PRUNE_DELAY
        } else {
            Duration::from_secs(self.prune_delay_secs as u64)
        }
    }
}

/// The identifying record of a cached logger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedLogger {
    /// Logger id
    pub id: String,
    /// Owning manager
    pub manager_id: String,
    /// Last time the logger was used
    pub accessed: DateTime<Utc>,
}

/// Operations on a logging cache, local or remote
#[async_trait]
pub trait LoggingCache: Send + Sync + fmt::Debug {
    /// Open the sinks described by `options` under `id`
    async fn create(&self, id: &str, options: &OutputOptions) -> Result<CachedLogger>;

    /// Look up a logger. The returned record carries the previous access time.
    async fn get(&self, id: &str) -> Result<CachedLogger>;

    /// Forget a logger without closing its sinks
    async fn remove(&self, id: &str) -> Result<()>;

    /// Close a logger's sinks and forget it
    async fn close_and_remove(&self, id: &str) -> Result<()>;

    /// Close and forget every logger
    async fn clear(&self) -> Result<()>;

    /// Close and forget loggers last used at or before `before`
    async fn prune(&self, before: DateTime<Utc>) -> Result<()>;

    /// Number of loggers
    async fn len(&self) -> Result<usize>;

    /// Whether the cache holds no loggers
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Deliver an injected payload
    async fn send(&self, payload: LoggingPayload) -> Result<()>;
}

#[derive(Debug)]
struct CacheEntry {
    id: String,
    accessed: Mutex<DateTime<Utc>>,
    output: ResolvedOutput,
    sending: Mutex<()>,
}

impl CacheEntry {
    fn record(&self, manager_id: &str) -> CachedLogger {
        CachedLogger {
            id: self.id.clone(),
            manager_id: manager_id.to_string(),
            accessed: *lock(&self.accessed),
        }
    }

    fn touch(&self) {
        *lock(&self.accessed) = Utc::now();
    }

    fn close(&self) {
        if let Err(e) = self.output.close() {
            warn!(logger = %self.id, error = %e, "failed to close cached logger");
        }
    }
}

#[derive(Debug)]
struct CacheInner {
    manager_id: String,
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    options: RwLock<CacheOptions>,
    token: CancellationToken,
    pruner: Mutex<Option<CancellationToken>>,
}

impl CacheInner {
    /// Evict least recently used entries until the size limit holds
    fn evict_lru(&self) -> usize {
        let max = read(&self.options).max_size();
        let mut evicted = Vec::new();
        {
            let mut entries = write(&self.entries);
            while entries.len() > max {
                let oldest = entries
                    .values()
                    .min_by_key(|entry| *lock(&entry.accessed))
                    .map(|entry| entry.id.clone());
                match oldest.and_then(|id| entries.remove(&id)) {
                    Some(entry) => evicted.push(entry),
                    None => break,
                }
            }
        }
        for entry in &evicted {
            entry.close();
        }
        evicted.len()
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        if let Some(pruner) = lock(&self.pruner).take() {
            pruner.cancel();
        }
    }
}

/// In-process logging cache owned by a manager
#[derive(Debug, Clone)]
pub struct LocalLoggingCache {
    inner: Arc<CacheInner>,
}

impl LocalLoggingCache {
    /// Create a cache for `manager_id`. The pruner stops when `token` is cancelled.
    pub fn new(
        manager_id: impl Into<String>,
        options: CacheOptions,
        token: CancellationToken,
    ) -> Result<Self> {
        let options = options.validate()?;
        let cache = Self {
            inner: Arc::new(CacheInner {
                manager_id: manager_id.into(),
                entries: RwLock::new(HashMap::new()),
                options: RwLock::new(options),
                token,
                pruner: Mutex::new(None),
            }),
        };
        cache.restart_pruner();
        Ok(cache)
    }

    /// Current options
    pub fn options(&self) -> CacheOptions {
        *read(&self.inner.options)
    }

    /// Apply new options and restart the pruner with them
    pub fn configure(&self, options: CacheOptions) -> Result<()> {
        let options = options.validate()?;
        *write(&self.inner.options) = options;
        self.restart_pruner();
        debug!(manager = %self.inner.manager_id, ?options, "reconfigured logging cache");
        Ok(())
    }

    /// Run one eviction pass now; returns the number of evicted loggers
    pub fn evict_lru(&self) -> usize {
        self.inner.evict_lru()
    }

    fn restart_pruner(&self) {
        let options = self.options();
        let stop = self.inner.token.child_token();
        if let Some(previous) = lock(&self.inner.pruner).replace(stop.clone()) {
            previous.cancel();
        }
        if options.disabled {
            return;
        }

        let cache = Arc::downgrade(&self.inner);
        let delay = options.prune_delay();
        smol::spawn(async move {
            loop {
                let pass = AssertUnwindSafe(prune_loop(cache.clone(), stop.clone(), delay));
                match pass.catch_unwind().await {
                    Ok(()) => break,
                    Err(_) => error!("logging cache pruner panicked, restarting"),
                }
            }
        })
        .detach();
    }

    fn entry(&self, id: &str) -> Result<Arc<CacheEntry>> {
        read(&self.inner.entries)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("logger '{}'", id)))
    }

    fn take(&self, id: &str) -> Result<Arc<CacheEntry>> {
        write(&self.inner.entries)
            .remove(id)
            .ok_or_else(|| Error::not_found(format!("logger '{}'", id)))
    }

    /// The resolved sinks of a logger
    pub fn output(&self, id: &str) -> Result<ResolvedOutput> {
        let entry = self.entry(id)?;
        entry.touch();
        Ok(entry.output.clone())
    }
}

async fn prune_loop(cache: Weak<CacheInner>, stop: CancellationToken, delay: Duration) {
    loop {
        let stopped = {
            let timer = pin!(smol::Timer::after(delay));
            let cancelled = pin!(stop.cancelled());
            matches!(select(timer, cancelled).await, Either::Right(_))
        };
        if stopped {
            return;
        }
        let Some(inner) = cache.upgrade() else {
            return;
        };
        let evicted = inner.evict_lru();
        if evicted > 0 {
            debug!(manager = %inner.manager_id, evicted, "pruned logging cache");
        }
    }
}

#[async_trait]
impl LoggingCache for LocalLoggingCache {
    async fn create(&self, id: &str, options: &OutputOptions) -> Result<CachedLogger> {
        if id.is_empty() {
            return Err(Error::invalid("logger id must not be empty"));
        }
        if self.options().disabled {
            return Err(Error::not_supported("logging cache is disabled"));
        }
        if read(&self.inner.entries).contains_key(id) {
            return Err(Error::Conflict(format!("logger '{}' already exists", id)));
        }

        let output = options.resolve()?;
        let entry = Arc::new(CacheEntry {
            id: id.to_string(),
            accessed: Mutex::new(Utc::now()),
            output,
            sending: Mutex::new(()),
        });

        let mut entries = write(&self.inner.entries);
        if entries.contains_key(id) {
            drop(entries);
            entry.close();
            return Err(Error::Conflict(format!("logger '{}' already exists", id)));
        }
        entries.insert(id.to_string(), entry.clone());
        drop(entries);

        debug!(manager = %self.inner.manager_id, logger = id, "created cached logger");
        Ok(entry.record(&self.inner.manager_id))
    }

    async fn get(&self, id: &str) -> Result<CachedLogger> {
        let entry = self.entry(id)?;
        let record = entry.record(&self.inner.manager_id);
        entry.touch();
        Ok(record)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.take(id).map(|_| ())
    }

    async fn close_and_remove(&self, id: &str) -> Result<()> {
        let entry = self.take(id)?;
        entry.output.close()
    }

    async fn clear(&self) -> Result<()> {
        let drained: Vec<Arc<CacheEntry>> = write(&self.inner.entries).drain().map(|(_, e)| e).collect();
        let errors: Vec<Error> = drained
            .iter()
            .filter_map(|entry| entry.output.close().err())
            .collect();
        match Error::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<()> {
        let stale: Vec<Arc<CacheEntry>> = {
            let mut entries = write(&self.inner.entries);
            let ids: Vec<String> = entries
                .values()
                .filter(|entry| *lock(&entry.accessed) <= before)
                .map(|entry| entry.id.clone())
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };
        for entry in &stale {
            entry.close();
        }
        debug!(manager = %self.inner.manager_id, pruned = stale.len(), "pruned logging cache");
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(read(&self.inner.entries).len())
    }

    async fn send(&self, payload: LoggingPayload) -> Result<()> {
        payload.validate()?;
        let entry = self.entry(&payload.logger_id)?;
        let messages = payload.messages()?;
        let sink = entry.output.select(payload.prefer_send_to_error)?;

        let _order = lock(&entry.sending);
        entry.touch();
        for message in &messages {
            sink.send(message)?;
        }
        Ok(())
    }
}
