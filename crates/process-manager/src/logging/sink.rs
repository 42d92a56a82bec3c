//! Log sinks: where process output and injected messages end up

use async_channel::{Receiver, Sender};
use futures::io::AsyncWriteExt;
use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, trace, warn};

use super::message::{LogMessage, Priority};
use crate::error::{Error, Result};
use crate::sync::lock;

/// A destination for log messages.
///
/// Sends are synchronous and must preserve order for a single caller.
pub trait LogSink: Send + Sync + fmt::Debug {
    /// Deliver one message
    fn send(&self, message: &LogMessage) -> Result<()>;

    /// Flush buffered output
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Release resources; later sends may fail
    fn close(&self) -> Result<()> {
        self.flush()
    }

    /// The in-memory view of this sink, if it keeps one
    fn in_memory(&self) -> Option<&InMemorySink> {
        None
    }
}

/// Forwards messages as `tracing` events with target `process_output`
#[derive(Debug, Default)]
pub struct TracingSink {
    name: Option<String>,
}

impl TracingSink {
    /// A sink whose events carry `name` as the `logger` field
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

impl LogSink for TracingSink {
    fn send(&self, message: &LogMessage) -> Result<()> {
        let logger = self.name.as_deref().unwrap_or("default");
        let line = message.render();
        match message.priority {
            Priority::Trace => trace!(target: "process_output", logger, "{}", line),
            Priority::Debug => debug!(target: "process_output", logger, "{}", line),
            Priority::Info | Priority::Notice => info!(target: "process_output", logger, "{}", line),
            Priority::Warning => warn!(target: "process_output", logger, "{}", line),
            _ => error!(target: "process_output", logger, "{}", line),
        }
        Ok(())
    }
}

/// Writes to this process's own stdout, or stderr for error priorities
#[derive(Debug, Default)]
pub struct InheritSink;

impl LogSink for InheritSink {
    fn send(&self, message: &LogMessage) -> Result<()> {
        let line = message.render();
        if message.priority >= Priority::Error {
            writeln!(std::io::stderr().lock(), "{}", line)?;
        } else {
            writeln!(std::io::stdout().lock(), "{}", line)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        std::io::stdout().flush()?;
        std::io::stderr().flush()?;
        Ok(())
    }
}

/// Appends one line per message to a file.
///
/// Sends only queue the line; a background task owns the file and writes
/// lines in arrival order, flushing whenever the queue runs dry.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    lines: Sender<String>,
    finished: Receiver<()>,
}

impl FileSink {
    /// Open (creating if needed) `path` for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let (lines, queue) = async_channel::unbounded();
        let (done, finished) = async_channel::bounded(1);
        smol::spawn(write_lines(path.clone(), async_fs::File::from(file), queue, done)).detach();
        Ok(Self { path, lines, finished })
    }

    /// Path being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves once the sink is closed and every queued line is on disk
    pub async fn closed(&self) {
        let _ = self.finished.recv().await;
    }
}

async fn write_lines(path: PathBuf, mut file: async_fs::File, queue: Receiver<String>, _done: Sender<()>) {
    while let Ok(line) = queue.recv().await {
        if let Err(e) = file.write_all(line.as_bytes()).await {
            warn!(path = %path.display(), error = %e, "file sink write failed");
            queue.close();
            break;
        }
        if queue.is_empty() {
            if let Err(e) = file.flush().await {
                warn!(path = %path.display(), error = %e, "file sink flush failed");
            }
        }
    }
    if let Err(e) = file.flush().await {
        warn!(path = %path.display(), error = %e, "file sink flush failed");
    }
}

impl LogSink for FileSink {
    fn send(&self, message: &LogMessage) -> Result<()> {
        self.lines
            .try_send(format!("{}\n", message.render()))
            .map_err(|_| Error::Io(std::io::Error::other("file sink is closed")))
    }

    fn close(&self) -> Result<()> {
        self.lines.close();
        Ok(())
    }
}

/// Keeps the most recent lines in memory for later retrieval.
///
/// Lines are held until drained; when full the oldest line is dropped.
#[derive(Debug)]
pub struct InMemorySink {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl InMemorySink {
    /// A sink retaining at most `capacity` lines
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid("in-memory sink capacity must be positive"));
        }
        Ok(Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        })
    }

    /// Maximum number of retained lines
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove and return up to `count` of the oldest unread lines
    pub fn drain(&self, count: usize) -> Vec<String> {
        let mut lines = lock(&self.lines);
        let n = count.min(lines.len());
        lines.drain(..n).collect()
    }

    /// Copy of the unread lines
    pub fn snapshot(&self) -> Vec<String> {
        lock(&self.lines).iter().cloned().collect()
    }

    /// Number of unread lines
    pub fn len(&self) -> usize {
        lock(&self.lines).len()
    }

    /// Whether every line has been read
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for InMemorySink {
    fn send(&self, message: &LogMessage) -> Result<()> {
        let mut lines = lock(&self.lines);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(message.render());
        Ok(())
    }

    fn in_memory(&self) -> Option<&InMemorySink> {
        Some(self)
    }
}

/// Fans every message out to several sinks
#[derive(Debug, Clone)]
pub struct MultiSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl MultiSink {
    /// Combine `sinks`
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }

    fn each<F>(&self, mut apply: F) -> Result<()>
    where
        F: FnMut(&dyn LogSink) -> Result<()>,
    {
        let errors: Vec<Error> = self
            .sinks
            .iter()
            .filter_map(|sink| apply(sink.as_ref()).err())
            .collect();
        match Error::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl LogSink for MultiSink {
    fn send(&self, message: &LogMessage) -> Result<()> {
        self.each(|sink| sink.send(message))
    }

    fn flush(&self) -> Result<()> {
        self.each(|sink| sink.flush())
    }

    fn close(&self) -> Result<()> {
        self.each(|sink| sink.close())
    }
}
