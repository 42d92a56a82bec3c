//! Adapts a child's byte stream into line messages

use futures::io::AsyncWrite;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::warn;

use super::message::{LogMessage, Priority};
use super::sink::LogSink;

/// An [`AsyncWrite`] that sends one message per complete line.
///
/// A trailing partial line is sent when the writer is closed. Sink failures
/// are logged and the bytes dropped so a broken sink never stalls the child.
#[derive(Debug)]
pub struct LineWriter {
    sink: Arc<dyn LogSink>,
    priority: Priority,
    pending: Vec<u8>,
    closed: bool,
}

impl LineWriter {
    /// Write lines to `sink` at `priority`
    pub fn new(sink: Arc<dyn LogSink>, priority: Priority) -> Self {
        Self {
            sink,
            priority,
            pending: Vec::new(),
            closed: false,
        }
    }

    fn emit(&self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let message = LogMessage::text(self.priority, String::from_utf8_lossy(line));
        if let Err(e) = self.sink.send(&message) {
            warn!(error = %e, "dropping output line");
        }
    }

    fn emit_complete_lines(&mut self) {
        let Some(last) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return;
        };
        let rest = self.pending.split_off(last + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        for line in complete[..complete.len() - 1].split(|b| *b == b'\n') {
            self.emit(line);
        }
    }

    fn finish(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line);
        }
        if let Err(e) = self.sink.flush() {
            warn!(error = %e, "failed to flush output sink");
        }
    }
}

impl AsyncWrite for LineWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "line writer closed")));
        }
        this.pending.extend_from_slice(buf);
        this.emit_complete_lines();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().finish();
        Poll::Ready(Ok(()))
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::sink::InMemorySink;
    use futures::io::AsyncWriteExt;

    #[test]
    fn test_splits_lines_and_flushes_tail() {
        futures::executor::block_on(async {
            let sink = Arc::new(InMemorySink::new(10).unwrap());
            let mut writer = LineWriter::new(sink.clone(), Priority::Info);

            writer.write_all(b"first\nsec").await.unwrap();
            writer.write_all(b"ond\r\nthird").await.unwrap();
            assert_eq!(sink.snapshot(), vec!["first", "second"]);

            writer.close().await.unwrap();
            assert_eq!(sink.snapshot(), vec!["first", "second", "third"]);
            assert!(writer.write_all(b"late").await.is_err());
        });
    }

    #[test]
    fn test_drop_flushes_partial_line() {
        let sink = Arc::new(InMemorySink::new(10).unwrap());
        {
            let mut writer = LineWriter::new(sink.clone(), Priority::Error);
            futures::executor::block_on(writer.write_all(b"no newline")).unwrap();
        }
        assert_eq!(sink.snapshot(), vec!["no newline"]);
    }
}
