//! Standard stream attachment and the pumps that move bytes between a child
//! and the caller's readers and writers.

use futures::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// A source of bytes for a child's standard input
pub type InputStream = Box<dyn AsyncRead + Send + Unpin>;

/// A destination for a child's standard output or error
pub type OutputStream = Box<dyn AsyncWrite + Send + Unpin>;

/// The three standard streams as supplied by the caller. `None` means the
/// stream is detached.
#[derive(Default)]
pub struct StdioSlots {
    /// Standard input
    pub stdin: Option<InputStream>,
    /// Standard output
    pub stdout: Option<OutputStream>,
    /// Standard error
    pub stderr: Option<OutputStream>,
}

impl StdioSlots {
    /// Whether any stream is attached
    pub fn any_attached(&self) -> bool {
        self.stdin.is_some() || self.stdout.is_some() || self.stderr.is_some()
    }
}

impl fmt::Debug for StdioSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioSlots")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Copy `input` into the child's stdin, then close the write side so the
/// child sees end-of-file.
pub async fn pump_input<W>(mut input: InputStream, mut child_stdin: W) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let copied = futures::io::copy(&mut input, &mut child_stdin).await;
    let closed = child_stdin.close().await;
    let copied = copied?;
    closed?;
    Ok(copied)
}

/// Copy a child's output into `output` until the child closes its side,
/// then close `output`.
pub async fn pump_output<R>(child_output: R, mut output: OutputStream) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let copied = futures::io::copy(child_output, &mut output).await;
    let closed = output.close().await;
    let copied = copied?;
    closed?;
    Ok(copied)
}

/// An in-memory writer whose contents can be read from any clone.
///
/// Concurrent writers share one buffer; each `write` call lands atomically.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the bytes written so far
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().map(|buf| buf.clone()).unwrap_or_default()
    }

    /// Snapshot decoded as UTF-8, replacing invalid sequences
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Box a clone of this buffer as an [`OutputStream`]
    pub fn output_stream(&self) -> OutputStream {
        Box::new(self.clone())
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.inner.lock() {
            Ok(mut inner) => {
                inner.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            Err(_) => Poll::Ready(Err(io::Error::other("buffer lock poisoned"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pump_input_copies_everything() {
        futures::executor::block_on(async {
            let sink = SharedBuffer::new();
            let input: InputStream = Box::new(futures::io::Cursor::new(b"echo foobar\n".to_vec()));

            let copied = pump_input(input, sink.clone()).await.unwrap();

            assert_eq!(copied, 12);
            assert_eq!(sink.to_string_lossy(), "echo foobar\n");
        });
    }

    #[test]
    fn test_pump_output_into_shared_buffer() {
        futures::executor::block_on(async {
            let sink = SharedBuffer::new();
            let source = futures::io::Cursor::new(b"line one\nline two\n".to_vec());

            pump_output(source, sink.output_stream()).await.unwrap();

            assert_eq!(sink.to_string_lossy(), "line one\nline two\n");
        });
    }

    #[test]
    fn test_slots_report_attachment() {
        let mut slots = StdioSlots::default();
        assert!(!slots.any_attached());
        slots.stderr = Some(SharedBuffer::new().output_stream());
        assert!(slots.any_attached());
        assert_eq!(
            format!("{:?}", slots),
            "StdioSlots { stdin: false, stdout: false, stderr: true }"
        );
    }
}
