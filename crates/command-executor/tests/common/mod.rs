//! Common test utilities

#![allow(dead_code)]

use futures::channel::mpsc;
use futures::io::{AsyncRead, AsyncWrite};
use futures::stream::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Write half of an in-memory pipe
pub struct PipeWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// Read half of an in-memory pipe; reaches EOF once the writer is closed or dropped
pub struct PipeReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    chunk: Vec<u8>,
    offset: usize,
}

/// An in-memory pipe pair, so two writers never race on one buffer
pub fn pipe() -> (PipeReader, PipeWriter) {
    let (tx, rx) = mpsc::unbounded();
    (
        PipeReader {
            rx,
            chunk: Vec::new(),
            offset: 0,
        },
        PipeWriter { tx },
    )
}

impl AsyncWrite for PipeWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.tx.unbounded_send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx.close_channel();
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        loop {
            if self.offset < self.chunk.len() {
                let n = buf.len().min(self.chunk.len() - self.offset);
                let start = self.offset;
                buf[..n].copy_from_slice(&self.chunk[start..start + n]);
                self.offset += n;
                return Poll::Ready(Ok(n));
            }
            match Pin::new(&mut self.rx).poll_next(cx) {
                Poll::Ready(Some(chunk)) => {
                    self.chunk = chunk;
                    self.offset = 0;
                }
                Poll::Ready(None) => return Poll::Ready(Ok(0)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Whether a docker daemon answers
pub fn docker_available() -> bool {
    std::process::Command::new("docker")
        .arg("info")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(feature = "ssh")]
pub mod ssh {
    use command_executor::backends::SshConfig;

    /// SSH configuration for the test host, taken from `SSH_TEST_HOST`,
    /// `SSH_TEST_USER` and `SSH_TEST_PORT`
    pub fn ssh_config() -> Option<SshConfig> {
        let host = std::env::var("SSH_TEST_HOST").ok()?;
        let mut config = SshConfig::new(host)
            .with_extra_arg("-o")
            .with_extra_arg("StrictHostKeyChecking=no")
            .with_extra_arg("-o")
            .with_extra_arg("UserKnownHostsFile=/dev/null")
            .with_extra_arg("-o")
            .with_extra_arg("ConnectTimeout=5");

        if let Ok(user) = std::env::var("SSH_TEST_USER") {
            config = config.with_user(user);
        }
        if let Some(port) = std::env::var("SSH_TEST_PORT").ok().and_then(|p| p.parse().ok()) {
            config = config.with_port(port);
        }
        Some(config)
    }
}
