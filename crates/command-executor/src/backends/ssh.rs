//! SSH remote execution backend using the ssh CLI
//!
//! The remote command runs under `sh -c` after echoing the shell's pid,
//! which is then replaced by the command through `exec`. That first line of
//! output is consumed here and used to deliver signals with a second ssh
//! invocation, since the ssh client cannot forward them itself.

use async_trait::async_trait;
use futures::channel::oneshot;
use futures::future::{Either, FutureExt, Shared, select};
use futures::io::AsyncWrite;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::pin::{Pin, pin};
use std::sync::{Mutex, OnceLock};
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backends::local::LocalExecutor;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::executor::{ExitState, Executor, SignalInfo, lock};
use crate::signal::{Signal, ssh_signal_name};
use crate::stdio::{InputStream, OutputStream, StdioSlots};

/// SSH connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    /// Target host (hostname or IP)
    pub host: String,
    /// SSH user (optional, uses system default if not specified)
    #[serde(default)]
    pub user: Option<String>,
    /// SSH port (optional, defaults to 22)
    #[serde(default)]
    pub port: Option<u16>,
    /// Path to identity file (private key)
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Additional SSH arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl SshConfig {
    /// Create a new SSH configuration for the given host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity_file: None,
            extra_args: Vec::new(),
        }
    }

    /// Set the SSH user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the identity file (private key)
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Add extra SSH arguments
    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Get the host string (user@host if user is specified)
    fn host_string(&self) -> String {
        if let Some(user) = &self.user {
            format!("{}@{}", user, self.host)
        } else {
            self.host.clone()
        }
    }

    /// An `ssh` invocation running `remote` on the configured host
    fn command(&self, remote: String) -> Command {
        let mut ssh_cmd = Command::new("ssh");
        // Never prompt; a missing key must fail the spawn instead of hanging
        ssh_cmd.arg("-o").arg("BatchMode=yes");

        if let Some(port) = self.port {
            ssh_cmd.arg("-p").arg(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            ssh_cmd.arg("-i").arg(identity);
        }
        for arg in &self.extra_args {
            ssh_cmd.arg(arg);
        }

        ssh_cmd.arg(self.host_string()).arg(remote);
        ssh_cmd
    }
}

type PidReceiver = Shared<oneshot::Receiver<i32>>;

/// Runs a command on a remote host over ssh
#[derive(Debug)]
pub struct SshExecutor {
    config: SshConfig,
    remote: Mutex<Command>,
    stdio: Mutex<StdioSlots>,
    token: CancellationToken,
    inner: OnceLock<LocalExecutor>,
    remote_pid: Mutex<Option<PidReceiver>>,
    last_signal: Mutex<Option<Signal>>,
}

impl SshExecutor {
    /// Create an executor that runs `command` on the host in `config`
    pub fn new(config: SshConfig, command: Command, token: CancellationToken) -> Self {
        Self {
            config,
            remote: Mutex::new(command),
            stdio: Mutex::new(StdioSlots::default()),
            token,
            inner: OnceLock::new(),
            remote_pid: Mutex::new(None),
            last_signal: Mutex::new(None),
        }
    }

    fn configure<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Command, &mut StdioSlots),
    {
        if self.inner.get().is_some() {
            return Err(Error::AlreadyStarted);
        }
        apply(&mut lock(&self.remote), &mut lock(&self.stdio));
        Ok(())
    }

    fn inner(&self) -> Result<&LocalExecutor> {
        self.inner.get().ok_or(Error::NotStarted)
    }

    /// Exit state as seen through ssh. The client exits with 255 when the
    /// remote command dies from a signal; shells report 128+n.
    fn exit_state(&self) -> Option<ExitState> {
        let inner = self.inner.get()?;
        let code = inner.exit_code();
        if code < 0 {
            return None;
        }
        let local = inner.signal_info();
        if local.signaled {
            return Some(ExitState::signaled(Signal(local.signal)));
        }
        match *lock(&self.last_signal) {
            Some(signal) if code == 255 || code == 128 + signal.0 => Some(ExitState {
                code,
                signal: Some(signal),
            }),
            _ => Some(ExitState::code(code)),
        }
    }

    async fn remote_pid(&self) -> Result<i32> {
        let receiver = lock(&self.remote_pid).clone().ok_or(Error::NotStarted)?;
        let pid = {
            let receiver = pin!(receiver);
            let cancelled = pin!(self.token.cancelled());
            match select(receiver, cancelled).await {
                Either::Left((pid, _)) => pid,
                Either::Right(_) => return Err(Error::cancelled("context cancelled")),
            }
        };
        pid.map_err(|_| Error::AlreadyExited)
    }
}

#[async_trait]
impl Executor for SshExecutor {
    fn args(&self) -> Vec<String> {
        lock(&self.remote).argv()
    }

    fn set_env(&self, vars: HashMap<String, String>, inherit: bool) -> Result<()> {
        self.configure(|command, _| {
            command.replace_env(vars, inherit);
        })
    }

    fn set_dir(&self, dir: PathBuf) -> Result<()> {
        self.configure(|command, _| {
            command.current_dir(dir);
        })
    }

    fn set_stdin(&self, stdin: Option<InputStream>) -> Result<()> {
        self.configure(|_, slots| slots.stdin = stdin)
    }

    fn set_stdout(&self, stdout: Option<OutputStream>) -> Result<()> {
        self.configure(|_, slots| slots.stdout = stdout)
    }

    fn set_stderr(&self, stderr: Option<OutputStream>) -> Result<()> {
        self.configure(|_, slots| slots.stderr = stderr)
    }

    async fn start(&self) -> Result<()> {
        let remote = format_remote_command(&lock(&self.remote));
        let slots = std::mem::take(&mut *lock(&self.stdio));

        let executor = LocalExecutor::new(self.config.command(remote), self.token.child_token());
        let (pid_tx, pid_rx) = oneshot::channel();
        executor.set_stdin(slots.stdin)?;
        executor.set_stdout(Some(Box::new(PidLineWriter::new(pid_tx, slots.stdout))))?;
        executor.set_stderr(slots.stderr)?;

        if self.inner.set(executor).is_err() {
            return Err(Error::AlreadyStarted);
        }
        *lock(&self.remote_pid) = Some(pid_rx.shared());

        self.inner()?
            .start()
            .await
            .map_err(|e| e.with_layer_context("SSH"))?;
        debug!(host = %self.config.host, "started remote command");
        Ok(())
    }

    async fn wait(&self) -> Result<i32> {
        self.inner()?.wait().await?;
        Ok(self.exit_code())
    }

    async fn signal(&self, signal: Signal) -> Result<()> {
        let inner = self.inner()?;
        if inner.exit_code() >= 0 {
            return Err(Error::AlreadyExited);
        }
        let name = ssh_signal_name(signal).ok_or_else(|| Error::UnknownSignal {
            signal: signal.0,
            platform: "ssh".to_string(),
        })?;
        let pid = self.remote_pid().await?;

        let kill = self
            .config
            .command(format!("kill -s {} {}", name, pid))
            .prepare()
            .output()
            .await?;
        if !kill.status.success() {
            return Err(Error::signal_failed(
                signal.0,
                String::from_utf8_lossy(&kill.stderr).trim().to_string(),
            ));
        }

        *lock(&self.last_signal) = Some(signal);
        debug!(host = %self.config.host, pid, signal = name, "signalled remote command");
        Ok(())
    }

    fn pid(&self) -> i32 {
        -1
    }

    fn exit_code(&self) -> i32 {
        self.exit_state().map(|exit| exit.code).unwrap_or(-1)
    }

    fn success(&self) -> bool {
        self.exit_state().map(|exit| exit.success()).unwrap_or(false)
    }

    fn signal_info(&self) -> SignalInfo {
        self.exit_state()
            .map(|exit| exit.signal_info())
            .unwrap_or_default()
    }

    async fn close(&self) {
        if let Some(inner) = self.inner.get() {
            if inner.exit_code() < 0 {
                if let Err(e) = self.signal(Signal::KILL).await {
                    warn!(host = %self.config.host, error = %e, "failed to kill remote command on close");
                }
            }
            inner.close().await;
        }
    }
}

/// Format a command for remote execution via SSH.
///
/// The shell prints its pid first, then `exec`s into the command so the pid
/// stays valid for signalling.
fn format_remote_command(cmd: &Command) -> String {
    let mut parts = vec!["echo $$;".to_string()];

    if let Some(dir) = cmd.get_current_dir() {
        parts.push(format!(
            "cd {} &&",
            shell_escape(dir.to_string_lossy().to_string())
        ));
    }

    parts.push("exec".to_string());
    let envs = cmd.env_pairs();
    if cmd.is_env_cleared() || !envs.is_empty() {
        parts.push("env".to_string());
        if cmd.is_env_cleared() {
            parts.push("-i".to_string());
        }
        parts.extend(envs.into_iter().map(shell_escape));
    }

    parts.extend(cmd.argv().into_iter().map(shell_escape));
    parts.join(" ")
}

/// Escape a string for safe inclusion in a shell command
fn shell_escape(s: String) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.contains(|c: char| c.is_whitespace() || "\"'\\$`!*?<>|&;()[]{}#~".contains(c)) {
        // Use single quotes and escape any single quotes in the string
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    } else {
        s
    }
}

/// Strips the leading pid line from the remote shell's stdout and forwards
/// everything after it.
struct PidLineWriter {
    pid_tx: Option<oneshot::Sender<i32>>,
    line: Vec<u8>,
    pending: Vec<u8>,
    inner: Option<OutputStream>,
}

impl PidLineWriter {
    fn new(pid_tx: oneshot::Sender<i32>, inner: Option<OutputStream>) -> Self {
        Self {
            pid_tx: Some(pid_tx),
            line: Vec::new(),
            pending: Vec::new(),
            inner,
        }
    }

    fn poll_drain_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            let Some(inner) = self.inner.as_mut() else {
                self.pending.clear();
                break;
            };
            match Pin::new(inner).poll_write(cx, &self.pending) {
                Poll::Ready(Ok(0)) => return Poll::Ready(Err(io::ErrorKind::WriteZero.into())),
                Poll::Ready(Ok(n)) => {
                    self.pending.drain(..n);
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for PidLineWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(tx) = this.pid_tx.take() {
            match buf.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    this.line.extend_from_slice(&buf[..end]);
                    let pid = String::from_utf8_lossy(&this.line).trim().parse::<i32>();
                    match pid {
                        Ok(pid) => {
                            let _ = tx.send(pid);
                        }
                        Err(_) => warn!(line = %String::from_utf8_lossy(&this.line), "remote shell did not report a pid"),
                    }
                    this.pending.extend_from_slice(&buf[end + 1..]);
                }
                None => {
                    this.line.extend_from_slice(buf);
                    this.pid_tx = Some(tx);
                }
            }
            // The bytes are buffered either way; delivery continues on the next call
            return Poll::Ready(Ok(buf.len()));
        }

        match this.poll_drain_pending(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        }
        match this.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_write(cx, buf),
            None => Poll::Ready(Ok(buf.len())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_drain_pending(cx) {
            Poll::Ready(Ok(())) => {}
            other => return other,
        }
        match this.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_drain_pending(cx) {
            Poll::Ready(Ok(())) => {}
            other => return other,
        }
        match this.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_close(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdio::SharedBuffer;
    use futures::io::AsyncWriteExt;

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("simple".to_string()), "simple");
        assert_eq!(shell_escape("with space".to_string()), "'with space'");
        assert_eq!(shell_escape("with'quote".to_string()), "'with'\"'\"'quote'");
        assert_eq!(shell_escape("$variable".to_string()), "'$variable'");
        assert_eq!(shell_escape("path/to/file".to_string()), "path/to/file");
        assert_eq!(shell_escape(String::new()), "''");
    }

    #[test]
    fn test_ssh_config() {
        let config = SshConfig::new("example.com")
            .with_user("alice")
            .with_port(2222)
            .with_identity_file("/home/alice/.ssh/id_rsa");

        assert_eq!(config.host_string(), "alice@example.com");
        assert_eq!(config.port, Some(2222));
        assert_eq!(
            config.command("true".to_string()).argv(),
            vec![
                "ssh",
                "-o",
                "BatchMode=yes",
                "-p",
                "2222",
                "-i",
                "/home/alice/.ssh/id_rsa",
                "alice@example.com",
                "true",
            ]
        );
    }

    #[test]
    fn test_remote_command_format() {
        let cmd = Command::builder("sh")
            .args(["-c", "echo $HOME"])
            .current_dir("/srv/app")
            .build();
        assert_eq!(
            format_remote_command(&cmd),
            "echo $$; cd /srv/app && exec sh -c 'echo $HOME'"
        );

        let cmd = Command::builder("printenv")
            .env("A", "1 2")
            .env_clear()
            .build();
        assert_eq!(format_remote_command(&cmd), "echo $$; exec env -i 'A=1 2' printenv");
    }

    #[test]
    fn test_pid_line_is_stripped() {
        futures::executor::block_on(async {
            let sink = SharedBuffer::new();
            let (tx, rx) = oneshot::channel();
            let mut writer = PidLineWriter::new(tx, Some(sink.output_stream()));

            writer.write_all(b"42").await.unwrap();
            writer.write_all(b"17\nhello\n").await.unwrap();
            writer.write_all(b"world\n").await.unwrap();
            writer.close().await.unwrap();

            assert_eq!(rx.await.unwrap(), 4217);
            assert_eq!(sink.to_string_lossy(), "hello\nworld\n");
        });
    }

    #[test]
    fn test_signal_requires_start() {
        futures::executor::block_on(async {
            let executor = SshExecutor::new(
                SshConfig::new("localhost"),
                Command::new("true"),
                CancellationToken::new(),
            );
            assert_eq!(executor.pid(), -1);
            assert!(matches!(executor.signal(Signal::TERM).await, Err(Error::NotStarted)));
            assert!(matches!(executor.wait().await, Err(Error::NotStarted)));
        });
    }
}
