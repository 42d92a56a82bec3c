//! Local process execution backend

use async_process::{Child, Stdio};
use async_trait::async_trait;
use futures::future::{Either, select};
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::executor::{ExitState, Executor, Lifecycle, SignalInfo, lock, read, write};
use crate::signal::{Platform, Signal};
use crate::stdio::{InputStream, OutputStream, StdioSlots, pump_input, pump_output};

/// Runs a command as a child of this process.
///
/// The child is tied to `token`: cancelling it while someone waits kills the
/// child and the wait reports [`Error::Cancelled`] with a SIGKILL exit.
#[derive(Debug)]
pub struct LocalExecutor {
    command: Mutex<Command>,
    stdio: Mutex<StdioSlots>,
    token: CancellationToken,
    lifecycle: RwLock<Lifecycle>,
    child: futures::lock::Mutex<Option<Child>>,
    pid: AtomicI32,
    output_pumps: Mutex<Vec<smol::Task<()>>>,
    input_pump: Mutex<Option<smol::Task<()>>>,
}

impl LocalExecutor {
    /// Create an executor for `command` whose lifetime is bound to `token`
    pub fn new(command: Command, token: CancellationToken) -> Self {
        Self {
            command: Mutex::new(command),
            stdio: Mutex::new(StdioSlots::default()),
            token,
            lifecycle: RwLock::new(Lifecycle::default()),
            child: futures::lock::Mutex::new(None),
            pid: AtomicI32::new(-1),
            output_pumps: Mutex::new(Vec::new()),
            input_pump: Mutex::new(None),
        }
    }

    fn configure<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Command, &mut StdioSlots),
    {
        read(&self.lifecycle).ensure_configurable()?;
        apply(&mut lock(&self.command), &mut lock(&self.stdio));
        Ok(())
    }

    fn spawn(&self) -> Result<Child> {
        let command = lock(&self.command).clone();
        let slots = std::mem::take(&mut *lock(&self.stdio));

        let mut cmd = command.prepare();
        cmd.kill_on_drop(true);
        cmd.stdin(piped_if(slots.stdin.is_some()));
        cmd.stdout(piped_if(slots.stdout.is_some()));
        cmd.stderr(piped_if(slots.stderr.is_some()));

        let mut child = cmd.spawn().map_err(|e| {
            Error::spawn_failed(format!(
                "{}: {}",
                command.get_program().to_string_lossy(),
                e
            ))
        })?;

        if let (Some(input), Some(stdin)) = (slots.stdin, child.stdin.take()) {
            *lock(&self.input_pump) = Some(spawn_input_pump(input, stdin));
        }

        let mut pumps = Vec::new();
        if let (Some(output), Some(stdout)) = (slots.stdout, child.stdout.take()) {
            pumps.push(spawn_output_pump("stdout", stdout, output));
        }
        if let (Some(output), Some(stderr)) = (slots.stderr, child.stderr.take()) {
            pumps.push(spawn_output_pump("stderr", stderr, output));
        }
        *lock(&self.output_pumps) = pumps;

        Ok(child)
    }

    /// Record the exit. With `drain` the output pumps run to completion so
    /// every byte reaches the caller's writers before `wait` returns.
    async fn finish(&self, exit: ExitState, drain: bool) {
        let pumps = std::mem::take(&mut *lock(&self.output_pumps));
        if drain {
            for pump in pumps {
                pump.await;
            }
        }
        lock(&self.input_pump).take();
        write(&self.lifecycle).exit = Some(exit);
    }
}

fn piped_if(attached: bool) -> Stdio {
    if attached { Stdio::piped() } else { Stdio::null() }
}

fn spawn_input_pump(input: InputStream, stdin: async_process::ChildStdin) -> smol::Task<()> {
    smol::spawn(async move {
        if let Err(e) = pump_input(input, stdin).await {
            // The child may exit without reading all of its input
            debug!(error = %e, "stdin pump stopped");
        }
    })
}

fn spawn_output_pump<R>(stream: &'static str, source: R, output: OutputStream) -> smol::Task<()>
where
    R: futures::io::AsyncRead + Unpin + Send + 'static,
{
    smol::spawn(async move {
        if let Err(e) = pump_output(source, output).await {
            warn!(stream, error = %e, "output pump failed");
        }
    })
}

#[async_trait]
impl Executor for LocalExecutor {
    fn args(&self) -> Vec<String> {
        lock(&self.command).argv()
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
        let mut slot = self.child.lock().await;
        read(&self.lifecycle).ensure_configurable()?;
        if self.token.is_cancelled() {
            return Err(Error::cancelled("context cancelled before start"));
        }

        let child = self.spawn()?;
        let pid = child.id() as i32;
        self.pid.store(pid, Ordering::SeqCst);
        *slot = Some(child);
        write(&self.lifecycle).started = true;

        debug!(pid, args = ?self.args(), "started local process");
        Ok(())
    }

    async fn wait(&self) -> Result<i32> {
        {
            let lifecycle = read(&self.lifecycle);
            if !lifecycle.started {
                return Err(Error::NotStarted);
            }
            if let Some(exit) = lifecycle.exit {
                return Ok(exit.code);
            }
        }

        let mut slot = self.child.lock().await;
        // Another waiter may have reaped the child while we queued
        if let Some(exit) = read(&self.lifecycle).exit {
            return Ok(exit.code);
        }
        let child = slot.as_mut().ok_or(Error::NotStarted)?;

        let status = {
            let status = pin!(child.status());
            let cancelled = pin!(self.token.cancelled());
            match select(status, cancelled).await {
                Either::Left((status, _)) => Some(status),
                Either::Right(_) => None,
            }
        };

        match status {
            Some(status) => {
                let exit = ExitState::from(status?);
                self.finish(exit, true).await;
                debug!(pid = self.pid(), code = exit.code, "local process exited");
                Ok(exit.code)
            }
            None => {
                if let Err(e) = child.kill() {
                    debug!(error = %e, "kill after cancellation failed");
                }
                let reaped = child.status().await;
                let exit = if cfg!(unix) {
                    ExitState::signaled(Signal::KILL)
                } else {
                    reaped.map(ExitState::from).unwrap_or(ExitState::code(1))
                };
                self.finish(exit, false).await;
                debug!(pid = self.pid(), "local process killed by cancellation");
                Err(Error::cancelled("context cancelled while waiting for local process"))
            }
        }
    }

    async fn signal(&self, signal: Signal) -> Result<()> {
        read(&self.lifecycle).ensure_signalable()?;
        let group = lock(&self.command).is_process_group();
        let pid = self.pid();

        send_signal(pid, signal, group).await?;
        debug!(pid, %signal, group, "signalled local process");
        Ok(())
    }

    fn pid(&self) -> i32 {
        self.pid.load(Ordering::SeqCst)
    }

    fn exit_code(&self) -> i32 {
        read(&self.lifecycle).exit_code()
    }

    fn success(&self) -> bool {
        read(&self.lifecycle).success()
    }

    fn signal_info(&self) -> SignalInfo {
        read(&self.lifecycle).signal_info()
    }

    async fn close(&self) {
        let running = {
            let mut lifecycle = write(&self.lifecycle);
            if lifecycle.closed {
                return;
            }
            lifecycle.closed = true;
            lifecycle.started && lifecycle.exit.is_none()
        };

        lock(&self.input_pump).take();
        if running {
            let group = lock(&self.command).is_process_group();
            if let Err(e) = send_signal(self.pid(), Signal::KILL, group).await {
                warn!(pid = self.pid(), error = %e, "failed to kill local process on close");
            }
        }
    }
}

#[cfg(unix)]
async fn send_signal(pid: i32, signal: Signal, group: bool) -> Result<()> {
    use nix::sys::signal::{self as nix_signal, Signal as NixSignal};
    use nix::unistd::Pid;

    let nix_sig = NixSignal::try_from(signal.0).map_err(|_| Error::UnknownSignal {
        signal: signal.0,
        platform: Platform::current().to_string(),
    })?;
    let pid = Pid::from_raw(pid);

    let result = if group {
        nix_signal::killpg(pid, nix_sig)
    } else {
        nix_signal::kill(pid, nix_sig)
    };
    result.map_err(|e| Error::signal_failed(signal.0, e.to_string()))
}

#[cfg(not(unix))]
async fn send_signal(pid: i32, signal: Signal, group: bool) -> Result<()> {
    if signal != Signal::KILL && signal != Signal::TERM {
        return Err(Error::UnknownSignal {
            signal: signal.0,
            platform: Platform::current().to_string(),
        });
    }

    let mut cmd = async_process::Command::new("taskkill");
    cmd.arg("/F");
    if group {
        cmd.arg("/T");
    }
    cmd.arg("/PID").arg(pid.to_string());

    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(Error::signal_failed(
            signal.0,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_rejected_after_start() {
        futures::executor::block_on(async {
            let executor = LocalExecutor::new(Command::new("true"), CancellationToken::new());
            executor.set_dir(std::env::temp_dir()).unwrap();
            executor.start().await.unwrap();

            assert!(matches!(
                executor.set_dir(std::env::temp_dir()),
                Err(Error::AlreadyStarted)
            ));
            assert!(matches!(executor.start().await, Err(Error::AlreadyStarted)));
            executor.wait().await.unwrap();
        });
    }

    #[test]
    fn test_defaults_before_start() {
        let executor = LocalExecutor::new(Command::new("true"), CancellationToken::new());
        assert_eq!(executor.pid(), -1);
        assert_eq!(executor.exit_code(), -1);
        assert!(!executor.success());
        assert_eq!(executor.signal_info(), SignalInfo::default());
        assert_eq!(executor.args(), vec!["true"]);
    }

    #[test]
    fn test_start_after_cancel_fails() {
        futures::executor::block_on(async {
            let token = CancellationToken::new();
            token.cancel();
            let executor = LocalExecutor::new(Command::new("true"), token);
            assert!(matches!(executor.start().await, Err(Error::Cancelled { .. })));
        });
    }
}
