//! Docker container execution backend using the docker CLI
//!
//! Each executor materialises a fresh container with `docker create`, starts
//! it (attached when any standard stream is supplied), and waits for it with
//! `docker wait`, which reports the not-running transition and the final
//! status code in one answer. The CLI demultiplexes the container's combined
//! output stream into its own stdout and stderr, which are pumped into the
//! caller's writers.

use async_process::{Child, Stdio};
use async_trait::async_trait;
use futures::future::{Either, select};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::executor::{ExitState, Executor, Lifecycle, SignalInfo, lock, read, write};
use crate::signal::{Platform, Signal, signal_name};
use crate::stdio::{InputStream, OutputStream, StdioSlots, pump_input, pump_output};

/// Where and how to run a command in a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Image to create the container from
    pub image: String,
    /// Pull the image before creating the container
    #[serde(default)]
    pub pull: bool,
    /// Operating system of the container, selects the signal table
    #[serde(default)]
    pub platform: Platform,
}

impl DockerConfig {
    /// Configuration for `image` on Linux without pulling
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            pull: false,
            platform: Platform::Linux,
        }
    }

    /// Pull the image before creating the container
    pub fn with_pull(mut self, pull: bool) -> Self {
        self.pull = pull;
        self
    }

    /// Set the container platform
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }
}

/// Runs a command in a fresh Docker container
#[derive(Debug)]
pub struct DockerExecutor {
    config: DockerConfig,
    command: Mutex<Command>,
    stdio: Mutex<StdioSlots>,
    token: CancellationToken,
    lifecycle: RwLock<Lifecycle>,
    container_id: RwLock<Option<String>>,
    pid: AtomicI32,
    attach: futures::lock::Mutex<Option<Child>>,
    output_pumps: Mutex<Vec<smol::Task<()>>>,
    input_pump: Mutex<Option<smol::Task<()>>>,
    last_signal: Mutex<Option<Signal>>,
    reaper: Mutex<Option<smol::Task<()>>>,
}

impl DockerExecutor {
    /// Create an executor for `command` in a container described by `config`.
    /// Cancelling `token` removes the container.
    pub fn new(config: DockerConfig, command: Command, token: CancellationToken) -> Self {
        Self {
            config,
            command: Mutex::new(command),
            stdio: Mutex::new(StdioSlots::default()),
            token,
            lifecycle: RwLock::new(Lifecycle::default()),
            container_id: RwLock::new(None),
            pid: AtomicI32::new(-1),
            attach: futures::lock::Mutex::new(None),
            output_pumps: Mutex::new(Vec::new()),
            input_pump: Mutex::new(None),
            last_signal: Mutex::new(None),
            reaper: Mutex::new(None),
        }
    }

    /// The container id once created
    pub fn container_id(&self) -> Option<String> {
        read(&self.container_id).clone()
    }

    fn configure<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Command, &mut StdioSlots),
    {
        read(&self.lifecycle).ensure_configurable()?;
        apply(&mut lock(&self.command), &mut lock(&self.stdio));
        Ok(())
    }

    fn create_args(&self, command: &Command, interactive: bool) -> Vec<String> {
        let mut args = vec!["create".to_string()];
        if interactive {
            args.push("--interactive".to_string());
        }
        if let Some(dir) = command.get_current_dir() {
            args.push("--workdir".to_string());
            args.push(dir.to_string_lossy().into_owned());
        }
        for pair in command.env_pairs() {
            args.push("--env".to_string());
            args.push(pair);
        }
        args.push(self.config.image.clone());
        args.extend(command.argv());
        args
    }

    /// Remove the container after a failed start, keeping both errors
    async fn abandon(&self, id: &str, cause: Error) -> Error {
        let mut errors = vec![cause];
        if let Err(e) = remove_container(id).await {
            errors.push(e);
        }
        Error::aggregate(errors)
            .unwrap_or_else(|| Error::spawn_failed("container start failed"))
            .with_layer_context("Docker")
    }

    fn spawn_attached(&self, id: &str, slots: StdioSlots) -> Result<Child> {
        let mut start = Command::new("docker");
        start.arg("start").arg("--attach");
        if slots.stdin.is_some() {
            start.arg("--interactive");
        }
        start.arg(id);

        let mut cmd = start.prepare();
        cmd.kill_on_drop(true);
        cmd.stdin(piped_if(slots.stdin.is_some()));
        cmd.stdout(piped_if(slots.stdout.is_some()));
        cmd.stderr(piped_if(slots.stderr.is_some()));

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn_failed(format!("failed to attach to container: {}", e)))?;

        if let (Some(input), Some(stdin)) = (slots.stdin, child.stdin.take()) {
            *lock(&self.input_pump) = Some(smol::spawn(async move {
                if let Err(e) = pump_input(input, stdin).await {
                    debug!(error = %e, "container stdin pump stopped");
                }
            }));
        }

        let mut pumps = Vec::new();
        if let (Some(output), Some(stdout)) = (slots.stdout, child.stdout.take()) {
            pumps.push(smol::spawn(async move {
                if let Err(e) = pump_output(stdout, output).await {
                    warn!(error = %e, "container stdout pump failed");
                }
            }));
        }
        if let (Some(output), Some(stderr)) = (slots.stderr, child.stderr.take()) {
            pumps.push(smol::spawn(async move {
                if let Err(e) = pump_output(stderr, output).await {
                    warn!(error = %e, "container stderr pump failed");
                }
            }));
        }
        *lock(&self.output_pumps) = pumps;

        Ok(child)
    }

    /// `docker start --attach` returns before the container is running, so
    /// poll until it has left the `created` state to learn its pid.
    async fn await_started(&self, id: &str) -> i32 {
        for _ in 0..40 {
            match inspect_state(id).await {
                Ok((status, pid)) if status != "created" => return pid,
                Ok(_) => {}
                Err(e) => {
                    debug!(container = id, error = %e, "inspect failed");
                    return -1;
                }
            }
            smol::Timer::after(Duration::from_millis(25)).await;
        }
        -1
    }

    async fn wait_for_exit(&self, attach: Option<&mut Child>, id: &str) -> Result<i32> {
        if let Some(child) = attach {
            child.status().await?;
        }
        let pumps = std::mem::take(&mut *lock(&self.output_pumps));
        for pump in pumps {
            pump.await;
        }

        let code = docker(["wait", id]).await?;
        code.parse::<i32>()
            .map_err(|_| Error::spawn_failed(format!("unexpected docker wait output: {:?}", code)))
    }

    /// A status of 128+n after we sent signal n is that signal's doing
    fn classify(&self, code: i32) -> ExitState {
        match *lock(&self.last_signal) {
            Some(signal) if code == 128 + signal.0 => ExitState {
                code,
                signal: Some(signal),
            },
            _ => ExitState::code(code),
        }
    }

    fn record_exit(&self, exit: ExitState) {
        lock(&self.input_pump).take();
        write(&self.lifecycle).exit = Some(exit);
    }
}

fn piped_if(attached: bool) -> Stdio {
    if attached { Stdio::piped() } else { Stdio::null() }
}

/// Run a docker CLI command and return its trimmed stdout
async fn docker<I, S>(args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let cmd = Command::builder("docker").args(args).build();
    let argv = cmd.argv();
    let mut prepared = cmd.prepare();
    prepared.stdin(Stdio::null());
    let output = prepared
        .output()
        .await
        .map_err(|e| Error::spawn_failed(format!("failed to run docker: {}", e)))?;

    if !output.status.success() {
        return Err(Error::spawn_failed(format!(
            "`{}` failed: {}",
            argv.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn inspect_state(id: &str) -> Result<(String, i32)> {
    let out = docker(["inspect", "--format", "{{.State.Status}} {{.State.Pid}}", id]).await?;
    let mut parts = out.split_whitespace();
    let status = parts.next().unwrap_or_default().to_string();
    let pid = parts
        .next()
        .and_then(|pid| pid.parse::<i32>().ok())
        .filter(|pid| *pid > 0)
        .unwrap_or(-1);
    Ok((status, pid))
}

async fn remove_container(id: &str) -> Result<()> {
    docker(["rm", "--force", id]).await.map(|_| ())
}

#[async_trait]
impl Executor for DockerExecutor {
    fn args(&self) -> Vec<String> {
        lock(&self.command).argv()
    }

    fn set_env(&self, vars: HashMap<String, String>, inherit: bool) -> Result<()> {
        // Containers never see the host environment, so `inherit` only
        // decides whether earlier variables survive.
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
        let mut attach = self.attach.lock().await;
        read(&self.lifecycle).ensure_configurable()?;
        if self.token.is_cancelled() {
            return Err(Error::cancelled("context cancelled before start"));
        }

        let command = lock(&self.command).clone();
        let slots = std::mem::take(&mut *lock(&self.stdio));

        if self.config.pull {
            info!(image = %self.config.image, "pulling image");
            docker(["pull", self.config.image.as_str()])
                .await
                .map_err(|e| e.with_layer_context("Docker"))?;
        }

        let id = docker(self.create_args(&command, slots.stdin.is_some()))
            .await
            .map_err(|e| e.with_layer_context("Docker"))?;
        *write(&self.container_id) = Some(id.clone());

        let token = self.token.clone();
        let reaper_id = id.clone();
        *lock(&self.reaper) = Some(smol::spawn(async move {
            token.cancelled().await;
            if let Err(e) = remove_container(&reaper_id).await {
                warn!(container = %reaper_id, error = %e, "failed to remove container after cancellation");
            }
        }));

        let pid = if slots.any_attached() {
            match self.spawn_attached(&id, slots) {
                Ok(child) => *attach = Some(child),
                Err(e) => return Err(self.abandon(&id, e).await),
            }
            self.await_started(&id).await
        } else {
            if let Err(e) = docker(["start", id.as_str()]).await {
                return Err(self.abandon(&id, e).await);
            }
            match inspect_state(&id).await {
                Ok((_, pid)) => pid,
                Err(_) => -1,
            }
        };

        self.pid.store(pid, Ordering::SeqCst);
        write(&self.lifecycle).started = true;
        debug!(container = %id, pid, image = %self.config.image, "started container");
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

        let mut attach = self.attach.lock().await;
        if let Some(exit) = read(&self.lifecycle).exit {
            return Ok(exit.code);
        }
        let id = self.container_id().ok_or(Error::NotStarted)?;

        let outcome = {
            let finished = pin!(self.wait_for_exit(attach.as_mut(), &id));
            let cancelled = pin!(self.token.cancelled());
            match select(finished, cancelled).await {
                Either::Left((result, _)) => Some(result),
                Either::Right(_) => None,
            }
        };

        match outcome {
            Some(result) => {
                let exit = self.classify(result?);
                self.record_exit(exit);
                debug!(container = %id, code = exit.code, "container exited");
                Ok(exit.code)
            }
            None => {
                if let Err(e) = remove_container(&id).await {
                    warn!(container = %id, error = %e, "failed to remove cancelled container");
                }
                self.record_exit(ExitState::signaled(Signal::KILL));
                Err(Error::cancelled("context cancelled while waiting for container"))
            }
        }
    }

    async fn signal(&self, signal: Signal) -> Result<()> {
        read(&self.lifecycle).ensure_signalable()?;
        let name = signal_name(self.config.platform, signal).ok_or_else(|| Error::UnknownSignal {
            signal: signal.0,
            platform: self.config.platform.to_string(),
        })?;
        let id = self.container_id().ok_or(Error::NotStarted)?;

        docker(["kill", "--signal", name.as_str(), id.as_str()])
            .await
            .map_err(|e| Error::signal_failed(signal.0, e.to_string()))?;
        *lock(&self.last_signal) = Some(signal);

        debug!(container = %id, signal = %name, "signalled container");
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
        {
            let mut lifecycle = write(&self.lifecycle);
            if lifecycle.closed {
                return;
            }
            lifecycle.closed = true;
        }

        lock(&self.reaper).take();
        lock(&self.input_pump).take();
        if let Some(id) = self.container_id() {
            if let Err(e) = remove_container(&id).await {
                warn!(container = %id, error = %e, "failed to remove container on close");
            }
        }
    }
}
