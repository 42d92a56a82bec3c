//! The substrate-independent executor contract

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::signal::Signal;
use crate::stdio::{InputStream, OutputStream};

/// Which signal, if any, ended a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalInfo {
    /// The signal number, or -1 when `signaled` is false
    pub signal: i32,
    /// Whether the process was ended by a signal
    pub signaled: bool,
}

impl SignalInfo {
    /// Info for a process ended by `signal`
    pub fn signaled(signal: Signal) -> Self {
        Self {
            signal: signal.0,
            signaled: true,
        }
    }
}

impl Default for SignalInfo {
    fn default() -> Self {
        Self {
            signal: -1,
            signaled: false,
        }
    }
}

/// Final state of an exited process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitState {
    /// Exit code. A process ended by a signal reports the signal number.
    pub code: i32,
    /// The terminating signal, if any
    pub signal: Option<Signal>,
}

impl ExitState {
    /// A normal exit
    pub fn code(code: i32) -> Self {
        Self { code, signal: None }
    }

    /// An exit caused by `signal`
    pub fn signaled(signal: Signal) -> Self {
        Self {
            code: signal.0,
            signal: Some(signal),
        }
    }

    /// Whether this is a clean exit
    pub fn success(&self) -> bool {
        self.code == 0 && self.signal.is_none()
    }

    /// The [`SignalInfo`] view of this state
    pub fn signal_info(&self) -> SignalInfo {
        self.signal.map(SignalInfo::signaled).unwrap_or_default()
    }
}

impl From<std::process::ExitStatus> for ExitState {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitState::signaled(Signal(signal));
            }
        }
        ExitState::code(status.code().unwrap_or(-1))
    }
}

/// Uniform handle over one command running on some substrate.
///
/// All methods take `&self`; implementations guard their own state so a
/// handle can be shared between a waiter and a signaller.
#[async_trait]
pub trait Executor: Send + Sync + fmt::Debug {
    /// Argument vector as provided at construction
    fn args(&self) -> Vec<String>;

    /// Replace the environment. With `inherit = false` the child sees only `vars`.
    fn set_env(&self, vars: HashMap<String, String>, inherit: bool) -> Result<()>;

    /// Set the working directory
    fn set_dir(&self, dir: PathBuf) -> Result<()>;

    /// Attach (or detach, with `None`) standard input
    fn set_stdin(&self, stdin: Option<InputStream>) -> Result<()>;

    /// Attach (or detach, with `None`) standard output
    fn set_stdout(&self, stdout: Option<OutputStream>) -> Result<()>;

    /// Attach (or detach, with `None`) standard error
    fn set_stderr(&self, stderr: Option<OutputStream>) -> Result<()>;

    /// Launch the command. May only be called once.
    async fn start(&self) -> Result<()>;

    /// Block until the command exits and return its exit code
    async fn wait(&self) -> Result<i32>;

    /// Deliver a signal to the running command
    async fn signal(&self, signal: Signal) -> Result<()>;

    /// Process id if known, otherwise -1
    fn pid(&self) -> i32;

    /// Exit code once exited, otherwise -1
    fn exit_code(&self) -> i32;

    /// Whether the command exited cleanly
    fn success(&self) -> bool;

    /// Signal that ended the command; `(-1, false)` when none did
    fn signal_info(&self) -> SignalInfo;

    /// Release substrate resources. Idempotent; failures are only logged.
    async fn close(&self);
}

/// Lifecycle bookkeeping shared by the executor implementations
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    pub(crate) started: bool,
    pub(crate) exit: Option<ExitState>,
    pub(crate) closed: bool,
}

impl Lifecycle {
    /// Setters are only legal before start
    pub(crate) fn ensure_configurable(&self) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        Ok(())
    }

    /// Signals are only legal between start and exit
    pub(crate) fn ensure_signalable(&self) -> Result<()> {
        if !self.started {
            return Err(Error::NotStarted);
        }
        if self.exit.is_some() {
            return Err(Error::AlreadyExited);
        }
        Ok(())
    }

    pub(crate) fn exit_code(&self) -> i32 {
        self.exit.map(|exit| exit.code).unwrap_or(-1)
    }

    pub(crate) fn success(&self) -> bool {
        self.exit.map(|exit| exit.success()).unwrap_or(false)
    }

    pub(crate) fn signal_info(&self) -> SignalInfo {
        self.exit.map(|exit| exit.signal_info()).unwrap_or_default()
    }
}

// A panic while holding one of these locks leaves plain data behind, so
// poisoning is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_signal_info() {
        let info = SignalInfo::default();
        assert_eq!(info.signal, -1);
        assert!(!info.signaled);
    }

    #[test]
    fn test_signaled_exit_reports_signal_as_code() {
        let exit = ExitState::signaled(Signal::KILL);
        assert_eq!(exit.code, 9);
        assert!(!exit.success());
        assert_eq!(exit.signal_info(), SignalInfo::signaled(Signal::KILL));
    }

    #[test]
    fn test_lifecycle_guards() {
        let mut lifecycle = Lifecycle::default();
        assert!(matches!(lifecycle.ensure_signalable(), Err(Error::NotStarted)));
        assert!(lifecycle.ensure_configurable().is_ok());
        assert_eq!(lifecycle.exit_code(), -1);
        assert!(!lifecycle.success());

        lifecycle.started = true;
        assert!(matches!(lifecycle.ensure_configurable(), Err(Error::AlreadyStarted)));
        assert!(lifecycle.ensure_signalable().is_ok());

        lifecycle.exit = Some(ExitState::code(0));
        assert!(matches!(lifecycle.ensure_signalable(), Err(Error::AlreadyExited)));
        assert!(lifecycle.success());
        assert_eq!(lifecycle.signal_info(), SignalInfo::default());
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_conversion() {
        use std::os::unix::process::ExitStatusExt;

        let exited = ExitState::from(std::process::ExitStatus::from_raw(3 << 8));
        assert_eq!(exited, ExitState::code(3));

        let killed = ExitState::from(std::process::ExitStatus::from_raw(9));
        assert_eq!(killed, ExitState::signaled(Signal::KILL));
    }
}
