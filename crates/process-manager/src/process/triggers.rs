//! Completion and signal triggers

use command_executor::Signal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::info::ProcessInfo;

/// Runs once when a process completes, with its final info.
/// Failures are logged, never returned to the caller.
pub type ProcessTrigger = Box<dyn FnOnce(&ProcessInfo) -> Result<()> + Send>;

/// Consulted before each signal delivery; returning `true` suppresses the signal
pub type SignalTrigger = Arc<dyn Fn(&ProcessInfo, Signal) -> bool + Send + Sync>;

/// Well-known signal triggers addressable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalTriggerId {
    /// Ask Windows processes to exit instead of terminating them outright
    #[serde(rename = "clean-termination", alias = "clean_termination")]
    CleanTermination,
}

impl SignalTriggerId {
    /// Every id
    pub const ALL: [SignalTriggerId; 1] = [SignalTriggerId::CleanTermination];

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            SignalTriggerId::CleanTermination => "clean-termination",
        }
    }

    /// Build the trigger this id names
    pub fn trigger(self) -> SignalTrigger {
        match self {
            SignalTriggerId::CleanTermination => Arc::new(clean_termination),
        }
    }
}

impl fmt::Display for SignalTriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalTriggerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.replace('_', "-");
        SignalTriggerId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| Error::invalid(format!("unknown signal trigger '{}'", s)))
    }
}

fn clean_termination(info: &ProcessInfo, signal: Signal) -> bool {
    if !cfg!(windows) || signal != Signal::TERM || info.pid <= 0 {
        return false;
    }

    let pid = info.pid;
    let id = info.id.clone();
    smol::spawn(async move {
        let status = async_process::Command::new("taskkill")
            .arg("/PID")
            .arg(pid.to_string())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => debug!(process = %id, pid, "requested clean exit"),
            Ok(status) => warn!(process = %id, pid, %status, "taskkill refused clean exit"),
            Err(e) => warn!(process = %id, pid, error = %e, "failed to run taskkill"),
        }
    })
    .detach();
    true
}

/// Run completion triggers in registration order
pub(crate) fn fire_triggers(triggers: Vec<ProcessTrigger>, info: &ProcessInfo) {
    for trigger in triggers {
        if let Err(e) = trigger(info) {
            warn!(process = %info.id, error = %e, "completion trigger failed");
        }
    }
}

/// Consult every signal trigger; the signal is suppressed if any says so
pub(crate) fn suppressed(triggers: &[SignalTrigger], info: &ProcessInfo, signal: Signal) -> bool {
    triggers
        .iter()
        .fold(false, |suppress, trigger| trigger(info, signal) || suppress)
}
