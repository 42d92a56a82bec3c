//! Observable snapshots of a process

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::options::CreateOptions;

/// What a caller can observe about a process at one moment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Id assigned by the manager
    pub id: String,
    /// Process id on its substrate; -1 when unknown
    pub pid: i32,
    /// Still running
    pub is_running: bool,
    /// Exited and completion triggers have fired
    pub complete: bool,
    /// Completed with exit code 0 and no timeout
    pub successful: bool,
    /// Exit code once complete, otherwise -1
    pub exit_code: i32,
    /// Killed by its timeout
    pub timed_out: bool,
    /// Ended by a signal
    #[serde(default)]
    pub signaled: bool,
    /// The ending signal, or -1
    #[serde(default = "no_signal")]
    pub signal: i32,
    /// When the process started
    pub start_at: Option<DateTime<Utc>>,
    /// When the process completed
    pub end_at: Option<DateTime<Utc>>,
    /// Options the process was created with
    pub options: CreateOptions,
}

fn no_signal() -> i32 {
    -1
}

impl ProcessInfo {
    /// Info for a process that has just started
    pub fn started(id: impl Into<String>, pid: i32, options: CreateOptions) -> Self {
        Self {
            id: id.into(),
            pid,
            is_running: true,
            complete: false,
            successful: false,
            exit_code: -1,
            timed_out: false,
            signaled: false,
            signal: -1,
            start_at: Some(Utc::now()),
            end_at: None,
            options,
        }
    }
}

/// A batch of drained output lines
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogStream {
    /// Lines, oldest first
    pub logs: Vec<String>,
    /// The process is complete and nothing is left to read
    pub done: bool,
}
