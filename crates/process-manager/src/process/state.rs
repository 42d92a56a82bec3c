//! Bookkeeping shared by both process strategies

use chrono::Utc;
use command_executor::SignalInfo;
use indexmap::IndexSet;
use std::fmt;

use super::triggers::{ProcessTrigger, SignalTrigger};
use crate::error::{Error, ErrorKind, Result};
use crate::info::ProcessInfo;

/// How the executor's wait ended
#[derive(Debug, Clone)]
pub(crate) struct Exit {
    pub(crate) code: i32,
    pub(crate) signal: SignalInfo,
    pub(crate) error: Option<(ErrorKind, String)>,
}

pub(crate) struct ProcessState {
    info: ProcessInfo,
    tags: IndexSet<String>,
    triggers: Vec<ProcessTrigger>,
    signal_triggers: Vec<SignalTrigger>,
    exit_error: Option<(ErrorKind, String)>,
}

impl fmt::Debug for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessState")
            .field("info", &self.info)
            .field("tags", &self.tags)
            .field("triggers", &self.triggers.len())
            .field("signal_triggers", &self.signal_triggers.len())
            .finish()
    }
}

impl ProcessState {
    pub(crate) fn new(info: ProcessInfo) -> Self {
        let tags = info.options.tags.iter().cloned().collect();
        Self {
            info,
            tags,
            triggers: Vec::new(),
            signal_triggers: Vec::new(),
            exit_error: None,
        }
    }

    pub(crate) fn info(&self) -> ProcessInfo {
        self.info.clone()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.info.complete
    }

    pub(crate) fn mark_timed_out(&mut self) {
        if !self.info.complete {
            self.info.timed_out = true;
        }
    }

    pub(crate) fn register_trigger(&mut self, trigger: ProcessTrigger) -> Result<()> {
        if self.info.complete {
            return Err(Error::AlreadyComplete);
        }
        self.triggers.push(trigger);
        Ok(())
    }

    pub(crate) fn register_signal_trigger(&mut self, trigger: SignalTrigger) {
        self.signal_triggers.push(trigger);
    }

    pub(crate) fn signal_triggers(&self) -> Vec<SignalTrigger> {
        self.signal_triggers.clone()
    }

    pub(crate) fn tag(&mut self, tag: &str) {
        self.tags.insert(tag.to_string());
    }

    pub(crate) fn tags(&self) -> Vec<String> {
        self.tags.iter().cloned().collect()
    }

    pub(crate) fn reset_tags(&mut self) {
        self.tags.clear();
    }

    /// Record the exit and hand back the triggers to fire
    pub(crate) fn complete(&mut self, exit: Exit) -> (Vec<ProcessTrigger>, ProcessInfo) {
        let info = &mut self.info;
        info.is_running = false;
        info.complete = true;
        info.exit_code = exit.code;
        info.successful = exit.code == 0 && !info.timed_out && exit.error.is_none();
        info.signaled = exit.signal.signaled;
        info.signal = exit.signal.signal;
        info.end_at = Some(Utc::now());
        self.exit_error = exit.error;
        (std::mem::take(&mut self.triggers), self.info.clone())
    }

    /// What `wait` reports once complete
    pub(crate) fn wait_result(&self) -> Result<i32> {
        match &self.exit_error {
            None => Ok(self.info.exit_code),
            Some((ErrorKind::Cancelled, message)) => Err(Error::cancelled(message.clone())),
            Some((_, message)) => Err(Error::Io(std::io::Error::other(message.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CreateOptions;

    fn state() -> ProcessState {
        ProcessState::new(ProcessInfo::started(
            "p",
            42,
            CreateOptions::new(["sleep", "1"]).with_tag("initial"),
        ))
    }

    #[test]
    fn test_tags_are_a_set() {
        let mut state = state();
        state.tag("t");
        state.tag("t");
        assert_eq!(state.tags(), vec!["initial", "t"]);
        state.reset_tags();
        assert!(state.tags().is_empty());
    }

    #[test]
    fn test_complete_rejects_late_triggers() {
        let mut state = state();
        state.register_trigger(Box::new(|_: &ProcessInfo| Ok(()))).unwrap();
        let (triggers, info) = state.complete(Exit {
            code: 0,
            signal: SignalInfo::default(),
            error: None,
        });
        assert_eq!(triggers.len(), 1);
        assert!(info.complete && info.successful && !info.is_running);
        assert_eq!(state.wait_result().unwrap(), 0);

        let err = state.register_trigger(Box::new(|_: &ProcessInfo| Ok(()))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyComplete);
    }

    #[test]
    fn test_timed_out_is_never_successful() {
        let mut state = state();
        state.mark_timed_out();
        let (_, info) = state.complete(Exit {
            code: 0,
            signal: SignalInfo::default(),
            error: None,
        });
        assert!(info.timed_out);
        assert!(!info.successful);
    }

    #[test]
    fn test_cancelled_wait_reports_cancelled() {
        let mut state = state();
        state.complete(Exit {
            code: 9,
            signal: SignalInfo { signal: 9, signaled: true },
            error: Some((ErrorKind::Cancelled, "manager closed".into())),
        });
        assert_eq!(state.wait_result().unwrap_err().kind(), ErrorKind::Cancelled);
    }
}
