//! Execution target types
//!
//! A target says WHERE a command runs; the [`Command`] says WHAT runs.
//! [`Target::executor`] pairs the two into a ready-to-start [`Executor`].

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::backends::LocalExecutor;
#[cfg(feature = "docker")]
use crate::backends::{DockerConfig, DockerExecutor};
#[cfg(feature = "ssh")]
use crate::backends::{SshConfig, SshExecutor};
use crate::command::Command;
use crate::executor::Executor;

/// Substrate a command runs on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Target {
    /// A child of this process
    #[default]
    Local,
    /// A fresh container
    #[cfg(feature = "docker")]
    Docker(DockerConfig),
    /// A remote host reached over ssh
    #[cfg(feature = "ssh")]
    Ssh(SshConfig),
}

impl Target {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Target::Local => "local",
            #[cfg(feature = "docker")]
            Target::Docker(_) => "docker",
            #[cfg(feature = "ssh")]
            Target::Ssh(_) => "ssh",
        }
    }

    /// Build an executor for `command` on this target. The executor's
    /// lifetime is bound to `token`.
    pub fn executor(&self, command: Command, token: CancellationToken) -> Box<dyn Executor> {
        match self {
            Target::Local => Box::new(LocalExecutor::new(command, token)),
            #[cfg(feature = "docker")]
            Target::Docker(config) => Box::new(DockerExecutor::new(config.clone(), command, token)),
            #[cfg(feature = "ssh")]
            Target::Ssh(config) => Box::new(SshExecutor::new(config.clone(), command, token)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_local() {
        let target = Target::default();
        assert_eq!(target.kind(), "local");

        let executor = target.executor(Command::new("true"), CancellationToken::new());
        assert_eq!(executor.args(), vec!["true"]);
        assert_eq!(executor.pid(), -1);
    }

    #[cfg(feature = "docker")]
    #[test]
    fn test_target_serde() {
        let target: Target =
            serde_json::from_str(r#"{"type":"docker","image":"alpine:3","pull":true}"#).unwrap();
        assert_eq!(target, Target::Docker(DockerConfig::new("alpine:3").with_pull(true)));
        assert_eq!(target.kind(), "docker");
    }
}
