//! Options describing one process to create

use command_executor::{Command, InputStream, Target};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::info::ProcessInfo;
use crate::logging::OutputOptions;
use crate::sync::lock;

/// Environment variable carrying the owning manager's id
pub const MANAGER_ID_ENV: &str = "MANAGER_ID";

/// Smallest accepted timeout
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Which process strategy backs a created process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImplementationHint {
    /// Let the manager decide
    #[default]
    Default,
    /// Fine-grained locking
    Basic,
    /// Every operation goes through an owning task
    Blocking,
}

impl ImplementationHint {
    /// The concrete strategy; `Default` resolves to `Basic`
    pub fn resolve(self) -> Self {
        match self {
            ImplementationHint::Default => ImplementationHint::Basic,
            other => other,
        }
    }
}

/// A take-once standard input stream shared between copies of options.
///
/// The first process to start with the options consumes it; respawned copies
/// get no stream and rely on `standard_input_bytes` instead.
#[derive(Clone, Default)]
pub struct StdinHandle(Arc<Mutex<Option<InputStream>>>);

impl StdinHandle {
    /// Wrap `stream`
    pub fn new(stream: InputStream) -> Self {
        Self(Arc::new(Mutex::new(Some(stream))))
    }

    /// Take the stream if nobody has yet
    pub fn take(&self) -> Option<InputStream> {
        lock(&self.0).take()
    }
}

impl fmt::Debug for StdinHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let available = lock(&self.0).is_some();
        f.debug_struct("StdinHandle").field("available", &available).finish()
    }
}

impl PartialEq for StdinHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Everything needed to launch one process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Executable followed by its arguments
    pub args: Vec<String>,
    /// Variables added to (or replacing) the environment
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Replace the inherited environment instead of extending it
    #[serde(default)]
    pub override_environ: bool,
    /// Working directory; empty keeps the current one
    #[serde(default)]
    pub working_directory: String,
    /// Bytes fed to standard input. Takes precedence over `standard_input`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_input_bytes: Option<Vec<u8>>,
    /// A stream fed to standard input; in-process only
    #[serde(skip)]
    pub standard_input: Option<StdinHandle>,
    /// Output routing
    #[serde(default)]
    pub output: OutputOptions,
    /// Kill the process after this long; zero means never
    #[serde(default)]
    pub timeout: Duration,
    /// `timeout` in whole seconds
    #[serde(default)]
    pub timeout_secs: i64,
    /// Initial tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Launched when the process succeeds
    #[serde(default)]
    pub on_success: Vec<CreateOptions>,
    /// Launched when the process fails
    #[serde(default)]
    pub on_failure: Vec<CreateOptions>,
    /// Launched when the process times out
    #[serde(default)]
    pub on_timeout: Vec<CreateOptions>,
    /// Process strategy
    #[serde(default)]
    pub implementation: ImplementationHint,
    /// Where the command runs
    #[serde(default)]
    pub target: Target,
    /// Start the child as a process-group leader
    #[serde(default)]
    pub process_group: bool,
}

impl CreateOptions {
    /// Options running `args`
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Check the options and normalise the two timeout fields so they agree
    pub fn validate(&mut self) -> Result<()> {
        match self.args.first() {
            None => return Err(Error::invalid("cannot create a process with no arguments")),
            Some(program) if program.is_empty() => {
                return Err(Error::invalid("executable name must not be empty"));
            }
            Some(_) => {}
        }

        if !self.working_directory.is_empty() && !Path::new(&self.working_directory).is_dir() {
            return Err(Error::invalid(format!(
                "working directory '{}' does not exist or is not a directory",
                self.working_directory
            )));
        }

        self.normalize_timeout()?;
        self.output.validate()?;

        for follow_up in self
            .on_success
            .iter_mut()
            .chain(self.on_failure.iter_mut())
            .chain(self.on_timeout.iter_mut())
        {
            follow_up.validate()?;
        }
        Ok(())
    }

    fn normalize_timeout(&mut self) -> Result<()> {
        if self.timeout_secs < 0 {
            return Err(Error::invalid("timeout seconds must not be negative"));
        }
        let from_secs = Duration::from_secs(self.timeout_secs as u64);
        match (self.timeout.is_zero(), self.timeout_secs == 0) {
            (true, true) => return Ok(()),
            (true, false) => self.timeout = from_secs,
            (false, false) if self.timeout.as_secs() != from_secs.as_secs() => {
                return Err(Error::invalid(
                    "timeout and timeout seconds are both set and disagree",
                ));
            }
            _ => {}
        }
        if self.timeout < MIN_TIMEOUT {
            return Err(Error::invalid("timeout must be at least one millisecond"));
        }
        self.timeout_secs = self.timeout.as_secs() as i64;
        Ok(())
    }

    /// The configured timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Build the command for these options, tagged with `manager_id`
    pub fn command(&self, manager_id: &str) -> Result<Command> {
        let (program, args) = self
            .args
            .split_first()
            .ok_or_else(|| Error::invalid("cannot create a process with no arguments"))?;

        let mut env = self.environment.clone();
        env.insert(MANAGER_ID_ENV.to_string(), manager_id.to_string());

        let mut command = Command::new(program);
        command
            .args(args)
            .replace_env(env, !self.override_environ)
            .process_group(self.process_group);
        if !self.working_directory.is_empty() {
            command.current_dir(&self.working_directory);
        }
        Ok(command)
    }

    /// Add a tag if not already present
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }
}

/// Selects processes in [`crate::Manager::list`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// Every process
    #[default]
    All,
    /// Still running
    Running,
    /// No longer running
    Terminated,
    /// Completed successfully
    Successful,
    /// Completed unsuccessfully
    Failed,
}

impl Filter {
    /// Every filter
    pub const ALL: [Filter; 5] = [
        Filter::All,
        Filter::Running,
        Filter::Terminated,
        Filter::Successful,
        Filter::Failed,
    ];

    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Filter::All => "all",
            Filter::Running => "running",
            Filter::Terminated => "terminated",
            Filter::Successful => "successful",
            Filter::Failed => "failed",
        }
    }

    /// Whether `info` passes this filter
    pub fn matches(self, info: &ProcessInfo) -> bool {
        match self {
            Filter::All => true,
            Filter::Running => info.is_running,
            Filter::Terminated => !info.is_running,
            Filter::Successful => info.complete && info.successful,
            Filter::Failed => info.complete && !info.successful,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Filter::ALL
            .into_iter()
            .find(|filter| filter.as_str() == s)
            .ok_or_else(|| Error::invalid(format!("unknown filter '{}'", s)))
    }
}
