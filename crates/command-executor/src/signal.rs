//! Signal numbers and their per-platform symbolic names
//!
//! Container runtimes and remote shells address signals by name rather than
//! number, and the numbering differs between operating systems. The tables
//! below are plain data; lookups go through [`signal_name`] and
//! [`signal_number`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw signal number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signal(pub i32);

impl Signal {
    /// Hangup
    pub const HUP: Signal = Signal(1);
    /// Interrupt
    pub const INT: Signal = Signal(2);
    /// Quit
    pub const QUIT: Signal = Signal(3);
    /// Abort
    pub const ABRT: Signal = Signal(6);
    /// Kill (cannot be caught)
    pub const KILL: Signal = Signal(9);
    /// Alarm clock
    pub const ALRM: Signal = Signal(14);
    /// Termination request
    pub const TERM: Signal = Signal(15);

    /// The raw number
    pub fn number(self) -> i32 {
        self.0
    }
}

impl From<i32> for Signal {
    fn from(value: i32) -> Self {
        Signal(value)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match signal_name(Platform::current(), *self) {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "signal {}", self.0),
        }
    }
}

/// Operating system whose signal table applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Linux, including rt-signals
    #[default]
    Linux,
    /// macOS
    Darwin,
    /// Windows containers
    Windows,
}

impl Platform {
    /// The platform this binary was built for
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Darwin
        } else if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }

    fn table(self) -> &'static [(i32, &'static str)] {
        match self {
            Platform::Linux => LINUX_SIGNALS,
            Platform::Darwin => DARWIN_SIGNALS,
            Platform::Windows => WINDOWS_SIGNALS,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Linux => "linux",
            Platform::Darwin => "darwin",
            Platform::Windows => "windows",
        };
        f.write_str(name)
    }
}

// Aliases (SIGIOT, SIGCLD, SIGPOLL) sort after their canonical names so
// number lookups resolve to the canonical one.
const LINUX_SIGNALS: &[(i32, &str)] = &[
    (6, "SIGABRT"),
    (14, "SIGALRM"),
    (7, "SIGBUS"),
    (17, "SIGCHLD"),
    (17, "SIGCLD"),
    (18, "SIGCONT"),
    (8, "SIGFPE"),
    (1, "SIGHUP"),
    (4, "SIGILL"),
    (2, "SIGINT"),
    (29, "SIGIO"),
    (6, "SIGIOT"),
    (9, "SIGKILL"),
    (13, "SIGPIPE"),
    (29, "SIGPOLL"),
    (27, "SIGPROF"),
    (30, "SIGPWR"),
    (3, "SIGQUIT"),
    (11, "SIGSEGV"),
    (16, "SIGSTKFLT"),
    (19, "SIGSTOP"),
    (31, "SIGSYS"),
    (15, "SIGTERM"),
    (5, "SIGTRAP"),
    (20, "SIGTSTP"),
    (21, "SIGTTIN"),
    (22, "SIGTTOU"),
    (23, "SIGURG"),
    (10, "SIGUSR1"),
    (12, "SIGUSR2"),
    (26, "SIGVTALRM"),
    (28, "SIGWINCH"),
    (24, "SIGXCPU"),
    (25, "SIGXFSZ"),
];

const DARWIN_SIGNALS: &[(i32, &str)] = &[
    (6, "SIGABRT"),
    (14, "SIGALRM"),
    (10, "SIGBUS"),
    (20, "SIGCHLD"),
    (19, "SIGCONT"),
    (7, "SIGEMT"),
    (8, "SIGFPE"),
    (1, "SIGHUP"),
    (4, "SIGILL"),
    (29, "SIGINFO"),
    (2, "SIGINT"),
    (23, "SIGIO"),
    (6, "SIGIOT"),
    (9, "SIGKILL"),
    (13, "SIGPIPE"),
    (27, "SIGPROF"),
    (3, "SIGQUIT"),
    (11, "SIGSEGV"),
    (17, "SIGSTOP"),
    (12, "SIGSYS"),
    (15, "SIGTERM"),
    (5, "SIGTRAP"),
    (18, "SIGTSTP"),
    (21, "SIGTTIN"),
    (22, "SIGTTOU"),
    (16, "SIGURG"),
    (30, "SIGUSR1"),
    (31, "SIGUSR2"),
    (26, "SIGVTALRM"),
    (28, "SIGWINCH"),
    (24, "SIGXCPU"),
    (25, "SIGXFSZ"),
];

const WINDOWS_SIGNALS: &[(i32, &str)] = &[(9, "SIGKILL"), (15, "SIGTERM")];

/// First real-time signal on Linux as exposed by the C library
pub const LINUX_RTMIN: i32 = 34;
/// Last real-time signal on Linux
pub const LINUX_RTMAX: i32 = 64;

/// Symbolic name of a Linux real-time signal, counted from whichever end of
/// the range is closer in the way `kill -l` prints them.
fn linux_rt_name(number: i32) -> Option<String> {
    if !(LINUX_RTMIN..=LINUX_RTMAX).contains(&number) {
        return None;
    }
    let from_min = number - LINUX_RTMIN;
    let from_max = LINUX_RTMAX - number;
    Some(match (from_min, from_max) {
        (0, _) => "SIGRTMIN".to_string(),
        (_, 0) => "SIGRTMAX".to_string(),
        (n, _) if n <= 15 => format!("SIGRTMIN+{}", n),
        (_, n) => format!("SIGRTMAX-{}", n),
    })
}

fn linux_rt_number(name: &str) -> Option<i32> {
    let parse_offset = |rest: &str, sign: char| -> Option<i32> {
        if rest.is_empty() {
            return Some(0);
        }
        rest.strip_prefix(sign)?.parse::<i32>().ok()
    };

    let number = if let Some(rest) = name.strip_prefix("SIGRTMIN") {
        LINUX_RTMIN + parse_offset(rest, '+')?
    } else if let Some(rest) = name.strip_prefix("SIGRTMAX") {
        LINUX_RTMAX - parse_offset(rest, '-')?
    } else {
        return None;
    };
    // Only the canonical spelling is accepted ("SIGRTMIN+16" is "SIGRTMAX-14")
    (linux_rt_name(number)? == name).then_some(number)
}

/// Look up the symbolic name (`SIGTERM`, `SIGRTMIN+3`, ...) of a signal on
/// the given platform. `None` means the platform does not recognise it.
pub fn signal_name(platform: Platform, signal: Signal) -> Option<String> {
    if let Some((_, name)) = platform.table().iter().find(|(n, _)| *n == signal.0) {
        return Some((*name).to_string());
    }
    match platform {
        Platform::Linux => linux_rt_name(signal.0),
        _ => None,
    }
}

/// Reverse of [`signal_name`]. Accepts names with or without the `SIG` prefix.
pub fn signal_number(platform: Platform, name: &str) -> Option<Signal> {
    let upper = name.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };

    if let Some((number, _)) = platform.table().iter().find(|(_, n)| *n == name) {
        return Some(Signal(*number));
    }
    match platform {
        Platform::Linux => linux_rt_number(&name).map(Signal),
        _ => None,
    }
}

/// Signal names understood by the SSH `signal` channel request (RFC 4254 §6.10)
const SSH_SIGNALS: &[&str] = &[
    "ABRT", "ALRM", "FPE", "HUP", "ILL", "INT", "KILL", "PIPE", "QUIT", "SEGV", "TERM", "USR1",
    "USR2",
];

/// Translate a POSIX signal into the SSH session-signal dialect: the name
/// without its `SIG` prefix, restricted to the names the protocol defines.
pub fn ssh_signal_name(signal: Signal) -> Option<&'static str> {
    let name = signal_name(Platform::Linux, signal)?;
    let bare = name.strip_prefix("SIG")?;
    SSH_SIGNALS.iter().copied().find(|candidate| *candidate == bare)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_names() {
        assert_eq!(signal_name(Platform::Linux, Signal::KILL).as_deref(), Some("SIGKILL"));
        assert_eq!(signal_name(Platform::Linux, Signal(10)).as_deref(), Some("SIGUSR1"));
        assert_eq!(signal_name(Platform::Linux, Signal(6)).as_deref(), Some("SIGABRT"));
        assert_eq!(signal_name(Platform::Linux, Signal(17)).as_deref(), Some("SIGCHLD"));
    }

    #[test]
    fn test_linux_rt_range() {
        assert_eq!(signal_name(Platform::Linux, Signal(34)).as_deref(), Some("SIGRTMIN"));
        assert_eq!(signal_name(Platform::Linux, Signal(37)).as_deref(), Some("SIGRTMIN+3"));
        assert_eq!(signal_name(Platform::Linux, Signal(49)).as_deref(), Some("SIGRTMIN+15"));
        assert_eq!(signal_name(Platform::Linux, Signal(50)).as_deref(), Some("SIGRTMAX-14"));
        assert_eq!(signal_name(Platform::Linux, Signal(63)).as_deref(), Some("SIGRTMAX-1"));
        assert_eq!(signal_name(Platform::Linux, Signal(64)).as_deref(), Some("SIGRTMAX"));
        assert_eq!(signal_name(Platform::Linux, Signal(65)), None);
        assert_eq!(signal_name(Platform::Linux, Signal(32)), None);

        for number in LINUX_RTMIN..=LINUX_RTMAX {
            let name = signal_name(Platform::Linux, Signal(number)).unwrap();
            assert_eq!(signal_number(Platform::Linux, &name), Some(Signal(number)));
        }
    }

    #[test]
    fn test_tables_are_disjoint_per_platform() {
        assert_eq!(signal_name(Platform::Darwin, Signal(30)).as_deref(), Some("SIGUSR1"));
        assert_eq!(signal_name(Platform::Linux, Signal(30)).as_deref(), Some("SIGPWR"));
        assert_eq!(signal_name(Platform::Darwin, Signal(40)), None);
        assert_eq!(signal_name(Platform::Windows, Signal::TERM).as_deref(), Some("SIGTERM"));
        assert_eq!(signal_name(Platform::Windows, Signal::INT), None);
    }

    #[test]
    fn test_signal_number_accepts_short_names() {
        assert_eq!(signal_number(Platform::Linux, "term"), Some(Signal::TERM));
        assert_eq!(signal_number(Platform::Linux, "SIGKILL"), Some(Signal::KILL));
        assert_eq!(signal_number(Platform::Darwin, "SIGPWR"), None);
        assert_eq!(signal_number(Platform::Linux, "SIGRTMIN+16"), None);
    }

    #[test]
    fn test_ssh_dialect() {
        assert_eq!(ssh_signal_name(Signal::TERM), Some("TERM"));
        assert_eq!(ssh_signal_name(Signal::KILL), Some("KILL"));
        assert_eq!(ssh_signal_name(Signal(10)), Some("USR1"));
        assert_eq!(ssh_signal_name(Signal(17)), None);
        assert_eq!(ssh_signal_name(Signal(40)), None);
    }
}
