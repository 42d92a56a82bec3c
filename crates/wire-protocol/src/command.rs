//! The command vocabulary shared by both transports

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

macro_rules! commands {
    ($($variant:ident => $name:literal, $reply:ident;)+) => {
        /// Every operation a remote client can ask for
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum CommandName {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant,
            )+
        }

        impl CommandName {
            /// Every command, manager commands first
            pub const ALL: &'static [CommandName] = &[$(CommandName::$variant),+];

            /// Name used on the wire
            pub fn as_str(self) -> &'static str {
                match self {
                    $(CommandName::$variant => $name,)+
                }
            }

            /// Shape of a successful reply
            pub fn reply_kind(self) -> ReplyKind {
                match self {
                    $(CommandName::$variant => ReplyKind::$reply,)+
                }
            }
        }
    };
}

commands! {
    Id => "id", Id;
    CreateProcess => "create_process", Info;
    List => "list", Infos;
    Group => "group", Infos;
    Get => "get", Info;
    Clear => "clear", Empty;
    Close => "close", Empty;
    WriteFile => "write_file", Empty;
    ConfigureCache => "configure_cache", Empty;
    DownloadFile => "download_file", Empty;
    DownloadMongodb => "download_mongodb", Empty;
    GetLogStream => "get_log_stream", LogStream;
    GetBuildloggerUrls => "get_buildlogger_urls", Urls;
    SignalEvent => "signal_event", Empty;
    SendMessages => "send_messages", Empty;

    Info => "info", Info;
    Running => "running", Flag;
    Complete => "complete", Flag;
    Wait => "wait", ExitCode;
    Respawn => "respawn", Info;
    Signal => "signal", Empty;
    RegisterSignalTriggerId => "register_signal_trigger_id", Empty;
    Tag => "tag", Empty;
    GetTags => "get_tags", Tags;
    ResetTags => "reset_tags", Empty;

    LoggingCacheCreate => "logging_cache_create", Logger;
    LoggingCacheGet => "logging_cache_get", Logger;
    LoggingCacheRemove => "logging_cache_remove", Empty;
    LoggingCacheCloseAndRemove => "logging_cache_close_and_remove", Empty;
    LoggingCacheClear => "logging_cache_clear", Empty;
    LoggingCachePrune => "logging_cache_prune", Empty;
    LoggingCacheSize => "logging_cache_size", Size;
}

/// What a successful reply carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    /// Nothing beyond the status
    Empty,
    /// A manager id
    Id,
    /// One process snapshot
    Info,
    /// Several process snapshots; streamed on the framed transport
    Infos,
    /// A yes/no answer
    Flag,
    /// A process exit code
    ExitCode,
    /// Process tags
    Tags,
    /// Drained log lines
    LogStream,
    /// Build-logger URLs
    Urls,
    /// A cached logger record
    Logger,
    /// A count
    Size,
}

impl CommandName {
    /// Whether the first argument of this command is a process id
    pub fn targets_process(self) -> bool {
        matches!(
            self,
            CommandName::Info
                | CommandName::Running
                | CommandName::Complete
                | CommandName::Wait
                | CommandName::Respawn
                | CommandName::Signal
                | CommandName::RegisterSignalTriggerId
                | CommandName::Tag
                | CommandName::GetTags
                | CommandName::ResetTags
                | CommandName::GetLogStream
                | CommandName::GetBuildloggerUrls
        )
    }

    /// Whether replies arrive as a stream of frames on the framed transport
    pub fn is_streamed(self) -> bool {
        self.reply_kind() == ReplyKind::Infos
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        CommandName::ALL
            .iter()
            .copied()
            .find(|command| command.as_str() == s)
            .ok_or_else(|| Error::UnknownCommand(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique_and_parse() {
        let mut seen = std::collections::HashSet::new();
        for command in CommandName::ALL {
            assert!(seen.insert(command.as_str()), "duplicate {}", command);
            assert_eq!(command.as_str().parse::<CommandName>().unwrap(), *command);
        }
        assert_eq!(CommandName::ALL.len(), 32);
        assert!("shutdown".parse::<CommandName>().is_err());
    }

    #[test]
    fn test_only_listings_stream() {
        let streamed: Vec<_> = CommandName::ALL.iter().filter(|c| c.is_streamed()).collect();
        assert_eq!(streamed, vec![&CommandName::List, &CommandName::Group]);
        assert!(CommandName::Wait.targets_process());
        assert!(!CommandName::Get.targets_process());
    }
}
