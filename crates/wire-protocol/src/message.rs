//! Transport-independent requests and responses

use chrono::{DateTime, Utc};
use process_manager::logging::{CacheOptions, CachedLogger, LoggingPayload, OutputOptions};
use process_manager::{
    CreateOptions, ErrorKind, Filter, LogStream, ProcessInfo, SignalTriggerId, WriteFileInfo,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::command::{CommandName, ReplyKind};

/// Archive layout of a downloaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// Detect from the file name
    #[default]
    Auto,
    /// Gzipped tar
    Tarball,
    /// Zip
    Zip,
}

impl ArchiveFormat {
    /// Every format
    pub const ALL: [ArchiveFormat; 3] = [ArchiveFormat::Auto, ArchiveFormat::Tarball, ArchiveFormat::Zip];

    /// Name used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveFormat::Auto => "auto",
            ArchiveFormat::Tarball => "tarball",
            ArchiveFormat::Zip => "zip",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveFormat {
    type Err = process_manager::Error;

    fn from_str(s: &str) -> process_manager::Result<Self> {
        ArchiveFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| process_manager::Error::invalid(format!("unknown archive format '{}'", s)))
    }
}

/// Where and how to unpack a download
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArchiveOptions {
    /// Archive layout
    #[serde(default)]
    pub format: ArchiveFormat,
    /// Extraction directory
    pub target_path: String,
}

/// A file to fetch onto the service host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadInfo {
    /// Source URL
    pub url: String,
    /// Destination path
    pub path: String,
    /// Unpack after downloading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveOptions>,
}

impl DownloadInfo {
    /// Reject requests without a source or destination
    pub fn validate(&self) -> process_manager::Result<()> {
        if self.url.is_empty() {
            return Err(process_manager::Error::invalid("download requires a url"));
        }
        if self.path.is_empty() {
            return Err(process_manager::Error::invalid("download requires a path"));
        }
        if let Some(archive) = &self.archive {
            if archive.target_path.is_empty() {
                return Err(process_manager::Error::invalid("archive extraction requires a target path"));
            }
        }
        Ok(())
    }
}

/// A database server build to fetch onto the service host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MongoDbDownloadOptions {
    /// Release version
    pub version: String,
    /// Operating system of the build
    #[serde(default)]
    pub platform: String,
    /// CPU architecture
    #[serde(default)]
    pub arch: String,
    /// Build edition
    #[serde(default)]
    pub edition: String,
    /// Installation directory
    pub path: String,
    /// Create `path` if missing
    #[serde(default)]
    pub create_dir: bool,
}

impl MongoDbDownloadOptions {
    /// Reject requests without a version or destination
    pub fn validate(&self) -> process_manager::Result<()> {
        if self.version.is_empty() {
            return Err(process_manager::Error::invalid("download requires a version"));
        }
        if self.path.is_empty() {
            return Err(process_manager::Error::invalid("download requires a path"));
        }
        Ok(())
    }
}

/// A decoded request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Manager id
    Id,
    /// Launch a process
    CreateProcess(CreateOptions),
    /// Processes passing a filter
    List(Filter),
    /// Processes carrying a tag
    Group(String),
    /// One process by id
    Get(String),
    /// Drop completed processes
    Clear,
    /// Shut the manager down
    Close,
    /// Write a file on the service host
    WriteFile(WriteFileInfo),
    /// Retune the logging cache
    ConfigureCache(CacheOptions),
    /// Fetch a file
    DownloadFile(DownloadInfo),
    /// Fetch a database build
    DownloadMongodb(MongoDbDownloadOptions),
    /// Drain in-memory output of a process
    GetLogStream {
        /// Process id
        id: String,
        /// Most lines to return
        count: usize,
    },
    /// Build-logger URLs of a process
    GetBuildloggerUrls(String),
    /// Signal a named host event
    SignalEvent(String),
    /// Inject messages into a cached logger
    SendMessages(LoggingPayload),

    /// Snapshot of a process
    Info(String),
    /// Whether a process runs
    Running(String),
    /// Whether a process completed
    Complete(String),
    /// Block until a process completes
    Wait(String),
    /// Relaunch a process with its original options
    Respawn(String),
    /// Deliver a signal
    Signal {
        /// Process id
        id: String,
        /// Signal number
        signal: i32,
    },
    /// Attach a well-known signal trigger
    RegisterSignalTriggerId {
        /// Process id
        id: String,
        /// Trigger name
        trigger: SignalTriggerId,
    },
    /// Add a tag
    Tag {
        /// Process id
        id: String,
        /// Tag to add
        tag: String,
    },
    /// A process's tags
    GetTags(String),
    /// Drop a process's tags
    ResetTags(String),

    /// Create a cached logger
    LoggingCacheCreate {
        /// Logger id
        id: String,
        /// Sinks to open
        output: OutputOptions,
    },
    /// Look up a cached logger
    LoggingCacheGet(String),
    /// Remove a cached logger
    LoggingCacheRemove(String),
    /// Close and remove a cached logger
    LoggingCacheCloseAndRemove(String),
    /// Close and remove every cached logger
    LoggingCacheClear,
    /// Remove loggers idle since a moment
    LoggingCachePrune(DateTime<Utc>),
    /// Number of cached loggers
    LoggingCacheSize,
}

impl Request {
    /// The command this request invokes
    pub fn command(&self) -> CommandName {
        match self {
            Request::Id => CommandName::Id,
            Request::CreateProcess(_) => CommandName::CreateProcess,
            Request::List(_) => CommandName::List,
            Request::Group(_) => CommandName::Group,
            Request::Get(_) => CommandName::Get,
            Request::Clear => CommandName::Clear,
            Request::Close => CommandName::Close,
            Request::WriteFile(_) => CommandName::WriteFile,
            Request::ConfigureCache(_) => CommandName::ConfigureCache,
            Request::DownloadFile(_) => CommandName::DownloadFile,
            Request::DownloadMongodb(_) => CommandName::DownloadMongodb,
            Request::GetLogStream { .. } => CommandName::GetLogStream,
            Request::GetBuildloggerUrls(_) => CommandName::GetBuildloggerUrls,
            Request::SignalEvent(_) => CommandName::SignalEvent,
            Request::SendMessages(_) => CommandName::SendMessages,
            Request::Info(_) => CommandName::Info,
            Request::Running(_) => CommandName::Running,
            Request::Complete(_) => CommandName::Complete,
            Request::Wait(_) => CommandName::Wait,
            Request::Respawn(_) => CommandName::Respawn,
            Request::Signal { .. } => CommandName::Signal,
            Request::RegisterSignalTriggerId { .. } => CommandName::RegisterSignalTriggerId,
            Request::Tag { .. } => CommandName::Tag,
            Request::GetTags(_) => CommandName::GetTags,
            Request::ResetTags(_) => CommandName::ResetTags,
            Request::LoggingCacheCreate { .. } => CommandName::LoggingCacheCreate,
            Request::LoggingCacheGet(_) => CommandName::LoggingCacheGet,
            Request::LoggingCacheRemove(_) => CommandName::LoggingCacheRemove,
            Request::LoggingCacheCloseAndRemove(_) => CommandName::LoggingCacheCloseAndRemove,
            Request::LoggingCacheClear => CommandName::LoggingCacheClear,
            Request::LoggingCachePrune(_) => CommandName::LoggingCachePrune,
            Request::LoggingCacheSize => CommandName::LoggingCacheSize,
        }
    }

    /// Process id the request addresses, if any
    pub fn process_id(&self) -> Option<&str> {
        match self {
            Request::Get(id)
            | Request::GetBuildloggerUrls(id)
            | Request::Info(id)
            | Request::Running(id)
            | Request::Complete(id)
            | Request::Wait(id)
            | Request::Respawn(id)
            | Request::GetTags(id)
            | Request::ResetTags(id)
            | Request::GetLogStream { id, .. }
            | Request::Signal { id, .. }
            | Request::RegisterSignalTriggerId { id, .. }
            | Request::Tag { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// The payload of a successful response
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Reply {
    /// Nothing beyond the status
    #[default]
    Empty,
    /// A manager id
    Id(String),
    /// One process snapshot
    Info(Box<ProcessInfo>),
    /// Several process snapshots
    Infos(Vec<ProcessInfo>),
    /// A yes/no answer
    Flag(bool),
    /// An exit code
    ExitCode(i32),
    /// Process tags
    Tags(Vec<String>),
    /// Drained log lines
    LogStream(LogStream),
    /// Build-logger URLs
    Urls(Vec<String>),
    /// A cached logger record
    Logger(CachedLogger),
    /// A count
    Size(usize),
}

impl Reply {
    /// Shape of this reply
    pub fn kind(&self) -> ReplyKind {
        match self {
            Reply::Empty => ReplyKind::Empty,
            Reply::Id(_) => ReplyKind::Id,
            Reply::Info(_) => ReplyKind::Info,
            Reply::Infos(_) => ReplyKind::Infos,
            Reply::Flag(_) => ReplyKind::Flag,
            Reply::ExitCode(_) => ReplyKind::ExitCode,
            Reply::Tags(_) => ReplyKind::Tags,
            Reply::LogStream(_) => ReplyKind::LogStream,
            Reply::Urls(_) => ReplyKind::Urls,
            Reply::Logger(_) => ReplyKind::Logger,
            Reply::Size(_) => ReplyKind::Size,
        }
    }
}

/// A response envelope.
///
/// Failed responses carry `ok = false`, a message and the error kind's name
/// so the client can rebuild an error of the same kind.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    /// Whether the command succeeded
    pub ok: bool,
    /// Failure message; empty on success
    pub errmsg: String,
    /// Failure kind name; empty on success
    pub code_name: String,
    /// Result of a successful command
    pub reply: Reply,
}

impl Response {
    /// A successful response
    pub fn success(reply: Reply) -> Self {
        Self {
            ok: true,
            errmsg: String::new(),
            code_name: String::new(),
            reply,
        }
    }

    /// A failed response describing `error`
    pub fn failure(error: &process_manager::Error) -> Self {
        Self {
            ok: false,
            errmsg: error.to_string(),
            code_name: error.kind().to_string(),
            reply: Reply::Empty,
        }
    }

    /// Turn the envelope back into a result, rebuilding remote errors
    pub fn into_result(self) -> process_manager::Result<Reply> {
        if self.ok {
            return Ok(self.reply);
        }
        let kind = self.code_name.parse().unwrap_or(ErrorKind::IoFailure);
        Err(process_manager::Error::remote(kind, self.errmsg))
    }
}

impl From<process_manager::Result<Reply>> for Response {
    fn from(result: process_manager::Result<Reply>) -> Self {
        match result {
            Ok(reply) => Response::success(reply),
            Err(e) => Response::failure(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_round_trips_kind() {
        let response = Response::failure(&process_manager::Error::not_found("no process 'x'"));
        assert!(!response.ok);
        assert_eq!(response.code_name, "NotFound");

        let err = response.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "not found: no process 'x'");
    }

    #[test]
    fn test_unknown_code_name_degrades_to_io_failure() {
        let response = Response {
            ok: false,
            errmsg: "boom".into(),
            code_name: "Exotic".into(),
            reply: Reply::Empty,
        };
        assert_eq!(response.into_result().unwrap_err().kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_request_commands_match_reply_kinds() {
        let request = Request::Wait("p1".into());
        assert_eq!(request.command(), CommandName::Wait);
        assert_eq!(request.command().reply_kind(), Reply::ExitCode(0).kind());
        assert_eq!(request.process_id(), Some("p1"));
        assert_eq!(Request::Clear.process_id(), None);
    }

    #[test]
    fn test_download_validation() {
        let mut info = DownloadInfo {
            url: "https://example.com/a.tgz".into(),
            path: "/tmp/a.tgz".into(),
            archive: Some(ArchiveOptions::default()),
        };
        assert!(info.validate().is_err());
        info.archive = Some(ArchiveOptions {
            format: ArchiveFormat::Tarball,
            target_path: "/tmp/a".into(),
        });
        info.validate().unwrap();
        assert!(DownloadInfo::default().validate().is_err());
        assert!("rar".parse::<ArchiveFormat>().is_err());
    }
}
