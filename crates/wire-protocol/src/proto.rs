//! Protobuf schema of the framed transport.
//!
//! Declared with prost's derives so no code generation step is needed. Field
//! tags are part of the wire format and must never be reused.

use std::collections::BTreeMap;

/// Signals with a fixed meaning on every platform. Other numbers pass
/// through unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Signals {
    /// No signal
    Unspecified = 0,
    /// Hangup
    Hup = 1,
    /// Interrupt
    Int = 2,
    /// Quit
    Quit = 3,
    /// Abort
    Abrt = 6,
    /// Kill
    Kill = 9,
    /// User defined 1
    Usr1 = 10,
    /// User defined 2
    Usr2 = 12,
    /// Terminate
    Term = 15,
}

/// Listing filters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FilterSpecifications {
    /// Every process
    All = 0,
    /// Running
    Running = 1,
    /// Not running
    Terminated = 2,
    /// Completed successfully
    Successful = 3,
    /// Completed unsuccessfully
    Failed = 4,
}

/// Download archive layouts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ArchiveFormat {
    /// Detect from the file name
    Auto = 0,
    /// Gzipped tar
    Tarball = 1,
    /// Zip
    Zip = 2,
}

/// Well-known signal triggers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SignalTriggerId {
    /// Not set
    Unspecified = 0,
    /// `clean-termination`
    CleanTermination = 1,
}

/// Encoding of a logger's raw options
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RawLoggerConfigFormat {
    /// JSON
    Json = 0,
    /// BSON
    Bson = 1,
}

/// Process strategy hint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ImplementationHint {
    /// Service default
    Default = 0,
    /// Lock-guarded state
    Basic = 1,
    /// Actor-owned state
    Blocking = 2,
}

/// Interpretation of injected log data
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PayloadFormat {
    /// Text
    String = 0,
    /// JSON objects
    Json = 1,
    /// BSON documents
    Bson = 2,
}

/// A point in time
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    /// Sub-second nanoseconds
    #[prost(uint32, tag = "2")]
    pub nanos: u32,
}

/// A span of time
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Duration {
    /// Whole seconds
    #[prost(uint64, tag = "1")]
    pub seconds: u64,
    /// Sub-second nanoseconds
    #[prost(uint32, tag = "2")]
    pub nanos: u32,
}

/// One configured logger
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoggerConfig {
    /// Sink kind
    #[prost(string, tag = "1")]
    pub kind: String,
    /// Encoding of `config`
    #[prost(enumeration = "RawLoggerConfigFormat", tag = "2")]
    pub format: i32,
    /// Kind-specific options
    #[prost(bytes = "vec", tag = "3")]
    pub config: Vec<u8>,
}

/// Output routing of a process or cached logger
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OutputOptions {
    /// Drop stdout
    #[prost(bool, tag = "1")]
    pub suppress_output: bool,
    /// Drop stderr
    #[prost(bool, tag = "2")]
    pub suppress_error: bool,
    /// Route stdout to the error sink
    #[prost(bool, tag = "3")]
    pub send_output_to_error: bool,
    /// Route stderr to the output sink
    #[prost(bool, tag = "4")]
    pub send_error_to_output: bool,
    /// Loggers
    #[prost(message, repeated, tag = "5")]
    pub loggers: Vec<LoggerConfig>,
}

/// Where a process runs
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Target {
    /// `local`, `docker` or `ssh`
    #[prost(string, tag = "1")]
    pub kind: String,
    /// Container image
    #[prost(string, tag = "2")]
    pub image: String,
    /// Pull the image first
    #[prost(bool, tag = "3")]
    pub pull: bool,
    /// Container operating system
    #[prost(string, tag = "4")]
    pub platform: String,
    /// Remote host
    #[prost(string, tag = "5")]
    pub host: String,
    /// Remote user
    #[prost(string, optional, tag = "6")]
    pub user: Option<String>,
    /// Remote port
    #[prost(uint32, optional, tag = "7")]
    pub port: Option<u32>,
    /// Private key
    #[prost(string, optional, tag = "8")]
    pub identity_file: Option<String>,
    /// Additional ssh arguments
    #[prost(string, repeated, tag = "9")]
    pub extra_args: Vec<String>,
}

/// How to launch a process
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateOptions {
    /// Argument vector
    #[prost(string, repeated, tag = "1")]
    pub args: Vec<String>,
    /// Environment additions or replacement
    #[prost(btree_map = "string, string", tag = "2")]
    pub environment: BTreeMap<String, String>,
    /// Replace instead of extend the inherited environment
    #[prost(bool, tag = "3")]
    pub override_environ: bool,
    /// Working directory
    #[prost(string, tag = "4")]
    pub working_directory: String,
    /// Bytes fed to stdin
    #[prost(bytes = "vec", optional, tag = "5")]
    pub standard_input_bytes: Option<Vec<u8>>,
    /// Output routing
    #[prost(message, optional, tag = "6")]
    pub output: Option<OutputOptions>,
    /// Timeout
    #[prost(message, optional, tag = "7")]
    pub timeout: Option<Duration>,
    /// Timeout in whole seconds
    #[prost(int64, tag = "8")]
    pub timeout_secs: i64,
    /// Initial tags
    #[prost(string, repeated, tag = "9")]
    pub tags: Vec<String>,
    /// Follow-ups after success
    #[prost(message, repeated, tag = "10")]
    pub on_success: Vec<CreateOptions>,
    /// Follow-ups after failure
    #[prost(message, repeated, tag = "11")]
    pub on_failure: Vec<CreateOptions>,
    /// Follow-ups after a timeout
    #[prost(message, repeated, tag = "12")]
    pub on_timeout: Vec<CreateOptions>,
    /// Strategy hint
    #[prost(enumeration = "ImplementationHint", tag = "13")]
    pub implementation: i32,
    /// Substrate
    #[prost(message, optional, tag = "14")]
    pub target: Option<Target>,
    /// Start as a process-group leader
    #[prost(bool, tag = "15")]
    pub process_group: bool,
}

/// Process snapshot
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcessInfo {
    /// Process id
    #[prost(string, tag = "1")]
    pub id: String,
    /// OS pid or -1
    #[prost(int32, tag = "2")]
    pub pid: i32,
    /// Running
    #[prost(bool, tag = "3")]
    pub is_running: bool,
    /// Completed
    #[prost(bool, tag = "4")]
    pub complete: bool,
    /// Completed successfully
    #[prost(bool, tag = "5")]
    pub successful: bool,
    /// Exit code or -1
    #[prost(int32, tag = "6")]
    pub exit_code: i32,
    /// Killed by its timeout
    #[prost(bool, tag = "7")]
    pub timed_out: bool,
    /// Ended by a signal
    #[prost(bool, tag = "8")]
    pub signaled: bool,
    /// Ending signal or -1
    #[prost(int32, tag = "9")]
    pub signal: i32,
    /// Start time
    #[prost(message, optional, tag = "10")]
    pub start_at: Option<Timestamp>,
    /// End time
    #[prost(message, optional, tag = "11")]
    pub end_at: Option<Timestamp>,
    /// Launch options
    #[prost(message, optional, tag = "12")]
    pub options: Option<CreateOptions>,
}

/// File write
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteFileInfo {
    /// Destination
    #[prost(string, tag = "1")]
    pub path: String,
    /// Bytes of this chunk
    #[prost(bytes = "vec", tag = "2")]
    pub content: Vec<u8>,
    /// Append instead of truncate
    #[prost(bool, tag = "3")]
    pub append: bool,
    /// Permission bits
    #[prost(uint32, tag = "4")]
    pub perm: u32,
}

/// Logging cache tuning
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct CacheOptions {
    /// Refuse new loggers
    #[prost(bool, tag = "1")]
    pub disabled: bool,
    /// Size limit
    #[prost(int64, tag = "2")]
    pub max_size: i64,
    /// Seconds between prune passes
    #[prost(int64, tag = "3")]
    pub prune_delay_secs: i64,
}

/// Extraction settings
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ArchiveOptions {
    /// Layout
    #[prost(enumeration = "ArchiveFormat", tag = "1")]
    pub format: i32,
    /// Extraction directory
    #[prost(string, tag = "2")]
    pub target_path: String,
}

/// File download
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DownloadInfo {
    /// Source
    #[prost(string, tag = "1")]
    pub url: String,
    /// Destination
    #[prost(string, tag = "2")]
    pub path: String,
    /// Extraction
    #[prost(message, optional, tag = "3")]
    pub archive: Option<ArchiveOptions>,
}

/// Database build download
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MongoDbDownloadOptions {
    /// Version
    #[prost(string, tag = "1")]
    pub version: String,
    /// Operating system
    #[prost(string, tag = "2")]
    pub platform: String,
    /// Architecture
    #[prost(string, tag = "3")]
    pub arch: String,
    /// Edition
    #[prost(string, tag = "4")]
    pub edition: String,
    /// Installation directory
    #[prost(string, tag = "5")]
    pub path: String,
    /// Create the directory
    #[prost(bool, tag = "6")]
    pub create_dir: bool,
}

/// Repeated strings
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StringList {
    /// Values
    #[prost(string, repeated, tag = "1")]
    pub values: Vec<String>,
}

/// Repeated byte buffers
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BytesList {
    /// Values
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub values: Vec<Vec<u8>>,
}

/// Injected log data
#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum PayloadData {
    /// A string
    #[prost(string, tag = "7")]
    Text(String),
    /// Raw bytes
    #[prost(bytes = "vec", tag = "8")]
    Bytes(Vec<u8>),
    /// Strings
    #[prost(message, tag = "9")]
    TextList(StringList),
    /// Byte buffers
    #[prost(message, tag = "10")]
    BytesList(BytesList),
}

/// Message injection
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoggingPayload {
    /// Target logger
    #[prost(string, tag = "1")]
    pub logger_id: String,
    /// Numeric priority
    #[prost(int32, tag = "2")]
    pub priority: i32,
    /// Split text on lines
    #[prost(bool, tag = "3")]
    pub is_multi: bool,
    /// Prefer the error sink
    #[prost(bool, tag = "4")]
    pub prefer_send_to_error: bool,
    /// Wrap with metadata
    #[prost(bool, tag = "5")]
    pub add_metadata: bool,
    /// Interpretation of `data`
    #[prost(enumeration = "PayloadFormat", tag = "6")]
    pub format: i32,
    /// The data
    #[prost(oneof = "PayloadData", tags = "7, 8, 9, 10")]
    pub data: Option<PayloadData>,
}

/// Cached logger record
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CachedLogger {
    /// Logger id
    #[prost(string, tag = "1")]
    pub id: String,
    /// Owning manager
    #[prost(string, tag = "2")]
    pub manager_id: String,
    /// Last access
    #[prost(message, optional, tag = "3")]
    pub accessed: Option<Timestamp>,
}

/// Every request. `command` selects which other fields apply.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcRequest {
    /// Command name
    #[prost(string, tag = "1")]
    pub command: String,
    /// Process, logger or event id
    #[prost(string, tag = "2")]
    pub id: String,
    /// `create_process`
    #[prost(message, optional, tag = "3")]
    pub options: Option<CreateOptions>,
    /// `list`
    #[prost(enumeration = "FilterSpecifications", tag = "4")]
    pub filter: i32,
    /// `group`, `tag`
    #[prost(string, tag = "5")]
    pub tag: String,
    /// `signal`
    #[prost(enumeration = "Signals", tag = "6")]
    pub signal: i32,
    /// `get_log_stream`
    #[prost(uint64, tag = "7")]
    pub count: u64,
    /// `register_signal_trigger_id`
    #[prost(enumeration = "SignalTriggerId", tag = "8")]
    pub trigger: i32,
    /// `write_file`
    #[prost(message, optional, tag = "9")]
    pub write_file: Option<WriteFileInfo>,
    /// `configure_cache`
    #[prost(message, optional, tag = "10")]
    pub cache: Option<CacheOptions>,
    /// `download_file`
    #[prost(message, optional, tag = "11")]
    pub download: Option<DownloadInfo>,
    /// `download_mongodb`
    #[prost(message, optional, tag = "12")]
    pub mongodb: Option<MongoDbDownloadOptions>,
    /// `send_messages`
    #[prost(message, optional, tag = "13")]
    pub payload: Option<LoggingPayload>,
    /// `logging_cache_create`
    #[prost(message, optional, tag = "14")]
    pub output: Option<OutputOptions>,
    /// `logging_cache_prune`
    #[prost(message, optional, tag = "15")]
    pub before: Option<Timestamp>,
}

/// Every response. Listings stream one process per frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcResponse {
    /// Success flag
    #[prost(bool, tag = "1")]
    pub ok: bool,
    /// Failure message
    #[prost(string, tag = "2")]
    pub errmsg: String,
    /// Failure kind
    #[prost(string, tag = "3")]
    pub code_name: String,
    /// `id`
    #[prost(string, tag = "4")]
    pub id: String,
    /// Single snapshot
    #[prost(message, optional, tag = "5")]
    pub info: Option<ProcessInfo>,
    /// Snapshots of a streamed listing
    #[prost(message, repeated, tag = "6")]
    pub infos: Vec<ProcessInfo>,
    /// `running`, `complete`
    #[prost(bool, tag = "7")]
    pub flag: bool,
    /// `wait`
    #[prost(int32, tag = "8")]
    pub exit_code: i32,
    /// `get_tags`
    #[prost(string, repeated, tag = "9")]
    pub tags: Vec<String>,
    /// `get_log_stream`
    #[prost(string, repeated, tag = "10")]
    pub logs: Vec<String>,
    /// `get_log_stream`
    #[prost(bool, tag = "11")]
    pub done: bool,
    /// `get_buildlogger_urls`
    #[prost(string, repeated, tag = "12")]
    pub urls: Vec<String>,
    /// Logging cache lookups
    #[prost(message, optional, tag = "13")]
    pub logger: Option<CachedLogger>,
    /// `logging_cache_size`
    #[prost(uint64, tag = "14")]
    pub size: u64,
}
