//! Conversions between domain types and their protobuf messages
//!
//! Protobuf has no "absent" for scalars, so zero values stand for defaults:
//! a missing `output` is the default routing, a missing `timeout` is no
//! timeout and a missing `target` runs locally.

use chrono::{DateTime, Utc};
use command_executor::Platform;
use command_executor::backends::{DockerConfig, SshConfig};
use process_manager::logging::{
    CacheOptions, CachedLogger, LoggerConfig, LoggingPayload, OutputOptions, PayloadData, PayloadFormat,
    Priority, RawLoggerConfigFormat,
};
use process_manager::{
    CreateOptions, Filter, ImplementationHint, ProcessInfo, SignalTriggerId, Target, WriteFileInfo,
};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::message::{ArchiveFormat, ArchiveOptions, DownloadInfo, MongoDbDownloadOptions};
use crate::proto;

fn decode_error(message: &'static str, field: &'static str, reason: impl Into<String>) -> Error {
    Error::invalid(message, field, reason)
}

/// A timestamp message for `at`
pub fn timestamp(at: &DateTime<Utc>) -> proto::Timestamp {
    proto::Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos(),
    }
}

/// The moment a timestamp message names
pub fn datetime(at: proto::Timestamp) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(at.seconds, at.nanos)
        .ok_or_else(|| decode_error("Timestamp", "seconds", "out of range"))
}

impl From<Filter> for proto::FilterSpecifications {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::All => proto::FilterSpecifications::All,
            Filter::Running => proto::FilterSpecifications::Running,
            Filter::Terminated => proto::FilterSpecifications::Terminated,
            Filter::Successful => proto::FilterSpecifications::Successful,
            Filter::Failed => proto::FilterSpecifications::Failed,
        }
    }
}

/// Domain filter for a raw enum value
pub fn filter(value: i32) -> Result<Filter> {
    let spec = proto::FilterSpecifications::try_from(value)
        .map_err(|e| decode_error("RpcRequest", "filter", e.to_string()))?;
    Ok(match spec {
        proto::FilterSpecifications::All => Filter::All,
        proto::FilterSpecifications::Running => Filter::Running,
        proto::FilterSpecifications::Terminated => Filter::Terminated,
        proto::FilterSpecifications::Successful => Filter::Successful,
        proto::FilterSpecifications::Failed => Filter::Failed,
    })
}

impl From<SignalTriggerId> for proto::SignalTriggerId {
    fn from(id: SignalTriggerId) -> Self {
        match id {
            SignalTriggerId::CleanTermination => proto::SignalTriggerId::CleanTermination,
        }
    }
}

/// Domain trigger id for a raw enum value
pub fn signal_trigger_id(value: i32) -> Result<SignalTriggerId> {
    match proto::SignalTriggerId::try_from(value) {
        Ok(proto::SignalTriggerId::CleanTermination) => Ok(SignalTriggerId::CleanTermination),
        Ok(proto::SignalTriggerId::Unspecified) => Err(Error::missing("RpcRequest", "trigger")),
        Err(e) => Err(decode_error("RpcRequest", "trigger", e.to_string())),
    }
}

fn platform_name(platform: Platform) -> String {
    platform.to_string()
}

fn platform(name: &str) -> Result<Platform> {
    match name {
        "" | "linux" => Ok(Platform::Linux),
        "darwin" => Ok(Platform::Darwin),
        "windows" => Ok(Platform::Windows),
        other => Err(decode_error("Target", "platform", format!("unknown platform '{}'", other))),
    }
}

impl From<&Target> for proto::Target {
    fn from(target: &Target) -> Self {
        match target {
            Target::Local => proto::Target {
                kind: "local".into(),
                ..Default::default()
            },
            Target::Docker(config) => proto::Target {
                kind: "docker".into(),
                image: config.image.clone(),
                pull: config.pull,
                platform: platform_name(config.platform),
                ..Default::default()
            },
            Target::Ssh(config) => proto::Target {
                kind: "ssh".into(),
                host: config.host.clone(),
                user: config.user.clone(),
                port: config.port.map(u32::from),
                identity_file: config
                    .identity_file
                    .as_ref()
                    .map(|path| path.to_string_lossy().into_owned()),
                extra_args: config.extra_args.clone(),
                ..Default::default()
            },
        }
    }
}

impl TryFrom<proto::Target> for Target {
    type Error = Error;

    fn try_from(target: proto::Target) -> Result<Self> {
        match target.kind.as_str() {
            "" | "local" => Ok(Target::Local),
            "docker" => Ok(Target::Docker(
                DockerConfig::new(target.image)
                    .with_pull(target.pull)
                    .with_platform(platform(&target.platform)?),
            )),
            "ssh" => {
                let mut config = SshConfig::new(target.host);
                config.user = target.user;
                config.port = target
                    .port
                    .map(u16::try_from)
                    .transpose()
                    .map_err(|e| decode_error("Target", "port", e.to_string()))?;
                config.identity_file = target.identity_file.map(PathBuf::from);
                config.extra_args = target.extra_args;
                Ok(Target::Ssh(config))
            }
            other => Err(decode_error("Target", "kind", format!("unknown target '{}'", other))),
        }
    }
}

impl From<&LoggerConfig> for proto::LoggerConfig {
    fn from(config: &LoggerConfig) -> Self {
        let format = match config.format {
            RawLoggerConfigFormat::Json => proto::RawLoggerConfigFormat::Json,
            RawLoggerConfigFormat::Bson => proto::RawLoggerConfigFormat::Bson,
        };
        proto::LoggerConfig {
            kind: config.kind.clone(),
            format: format.into(),
            config: config.config.clone(),
        }
    }
}

impl TryFrom<proto::LoggerConfig> for LoggerConfig {
    type Error = Error;

    fn try_from(config: proto::LoggerConfig) -> Result<Self> {
        let format = match proto::RawLoggerConfigFormat::try_from(config.format) {
            Ok(proto::RawLoggerConfigFormat::Json) => RawLoggerConfigFormat::Json,
            Ok(proto::RawLoggerConfigFormat::Bson) => RawLoggerConfigFormat::Bson,
            Err(e) => return Err(decode_error("LoggerConfig", "format", e.to_string())),
        };
        Ok(LoggerConfig {
            kind: config.kind,
            format,
            config: config.config,
        })
    }
}

impl From<&OutputOptions> for proto::OutputOptions {
    fn from(output: &OutputOptions) -> Self {
        proto::OutputOptions {
            suppress_output: output.suppress_output,
            suppress_error: output.suppress_error,
            send_output_to_error: output.send_output_to_error,
            send_error_to_output: output.send_error_to_output,
            loggers: output.loggers.iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<proto::OutputOptions> for OutputOptions {
    type Error = Error;

    fn try_from(output: proto::OutputOptions) -> Result<Self> {
        Ok(OutputOptions {
            suppress_output: output.suppress_output,
            suppress_error: output.suppress_error,
            send_output_to_error: output.send_output_to_error,
            send_error_to_output: output.send_error_to_output,
            loggers: output
                .loggers
                .into_iter()
                .map(TryInto::try_into)
                .collect::<Result<_>>()?,
        })
    }
}

impl From<&CreateOptions> for proto::CreateOptions {
    fn from(options: &CreateOptions) -> Self {
        let implementation = match options.implementation {
            ImplementationHint::Default => proto::ImplementationHint::Default,
            ImplementationHint::Basic => proto::ImplementationHint::Basic,
            ImplementationHint::Blocking => proto::ImplementationHint::Blocking,
        };
        let follow_ups = |list: &[CreateOptions]| list.iter().map(Into::into).collect();
        proto::CreateOptions {
            args: options.args.clone(),
            environment: options.environment.clone(),
            override_environ: options.override_environ,
            working_directory: options.working_directory.clone(),
            standard_input_bytes: options.standard_input_bytes.clone(),
            output: Some((&options.output).into()),
            timeout: (!options.timeout.is_zero()).then(|| proto::Duration {
                seconds: options.timeout.as_secs(),
                nanos: options.timeout.subsec_nanos(),
            }),
            timeout_secs: options.timeout_secs,
            tags: options.tags.clone(),
            on_success: follow_ups(&options.on_success),
            on_failure: follow_ups(&options.on_failure),
            on_timeout: follow_ups(&options.on_timeout),
            implementation: implementation.into(),
            target: Some((&options.target).into()),
            process_group: options.process_group,
        }
    }
}

impl TryFrom<proto::CreateOptions> for CreateOptions {
    type Error = Error;

    fn try_from(options: proto::CreateOptions) -> Result<Self> {
        let implementation = match proto::ImplementationHint::try_from(options.implementation) {
            Ok(proto::ImplementationHint::Default) => ImplementationHint::Default,
            Ok(proto::ImplementationHint::Basic) => ImplementationHint::Basic,
            Ok(proto::ImplementationHint::Blocking) => ImplementationHint::Blocking,
            Err(e) => return Err(decode_error("CreateOptions", "implementation", e.to_string())),
        };
        let follow_ups = |list: Vec<proto::CreateOptions>| -> Result<Vec<CreateOptions>> {
            list.into_iter().map(TryInto::try_into).collect()
        };
        Ok(CreateOptions {
            args: options.args,
            environment: options.environment,
            override_environ: options.override_environ,
            working_directory: options.working_directory,
            standard_input_bytes: options.standard_input_bytes,
            standard_input: None,
            output: options.output.map(TryInto::try_into).transpose()?.unwrap_or_default(),
            timeout: options
                .timeout
                .map(|t| std::time::Duration::new(t.seconds, t.nanos))
                .unwrap_or_default(),
            timeout_secs: options.timeout_secs,
            tags: options.tags,
            on_success: follow_ups(options.on_success)?,
            on_failure: follow_ups(options.on_failure)?,
            on_timeout: follow_ups(options.on_timeout)?,
            implementation,
            target: options.target.map(TryInto::try_into).transpose()?.unwrap_or_default(),
            process_group: options.process_group,
        })
    }
}

impl From<&ProcessInfo> for proto::ProcessInfo {
    fn from(info: &ProcessInfo) -> Self {
        proto::ProcessInfo {
            id: info.id.clone(),
            pid: info.pid,
            is_running: info.is_running,
            complete: info.complete,
            successful: info.successful,
            exit_code: info.exit_code,
            timed_out: info.timed_out,
            signaled: info.signaled,
            signal: info.signal,
            start_at: info.start_at.as_ref().map(timestamp),
            end_at: info.end_at.as_ref().map(timestamp),
            options: Some((&info.options).into()),
        }
    }
}

impl TryFrom<proto::ProcessInfo> for ProcessInfo {
    type Error = Error;

    fn try_from(info: proto::ProcessInfo) -> Result<Self> {
        Ok(ProcessInfo {
            id: info.id,
            pid: info.pid,
            is_running: info.is_running,
            complete: info.complete,
            successful: info.successful,
            exit_code: info.exit_code,
            timed_out: info.timed_out,
            signaled: info.signaled,
            signal: info.signal,
            start_at: info.start_at.map(datetime).transpose()?,
            end_at: info.end_at.map(datetime).transpose()?,
            options: info.options.map(TryInto::try_into).transpose()?.unwrap_or_default(),
        })
    }
}

impl From<&WriteFileInfo> for proto::WriteFileInfo {
    fn from(info: &WriteFileInfo) -> Self {
        proto::WriteFileInfo {
            path: info.path.clone(),
            content: info.content.clone(),
            append: info.append,
            perm: info.perm,
        }
    }
}

impl From<proto::WriteFileInfo> for WriteFileInfo {
    fn from(info: proto::WriteFileInfo) -> Self {
        WriteFileInfo {
            path: info.path,
            content: info.content,
            append: info.append,
            perm: info.perm,
        }
    }
}

impl From<&CacheOptions> for proto::CacheOptions {
    fn from(options: &CacheOptions) -> Self {
        proto::CacheOptions {
            disabled: options.disabled,
            max_size: options.max_size,
            prune_delay_secs: options.prune_delay_secs,
        }
    }
}

impl From<proto::CacheOptions> for CacheOptions {
    fn from(options: proto::CacheOptions) -> Self {
        CacheOptions {
            disabled: options.disabled,
            max_size: options.max_size,
            prune_delay_secs: options.prune_delay_secs,
        }
    }
}

impl From<&DownloadInfo> for proto::DownloadInfo {
    fn from(info: &DownloadInfo) -> Self {
        proto::DownloadInfo {
            url: info.url.clone(),
            path: info.path.clone(),
            archive: info.archive.as_ref().map(|archive| {
                let format = match archive.format {
                    ArchiveFormat::Auto => proto::ArchiveFormat::Auto,
                    ArchiveFormat::Tarball => proto::ArchiveFormat::Tarball,
                    ArchiveFormat::Zip => proto::ArchiveFormat::Zip,
                };
                proto::ArchiveOptions {
                    format: format.into(),
                    target_path: archive.target_path.clone(),
                }
            }),
        }
    }
}

impl TryFrom<proto::DownloadInfo> for DownloadInfo {
    type Error = Error;

    fn try_from(info: proto::DownloadInfo) -> Result<Self> {
        let archive = match info.archive {
            None => None,
            Some(archive) => {
                let format = match proto::ArchiveFormat::try_from(archive.format) {
                    Ok(proto::ArchiveFormat::Auto) => ArchiveFormat::Auto,
                    Ok(proto::ArchiveFormat::Tarball) => ArchiveFormat::Tarball,
                    Ok(proto::ArchiveFormat::Zip) => ArchiveFormat::Zip,
                    Err(e) => return Err(decode_error("ArchiveOptions", "format", e.to_string())),
                };
                Some(ArchiveOptions {
                    format,
                    target_path: archive.target_path,
                })
            }
        };
        Ok(DownloadInfo {
            url: info.url,
            path: info.path,
            archive,
        })
    }
}

impl From<&MongoDbDownloadOptions> for proto::MongoDbDownloadOptions {
    fn from(options: &MongoDbDownloadOptions) -> Self {
        proto::MongoDbDownloadOptions {
            version: options.version.clone(),
            platform: options.platform.clone(),
            arch: options.arch.clone(),
            edition: options.edition.clone(),
            path: options.path.clone(),
            create_dir: options.create_dir,
        }
    }
}

impl From<proto::MongoDbDownloadOptions> for MongoDbDownloadOptions {
    fn from(options: proto::MongoDbDownloadOptions) -> Self {
        MongoDbDownloadOptions {
            version: options.version,
            platform: options.platform,
            arch: options.arch,
            edition: options.edition,
            path: options.path,
            create_dir: options.create_dir,
        }
    }
}

impl TryFrom<&LoggingPayload> for proto::LoggingPayload {
    type Error = Error;

    fn try_from(payload: &LoggingPayload) -> Result<Self> {
        let data = match &payload.data {
            PayloadData::Text(text) => proto::PayloadData::Text(text.clone()),
            PayloadData::Bytes(bytes) => proto::PayloadData::Bytes(bytes.clone()),
            PayloadData::TextList(values) => proto::PayloadData::TextList(proto::StringList {
                values: values.clone(),
            }),
            PayloadData::BytesList(values) => proto::PayloadData::BytesList(proto::BytesList {
                values: values.clone(),
            }),
            PayloadData::Messages(_) => {
                return Err(Error::Unencodable("prebuilt log messages".into()));
            }
        };
        let format = match payload.format {
            PayloadFormat::String => proto::PayloadFormat::String,
            PayloadFormat::Json => proto::PayloadFormat::Json,
            PayloadFormat::Bson => proto::PayloadFormat::Bson,
        };
        Ok(proto::LoggingPayload {
            logger_id: payload.logger_id.clone(),
            priority: payload.priority.into(),
            is_multi: payload.is_multi,
            prefer_send_to_error: payload.prefer_send_to_error,
            add_metadata: payload.add_metadata,
            format: format.into(),
            data: Some(data),
        })
    }
}

impl TryFrom<proto::LoggingPayload> for LoggingPayload {
    type Error = Error;

    fn try_from(payload: proto::LoggingPayload) -> Result<Self> {
        let data = match payload.data {
            Some(proto::PayloadData::Text(text)) => PayloadData::Text(text),
            Some(proto::PayloadData::Bytes(bytes)) => PayloadData::Bytes(bytes),
            Some(proto::PayloadData::TextList(list)) => PayloadData::TextList(list.values),
            Some(proto::PayloadData::BytesList(list)) => PayloadData::BytesList(list.values),
            None => return Err(Error::missing("LoggingPayload", "data")),
        };
        let format = match proto::PayloadFormat::try_from(payload.format) {
            Ok(proto::PayloadFormat::String) => PayloadFormat::String,
            Ok(proto::PayloadFormat::Json) => PayloadFormat::Json,
            Ok(proto::PayloadFormat::Bson) => PayloadFormat::Bson,
            Err(e) => return Err(decode_error("LoggingPayload", "format", e.to_string())),
        };
        Ok(LoggingPayload {
            logger_id: payload.logger_id,
            data,
            priority: Priority::try_from(payload.priority)
                .map_err(|e| decode_error("LoggingPayload", "priority", e.to_string()))?,
            is_multi: payload.is_multi,
            prefer_send_to_error: payload.prefer_send_to_error,
            add_metadata: payload.add_metadata,
            format,
        })
    }
}

impl From<&CachedLogger> for proto::CachedLogger {
    fn from(logger: &CachedLogger) -> Self {
        proto::CachedLogger {
            id: logger.id.clone(),
            manager_id: logger.manager_id.clone(),
            accessed: Some(timestamp(&logger.accessed)),
        }
    }
}

impl TryFrom<proto::CachedLogger> for CachedLogger {
    type Error = Error;

    fn try_from(logger: proto::CachedLogger) -> Result<Self> {
        let accessed = logger
            .accessed
            .ok_or_else(|| Error::missing("CachedLogger", "accessed"))?;
        Ok(CachedLogger {
            id: logger.id,
            manager_id: logger.manager_id,
            accessed: datetime(accessed)?,
        })
    }
}
