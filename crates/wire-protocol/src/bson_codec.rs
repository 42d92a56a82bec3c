//! Command documents: requests and replies as single BSON documents.
//!
//! A request document names its command with its first key. When the command
//! addresses one thing (a process id, a tag, a filter) that thing is the
//! first key's value; otherwise the value is `1` and is ignored. Replies start
//! with `ok` and, on failure, carry `errmsg` and `codeName`.
//!
//! Shell clients send every number as a double, so integer fields accept
//! `int32`, `int64` or integral `double` values.

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document, doc};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::command::{CommandName, ReplyKind};
use crate::error::{Error, Result};
use crate::message::{Reply, Request, Response};
use process_manager::{LogStream, WriteFileInfo};

/// Name of the command a document invokes
pub fn command_name(document: &Document) -> Result<&str> {
    document
        .keys()
        .next()
        .map(String::as_str)
        .ok_or(Error::EmptyDocument)
}

/// Encode a request as a command document
pub fn encode_request(request: &Request) -> Result<Document> {
    let name = request.command().as_str();
    let document = match request {
        Request::Id
        | Request::Clear
        | Request::Close
        | Request::LoggingCacheClear
        | Request::LoggingCacheSize => doc! { name: 1 },
        Request::CreateProcess(options) => doc! { name: 1, "options": to_bson(options)? },
        Request::List(filter) => doc! { name: filter.as_str() },
        Request::Group(tag) => doc! { name: tag.as_str() },
        Request::Get(id)
        | Request::GetBuildloggerUrls(id)
        | Request::Info(id)
        | Request::Running(id)
        | Request::Complete(id)
        | Request::Wait(id)
        | Request::Respawn(id)
        | Request::GetTags(id)
        | Request::ResetTags(id)
        | Request::LoggingCacheGet(id)
        | Request::LoggingCacheRemove(id)
        | Request::LoggingCacheCloseAndRemove(id) => doc! { name: id.as_str() },
        Request::WriteFile(info) => doc! {
            name: info.path.as_str(),
            "content": binary(&info.content),
            "append": info.append,
            "perm": i64::from(info.perm),
        },
        Request::ConfigureCache(options) => doc! { name: 1, "options": to_bson(options)? },
        Request::DownloadFile(info) => doc! { name: 1, "info": to_bson(info)? },
        Request::DownloadMongodb(options) => doc! { name: 1, "options": to_bson(options)? },
        Request::GetLogStream { id, count } => doc! { name: id.as_str(), "count": *count as i64 },
        Request::SignalEvent(event) => doc! { name: event.as_str() },
        Request::SendMessages(payload) => doc! { name: 1, "payload": to_bson(payload)? },
        Request::Signal { id, signal } => doc! { name: id.as_str(), "signal_number": *signal },
        Request::RegisterSignalTriggerId { id, trigger } => {
            doc! { name: id.as_str(), "trigger": trigger.as_str() }
        }
        Request::Tag { id, tag } => doc! { name: id.as_str(), "value": tag.as_str() },
        Request::LoggingCacheCreate { id, output } => {
            doc! { name: id.as_str(), "options": to_bson(output)? }
        }
        Request::LoggingCachePrune(before) => doc! {
            name: 1,
            "before": before.to_rfc3339_opts(SecondsFormat::Nanos, true),
        },
    };
    Ok(document)
}

/// Decode a command document into a request
pub fn decode_request(document: &Document) -> Result<Request> {
    let name = command_name(document)?;
    let command: CommandName = name.parse()?;
    let fields = Fields { command, document };

    let request = match command {
        CommandName::Id => Request::Id,
        CommandName::Clear => Request::Clear,
        CommandName::Close => Request::Close,
        CommandName::LoggingCacheClear => Request::LoggingCacheClear,
        CommandName::LoggingCacheSize => Request::LoggingCacheSize,
        CommandName::CreateProcess => Request::CreateProcess(fields.value("options")?),
        CommandName::List => Request::List(
            fields
                .arg()?
                .parse()
                .map_err(|e: process_manager::Error| Error::invalid(name, "filter", e.to_string()))?,
        ),
        CommandName::Group => Request::Group(fields.arg()?),
        CommandName::Get => Request::Get(fields.arg()?),
        CommandName::GetBuildloggerUrls => Request::GetBuildloggerUrls(fields.arg()?),
        CommandName::Info => Request::Info(fields.arg()?),
        CommandName::Running => Request::Running(fields.arg()?),
        CommandName::Complete => Request::Complete(fields.arg()?),
        CommandName::Wait => Request::Wait(fields.arg()?),
        CommandName::Respawn => Request::Respawn(fields.arg()?),
        CommandName::GetTags => Request::GetTags(fields.arg()?),
        CommandName::ResetTags => Request::ResetTags(fields.arg()?),
        CommandName::LoggingCacheGet => Request::LoggingCacheGet(fields.arg()?),
        CommandName::LoggingCacheRemove => Request::LoggingCacheRemove(fields.arg()?),
        CommandName::LoggingCacheCloseAndRemove => {
            Request::LoggingCacheCloseAndRemove(fields.arg()?)
        }
        CommandName::WriteFile => Request::WriteFile(WriteFileInfo {
            path: fields.arg()?,
            content: fields.bytes("content")?,
            append: fields.optional_bool("append")?.unwrap_or(false),
            perm: fields
                .optional_int("perm")?
                .map(|perm| u32::try_from(perm).map_err(|e| Error::invalid(name, "perm", e.to_string())))
                .transpose()?
                .unwrap_or(0),
        }),
        CommandName::ConfigureCache => Request::ConfigureCache(fields.value("options")?),
        CommandName::DownloadFile => Request::DownloadFile(fields.value("info")?),
        CommandName::DownloadMongodb => Request::DownloadMongodb(fields.value("options")?),
        CommandName::GetLogStream => Request::GetLogStream {
            id: fields.arg()?,
            count: usize::try_from(fields.int("count")?)
                .map_err(|e| Error::invalid(name, "count", e.to_string()))?,
        },
        CommandName::SignalEvent => Request::SignalEvent(fields.arg()?),
        CommandName::SendMessages => Request::SendMessages(fields.value("payload")?),
        CommandName::Signal => Request::Signal {
            id: fields.arg()?,
            signal: i32::try_from(fields.int("signal_number")?)
                .map_err(|e| Error::invalid(name, "signal_number", e.to_string()))?,
        },
        CommandName::RegisterSignalTriggerId => Request::RegisterSignalTriggerId {
            id: fields.arg()?,
            trigger: fields
                .string("trigger")?
                .parse()
                .map_err(|e: process_manager::Error| Error::invalid(name, "trigger", e.to_string()))?,
        },
        CommandName::Tag => Request::Tag {
            id: fields.arg()?,
            tag: fields.string("value")?,
        },
        CommandName::LoggingCacheCreate => Request::LoggingCacheCreate {
            id: fields.arg()?,
            output: fields.value("options")?,
        },
        CommandName::LoggingCachePrune => Request::LoggingCachePrune(fields.timestamp("before")?),
    };
    Ok(request)
}

/// Encode the reply to `command`
pub fn encode_response(command: CommandName, response: &Response) -> Result<Document> {
    let ok = if response.ok { 1.0 } else { 0.0 };
    let mut document = doc! { "ok": ok };
    if !response.ok {
        document.insert("errmsg", response.errmsg.as_str());
        document.insert("codeName", response.code_name.as_str());
        return Ok(document);
    }

    match &response.reply {
        Reply::Empty => {}
        Reply::Id(id) => {
            document.insert("id", id.as_str());
        }
        Reply::Info(info) => {
            document.insert("info", to_bson(info.as_ref())?);
        }
        Reply::Infos(infos) => {
            let infos = infos.iter().map(to_bson).collect::<Result<Vec<_>>>()?;
            document.insert("infos", infos);
        }
        Reply::Flag(flag) => {
            document.insert(command.as_str(), *flag);
        }
        Reply::ExitCode(code) => {
            document.insert("exit_code", *code);
        }
        Reply::Tags(tags) => {
            document.insert("tags", tags.clone());
        }
        Reply::LogStream(stream) => {
            document.insert("logs", stream.logs.clone());
            document.insert("done", stream.done);
        }
        Reply::Urls(urls) => {
            document.insert("urls", urls.clone());
        }
        Reply::Logger(logger) => {
            document.insert("logger", to_bson(logger)?);
        }
        Reply::Size(size) => {
            document.insert("size", *size as i64);
        }
    }
    Ok(document)
}

/// Decode the reply to `command`
pub fn decode_response(command: CommandName, document: &Document) -> Result<Response> {
    let fields = Fields { command, document };
    let ok = match document.get("ok") {
        Some(Bson::Boolean(ok)) => *ok,
        Some(value) => as_int(value).map(|ok| ok != 0).ok_or_else(|| {
            Error::invalid(command.as_str(), "ok", format!("unexpected value {}", value))
        })?,
        None => return Err(Error::missing(command.as_str(), "ok")),
    };
    if !ok {
        return Ok(Response {
            ok,
            errmsg: fields.optional_string("errmsg")?.unwrap_or_default(),
            code_name: fields.optional_string("codeName")?.unwrap_or_default(),
            reply: Reply::Empty,
        });
    }

    let reply = match command.reply_kind() {
        ReplyKind::Empty => Reply::Empty,
        ReplyKind::Id => Reply::Id(fields.string("id")?),
        ReplyKind::Info => Reply::Info(Box::new(fields.value("info")?)),
        ReplyKind::Infos => Reply::Infos(fields.value("infos")?),
        ReplyKind::Flag => Reply::Flag(fields.bool(command.as_str())?),
        ReplyKind::ExitCode => Reply::ExitCode(
            i32::try_from(fields.int("exit_code")?)
                .map_err(|e| Error::invalid(command.as_str(), "exit_code", e.to_string()))?,
        ),
        ReplyKind::Tags => Reply::Tags(fields.value("tags")?),
        ReplyKind::LogStream => Reply::LogStream(LogStream {
            logs: fields.value("logs")?,
            done: fields.bool("done")?,
        }),
        ReplyKind::Urls => Reply::Urls(fields.value("urls")?),
        ReplyKind::Logger => Reply::Logger(fields.value("logger")?),
        ReplyKind::Size => Reply::Size(
            usize::try_from(fields.int("size")?)
                .map_err(|e| Error::invalid(command.as_str(), "size", e.to_string()))?,
        ),
    };
    Ok(Response::success(reply))
}

fn to_bson<T: Serialize>(value: &T) -> Result<Bson> {
    Ok(bson::to_bson(value)?)
}

fn binary(bytes: &[u8]) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::Generic,
        bytes: bytes.to_vec(),
    })
}

/// Integer view of a numeric value; doubles must be integral
fn as_int(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(d) if d.is_finite() && d.fract() == 0.0 && d.abs() < 9.0e15 => Some(*d as i64),
        _ => None,
    }
}

/// Rewrite integral doubles as integers so they decode into integer fields
fn normalize(value: Bson) -> Bson {
    match value {
        Bson::Double(_) => as_int(&value).map(Bson::Int64).unwrap_or(value),
        Bson::Document(document) => {
            Bson::Document(document.into_iter().map(|(k, v)| (k, normalize(v))).collect())
        }
        Bson::Array(values) => Bson::Array(values.into_iter().map(normalize).collect()),
        other => other,
    }
}

struct Fields<'a> {
    command: CommandName,
    document: &'a Document,
}

impl Fields<'_> {
    fn name(&self) -> &'static str {
        self.command.as_str()
    }

    fn get(&self, field: &'static str) -> Result<&Bson> {
        self.document
            .get(field)
            .ok_or_else(|| Error::missing(self.name(), field))
    }

    /// The first key's value as a string
    fn arg(&self) -> Result<String> {
        match self.document.get(self.name()) {
            Some(Bson::String(value)) => Ok(value.clone()),
            Some(other) => Err(Error::invalid(
                self.name(),
                "argument",
                format!("expected a string, found {:?}", other.element_type()),
            )),
            None => Err(Error::missing(self.name(), "argument")),
        }
    }

    fn string(&self, field: &'static str) -> Result<String> {
        self.optional_string(field)?
            .ok_or_else(|| Error::missing(self.name(), field))
    }

    fn optional_string(&self, field: &'static str) -> Result<Option<String>> {
        match self.document.get(field) {
            None | Some(Bson::Null) => Ok(None),
            Some(Bson::String(value)) => Ok(Some(value.clone())),
            Some(_) => Err(Error::invalid(self.name(), field, "expected a string")),
        }
    }

    fn int(&self, field: &'static str) -> Result<i64> {
        self.optional_int(field)?
            .ok_or_else(|| Error::missing(self.name(), field))
    }

    fn optional_int(&self, field: &'static str) -> Result<Option<i64>> {
        match self.document.get(field) {
            None | Some(Bson::Null) => Ok(None),
            Some(value) => as_int(value)
                .map(Some)
                .ok_or_else(|| Error::invalid(self.name(), field, "expected an integer")),
        }
    }

    fn bool(&self, field: &'static str) -> Result<bool> {
        self.optional_bool(field)?
            .ok_or_else(|| Error::missing(self.name(), field))
    }

    fn optional_bool(&self, field: &'static str) -> Result<Option<bool>> {
        match self.document.get(field) {
            None | Some(Bson::Null) => Ok(None),
            Some(Bson::Boolean(value)) => Ok(Some(*value)),
            Some(value) => as_int(value)
                .map(|n| Some(n != 0))
                .ok_or_else(|| Error::invalid(self.name(), field, "expected a boolean")),
        }
    }

    fn bytes(&self, field: &'static str) -> Result<Vec<u8>> {
        match self.document.get(field) {
            None | Some(Bson::Null) => Ok(Vec::new()),
            Some(Bson::Binary(binary)) => Ok(binary.bytes.clone()),
            Some(Bson::String(text)) => Ok(text.clone().into_bytes()),
            Some(_) => Err(Error::invalid(self.name(), field, "expected binary data")),
        }
    }

    fn timestamp(&self, field: &'static str) -> Result<DateTime<Utc>> {
        match self.get(field)? {
            Bson::String(text) => DateTime::parse_from_rfc3339(text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::invalid(self.name(), field, e.to_string())),
            Bson::DateTime(at) => DateTime::from_timestamp_millis(at.timestamp_millis())
                .ok_or_else(|| Error::invalid(self.name(), field, "timestamp out of range")),
            _ => Err(Error::invalid(self.name(), field, "expected a timestamp")),
        }
    }

    fn value<T: DeserializeOwned>(&self, field: &'static str) -> Result<T> {
        let value = normalize(self.get(field)?.clone());
        bson::from_bson(value).map_err(|e| Error::invalid(self.name(), field, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use process_manager::logging::{CacheOptions, LoggerConfig, OutputOptions};
    use process_manager::{CreateOptions, Filter, SignalTriggerId};
    use std::time::Duration;

    fn round_trip(request: Request) {
        let document = encode_request(&request).unwrap();
        assert_eq!(command_name(&document).unwrap(), request.command().as_str());
        assert_eq!(decode_request(&document).unwrap(), request);
    }

    #[test]
    fn test_requests_survive_encoding() {
        let mut options = CreateOptions::new(["bash", "-s"]).with_tag("t");
        options.standard_input_bytes = Some(b"echo foobar".to_vec());
        options.timeout = Duration::from_millis(1500);
        options.output = OutputOptions::with_loggers(vec![LoggerConfig::in_memory(100)]);
        options.on_failure = vec![CreateOptions::new(["true"])];
        round_trip(Request::CreateProcess(options));

        round_trip(Request::List(Filter::Running));
        round_trip(Request::Signal {
            id: "p1".into(),
            signal: 9,
        });
        round_trip(Request::RegisterSignalTriggerId {
            id: "p1".into(),
            trigger: SignalTriggerId::CleanTermination,
        });
        round_trip(Request::WriteFile(WriteFileInfo {
            path: "/tmp/x".into(),
            content: vec![0, 1, 2, 255],
            append: true,
            perm: 0o644,
        }));
        round_trip(Request::ConfigureCache(CacheOptions {
            disabled: false,
            max_size: 10,
            prune_delay_secs: 60,
        }));
        round_trip(Request::GetLogStream {
            id: "p1".into(),
            count: 25,
        });
        round_trip(Request::LoggingCachePrune(Utc::now()));
        round_trip(Request::Close);
    }

    #[test]
    fn test_command_is_first_key() {
        let document = doc! { "signal": "p1", "signal_number": 15 };
        assert_eq!(command_name(&document).unwrap(), "signal");
        assert!(command_name(&Document::new()).is_err());
    }

    #[test]
    fn test_integers_may_arrive_as_doubles() {
        let document = doc! { "get_log_stream": "p1", "count": 10.0 };
        assert_eq!(
            decode_request(&document).unwrap(),
            Request::GetLogStream {
                id: "p1".into(),
                count: 10
            }
        );

        let document = doc! {
            "configure_cache": 1.0,
            "options": { "max_size": 5.0, "prune_delay_secs": 30.0 },
        };
        let Request::ConfigureCache(options) = decode_request(&document).unwrap() else {
            panic!("wrong request");
        };
        assert_eq!(options.max_size, 5);
        assert_eq!(options.prune_delay_secs, 30);

        let document = doc! { "signal": "p1", "signal_number": 9.5 };
        assert!(decode_request(&document).is_err());
    }

    #[test]
    fn test_unknown_and_incomplete_commands() {
        assert!(matches!(
            decode_request(&doc! { "shutdown": 1 }),
            Err(Error::UnknownCommand(name)) if name == "shutdown"
        ));
        assert!(matches!(
            decode_request(&doc! { "signal": "p1" }),
            Err(Error::MissingField { field: "signal_number", .. })
        ));
        assert!(decode_request(&doc! { "info": 1 }).is_err());
    }

    #[test]
    fn test_replies_survive_encoding() {
        let cases = [
            (CommandName::Id, Reply::Id("m1".into())),
            (CommandName::Running, Reply::Flag(true)),
            (CommandName::Wait, Reply::ExitCode(9)),
            (CommandName::GetTags, Reply::Tags(vec!["a".into(), "b".into()])),
            (
                CommandName::GetLogStream,
                Reply::LogStream(LogStream {
                    logs: vec!["hello".into()],
                    done: true,
                }),
            ),
            (CommandName::LoggingCacheSize, Reply::Size(3)),
            (CommandName::Clear, Reply::Empty),
        ];
        for (command, reply) in cases {
            let response = Response::success(reply);
            let document = encode_response(command, &response).unwrap();
            assert_eq!(decode_response(command, &document).unwrap(), response);
        }
    }

    #[test]
    fn test_failure_reply_shape() {
        let error = process_manager::Error::not_found("no process 'p9'");
        let document = encode_response(CommandName::Info, &Response::failure(&error)).unwrap();
        assert_eq!(document.get_f64("ok").unwrap(), 0.0);
        assert_eq!(document.get_str("codeName").unwrap(), "NotFound");

        let response = decode_response(CommandName::Info, &document).unwrap();
        let err = response.into_result().unwrap_err();
        assert_eq!(err.kind(), process_manager::ErrorKind::NotFound);
    }

    #[test]
    fn test_ok_accepts_integer_and_boolean() {
        let response = decode_response(CommandName::Clear, &doc! { "ok": 1 }).unwrap();
        assert!(response.ok);
        let response = decode_response(CommandName::Clear, &doc! { "ok": true }).unwrap();
        assert!(response.ok);
        assert!(decode_response(CommandName::Clear, &doc! {}).is_err());
    }
}
