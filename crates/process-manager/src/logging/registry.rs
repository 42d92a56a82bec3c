//! Logger configurations and the process-wide table of sink kinds
//!
//! A [`LoggerConfig`] names a sink kind and carries that kind's options as
//! raw JSON or BSON bytes. Resolving a config looks the kind up in a global
//! registry that starts with the built-in kinds; more can be added at any
//! time with [`register_sink_kind`].

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use super::sink::{FileSink, InMemorySink, InheritSink, LogSink, TracingSink};
use crate::error::{Error, Result};

/// Kind name of the tracing-backed sink
pub const DEFAULT_KIND: &str = "default";
/// Kind name of the sink writing to this process's own stdout/stderr
pub const INHERIT_KIND: &str = "inherit";
/// Kind name of the file sink
pub const FILE_KIND: &str = "file";
/// Kind name of the in-memory sink
pub const IN_MEMORY_KIND: &str = "inmemory";
/// Kind name of build-logger sinks. Locally they forward to tracing under their `url`.
pub const BUILDLOGGER_KIND: &str = "buildlogger";

/// Encoding of [`LoggerConfig::config`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawLoggerConfigFormat {
    /// JSON document
    #[default]
    Json,
    /// BSON document
    Bson,
}

/// One configured logger: a sink kind plus its encoded options
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Registered sink kind
    #[serde(rename = "type")]
    pub kind: String,
    /// Encoding of `config`
    #[serde(default)]
    pub format: RawLoggerConfigFormat,
    /// Kind-specific options
    #[serde(default)]
    pub config: Vec<u8>,
}

impl LoggerConfig {
    /// Build a config by encoding `options` as JSON
    pub fn new<T: Serialize>(kind: impl Into<String>, options: &T) -> Result<Self> {
        let config = serde_json::to_vec(options).map_err(|e| Error::encode(e.to_string()))?;
        Ok(Self {
            kind: kind.into(),
            format: RawLoggerConfigFormat::Json,
            config,
        })
    }

    /// Build a config by encoding `options` as BSON
    pub fn new_bson<T: Serialize>(kind: impl Into<String>, options: &T) -> Result<Self> {
        let config = bson::to_vec(options).map_err(|e| Error::encode(e.to_string()))?;
        Ok(Self {
            kind: kind.into(),
            format: RawLoggerConfigFormat::Bson,
            config,
        })
    }

    /// The tracing-backed sink
    pub fn default_sink() -> Self {
        Self {
            kind: DEFAULT_KIND.to_string(),
            ..Self::default()
        }
    }

    /// This process's own stdout and stderr
    pub fn inherit() -> Self {
        Self {
            kind: INHERIT_KIND.to_string(),
            ..Self::default()
        }
    }

    /// An in-memory sink keeping `capacity` lines
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            kind: IN_MEMORY_KIND.to_string(),
            format: RawLoggerConfigFormat::Json,
            config: format!(r#"{{"in_memory_cap":{}}}"#, capacity).into_bytes(),
        }
    }

    /// A file sink appending to `filename`
    pub fn file(filename: impl Into<PathBuf>) -> Result<Self> {
        Self::new(
            FILE_KIND,
            &FileOptions {
                filename: filename.into(),
            },
        )
    }

    /// Decode the kind-specific options. Empty bytes decode as an empty document.
    pub fn decode_options<T: DeserializeOwned>(&self) -> Result<T> {
        match self.format {
            RawLoggerConfigFormat::Json => {
                let bytes: &[u8] = if self.config.is_empty() { b"{}" } else { &self.config };
                serde_json::from_slice(bytes).map_err(|e| {
                    Error::invalid(format!("invalid {} logger options: {}", self.kind, e))
                })
            }
            RawLoggerConfigFormat::Bson => {
                if self.config.is_empty() {
                    return bson::from_document(bson::Document::new()).map_err(|e| {
                        Error::invalid(format!("invalid {} logger options: {}", self.kind, e))
                    });
                }
                bson::from_slice(&self.config).map_err(|e| {
                    Error::invalid(format!("invalid {} logger options: {}", self.kind, e))
                })
            }
        }
    }

    /// Resolve into a sink through the global registry
    pub fn resolve(&self) -> Result<Arc<dyn LogSink>> {
        let factory = REGISTRY
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.kind)
            .cloned()
            .ok_or_else(|| Error::invalid(format!("unknown logger type '{}'", self.kind)))?;
        (*factory)(self)
    }
}

/// Options of the in-memory sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryOptions {
    /// Number of lines retained
    #[serde(default)]
    pub in_memory_cap: usize,
}

/// Options of the file sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileOptions {
    /// File to append to
    #[serde(default)]
    pub filename: PathBuf,
}

/// Options of a build-logger sink that matter locally
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildloggerOptions {
    /// Where the build logger posts
    #[serde(default)]
    pub url: String,
}

/// Builds a sink from a logger configuration
pub type SinkFactory = Arc<dyn Fn(&LoggerConfig) -> Result<Arc<dyn LogSink>> + Send + Sync>;

static REGISTRY: Lazy<RwLock<HashMap<String, SinkFactory>>> =
    Lazy::new(|| RwLock::new(builtin_kinds()));

fn builtin_kinds() -> HashMap<String, SinkFactory> {
    let mut kinds: HashMap<String, SinkFactory> = HashMap::new();
    kinds.insert(
        DEFAULT_KIND.to_string(),
        Arc::new(|_: &LoggerConfig| Ok(Arc::new(TracingSink::default()) as Arc<dyn LogSink>)),
    );
    kinds.insert(
        INHERIT_KIND.to_string(),
        Arc::new(|_: &LoggerConfig| Ok(Arc::new(InheritSink) as Arc<dyn LogSink>)),
    );
    kinds.insert(
        FILE_KIND.to_string(),
        Arc::new(|config: &LoggerConfig| {
            let options: FileOptions = config.decode_options()?;
            if options.filename.as_os_str().is_empty() {
                return Err(Error::invalid("file logger requires a filename"));
            }
            Ok(Arc::new(FileSink::open(&options.filename)?) as Arc<dyn LogSink>)
        }),
    );
    kinds.insert(
        IN_MEMORY_KIND.to_string(),
        Arc::new(|config: &LoggerConfig| {
            let options: InMemoryOptions = config.decode_options()?;
            Ok(Arc::new(InMemorySink::new(options.in_memory_cap)?) as Arc<dyn LogSink>)
        }),
    );
    kinds.insert(
        BUILDLOGGER_KIND.to_string(),
        Arc::new(|config: &LoggerConfig| {
            let options: BuildloggerOptions = config.decode_options()?;
            Ok(Arc::new(TracingSink::named(options.url)) as Arc<dyn LogSink>)
        }),
    );
    kinds
}

/// Register (or replace) a sink kind. Safe to call before or after first use.
pub fn register_sink_kind<F>(name: impl Into<String>, factory: F)
where
    F: Fn(&LoggerConfig) -> Result<Arc<dyn LogSink>> + Send + Sync + 'static,
{
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.into(), Arc::new(factory));
}

/// Names of all registered sink kinds, sorted
pub fn sink_kinds() -> Vec<String> {
    let mut kinds: Vec<String> = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    kinds.sort();
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::message::{LogMessage, Priority};

    #[test]
    fn test_builtin_kinds_registered() {
        let kinds = sink_kinds();
        for kind in [DEFAULT_KIND, INHERIT_KIND, FILE_KIND, IN_MEMORY_KIND, BUILDLOGGER_KIND] {
            assert!(kinds.iter().any(|k| k == kind), "missing {}", kind);
        }
    }

    #[test]
    fn test_in_memory_from_json_and_bson() {
        let sink = LoggerConfig::in_memory(5).resolve().unwrap();
        assert_eq!(sink.in_memory().unwrap().capacity(), 5);

        let config = LoggerConfig::new_bson(IN_MEMORY_KIND, &InMemoryOptions { in_memory_cap: 7 }).unwrap();
        let sink = config.resolve().unwrap();
        assert_eq!(sink.in_memory().unwrap().capacity(), 7);
    }

    #[test]
    fn test_unknown_kind_is_invalid() {
        let config = LoggerConfig {
            kind: "carrier-pigeon".into(),
            ..LoggerConfig::default()
        };
        let err = config.resolve().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_in_memory_requires_capacity() {
        let config = LoggerConfig {
            kind: IN_MEMORY_KIND.into(),
            ..LoggerConfig::default()
        };
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_register_custom_kind() {
        register_sink_kind("test-custom", |config: &LoggerConfig| {
            let options: InMemoryOptions = config.decode_options()?;
            Ok(Arc::new(InMemorySink::new(options.in_memory_cap + 1)?) as Arc<dyn LogSink>)
        });

        let config = LoggerConfig::new("test-custom", &InMemoryOptions { in_memory_cap: 1 }).unwrap();
        let sink = config.resolve().unwrap();
        sink.send(&LogMessage::text(Priority::Info, "x")).unwrap();
        assert_eq!(sink.in_memory().unwrap().capacity(), 2);
    }

    #[test]
    fn test_file_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proc.log");
        let sink = LoggerConfig::file(&path).unwrap().resolve().unwrap();
        sink.send(&LogMessage::text(Priority::Info, "to file")).unwrap();
        sink.close().unwrap();

        let mut written = String::new();
        for _ in 0..250 {
            written = std::fs::read_to_string(&path).unwrap();
            if !written.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(written, "to file\n");
    }
}
