//! Log sinks, output routing and the logging cache

pub mod cache;
pub mod message;
pub mod output;
pub mod payload;
pub mod registry;
pub mod sink;
pub mod writer;

pub use cache::{CacheOptions, CachedLogger, LocalLoggingCache, LoggingCache};
pub use message::{LogMessage, MessageContent, Priority};
pub use output::{OutputOptions, ResolvedOutput};
pub use payload::{LoggingPayload, PayloadData, PayloadFormat};
pub use registry::{LoggerConfig, RawLoggerConfigFormat, register_sink_kind, sink_kinds};
pub use sink::{FileSink, InMemorySink, InheritSink, LogSink, MultiSink, TracingSink};
pub use writer::LineWriter;
