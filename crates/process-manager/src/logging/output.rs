//! Output routing: which sinks a process's streams (or a cached logger) feed

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::message::Priority;
use super::registry::{BUILDLOGGER_KIND, BuildloggerOptions, LoggerConfig};
use super::sink::{InMemorySink, LogSink, MultiSink};
use super::writer::LineWriter;
use crate::error::{Error, Result};

/// How standard output and error are routed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputOptions {
    /// Discard standard output
    #[serde(default)]
    pub suppress_output: bool,
    /// Discard standard error
    #[serde(default)]
    pub suppress_error: bool,
    /// Log standard output as errors
    #[serde(default)]
    pub send_output_to_error: bool,
    /// Log standard error as normal output
    #[serde(default)]
    pub send_error_to_output: bool,
    /// Destinations
    #[serde(default)]
    pub loggers: Vec<LoggerConfig>,
}

impl OutputOptions {
    /// Route both streams to `loggers`
    pub fn with_loggers(loggers: Vec<LoggerConfig>) -> Self {
        Self {
            loggers,
            ..Self::default()
        }
    }

    /// Reject contradictory routing
    pub fn validate(&self) -> Result<()> {
        if self.send_output_to_error && self.send_error_to_output {
            return Err(Error::invalid(
                "cannot redirect output to error and error to output at once",
            ));
        }
        if self.suppress_output && self.send_output_to_error {
            return Err(Error::invalid("cannot both suppress and redirect output"));
        }
        if self.suppress_error && self.send_error_to_output {
            return Err(Error::invalid("cannot both suppress and redirect error"));
        }
        Ok(())
    }

    /// Open every configured logger
    pub fn resolve(&self) -> Result<ResolvedOutput> {
        self.validate()?;
        let sinks = self
            .loggers
            .iter()
            .map(LoggerConfig::resolve)
            .collect::<Result<Vec<_>>>()?;

        let combined: Option<Arc<dyn LogSink>> = match sinks.len() {
            0 => None,
            1 => Some(sinks[0].clone()),
            _ => Some(Arc::new(MultiSink::new(sinks.clone()))),
        };

        Ok(ResolvedOutput {
            output: combined.clone().filter(|_| !self.suppress_output),
            error: combined.filter(|_| !self.suppress_error),
            output_priority: if self.send_output_to_error {
                Priority::Error
            } else {
                Priority::Info
            },
            error_priority: if self.send_error_to_output {
                Priority::Info
            } else {
                Priority::Error
            },
            sinks,
        })
    }

    /// `url` of every build-logger config
    pub fn buildlogger_urls(&self) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        for config in self.loggers.iter().filter(|c| c.kind == BUILDLOGGER_KIND) {
            let options: BuildloggerOptions = config.decode_options()?;
            if !options.url.is_empty() {
                urls.push(options.url);
            }
        }
        Ok(urls)
    }
}

/// Opened sinks for one [`OutputOptions`]
#[derive(Debug, Clone)]
pub struct ResolvedOutput {
    /// Sink for standard output, unless suppressed
    pub output: Option<Arc<dyn LogSink>>,
    /// Sink for standard error, unless suppressed
    pub error: Option<Arc<dyn LogSink>>,
    output_priority: Priority,
    error_priority: Priority,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl ResolvedOutput {
    /// Writer for the child's standard output
    pub fn output_writer(&self) -> Option<LineWriter> {
        self.output
            .clone()
            .map(|sink| LineWriter::new(sink, self.output_priority))
    }

    /// Writer for the child's standard error
    pub fn error_writer(&self) -> Option<LineWriter> {
        self.error
            .clone()
            .map(|sink| LineWriter::new(sink, self.error_priority))
    }

    /// Pick the sink an injected message goes to
    pub fn select(&self, prefer_error: bool) -> Result<&Arc<dyn LogSink>> {
        let chosen = if prefer_error {
            self.error.as_ref().or(self.output.as_ref())
        } else {
            self.output.as_ref().or(self.error.as_ref())
        };
        chosen.ok_or_else(|| Error::invalid("logger has no output or error sink"))
    }

    /// The in-memory sinks among the configured loggers
    pub fn in_memory(&self) -> impl Iterator<Item = &InMemorySink> {
        self.sinks.iter().filter_map(|sink| sink.in_memory())
    }

    /// Close every sink
    pub fn close(&self) -> Result<()> {
        let errors: Vec<Error> = self
            .sinks
            .iter()
            .filter_map(|sink| sink.close().err())
            .collect();
        match Error::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
