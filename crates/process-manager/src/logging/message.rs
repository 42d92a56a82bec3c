//! Log messages and their priorities

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Error, Result};

/// Message priority. Numeric values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Priority {
    /// Finest-grained diagnostics
    Trace = 20,
    /// Debugging detail
    Debug = 30,
    /// Normal output
    #[default]
    Info = 40,
    /// Noteworthy but normal
    Notice = 50,
    /// Something unexpected
    Warning = 60,
    /// An error
    Error = 70,
    /// A critical condition
    Critical = 80,
    /// Action required
    Alert = 90,
    /// System unusable
    Emergency = 100,
}

impl Priority {
    /// Numeric value
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Lowercase name
    pub fn name(self) -> &'static str {
        match self {
            Priority::Trace => "trace",
            Priority::Debug => "debug",
            Priority::Info => "info",
            Priority::Notice => "notice",
            Priority::Warning => "warning",
            Priority::Error => "error",
            Priority::Critical => "critical",
            Priority::Alert => "alert",
            Priority::Emergency => "emergency",
        }
    }
}

impl TryFrom<i32> for Priority {
    type Error = Error;

    /// Zero means "unset" and maps to [`Priority::Info`]
    fn try_from(value: i32) -> Result<Self> {
        Ok(match value {
            0 | 40 => Priority::Info,
            20 => Priority::Trace,
            30 => Priority::Debug,
            50 => Priority::Notice,
            60 => Priority::Warning,
            70 => Priority::Error,
            80 => Priority::Critical,
            90 => Priority::Alert,
            100 => Priority::Emergency,
            other => return Err(Error::invalid(format!("invalid priority {}", other))),
        })
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> i32 {
        priority.as_i32()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Body of a log message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    /// A line of text
    Text(String),
    /// Structured fields
    Fields(Map<String, Value>),
}

/// One message delivered to a sink
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    /// Priority
    pub priority: Priority,
    /// Body
    pub content: MessageContent,
}

impl LogMessage {
    /// A text message
    pub fn text(priority: Priority, text: impl Into<String>) -> Self {
        Self {
            priority,
            content: MessageContent::Text(text.into()),
        }
    }

    /// A structured message
    pub fn fields(priority: Priority, fields: Map<String, Value>) -> Self {
        Self {
            priority,
            content: MessageContent::Fields(fields),
        }
    }

    /// Single-line rendering used by text sinks
    pub fn render(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Fields(fields) => Value::Object(fields.clone()).to_string(),
        }
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_numbers() {
        assert_eq!(Priority::try_from(0).unwrap(), Priority::Info);
        assert_eq!(Priority::try_from(70).unwrap(), Priority::Error);
        assert!(Priority::try_from(55).is_err());
        assert!(Priority::Error > Priority::Warning);
        assert_eq!(i32::from(Priority::Alert), 90);
    }

    #[test]
    fn test_render_fields_as_json() {
        let mut fields = Map::new();
        fields.insert("msg".into(), Value::String("hi".into()));
        let message = LogMessage::fields(Priority::Info, fields);
        assert_eq!(message.render(), r#"{"msg":"hi"}"#);
        assert_eq!(LogMessage::text(Priority::Debug, "plain").to_string(), "plain");
    }
}
