//! Messages injected into a cached logger from outside a process

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Cursor;

use super::message::{LogMessage, MessageContent, Priority};
use crate::error::{Error, Result};

/// How the payload's data is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Plain text lines
    #[default]
    String,
    /// One JSON object per unit
    Json,
    /// One BSON document per unit
    Bson,
}

/// The data carried by a [`LoggingPayload`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadData {
    /// A string
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Several strings
    TextList(Vec<String>),
    /// Several byte buffers
    BytesList(Vec<Vec<u8>>),
    /// Prebuilt messages; only usable in-process
    #[serde(skip)]
    Messages(Vec<LogMessage>),
}

impl PayloadData {
    fn is_empty(&self) -> bool {
        match self {
            PayloadData::Text(text) => text.is_empty(),
            PayloadData::Bytes(bytes) => bytes.is_empty(),
            PayloadData::TextList(list) => list.is_empty(),
            PayloadData::BytesList(list) => list.is_empty(),
            PayloadData::Messages(messages) => messages.is_empty(),
        }
    }
}

impl Default for PayloadData {
    fn default() -> Self {
        PayloadData::Text(String::new())
    }
}

/// One injection request against a cached logger
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoggingPayload {
    /// Target logger
    pub logger_id: String,
    /// Message data
    pub data: PayloadData,
    /// Priority of produced messages
    #[serde(default)]
    pub priority: Priority,
    /// Split the data into one message per line (or per document)
    #[serde(default)]
    pub is_multi: bool,
    /// Deliver to the error sink when the logger has one
    #[serde(default)]
    pub prefer_send_to_error: bool,
    /// Attach time, pid and level to every message
    #[serde(default)]
    pub add_metadata: bool,
    /// Interpretation of the data
    #[serde(default)]
    pub format: PayloadFormat,
}

impl LoggingPayload {
    /// A single text message for `logger_id`
    pub fn text(logger_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            logger_id: logger_id.into(),
            data: PayloadData::Text(text.into()),
            ..Self::default()
        }
    }

    /// Check the payload can be delivered
    pub fn validate(&self) -> Result<()> {
        if self.logger_id.is_empty() {
            return Err(Error::invalid("payload must name a logger"));
        }
        if self.data.is_empty() {
            return Err(Error::invalid("payload data must not be empty"));
        }
        Ok(())
    }

    /// Convert the data into the messages a sink receives, in order
    pub fn messages(&self) -> Result<Vec<LogMessage>> {
        self.validate()?;
        let mut messages = match &self.data {
            PayloadData::Messages(messages) => return Ok(messages.clone()),
            PayloadData::Text(text) => self.convert_text(text)?,
            PayloadData::Bytes(bytes) => self.convert_bytes(bytes)?,
            PayloadData::TextList(list) => {
                if !self.is_multi && self.format == PayloadFormat::String {
                    vec![self.message(Value::String(list.join(" ")))]
                } else {
                    let mut out = Vec::with_capacity(list.len());
                    for text in list {
                        out.extend(self.convert_text(text)?);
                    }
                    out
                }
            }
            PayloadData::BytesList(list) => {
                if !self.is_multi && self.format == PayloadFormat::String {
                    let joined: Vec<String> = list
                        .iter()
                        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                        .collect();
                    vec![self.message(Value::String(joined.join(" ")))]
                } else {
                    let mut out = Vec::with_capacity(list.len());
                    for bytes in list {
                        out.extend(self.convert_bytes(bytes)?);
                    }
                    out
                }
            }
        };

        if self.add_metadata {
            for message in &mut messages {
                self.attach_metadata(message);
            }
        }
        Ok(messages)
    }

    fn convert_text(&self, text: &str) -> Result<Vec<LogMessage>> {
        match self.format {
            PayloadFormat::String => Ok(self
                .units(text)
                .into_iter()
                .map(|line| self.message(Value::String(line.to_string())))
                .collect()),
            PayloadFormat::Json => self
                .units(text)
                .into_iter()
                .map(|unit| parse_json(unit).map(|fields| self.message(Value::Object(fields))))
                .collect(),
            PayloadFormat::Bson => Err(Error::invalid("bson payloads must carry bytes")),
        }
    }

    fn convert_bytes(&self, bytes: &[u8]) -> Result<Vec<LogMessage>> {
        match self.format {
            PayloadFormat::Bson => {
                let documents = parse_bson(bytes, self.is_multi)?;
                Ok(documents
                    .into_iter()
                    .map(|fields| self.message(Value::Object(fields)))
                    .collect())
            }
            _ => self.convert_text(&String::from_utf8_lossy(bytes)),
        }
    }

    fn units<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if !self.is_multi {
            return vec![text];
        }
        text.lines().filter(|line| !line.is_empty()).collect()
    }

    fn message(&self, value: Value) -> LogMessage {
        match value {
            Value::Object(fields) => LogMessage::fields(self.priority, fields),
            Value::String(text) => LogMessage::text(self.priority, text),
            other => LogMessage::text(self.priority, other.to_string()),
        }
    }

    fn attach_metadata(&self, message: &mut LogMessage) {
        let mut metadata = Map::new();
        metadata.insert("time".into(), Value::String(Utc::now().to_rfc3339()));
        metadata.insert("pid".into(), Value::from(std::process::id()));
        metadata.insert("level".into(), Value::from(message.priority.as_i32()));

        let content = std::mem::replace(&mut message.content, MessageContent::Fields(Map::new()));
        let mut fields = match content {
            MessageContent::Fields(fields) => fields,
            MessageContent::Text(text) => {
                let mut fields = Map::new();
                fields.insert("message".into(), Value::String(text));
                fields
            }
        };
        fields.insert("metadata".into(), Value::Object(metadata));
        message.content = MessageContent::Fields(fields);
    }
}

fn parse_json(unit: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(unit) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(Error::invalid("json payload must be an object")),
        Err(e) => Err(Error::invalid(format!("invalid json payload: {}", e))),
    }
}

// With `multi` the buffer may hold several concatenated documents.
fn parse_bson(bytes: &[u8], multi: bool) -> Result<Vec<Map<String, Value>>> {
    let mut cursor = Cursor::new(bytes);
    let mut documents = Vec::new();
    while (cursor.position() as usize) < bytes.len() {
        let document = bson::Document::from_reader(&mut cursor)
            .map_err(|e| Error::invalid(format!("invalid bson payload: {}", e)))?;
        match bson::Bson::Document(document).into_relaxed_extjson() {
            Value::Object(fields) => documents.push(fields),
            _ => return Err(Error::invalid("bson payload must be a document")),
        }
        if !multi {
            break;
        }
    }
    if !multi && (cursor.position() as usize) < bytes.len() {
        return Err(Error::invalid("trailing bytes after bson document"));
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(data: PayloadData) -> LoggingPayload {
        LoggingPayload {
            logger_id: "logger".into(),
            data,
            ..LoggingPayload::default()
        }
    }

    #[test]
    fn test_validate() {
        assert!(payload(PayloadData::Text(String::new())).validate().is_err());
        assert!(payload(PayloadData::TextList(vec![])).validate().is_err());
        assert!(LoggingPayload::text("", "x").validate().is_err());
        assert!(LoggingPayload::text("a", "x").validate().is_ok());
    }

    #[test]
    fn test_multi_splits_lines() {
        let mut p = payload(PayloadData::Text("one\ntwo\n".into()));
        p.is_multi = true;
        let rendered: Vec<String> = p.messages().unwrap().iter().map(LogMessage::render).collect();
        assert_eq!(rendered, vec!["one", "two"]);

        p.is_multi = false;
        assert_eq!(p.messages().unwrap().len(), 1);
    }

    #[test]
    fn test_string_list_joined_unless_multi() {
        let mut p = payload(PayloadData::TextList(vec!["a".into(), "b".into()]));
        assert_eq!(p.messages().unwrap()[0].render(), "a b");
        p.is_multi = true;
        assert_eq!(p.messages().unwrap().len(), 2);
    }

    #[test]
    fn test_json_and_bson_formats() {
        let mut p = payload(PayloadData::Text(r#"{"k":1}"#.into()));
        p.format = PayloadFormat::Json;
        assert_eq!(p.messages().unwrap()[0].render(), r#"{"k":1}"#);

        p.data = PayloadData::Text("not json".into());
        assert!(p.messages().is_err());

        let mut bytes = bson::to_vec(&bson::doc! { "a": "x" }).unwrap();
        bytes.extend(bson::to_vec(&bson::doc! { "a": "y" }).unwrap());
        let mut p = payload(PayloadData::Bytes(bytes));
        p.format = PayloadFormat::Bson;
        p.is_multi = true;
        let rendered: Vec<String> = p.messages().unwrap().iter().map(LogMessage::render).collect();
        assert_eq!(rendered, vec![r#"{"a":"x"}"#, r#"{"a":"y"}"#]);
    }

    #[test]
    fn test_metadata_wraps_text() {
        let mut p = LoggingPayload::text("logger", "hello");
        p.add_metadata = true;
        p.priority = Priority::Warning;
        let message = p.messages().unwrap().remove(0);
        match message.content {
            MessageContent::Fields(fields) => {
                assert_eq!(fields["message"], "hello");
                assert_eq!(fields["metadata"]["level"], 60);
            }
            MessageContent::Text(_) => panic!("expected structured message"),
        }
    }
}
