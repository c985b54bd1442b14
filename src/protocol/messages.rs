//! Inbound line classification and outbound publish requests

use bytes::Bytes;
use serde_json::{Map, Value};

/// Classification of one input line
#[derive(Debug, Clone, PartialEq)]
pub enum LineClass {
    /// A JSON object; the only shape that gets published
    Object(Map<String, Value>),
    /// Valid JSON that is not an object (array, string, number, bool, null)
    Other(Value),
    /// Not parseable as JSON
    Invalid,
}

impl LineClass {
    /// Short label used in log records
    pub fn kind(&self) -> &'static str {
        match self {
            LineClass::Object(_) => "object",
            LineClass::Other(_) => "non_object_json",
            LineClass::Invalid => "invalid_json",
        }
    }
}

/// Classify a raw input line.
///
/// The whole line must parse as a single JSON value; surrounding whitespace
/// and the trailing newline are allowed.
pub fn classify(line: &str) -> LineClass {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => LineClass::Object(map),
        Ok(other) => LineClass::Other(other),
        Err(_) => LineClass::Invalid,
    }
}

/// One input line together with its classification
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRecord {
    pub raw: String,
    pub class: LineClass,
}

impl InboundRecord {
    pub fn parse(raw: String) -> Self {
        let class = classify(&raw);
        Self { raw, class }
    }

    /// Payload to publish: the original text without trailing whitespace,
    /// so number formatting and key order survive untouched.
    pub fn payload(&self) -> Bytes {
        Bytes::copy_from_slice(self.raw.trim_end().as_bytes())
    }
}

/// Message handed to the broker session
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl PublishRequest {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        }
    }
}
