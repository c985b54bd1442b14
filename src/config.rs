//! Resolved bridge configuration
//!
//! `BridgeConfig` is built once at startup (see [`crate::cli`]) and never
//! mutated afterwards. Validation lives here so that configurations built in
//! tests go through the same checks as the command line.

use crate::protocol::topics::contains_wildcard;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TLS_PORT: u16 = 8883;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// What to do with input lines that are not JSON objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NonJsonMode {
    /// Echo the line to stdout and keep going
    #[default]
    Print,
    /// Stop with a non-zero exit status
    Error,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: Option<String>,
    /// Never rendered by `--print-config`
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_keep_alive() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}

/// Topic routing and publishing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicSection {
    pub prefix: String,
    #[serde(default)]
    pub keys: Vec<String>,
    pub suffix: Option<String>,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub qos: u8,
}

/// Online/offline status announcement settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSection {
    pub topic: Option<String>,
    pub retain: bool,
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            topic: None,
            retain: true,
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub nonjson: NonJsonMode,
    pub broker: BrokerSection,
    pub topic: TopicSection,
    #[serde(default)]
    pub status: StatusSection,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Topic prefix must not be empty")]
    EmptyTopicPrefix,
    #[error("Topic key names must not be empty")]
    EmptyTopicKey,
    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },
    #[error("Invalid QoS level {0}: expected 0, 1 or 2")]
    InvalidQos(u8),
    #[error("Keep-alive must be at least {MIN_KEEP_ALIVE_SECS} seconds, got {0}")]
    InvalidKeepAlive(u64),
    #[error("Broker host must not be empty")]
    EmptyBrokerHost,
    #[error("Failed to read argument file {path}: {source}")]
    ArgFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed argument file {path}: {message}")]
    ArgFileSyntax { path: PathBuf, message: String },
    #[error("Argument files nested deeper than {0} levels")]
    ArgFileTooDeep(usize),
    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

impl BridgeConfig {
    /// Minimal configuration publishing under `prefix` to a local broker
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            nonjson: NonJsonMode::Print,
            broker: BrokerSection {
                host: "localhost".to_string(),
                port: DEFAULT_PORT,
                tls: false,
                username: None,
                password: None,
                client_id: generate_client_id(),
                keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            },
            topic: TopicSection {
                prefix: prefix.into(),
                keys: Vec::new(),
                suffix: None,
                retain: false,
                qos: 0,
            },
            status: StatusSection::default(),
        }
    }

    /// Check every invariant the bridge relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::EmptyBrokerHost);
        }
        if self.broker.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::InvalidKeepAlive(self.broker.keep_alive_secs));
        }

        if self.topic.prefix.is_empty() {
            return Err(ConfigError::EmptyTopicPrefix);
        }
        validate_publish_topic(&self.topic.prefix)?;
        if self.topic.keys.iter().any(|k| k.is_empty()) {
            return Err(ConfigError::EmptyTopicKey);
        }
        if let Some(suffix) = &self.topic.suffix {
            validate_publish_topic(suffix)?;
        }
        if self.topic.qos > 2 {
            return Err(ConfigError::InvalidQos(self.topic.qos));
        }

        if let Some(status_topic) = &self.status.topic {
            if status_topic.is_empty() {
                return Err(ConfigError::InvalidTopic {
                    topic: status_topic.clone(),
                    reason: "status topic must not be empty".to_string(),
                });
            }
            validate_publish_topic(status_topic)?;
        }

        Ok(())
    }

    /// Render the configuration as TOML, without the password
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Default port for the given transport
pub fn default_port(tls: bool) -> u16 {
    if tls {
        DEFAULT_TLS_PORT
    } else {
        DEFAULT_PORT
    }
}

/// Unique client identifier so concurrent bridges never evict each other
pub fn generate_client_id() -> String {
    format!("json2mqtt-{}", uuid::Uuid::new_v4().simple())
}

fn validate_publish_topic(topic: &str) -> Result<(), ConfigError> {
    if contains_wildcard(topic) {
        return Err(ConfigError::InvalidTopic {
            topic: topic.to_string(),
            reason: "wildcards '+' and '#' are not allowed in publish topics".to_string(),
        });
    }
    if topic.contains('\0') {
        return Err(ConfigError::InvalidTopic {
            topic: topic.to_string(),
            reason: "NUL characters are not allowed".to_string(),
        });
    }
    Ok(())
}
