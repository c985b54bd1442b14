//! json2mqtt - publish newline-delimited JSON to MQTT
//!
//! Reads one JSON document per line, derives a topic from selected fields of
//! each object and publishes the original line to an MQTT broker.
//!
//! # Overview
//!
//! - Topic construction from a prefix, key values and a suffix
//! - Line classification and the non-JSON policy (`print` or `error`)
//! - MQTT v5 session with a last will ("offline"), an "online" announcement
//!   after every connect, and a clean disconnect on shutdown
//!
//! # Quick Start
//!
//! ```rust
//! use json2mqtt::protocol::{build_topic, classify, LineClass};
//!
//! let keys = vec!["id".to_string()];
//! if let LineClass::Object(object) = classify("{\"id\":\"s 1\",\"t\":21.5}\n") {
//!     let topic = build_topic("sensors", &object, &keys, Some("state"));
//!     assert_eq!(topic, "sensors/s_1/state");
//! }
//! ```

pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use bridge::{IngestLoop, IngestSummary};
pub use config::{BridgeConfig, ConfigError, NonJsonMode};
pub use error::{BridgeError, BridgeResult};
pub use protocol::*;
pub use transport::mqtt::MqttSession;
pub use transport::Transport;
