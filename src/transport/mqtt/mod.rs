//! MQTT broker session for the bridge
//!
//! The module is split the same way as the rest of the transport code:
//!
//! - [`connection`] - Pure session state machine, broker options and last will
//! - [`event_handler`] - Pure routing of event loop output
//! - [`session`] - Impure I/O: the background event loop task and publishing
//!
//! # Usage
//!
//! ```rust,no_run
//! use json2mqtt::config::BridgeConfig;
//! use json2mqtt::protocol::PublishRequest;
//! use json2mqtt::transport::mqtt::MqttSession;
//! use json2mqtt::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let mut config = BridgeConfig::with_prefix("sensors");
//! config.status.topic = Some("sensors/bridge".to_string());
//!
//! let mut session = MqttSession::new(&config)?;
//! session.start().await?;
//! session
//!     .publish(PublishRequest::new("sensors/s1", "{\"t\":21.5}", false))
//!     .await?;
//! session.stop().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod event_handler;
pub mod session;

// Re-export public types for convenience
pub use connection::{
    configure_mqtt_options, qos_from_level, MqttError, ReconnectConfig, SessionEvent,
    SessionState, StatusAnnouncer, OFFLINE_PAYLOAD, ONLINE_PAYLOAD,
};
pub use event_handler::{EventHandler, EventRoute, RoutePlan};
pub use session::MqttSession;
