//! Pure connection state management for the MQTT session
//!
//! This module contains the session state machine, reconnect pacing,
//! status announcement settings and broker option construction. None of it
//! performs I/O.

use crate::config::{BridgeConfig, StatusSection};
use crate::protocol::PublishRequest;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Payload announced on the status topic after every successful connect
pub const ONLINE_PAYLOAD: &str = "online";
/// Payload the broker publishes on our behalf if the connection is lost
pub const OFFLINE_PAYLOAD: &str = "offline";

/// Lifecycle state of the broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected; initial and terminal state
    Disconnected,
    /// Connect (or reconnect) in progress
    Connecting,
    /// ConnAck received, publishes go straight to the wire
    Connected,
    /// Clean shutdown requested
    Disconnecting,
}

/// Inputs that drive [`SessionState`] transitions
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Background task started polling the broker
    StartRequested,
    /// Broker accepted the connection
    ConnAckReceived,
    /// Connection attempt failed or an established connection dropped
    ConnectionLost(String),
    /// Background task is about to poll again after a failure
    RetryScheduled,
    /// Clean shutdown requested by the owner
    StopRequested,
    /// Background task exited
    Stopped,
}

impl SessionState {
    /// Determine next state after a session event (pure function)
    ///
    /// Once a stop has been requested only `Stopped` or a lost connection
    /// leaves `Disconnecting`; a late ConnAck or retry never resurrects the
    /// session.
    pub fn next(self, event: &SessionEvent) -> SessionState {
        match (self, event) {
            (SessionState::Disconnecting, SessionEvent::ConnAckReceived)
            | (SessionState::Disconnecting, SessionEvent::RetryScheduled)
            | (SessionState::Disconnecting, SessionEvent::StartRequested) => {
                SessionState::Disconnecting
            }
            (_, SessionEvent::StartRequested) => SessionState::Connecting,
            (_, SessionEvent::ConnAckReceived) => SessionState::Connected,
            (_, SessionEvent::ConnectionLost(_)) => SessionState::Disconnected,
            (SessionState::Disconnected, SessionEvent::RetryScheduled) => SessionState::Connecting,
            (state, SessionEvent::RetryScheduled) => state,
            (_, SessionEvent::StopRequested) => SessionState::Disconnecting,
            (_, SessionEvent::Stopped) => SessionState::Disconnected,
        }
    }

    /// Whether publishes can be written to the wire right now
    pub fn can_publish(self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

/// Reconnect pacing between failed polls of the event loop
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay in milliseconds for the given (1-based) attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Status topic context handed to the session at construction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusAnnouncer {
    topic: Option<String>,
    retain: bool,
}

impl StatusAnnouncer {
    pub fn new(topic: Option<String>, retain: bool) -> Self {
        Self { topic, retain }
    }

    pub fn from_config(status: &StatusSection) -> Self {
        Self::new(status.topic.clone(), status.retain)
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Announcement to publish after a successful connect
    pub fn online(&self) -> Option<PublishRequest> {
        self.topic
            .as_ref()
            .map(|topic| PublishRequest::new(topic.clone(), ONLINE_PAYLOAD, self.retain))
    }

    /// Last will registered with the broker at connect time
    pub fn last_will(&self) -> Option<LastWill> {
        self.topic.as_ref().map(|topic| {
            LastWill::new(
                topic.clone(),
                OFFLINE_PAYLOAD.as_bytes().to_vec(),
                QoS::AtLeastOnce,
                self.retain,
                None,
            )
        })
    }
}

/// MQTT session errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Session not started")]
    NotStarted,
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Publishing to {topic} failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Clean disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker options: {0}")]
    InvalidOptions(String),
}

/// Map a validated QoS level to the protocol value
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// Pure function to build broker options from configuration
pub fn configure_mqtt_options(
    config: &BridgeConfig,
    announcer: &StatusAnnouncer,
) -> Result<MqttOptions, MqttError> {
    let broker = &config.broker;
    if broker.host.trim().is_empty() {
        return Err(MqttError::InvalidOptions(
            "broker host must not be empty".to_string(),
        ));
    }
    if broker.keep_alive_secs < 5 {
        return Err(MqttError::InvalidOptions(format!(
            "keep-alive of {}s is below the 5s minimum",
            broker.keep_alive_secs
        )));
    }

    let mut mqtt_options =
        MqttOptions::new(broker.client_id.clone(), broker.host.clone(), broker.port);
    mqtt_options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs));
    mqtt_options.set_clean_start(true);

    if broker.tls {
        // rustls with the platform's native root certificates
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &broker.username {
        let password = broker.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username.clone(), password);
    } else if broker.password.is_some() {
        warn!("MQTT password given without a username; it will not be sent");
    }

    match announcer.last_will() {
        Some(will) => {
            info!(
                topic = announcer.topic().unwrap_or_default(),
                "Registering last will '{}'", OFFLINE_PAYLOAD
            );
            mqtt_options.set_last_will(will);
        }
        None => debug!("No status topic configured, skipping last will"),
    }

    Ok(mqtt_options)
}
