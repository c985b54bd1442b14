//! Transport layer for the bridge
//!
//! This module provides the transport abstraction the ingest loop publishes
//! through, and its MQTT implementation.

use crate::protocol::PublishRequest;

pub mod mqtt;

pub use mqtt::SessionState;

/// Transport trait for broker sessions
///
/// This trait abstracts the broker session so the ingest loop can be driven
/// against a mock in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Register the last will and begin connecting in the background.
    ///
    /// Returns without waiting for the broker to accept the connection.
    async fn start(&mut self) -> Result<(), Self::Error>;

    /// Disconnect cleanly and stop background processing.
    ///
    /// Must be safe to call when never started or never connected.
    async fn stop(&mut self) -> Result<(), Self::Error>;

    /// Hand a message to the session without waiting for acknowledgement
    async fn publish(&self, request: PublishRequest) -> Result<(), Self::Error>;

    /// Current connectivity
    fn session_state(&self) -> SessionState;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttSession;
