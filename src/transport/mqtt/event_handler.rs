//! Pure routing of MQTT event loop output
//!
//! The session task polls `rumqttc` and hands every event to
//! [`EventHandler::route_mqtt_event`], then asks [`EventHandler::plan`] what
//! to do about it. Keeping both steps pure makes the connect/disconnect
//! behavior testable without a broker.

use super::connection::{SessionEvent, SessionState, StatusAnnouncer};
use crate::protocol::PublishRequest;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged,
    /// Broker answered the connect with a failure code
    ConnectionRefused(String),
    /// Broker sent DISCONNECT with a reason code
    DisconnectedByBroker(String),
    /// Our own clean DISCONNECT went out
    DisconnectSent,
    /// Infrastructure traffic (PingResp, PubAck, ...)
    InfrastructureEvent(String),
    /// Any other outgoing packet
    OutgoingEvent,
}

/// What the session task should do after an event
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoutePlan {
    /// State machine input, if the event changes connectivity
    pub session_event: Option<SessionEvent>,
    /// Status message to enqueue
    pub announce: Option<PublishRequest>,
    /// The task should exit its poll loop
    pub finished: bool,
}

/// Pure routing decisions based on MQTT events
pub struct EventHandler;

impl EventHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => {
                    if matches!(connack.code, ConnectReturnCode::Success) {
                        EventRoute::ConnectionAcknowledged
                    } else {
                        EventRoute::ConnectionRefused(format!("{:?}", connack.code))
                    }
                }
                Packet::Disconnect(disconnect) => {
                    EventRoute::DisconnectedByBroker(format!("{:?}", disconnect.reason_code))
                }
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Decide the reaction to a routed event given the current state
    ///
    /// The online announcement is produced only for a ConnAck, once per
    /// (re)connect, and never while a clean shutdown is in progress. Nothing
    /// here ever produces an "offline" message: that is left to the broker's
    /// last will, which a clean disconnect suppresses.
    pub fn plan(
        route: &EventRoute,
        state: SessionState,
        announcer: &StatusAnnouncer,
    ) -> RoutePlan {
        let stopping = state == SessionState::Disconnecting;
        match route {
            EventRoute::ConnectionAcknowledged => RoutePlan {
                session_event: Some(SessionEvent::ConnAckReceived),
                announce: if stopping { None } else { announcer.online() },
                finished: false,
            },
            EventRoute::ConnectionRefused(reason) | EventRoute::DisconnectedByBroker(reason) => {
                RoutePlan {
                    session_event: Some(SessionEvent::ConnectionLost(reason.clone())),
                    announce: None,
                    finished: stopping,
                }
            }
            EventRoute::DisconnectSent => RoutePlan {
                session_event: None,
                announce: None,
                finished: true,
            },
            EventRoute::InfrastructureEvent(_) | EventRoute::OutgoingEvent => RoutePlan::default(),
        }
    }
}
