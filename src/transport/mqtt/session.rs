//! Impure I/O operations for the MQTT session
//!
//! This module owns the `rumqttc` client and the background task that polls
//! its event loop. The task is the only writer of connectivity state; the
//! ingest loop only enqueues publishes through the client's request channel.
//!
//! Publishing is fire-and-forget. A message enqueued right before
//! [`MqttSession::stop`] is flushed ahead of the DISCONNECT when the session
//! is connected, but if the broker is unreachable at shutdown the queued
//! messages are dropped without an error.

use super::connection::{
    configure_mqtt_options, qos_from_level, MqttError, ReconnectConfig, SessionEvent,
    SessionState, StatusAnnouncer,
};
use super::event_handler::EventHandler;
use crate::config::BridgeConfig;
use crate::protocol::PublishRequest;
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Requests buffered between the ingest loop and the event loop task
const REQUEST_QUEUE_CAPACITY: usize = 1024;
/// How long `stop` waits for an in-progress connect before giving up
const CONNECT_GRACE: Duration = Duration::from_secs(2);
/// How long `stop` waits for the event loop task at each shutdown step
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// MQTT broker session with last will and online announcement
pub struct MqttSession {
    client: AsyncClient,
    /// Taken by `start`; the mutex keeps the session `Sync`
    event_loop: Option<Mutex<EventLoop>>,
    announcer: StatusAnnouncer,
    qos: QoS,
    reconnect_config: ReconnectConfig,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    shutdown_tx: Option<watch::Sender<bool>>,
    event_loop_handle: Option<JoinHandle<()>>,
}

impl MqttSession {
    /// Build the client with last will and credentials; nothing connects yet
    pub fn new(config: &BridgeConfig) -> Result<Self, MqttError> {
        let announcer = StatusAnnouncer::from_config(&config.status);
        let mqtt_options = configure_mqtt_options(config, &announcer)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_QUEUE_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        Ok(Self {
            client,
            event_loop: Some(Mutex::new(event_loop)),
            announcer,
            qos: qos_from_level(config.topic.qos),
            reconnect_config: ReconnectConfig::default(),
            state_tx,
            state_rx,
            shutdown_tx: None,
            event_loop_handle: None,
        })
    }

    /// Override the pacing between failed connection attempts
    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    /// Subscribe to connectivity changes
    pub fn state_updates(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Feed one event through the state machine and return the new state
    fn apply(state_tx: &watch::Sender<SessionState>, event: &SessionEvent) -> SessionState {
        let mut next = SessionState::Disconnected;
        state_tx.send_modify(|state| {
            *state = state.next(event);
            next = *state;
        });
        next
    }

    fn log_connectivity(event: &SessionEvent) {
        match event {
            SessionEvent::ConnAckReceived => info!("MQTT connection: Success"),
            SessionEvent::ConnectionLost(reason) => warn!("MQTT disconnection: {}", reason),
            _ => {}
        }
    }

    /// Enqueue the online announcement from inside the event loop task.
    ///
    /// This task is the only consumer of the request queue, so it must never
    /// wait on it. When a backlog built up while disconnected has filled the
    /// queue, the announcement is handed to a separate task that waits for a
    /// free slot while this loop keeps draining.
    fn announce(client: &AsyncClient, announcement: PublishRequest) {
        let PublishRequest {
            topic,
            payload,
            retain,
        } = announcement;

        if client
            .try_publish(topic.clone(), QoS::AtLeastOnce, retain, payload.clone())
            .is_ok()
        {
            info!(topic = %topic, retain, "Announced online status");
            return;
        }

        debug!(topic = %topic, "Request queue full, deferring online announcement");
        let client = client.clone();
        tokio::spawn(
            async move {
                match client
                    .publish(topic.clone(), QoS::AtLeastOnce, retain, payload)
                    .await
                {
                    Ok(()) => info!(topic = %topic, retain, "Announced online status"),
                    Err(e) => warn!(topic = %topic, "Failed to announce online status: {}", e),
                }
            }
            .in_current_span(),
        );
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnect delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Wait until the session reports `Connected`, up to `timeout`
    async fn wait_for_connection(
        mut state_rx: watch::Receiver<SessionState>,
        timeout: Duration,
    ) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                if state_rx.borrow_and_update().can_publish() {
                    return true;
                }
                if state_rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    /// Poll the event loop until shutdown or a clean disconnect completes
    async fn run_event_loop(
        mut event_loop: EventLoop,
        client: AsyncClient,
        announcer: StatusAnnouncer,
        reconnect_config: ReconnectConfig,
        state_tx: watch::Sender<SessionState>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("Starting MQTT event loop");
        let mut failed_attempts = 0u32;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = EventHandler::route_mqtt_event(&event);
                            debug!(target: "mqtt_transport", "MQTT event: {:?}", route);

                            let state = *state_tx.borrow();
                            let plan = EventHandler::plan(&route, state, &announcer);

                            // Queue "online" before publishers can observe
                            // `Connected`, so it precedes their messages.
                            if let Some(announcement) = plan.announce {
                                Self::announce(&client, announcement);
                            }
                            if let Some(session_event) = &plan.session_event {
                                Self::log_connectivity(session_event);
                                Self::apply(&state_tx, session_event);
                                if *session_event == SessionEvent::ConnAckReceived {
                                    failed_attempts = 0;
                                }
                            }
                            if plan.finished {
                                info!("MQTT disconnection: clean disconnect sent");
                                break;
                            }
                        }
                        Err(e) => {
                            let lost = SessionEvent::ConnectionLost(e.to_string());
                            if *state_tx.borrow() == SessionState::Disconnecting {
                                debug!("Connection closed during shutdown: {}", e);
                                Self::apply(&state_tx, &lost);
                                break;
                            }

                            Self::log_connectivity(&lost);
                            Self::apply(&state_tx, &lost);

                            failed_attempts = failed_attempts.saturating_add(1);
                            let delay_ms = reconnect_config.calculate_backoff_delay(failed_attempts);
                            debug!(attempt = failed_attempts, delay_ms, "Scheduling MQTT reconnect");
                            if !Self::interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
                                break;
                            }
                            Self::apply(&state_tx, &SessionEvent::RetryScheduled);
                        }
                    }
                }
            }
        }

        Self::apply(&state_tx, &SessionEvent::Stopped);
        info!("MQTT event loop stopped");
    }
}

#[async_trait]
impl Transport for MqttSession {
    type Error = MqttError;

    async fn start(&mut self) -> Result<(), Self::Error> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or(MqttError::AlreadyStarted)?
            .into_inner();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);
        Self::apply(&self.state_tx, &SessionEvent::StartRequested);

        let task = Self::run_event_loop(
            event_loop,
            self.client.clone(),
            self.announcer.clone(),
            self.reconnect_config.clone(),
            self.state_tx.clone(),
            shutdown_rx,
        );
        let span = crate::mqtt_span!(status_topic = ?self.announcer.topic());
        self.event_loop_handle = Some(tokio::spawn(task.instrument(span)));

        Ok(())
    }

    async fn stop(&mut self) -> Result<(), Self::Error> {
        let Some(mut handle) = self.event_loop_handle.take() else {
            debug!("MQTT session not running, nothing to stop");
            return Ok(());
        };

        // Give a connect that is already in flight the chance to finish so
        // anything still queued gets flushed by the clean disconnect.
        if *self.state_rx.borrow() == SessionState::Connecting {
            Self::wait_for_connection(self.state_rx.clone(), CONNECT_GRACE).await;
        }

        let was_connected = self.state_rx.borrow().can_publish();
        Self::apply(&self.state_tx, &SessionEvent::StopRequested);

        let mut result = Ok(());
        let mut finished = false;
        if was_connected {
            info!("Disconnecting from MQTT broker");
            match self.client.disconnect().await {
                Ok(()) => {
                    finished = tokio::time::timeout(SHUTDOWN_GRACE, &mut handle)
                        .await
                        .is_ok();
                }
                Err(e) => result = Err(MqttError::DisconnectFailed(Box::new(e))),
            }
        }

        if !finished {
            if let Some(shutdown_tx) = self.shutdown_tx.take() {
                let _ = shutdown_tx.send(true);
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!("MQTT event loop did not stop in time, aborting");
                handle.abort();
            }
        }

        self.shutdown_tx = None;
        Self::apply(&self.state_tx, &SessionEvent::Stopped);
        info!("MQTT session stopped");
        result
    }

    async fn publish(&self, request: PublishRequest) -> Result<(), Self::Error> {
        if self.event_loop_handle.is_none() {
            return Err(MqttError::NotStarted);
        }

        let PublishRequest {
            topic,
            payload,
            retain,
        } = request;

        let state = *self.state_rx.borrow();
        let outcome = if state.can_publish() {
            self.client
                .publish(topic.clone(), self.qos, retain, payload)
                .await
        } else {
            // Queued until connected; dropped once the queue is full.
            self.client
                .try_publish(topic.clone(), self.qos, retain, payload)
        };

        outcome.map_err(|e| MqttError::PublishFailed {
            topic,
            source: Box::new(e),
        })
    }

    fn session_state(&self) -> SessionState {
        *self.state_rx.borrow()
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        // Signal shutdown to the event loop task if it is still running
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        // Abort the event loop task if it's still running
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> BridgeConfig {
        let mut config = BridgeConfig::with_prefix("sensors");
        config.broker.host = "127.0.0.1".to_string();
        config.broker.port = 1;
        config.status.topic = Some("sensors/bridge".to_string());
        config
    }

    fn fast_retries() -> ReconnectConfig {
        ReconnectConfig {
            backoff_pattern: vec![10],
            sustained_delay: 20,
        }
    }

    #[tokio::test]
    async fn test_new_session_is_disconnected() {
        let session = MqttSession::new(&unreachable_config()).unwrap();
        assert_eq!(session.session_state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_publish_before_start_fails() {
        let session = MqttSession::new(&unreachable_config()).unwrap();
        let result = session
            .publish(PublishRequest::new("sensors/s1", "{}", false))
            .await;
        assert!(matches!(result, Err(MqttError::NotStarted)));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_no_op() {
        let mut session = MqttSession::new(&unreachable_config()).unwrap();
        assert!(session.stop().await.is_ok());
        assert!(session.stop().await.is_ok());
        assert_eq!(session.session_state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut session = MqttSession::new(&unreachable_config())
            .unwrap()
            .with_reconnect_config(fast_retries());
        session.start().await.unwrap();
        assert!(matches!(
            session.start().await,
            Err(MqttError::AlreadyStarted)
        ));
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_broker_unreachable() {
        let mut session = MqttSession::new(&unreachable_config())
            .unwrap()
            .with_reconnect_config(fast_retries());
        session.start().await.unwrap();
        assert_ne!(session.session_state(), SessionState::Connected);

        let result = tokio::time::timeout(Duration::from_secs(10), session.stop()).await;
        assert!(result.is_ok(), "stop must not hang");
        assert!(result.unwrap().is_ok());
        assert_eq!(session.session_state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_is_queued() {
        let mut session = MqttSession::new(&unreachable_config())
            .unwrap()
            .with_reconnect_config(fast_retries());
        session.start().await.unwrap();

        let result = session
            .publish(PublishRequest::new("sensors/s1", "{\"t\":1}", false))
            .await;
        assert!(result.is_ok());

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_tx, rx) = watch::channel(false);
        assert!(MqttSession::interruptible_sleep(rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(true);
        });
        assert!(!MqttSession::interruptible_sleep(rx, 5_000).await);
    }

    #[tokio::test]
    async fn test_wait_for_connection_times_out() {
        let (_tx, rx) = watch::channel(SessionState::Connecting);
        assert!(!MqttSession::wait_for_connection(rx, Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_wait_for_connection_sees_connect() {
        let (tx, rx) = watch::channel(SessionState::Connecting);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(SessionState::Connected);
        });
        assert!(MqttSession::wait_for_connection(rx, Duration::from_secs(1)).await);
    }

    #[test]
    fn test_apply_updates_watchers() {
        let (tx, rx) = watch::channel(SessionState::Disconnected);
        let next = MqttSession::apply(&tx, &SessionEvent::StartRequested);
        assert_eq!(next, SessionState::Connecting);
        assert_eq!(*rx.borrow(), SessionState::Connecting);
    }
}
