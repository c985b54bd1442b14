//! Mock implementations for testing
//!
//! Provides a mock Transport that records every publish so the ingest loop
//! can be exercised without a broker.

use crate::protocol::PublishRequest;
use crate::transport::mqtt::{MqttError, SessionEvent, SessionState, StatusAnnouncer};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Mock transport for testing
///
/// `start` behaves like a broker that accepts the connection at once: the
/// state becomes `Connected` and the online announcement, if a status topic
/// is configured, is recorded as the first publish. `stop` records nothing,
/// like a clean disconnect that suppresses the last will.
#[derive(Debug)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishRequest>>>,
    pub should_fail: bool,
    pub announcer: StatusAnnouncer,
    pub start_calls: Arc<AtomicUsize>,
    pub stop_calls: Arc<AtomicUsize>,
    state_tx: watch::Sender<SessionState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            published_messages: Arc::default(),
            should_fail: false,
            announcer: StatusAnnouncer::default(),
            start_calls: Arc::default(),
            stop_calls: Arc::default(),
            state_tx,
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish fails
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// Announce "online" on this topic when started
    pub fn with_status_topic(topic: &str, retain: bool) -> Self {
        Self {
            announcer: StatusAnnouncer::new(Some(topic.to_string()), retain),
            ..Default::default()
        }
    }

    pub async fn get_published_messages(&self) -> Vec<PublishRequest> {
        self.published_messages.lock().await.clone()
    }

    /// Published messages excluding the status announcement
    pub async fn get_data_messages(&self) -> Vec<PublishRequest> {
        let status_topic = self.announcer.topic();
        self.get_published_messages()
            .await
            .into_iter()
            .filter(|message| Some(message.topic.as_str()) != status_topic)
            .collect()
    }

    pub fn start_count(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    fn apply(&self, event: SessionEvent) {
        self.state_tx.send_modify(|state| *state = state.next(&event));
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn start(&mut self) -> Result<(), Self::Error> {
        if self.start_count() > 0 {
            return Err(MqttError::AlreadyStarted);
        }
        self.start_calls.fetch_add(1, Ordering::SeqCst);

        self.apply(SessionEvent::StartRequested);
        self.apply(SessionEvent::ConnAckReceived);
        if let Some(online) = self.announcer.online() {
            self.published_messages.lock().await.push(online);
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), Self::Error> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.apply(SessionEvent::StopRequested);
        self.apply(SessionEvent::Stopped);
        Ok(())
    }

    async fn publish(&self, request: PublishRequest) -> Result<(), Self::Error> {
        if self.start_count() == 0 {
            return Err(MqttError::NotStarted);
        }
        if self.should_fail {
            return Err(MqttError::PublishFailed {
                topic: request.topic,
                source: "Mock publish failure".into(),
            });
        }

        self.published_messages.lock().await.push(request);
        Ok(())
    }

    fn session_state(&self) -> SessionState {
        *self.state_tx.borrow()
    }
}
