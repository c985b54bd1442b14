//! The ingest loop: read lines until EOF, dispatch each, then stop the session

use super::adapter::{handle_line, Dispatch};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::InboundRecord;
use crate::transport::Transport;
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tracing::{info, warn, Instrument};

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Objects handed to the session
    pub published: u64,
    /// Lines echoed because they were not JSON objects
    pub skipped: u64,
    /// Objects the session refused
    pub publish_failures: u64,
}

/// Drives one session from a line-oriented reader
pub struct IngestLoop<T: Transport> {
    config: BridgeConfig,
    session: T,
}

impl<T: Transport> IngestLoop<T> {
    /// `session` is expected to be started already
    pub fn new(config: BridgeConfig, session: T) -> Self {
        Self { config, session }
    }

    pub fn session(&self) -> &T {
        &self.session
    }

    /// Run until the reader reaches EOF
    pub async fn run<R, W>(&mut self, reader: R, diagnostics: W) -> BridgeResult<IngestSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.run_until(reader, diagnostics, std::future::pending())
            .await
    }

    /// Run until EOF, a fatal line, or `shutdown` resolving.
    ///
    /// The session is stopped on every exit path. A failure to stop is
    /// logged and does not replace the loop's own outcome.
    pub async fn run_until<R, W, F>(
        &mut self,
        mut reader: R,
        mut diagnostics: W,
        shutdown: F,
    ) -> BridgeResult<IngestSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let span = crate::ingest_span!(prefix = %self.config.topic.prefix);

        async move {
            tokio::pin!(shutdown);
            let mut summary = IngestSummary::default();
            let mut line = String::new();

            let outcome = loop {
                let read = tokio::select! {
                    _ = &mut shutdown => {
                        info!("Shutdown requested, no more input will be read");
                        break Ok(());
                    }
                    read = reader.read_line(&mut line) => read,
                };

                match read {
                    Ok(0) => {
                        info!("End of input");
                        break Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => break Err(BridgeError::Input(e)),
                }

                let record = InboundRecord::parse(std::mem::take(&mut line));
                match handle_line(&record, &self.config, &self.session, &mut diagnostics).await {
                    Ok(Dispatch::Published { .. }) => summary.published += 1,
                    Ok(Dispatch::PublishFailed { .. }) => summary.publish_failures += 1,
                    Ok(Dispatch::Echoed) => summary.skipped += 1,
                    Err(e) => break Err(e),
                }
            };

            if let Err(e) = self.session.stop().await {
                warn!("Failed to stop MQTT session cleanly: {}", e);
            }

            info!(
                published = summary.published,
                skipped = summary.skipped,
                publish_failures = summary.publish_failures,
                "Ingest finished"
            );

            outcome.map(|()| summary)
        }
        .instrument(span)
        .await
    }
}
