//! Per-line dispatch: publish objects, apply the non-JSON policy to the rest

use crate::config::{BridgeConfig, NonJsonMode};
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{build_topic, InboundRecord, LineClass, PublishRequest};
use crate::transport::Transport;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Outcome of handling one input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to the session under this topic
    Published { topic: String },
    /// The session refused the message; the line is lost
    PublishFailed { topic: String },
    /// Not an object; echoed to the diagnostic stream
    Echoed,
}

/// Handle one classified line.
///
/// Only an `error`-mode policy violation or a broken diagnostic stream
/// returns `Err`; publish failures are logged and reported as
/// [`Dispatch::PublishFailed`].
pub async fn handle_line<T, W>(
    record: &InboundRecord,
    config: &BridgeConfig,
    session: &T,
    diagnostics: &mut W,
) -> BridgeResult<Dispatch>
where
    T: Transport,
    W: AsyncWrite + Unpin,
{
    match &record.class {
        LineClass::Object(object) => {
            let topic = build_topic(
                &config.topic.prefix,
                object,
                &config.topic.keys,
                config.topic.suffix.as_deref(),
            );
            let request = PublishRequest::new(topic.clone(), record.payload(), config.topic.retain);

            match session.publish(request).await {
                Ok(()) => {
                    debug!(topic = %topic, "Published record");
                    Ok(Dispatch::Published { topic })
                }
                Err(e) => {
                    warn!(topic = %topic, "Failed to publish record: {}", e);
                    Ok(Dispatch::PublishFailed { topic })
                }
            }
        }
        class => match config.nonjson {
            NonJsonMode::Print => {
                debug!(kind = class.kind(), "Echoing line that is not a JSON object");
                diagnostics
                    .write_all(record.raw.as_bytes())
                    .await
                    .map_err(BridgeError::Diagnostic)?;
                diagnostics.flush().await.map_err(BridgeError::Diagnostic)?;
                Ok(Dispatch::Echoed)
            }
            NonJsonMode::Error => {
                info!(kind = class.kind(), "Rejecting line that is not a JSON object");
                Err(BridgeError::invalid_input(record.raw.clone()))
            }
        },
    }
}
