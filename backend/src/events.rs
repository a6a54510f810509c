//! Event broadcasting for the live log stream.
//!
//! Every notification is also written to the tracing log, so operators
//! without an SSE client still see the same lifecycle trace.

use axum::response::sse::{Event, KeepAlive};
use axum::response::Sse;
use futures::Stream;
use rpitube_types::{CastEvent, OutputStream, PlaybackState, SessionId};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Event broadcaster for SSE (Server-Sent Events).
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: Arc<broadcast::Sender<CastEvent>>,
    /// Set on shutdown; ends open SSE streams
    closed: Arc<watch::Sender<bool>>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster with a buffer size.
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        let (closed, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            closed: Arc::new(closed),
        }
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: CastEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Lifecycle message.
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.broadcast(CastEvent::Info { message });
    }

    /// Error message with an optional cause.
    pub fn error(&self, message: impl Into<String>, cause: Option<String>) {
        let message = message.into();
        match &cause {
            Some(cause) => error!("{}: {}", message, cause),
            None => error!("{}", message),
        }
        self.broadcast(CastEvent::Error { message, cause });
    }

    /// One output line of a pipeline stage.
    pub fn process_output(&self, command: &str, stream: OutputStream, line: String) {
        match stream {
            OutputStream::Stdout => info!("[{}] {}", command, line),
            OutputStream::Stderr => warn!("[{}] {}", command, line),
        }
        self.broadcast(CastEvent::ProcessOutput {
            command: command.to_string(),
            stream,
            line,
        });
    }

    pub fn state_changed(&self, session_id: Option<SessionId>, state: PlaybackState) {
        debug!("Playback state -> {} ({:?})", state, session_id);
        self.broadcast(CastEvent::StateChanged { session_id, state });
    }

    /// Raw receiver, for in-process consumers.
    pub fn receiver(&self) -> broadcast::Receiver<CastEvent> {
        self.sender.subscribe()
    }

    /// End all SSE streams so graceful shutdown does not wait on them.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Subscribe to events and get a SSE stream.
    pub fn subscribe(&self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let stream = BroadcastStream::new(self.sender.subscribe());
        let mut closed = self.closed.subscribe();
        let closed = async move {
            let _ = closed.wait_for(|closed| *closed).await;
        };

        let event_stream = stream.filter_map(|result| match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().data(json))),
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    None
                }
            },
            Err(e) => {
                // BroadcastStream returns RecvError when lagging
                warn!("Client lagging, skipping events: {}", e);
                None
            }
        });

        let event_stream = futures::StreamExt::take_until(event_stream, Box::pin(closed));

        Sse::new(event_stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcaster_creation() {
        let broadcaster = EventBroadcaster::new(10);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_sse_subscription_counts() {
        let broadcaster = EventBroadcaster::new(10);

        let _subscription = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        broadcaster.info("Casting started");
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        use axum::response::IntoResponse;
        use http_body_util::BodyExt;

        let broadcaster = EventBroadcaster::new(10);
        let response = broadcaster.subscribe().into_response();
        broadcaster.close();

        let body = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
            .await
            .expect("stream must end after close")
            .unwrap();
        assert!(body.to_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_helpers_emit_in_order() {
        let broadcaster = EventBroadcaster::default();
        let mut rx = broadcaster.receiver();

        broadcaster.info("Downloading https://example.com/v");
        broadcaster.process_output("yt-dlp", OutputStream::Stdout, "[download] 100%".into());
        broadcaster.error("Download failed", Some("exited with exit status: 1".into()));
        broadcaster.state_changed(None, PlaybackState::Stopped);

        assert!(matches!(rx.recv().await.unwrap(), CastEvent::Info { .. }));
        assert_eq!(
            rx.recv().await.unwrap(),
            CastEvent::ProcessOutput {
                command: "yt-dlp".to_string(),
                stream: OutputStream::Stdout,
                line: "[download] 100%".to_string(),
            }
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            CastEvent::Error { cause: Some(_), .. }
        ));
        assert_eq!(
            rx.recv().await.unwrap(),
            CastEvent::StateChanged {
                session_id: None,
                state: PlaybackState::Stopped,
            }
        );
    }
}
