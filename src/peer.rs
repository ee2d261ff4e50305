//! Outbound live stream to a remote viewer: offer + ICE exchange.
//! Connections report progress as `PeerEvent`s on a channel handed to the
//! connector; the session maps them onto its `StreamState`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::state_machine::StreamState;

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    StateChanged(StreamState),
    IceCandidate(String),
}

#[derive(Debug)]
pub enum StreamError {
    Negotiation(String),
    Closed,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Negotiation(msg) => write!(f, "stream negotiation failed: {msg}"),
            StreamError::Closed => write!(f, "peer connection closed"),
        }
    }
}

impl std::error::Error for StreamError {}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Local session description to send to the remote viewer.
    async fn create_offer(&self) -> Result<String, StreamError>;

    /// Close the connection. Idempotent.
    fn close(&self);
}

pub trait PeerConnector: Send + Sync {
    fn connect(&self, events: mpsc::UnboundedSender<PeerEvent>) -> Result<Arc<dyn PeerConnection>, StreamError>;
}

/// Publishes an offer and one host candidate, then waits for an answer that
/// never arrives: there is no inbound signaling path, so negotiation ends in
/// `Failed` after the timeout unless the connection is closed first.
pub struct SignalingOnlyConnector {
    negotiation_timeout: Duration,
}

impl SignalingOnlyConnector {
    pub fn new(negotiation_timeout: Duration) -> Self {
        Self { negotiation_timeout }
    }
}

impl PeerConnector for SignalingOnlyConnector {
    fn connect(&self, events: mpsc::UnboundedSender<PeerEvent>) -> Result<Arc<dyn PeerConnection>, StreamError> {
        Ok(Arc::new(SignalingOnlyConnection {
            session_id: uuid::Uuid::new_v4().as_u128() as u64 >> 1,
            events,
            negotiation_timeout: self.negotiation_timeout,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }))
    }
}

struct SignalingOnlyConnection {
    session_id: u64,
    events: mpsc::UnboundedSender<PeerEvent>,
    negotiation_timeout: Duration,
    closed: AtomicBool,
    cancel: CancellationToken,
}

#[async_trait]
impl PeerConnection for SignalingOnlyConnection {
    async fn create_offer(&self) -> Result<String, StreamError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }
        let sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=sendonly\r\n",
            self.session_id
        );
        let _ = self.events.send(PeerEvent::IceCandidate(format!(
            "candidate:1 1 udp 2122260223 127.0.0.1 9 typ host generation 0 ufrag {:x}",
            self.session_id & 0xffff
        )));

        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let timeout = self.negotiation_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    info!(timeout_ms = timeout.as_millis() as u64, "no answer from remote viewer");
                    let _ = events.send(PeerEvent::StateChanged(StreamState::Failed));
                }
                _ = cancel.cancelled() => {}
            }
        });
        Ok(sdp)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        debug!("peer connection closed");
        let _ = self.events.send(PeerEvent::StateChanged(StreamState::Closed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn unanswered_offer_fails_after_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = SignalingOnlyConnector::new(Duration::from_secs(15))
            .connect(tx)
            .unwrap();
        let sdp = conn.create_offer().await.unwrap();
        assert!(sdp.starts_with("v=0"));

        assert!(matches!(rx.recv().await, Some(PeerEvent::IceCandidate(_))));
        assert_eq!(rx.recv().await, Some(PeerEvent::StateChanged(StreamState::Failed)));
    }

    #[tokio::test(start_paused = true)]
    async fn close_reports_once_and_stops_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = SignalingOnlyConnector::new(Duration::from_secs(15))
            .connect(tx)
            .unwrap();
        conn.create_offer().await.unwrap();
        conn.close();
        conn.close();

        assert!(matches!(rx.recv().await, Some(PeerEvent::IceCandidate(_))));
        assert_eq!(rx.recv().await, Some(PeerEvent::StateChanged(StreamState::Closed)));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert!(matches!(conn.create_offer().await, Err(StreamError::Closed)));
    }
}
