//! The three per-cycle subsystems. Each isolates its own failures: errors are
//! logged, optionally surfaced as notices, and never reach the controller.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::SosSession;
use crate::cancellation::GenerationGuard;
use crate::classifier::{AudioClip, ClassifyRequest, ThreatVerdict};
use crate::media::AudioRecorder;
use crate::notify::Notice;
use crate::peer::{PeerEvent, StreamError};
use crate::report::{spawn_alert, spawn_signal, Alert, Signal};
use crate::state_machine::StreamState;

impl SosSession {
    /// Location subscription: every fix replaces `location`; errors are
    /// reported and the subscription keeps running.
    pub(super) async fn track_location(self: Arc<Self>, guard: GenerationGuard) {
        let mut fixes = self.deps.location.watch();
        loop {
            let next = tokio::select! {
                biased;
                _ = guard.token().cancelled() => break,
                next = fixes.next() => next,
            };
            let Some(fix) = next else { break };
            if !guard.should_continue() {
                break;
            }
            match fix {
                Ok(position) => {
                    self.fields.write().location = Some(position);
                    self.log.append("Location updated.");
                }
                Err(e) => {
                    warn!(error = %e, "location subscription error");
                    self.log.append("Error getting location.");
                    self.deps.notifier.raise(Notice::LocationUnavailable);
                }
            }
        }
        debug!("location subscription ended");
    }

    /// Peer stream: offer, forward ICE candidates, mirror connection state.
    pub(super) async fn run_peer_stream(self: Arc<Self>, guard: GenerationGuard) {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let conn = match self.deps.peer.connect(events_tx) {
            Ok(conn) => conn,
            Err(e) => return self.stream_failed(&guard, e),
        };
        {
            let mut res = self.resources.lock();
            if !guard.should_continue() {
                drop(res);
                conn.close();
                return;
            }
            res.peer = Some(Arc::clone(&conn));
        }

        let offer = tokio::select! {
            biased;
            _ = guard.token().cancelled() => return,
            offer = conn.create_offer() => offer,
        };
        match offer {
            Ok(sdp) => {
                info!("stream offer created");
                spawn_signal(
                    &self.deps.reporter,
                    Signal::Offer {
                        sdp,
                        user_id: self.settings.user_id.clone(),
                    },
                );
            }
            Err(e) => return self.stream_failed(&guard, e),
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = guard.token().cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Some(PeerEvent::IceCandidate(candidate)) => spawn_signal(
                    &self.deps.reporter,
                    Signal::IceCandidate {
                        candidate,
                        user_id: self.settings.user_id.clone(),
                    },
                ),
                Some(PeerEvent::StateChanged(next)) => self.apply_stream_state(&guard, next),
                None => break,
            }
        }
        debug!("peer stream task ended");
    }

    fn stream_failed(&self, guard: &GenerationGuard, error: StreamError) {
        warn!(error = %error, "live stream could not start");
        self.apply_stream_state(guard, StreamState::Failed);
    }

    /// One log line per real change; entering Connecting is silent.
    fn apply_stream_state(&self, guard: &GenerationGuard, next: StreamState) {
        if !guard.should_continue() {
            return;
        }
        {
            let mut fields = self.fields.write();
            if fields.stream_state == next {
                return;
            }
            fields.stream_state = next;
        }
        info!(state = %next, "stream_state");
        if next != StreamState::Connecting {
            self.log.append(format!("Live stream state: {next}."));
        }
    }

    /// Back-to-back audio windows while the cycle runs. Each finished window
    /// is classified in its own task, so a slow call never delays the next
    /// window and results may land out of order.
    pub(super) async fn run_threat_loop(
        self: Arc<Self>,
        mut recorder: Box<dyn AudioRecorder>,
        guard: GenerationGuard,
    ) {
        let window = self.settings.segment_window;
        loop {
            let segment = tokio::select! {
                biased;
                _ = guard.token().cancelled() => break,
                segment = recorder.record_segment(window) => segment,
            };
            if !guard.should_continue() {
                break;
            }
            match segment {
                Ok(clip) if clip.is_empty() => continue,
                Ok(clip) => {
                    self.log.append("Capturing audio for analysis...");
                    tokio::spawn(Arc::clone(&self).analyze_segment(clip));
                }
                Err(e) => {
                    warn!(error = %e, "audio capture stopped");
                    self.log.append("Audio capture stopped.");
                    break;
                }
            }
        }
        debug!("threat loop ended");
    }

    /// Not tied to the cycle's guard: a result for a window recorded before
    /// deactivation still lands in the log and `last_threat`.
    async fn analyze_segment(self: Arc<Self>, clip: AudioClip) {
        let request = ClassifyRequest::from_clip(&clip);
        match self.deps.classifier.classify(request).await {
            Ok(verdict) => self.record_verdict(verdict),
            Err(e) => {
                warn!(error = %e, "segment classification failed");
                self.log.append("AI analysis failed.");
                self.deps.notifier.raise(Notice::ThreatDetectionFailed);
            }
        }
    }

    fn record_verdict(&self, verdict: ThreatVerdict) {
        self.fields.write().last_threat = Some(verdict.clone());
        self.log.append(format!(
            "AI analysis complete. Confidence: {}%",
            verdict.confidence_percent()
        ));
        if !verdict.threat_detected {
            return;
        }
        self.log.append(format!(
            "Threat detected: {}",
            verdict.threat_keywords.join(", ")
        ));
        self.log.append("High-priority alert dispatched to authorities.");
        let alert = Alert::threat_detected(
            self.location(),
            &self.settings.user_id,
            verdict.threat_keywords,
            self.log.rendered(),
        );
        info!(keywords = alert.threat_keywords.as_ref().map_or(0, Vec::len), "threat alert dispatched");
        spawn_alert(&self.deps.reporter, alert);
    }
}
