//! SOS session controller.
//!
//! `activate()` acquires camera + microphone, flips the session to Active and
//! starts three independent subsystems (location, peer stream, threat loop),
//! each in its own task with its own failure domain. `deactivate()` cancels the
//! cycle's token and releases every held resource. The event log is the only
//! state that survives a cycle.

mod snapshot;
mod subsystems;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancellation::SessionGeneration;
use crate::classifier::{ThreatClassifier, ThreatVerdict};
use crate::event_log::EventLog;
use crate::location::{LocationProvider, Position};
use crate::media::{CaptureError, MediaConstraints, MediaDevices, MediaHandle, VideoSink};
use crate::notify::{Notice, Notifier};
use crate::peer::{PeerConnection, PeerConnector};
use crate::report::{spawn_alert, Alert, Reporter};
use crate::state_machine::{SosState, StateMachine, StreamState};

pub use snapshot::SessionSnapshot;

/// External capabilities the session orchestrates.
pub struct SessionDeps {
    pub media: Arc<dyn MediaDevices>,
    pub video: Arc<dyn VideoSink>,
    pub location: Arc<dyn LocationProvider>,
    pub peer: Arc<dyn PeerConnector>,
    pub classifier: Arc<dyn ThreatClassifier>,
    pub reporter: Arc<dyn Reporter>,
    pub notifier: Notifier,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub user_id: String,
    /// Length of each threat-detection audio window.
    pub segment_window: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            user_id: "anonymous".into(),
            segment_window: Duration::from_secs(5),
        }
    }
}

/// Outcome of an `activate()` call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Activated,
    /// Already Active or Activating; nothing happened.
    AlreadyActive,
    /// `deactivate()` ran while the capture device was being acquired.
    Aborted,
}

#[derive(Debug)]
pub enum ActivationError {
    Capture(CaptureError),
}

impl std::fmt::Display for ActivationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationError::Capture(e) => write!(f, "SOS activation failed: {e}"),
        }
    }
}

impl std::error::Error for ActivationError {}

/// Fields reset to rest on every cleanup.
struct SessionFields {
    stream_state: StreamState,
    location: Option<Position>,
    last_threat: Option<ThreatVerdict>,
}

impl SessionFields {
    const REST: Self = Self {
        stream_state: StreamState::Inactive,
        location: None,
        last_threat: None,
    };
}

/// Handles owned by the running cycle.
#[derive(Default)]
struct Resources {
    media: Option<Arc<dyn MediaHandle>>,
    video_attached: bool,
    peer: Option<Arc<dyn PeerConnection>>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SosSession {
    state: StateMachine,
    generations: SessionGeneration,
    /// Serializes the synchronous parts of activate/deactivate.
    lifecycle: Mutex<()>,
    log: EventLog,
    fields: RwLock<SessionFields>,
    resources: Mutex<Resources>,
    deps: SessionDeps,
    settings: SessionSettings,
}

impl SosSession {
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> Arc<Self> {
        Arc::new(Self {
            state: StateMachine::new(),
            generations: SessionGeneration::new(),
            lifecycle: Mutex::new(()),
            log: EventLog::new(),
            fields: RwLock::new(SessionFields::REST),
            resources: Mutex::new(Resources::default()),
            deps,
            settings,
        })
    }

    /// Engage SOS. No-op while already Active or Activating.
    /// Only a capture-device failure is an error; every later subsystem
    /// failure is logged and absorbed.
    pub async fn activate(self: &Arc<Self>) -> Result<Activation, ActivationError> {
        let guard = {
            let _lifecycle = self.lifecycle.lock();
            if self.state.transition(SosState::Activating).is_err() {
                debug!(state = %self.state.current(), "activate ignored");
                return Ok(Activation::AlreadyActive);
            }
            self.log.append("SOS activation sequence initiated...");
            self.generations.advance()
        };
        info!(generation = guard.my_generation(), "sos_activation_started");

        let acquired = self
            .deps
            .media
            .acquire(MediaConstraints::CAMERA_AND_MICROPHONE)
            .await;

        // Held through commit, spawn and the SOS alert so a concurrent
        // deactivate() sees either nothing or the whole cycle.
        let _lifecycle = self.lifecycle.lock();
        let media = match acquired {
            Ok(media) => media,
            Err(e) => {
                warn!(error = %e, "capture acquisition failed");
                if guard.is_current() {
                    self.log.append("Failed to activate SOS.");
                    self.deps.notifier.raise(Notice::PermissionDenied);
                    self.cleanup();
                    self.state.force_idle();
                }
                return Err(ActivationError::Capture(e));
            }
        };
        if !guard.should_continue() {
            media.stop_tracks();
            info!("activation aborted while acquiring capture");
            return Ok(Activation::Aborted);
        }

        {
            let mut res = self.resources.lock();
            res.media = Some(Arc::clone(&media));
            self.deps.video.attach(&media);
            res.video_attached = true;
        }
        self.log.append("Camera and microphone access granted.");
        // A verdict from the previous cycle may have landed after its cleanup.
        *self.fields.write() = SessionFields {
            stream_state: StreamState::Connecting,
            ..SessionFields::REST
        };
        if let Err(e) = self.state.transition(SosState::Active) {
            warn!(error = %e, "activation commit rejected");
            self.cleanup();
            self.state.force_idle();
            return Ok(Activation::Aborted);
        }

        let mut tasks = vec![
            tokio::spawn(Arc::clone(self).track_location(guard.clone())),
            tokio::spawn(Arc::clone(self).run_peer_stream(guard.clone())),
        ];
        match media.audio_recorder() {
            Ok(recorder) => {
                tasks.push(tokio::spawn(
                    Arc::clone(self).run_threat_loop(recorder, guard.clone()),
                ));
                self.log.append("AI threat detection system is active.");
            }
            Err(e) => {
                warn!(error = %e, "threat detection not started");
                self.log.append("AI threat detection unavailable.");
            }
        }
        self.resources.lock().tasks.extend(tasks);

        self.log.append("Simulating evidence encryption...");
        self.log.append("Sending silent alert to emergency contacts...");
        spawn_alert(
            &self.deps.reporter,
            Alert::sos_triggered(self.location(), &self.settings.user_id),
        );
        Ok(Activation::Activated)
    }

    /// Disengage SOS. Returns false (and changes nothing) when already Idle.
    pub fn deactivate(&self) -> bool {
        let _lifecycle = self.lifecycle.lock();
        if self.state.current() == SosState::Idle {
            debug!("deactivate ignored, session idle");
            return false;
        }
        self.log.append("SOS Deactivated by user.");
        self.cleanup();
        self.state.force_idle();
        true
    }

    /// Release everything the cycle holds. Each step is independent and
    /// guarded, so running it with nothing held is a no-op.
    fn cleanup(&self) {
        self.generations.cancel_current();

        let (media, video_attached, peer, tasks) = {
            let mut res = self.resources.lock();
            let attached = std::mem::replace(&mut res.video_attached, false);
            (res.media.take(), attached, res.peer.take(), std::mem::take(&mut res.tasks))
        };
        // The threat loop owns the recorder; aborting it drops any open window.
        for task in tasks {
            task.abort();
        }
        if let Some(media) = media {
            media.stop_tracks();
        }
        if video_attached {
            self.deps.video.detach();
        }
        if let Some(peer) = peer {
            peer.close();
        }

        *self.fields.write() = SessionFields::REST;
        debug!("session resources released");
    }

    pub fn state(&self) -> SosState {
        self.state.current()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn subscribe(&self) -> watch::Receiver<SosState> {
        self.state.subscribe()
    }

    pub fn stream_state(&self) -> StreamState {
        self.fields.read().stream_state
    }

    pub fn location(&self) -> Option<Position> {
        self.fields.read().location
    }

    pub fn last_threat(&self) -> Option<ThreatVerdict> {
        self.fields.read().last_threat.clone()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Whether a capture handle is currently held.
    pub fn holds_media(&self) -> bool {
        self.resources.lock().media.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let fields = self.fields.read();
        SessionSnapshot {
            state: self.state.current(),
            stream_state: fields.stream_state,
            location: fields.location,
            last_threat: fields.last_threat.clone(),
            log_len: self.log.len(),
        }
    }
}
