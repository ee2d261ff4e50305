//! Fakes for every collaborator, driven through channels and semaphores so
//! tests control exactly when captures, fixes and verdicts arrive.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crossbeam_channel as cb;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use slidesafe::classifier::{parse_verdict, AudioClip, ClassifyError, ClassifyRequest, ThreatClassifier, ThreatVerdict};
use slidesafe::location::{LocationError, LocationProvider, LocationStream, Position};
use slidesafe::media::{AudioRecorder, CaptureError, MediaConstraints, MediaDevices, MediaHandle, VideoSink};
use slidesafe::notify::{Notice, Notifier};
use slidesafe::peer::{PeerConnection, PeerConnector, PeerEvent, StreamError};
use slidesafe::report::{Alert, ReportError, Reporter, Signal};
use slidesafe::session::{SessionDeps, SessionSettings, SosSession};

// --- media ---

pub struct FakeMedia {
    pub acquisitions: AtomicUsize,
    pub stopped: Arc<AtomicUsize>,
    deny: bool,
    slow_recorder: bool,
    gate: Option<Semaphore>,
    recorder: Arc<Mutex<Option<mpsc::UnboundedReceiver<AudioClip>>>>,
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn acquire(&self, _constraints: MediaConstraints) -> Result<Arc<dyn MediaHandle>, CaptureError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if self.deny {
            return Err(CaptureError::PermissionDenied);
        }
        Ok(Arc::new(FakeHandle {
            slow_recorder: self.slow_recorder,
            stopped: Arc::clone(&self.stopped),
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

struct FakeHandle {
    slow_recorder: bool,
    stopped: Arc<AtomicUsize>,
    recorder: Arc<Mutex<Option<mpsc::UnboundedReceiver<AudioClip>>>>,
}

impl MediaHandle for FakeHandle {
    fn audio_recorder(&self) -> Result<Box<dyn AudioRecorder>, CaptureError> {
        if self.slow_recorder {
            std::thread::sleep(Duration::from_millis(200));
        }
        match self.recorder.lock().take() {
            Some(rx) => Ok(Box::new(FakeRecorder { rx })),
            None => Err(CaptureError::NoAudioTrack),
        }
    }

    fn stop_tracks(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn has_video(&self) -> bool {
        true
    }
}

struct FakeRecorder {
    rx: mpsc::UnboundedReceiver<AudioClip>,
}

#[async_trait]
impl AudioRecorder for FakeRecorder {
    async fn record_segment(&mut self, _window: Duration) -> Result<AudioClip, CaptureError> {
        match self.rx.recv().await {
            Some(clip) => Ok(clip),
            None => std::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct FakeVideo {
    pub attaches: AtomicUsize,
    pub detaches: AtomicUsize,
}

impl VideoSink for FakeVideo {
    fn attach(&self, _media: &Arc<dyn MediaHandle>) {
        self.attaches.fetch_add(1, Ordering::SeqCst);
    }

    fn detach(&self) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

// --- location ---

pub struct FakeLocation {
    fixes: Mutex<Option<mpsc::UnboundedReceiver<Result<Position, LocationError>>>>,
}

impl LocationProvider for FakeLocation {
    fn watch(&self) -> LocationStream {
        match self.fixes.lock().take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|fix| (fix, rx)) }).boxed(),
            None => stream::pending().boxed(),
        }
    }
}

// --- peer ---

#[derive(Default)]
pub struct FakePeer {
    pub connects: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    events: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
}

impl FakePeer {
    /// Deliver an event as if the connection reported it.
    pub fn emit(&self, event: PeerEvent) {
        let events = self.events.lock();
        let tx = events.as_ref().expect("peer not connected");
        let _ = tx.send(event);
    }
}

impl PeerConnector for FakePeer {
    fn connect(&self, events: mpsc::UnboundedSender<PeerEvent>) -> Result<Arc<dyn PeerConnection>, StreamError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.events.lock() = Some(events);
        Ok(Arc::new(FakeConnection {
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct FakeConnection {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn create_offer(&self) -> Result<String, StreamError> {
        Ok("v=0 fake".into())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// --- classifier ---

/// What the fake model answers for the next segment.
pub enum Scripted {
    /// Raw model text, run through the production fallback parser.
    Text(&'static str),
    Fail,
}

pub struct ScriptedClassifier {
    pub calls: AtomicUsize,
    script: Mutex<VecDeque<Scripted>>,
    gate: Option<Semaphore>,
}

#[async_trait]
impl ThreatClassifier for ScriptedClassifier {
    async fn classify(&self, request: ClassifyRequest) -> Result<ThreatVerdict, ClassifyError> {
        assert!(request.audio_data_uri.starts_with("data:audio/webm;base64,"));
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted::Text(text)) => Ok(parse_verdict(Some(text)).0),
            Some(Scripted::Fail) => Err(ClassifyError::ApiError("scripted failure".into())),
            None => Ok(ThreatVerdict::safe_default()),
        }
    }
}

// --- reporter ---

pub struct FakeReporter {
    alerts: mpsc::UnboundedSender<Alert>,
    pub signals: Mutex<Vec<Signal>>,
}

#[async_trait]
impl Reporter for FakeReporter {
    async fn send_alert(&self, alert: &Alert) -> Result<(), ReportError> {
        let _ = self.alerts.send(alert.clone());
        // Submissions fail like the unreachable mock endpoint; the session must not care.
        Err(ReportError::Status(404))
    }

    async fn send_signal(&self, signal: &Signal) -> Result<(), ReportError> {
        self.signals.lock().push(signal.clone());
        Ok(())
    }
}

// --- harness ---

#[derive(Default)]
pub struct Options {
    pub deny_capture: bool,
    pub gate_capture: bool,
    /// Opening the recorder blocks for 200ms.
    pub slow_recorder: bool,
    pub gate_classifier: bool,
    pub script: Vec<Scripted>,
}

pub struct Harness {
    pub session: Arc<SosSession>,
    pub media: Arc<FakeMedia>,
    pub video: Arc<FakeVideo>,
    pub peer: Arc<FakePeer>,
    pub classifier: Arc<ScriptedClassifier>,
    pub reporter: Arc<FakeReporter>,
    pub clips: mpsc::UnboundedSender<AudioClip>,
    pub fixes: mpsc::UnboundedSender<Result<Position, LocationError>>,
    pub notices: cb::Receiver<Notice>,
    alerts: mpsc::UnboundedReceiver<Alert>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(Options::default())
    }

    pub fn with(options: Options) -> Self {
        let (clips, clips_rx) = mpsc::unbounded_channel();
        let (fixes, fixes_rx) = mpsc::unbounded_channel();
        let (alerts_tx, alerts) = mpsc::unbounded_channel();
        let (notifier, notices) = Notifier::channel();

        let media = Arc::new(FakeMedia {
            acquisitions: AtomicUsize::new(0),
            stopped: Arc::new(AtomicUsize::new(0)),
            deny: options.deny_capture,
            slow_recorder: options.slow_recorder,
            gate: options.gate_capture.then(|| Semaphore::new(0)),
            recorder: Arc::new(Mutex::new(Some(clips_rx))),
        });
        let video = Arc::new(FakeVideo::default());
        let peer = Arc::new(FakePeer::default());
        let classifier = Arc::new(ScriptedClassifier {
            calls: AtomicUsize::new(0),
            script: Mutex::new(options.script.into_iter().collect()),
            gate: options.gate_classifier.then(|| Semaphore::new(0)),
        });
        let reporter = Arc::new(FakeReporter {
            alerts: alerts_tx,
            signals: Mutex::new(Vec::new()),
        });

        let deps = SessionDeps {
            media: media.clone(),
            video: video.clone(),
            location: Arc::new(FakeLocation {
                fixes: Mutex::new(Some(fixes_rx)),
            }),
            peer: peer.clone(),
            classifier: classifier.clone(),
            reporter: reporter.clone(),
            notifier,
        };
        let session = SosSession::new(deps, SessionSettings::default());

        Self {
            session,
            media,
            video,
            peer,
            classifier,
            reporter,
            clips,
            fixes,
            notices,
            alerts,
        }
    }

    pub fn push_clip(&self, bytes: &[u8]) {
        self.clips
            .send(AudioClip::new("audio/webm", bytes.to_vec()))
            .expect("recorder gone");
    }

    pub fn release_capture(&self) {
        self.media.gate.as_ref().expect("capture not gated").add_permits(1);
    }

    pub fn release_classifier(&self) {
        self.classifier.gate.as_ref().expect("classifier not gated").add_permits(1);
    }

    pub async fn next_alert(&mut self) -> Alert {
        tokio::time::timeout(Duration::from_secs(2), self.alerts.recv())
            .await
            .expect("timed out waiting for alert")
            .expect("reporter dropped")
    }

    /// No further alert within a short grace period.
    pub async fn assert_no_alert(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(50), self.alerts.recv()).await;
        assert!(next.is_err(), "unexpected alert: {next:?}");
    }

    pub fn messages(&self) -> Vec<String> {
        self.session.log().messages()
    }

    pub fn count(&self, message: &str) -> usize {
        self.messages().iter().filter(|m| m.as_str() == message).count()
    }
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
