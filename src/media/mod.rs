//! Capture devices: acquisition, per-window audio recording, live preview.
//! Platform backends implement these traits; the session only sees the traits.

#[cfg(feature = "device-capture")]
pub mod microphone;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::classifier::AudioClip;

#[cfg(feature = "device-capture")]
pub use microphone::MicrophoneDevices;

/// What the session asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl MediaConstraints {
    pub const CAMERA_AND_MICROPHONE: Self = Self {
        video: true,
        audio: true,
    };
}

/// Source of capture handles (camera/microphone permission prompt lives here).
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Arc<dyn MediaHandle>, CaptureError>;
}

/// An acquired capture handle. Exclusively owned by one SOS cycle.
pub trait MediaHandle: Send + Sync {
    /// Recorder over the handle's audio track.
    fn audio_recorder(&self) -> Result<Box<dyn AudioRecorder>, CaptureError>;

    /// Stop and release every track. Idempotent.
    fn stop_tracks(&self);

    fn has_video(&self) -> bool;
}

/// Records one fixed-length window at a time. Dropping the future returned by
/// `record_segment` abandons the window in progress.
#[async_trait]
pub trait AudioRecorder: Send {
    async fn record_segment(&mut self, window: Duration) -> Result<AudioClip, CaptureError>;
}

/// Where the live camera feed is shown.
pub trait VideoSink: Send + Sync {
    fn attach(&self, media: &Arc<dyn MediaHandle>);
    fn detach(&self);
}

#[derive(Debug)]
pub enum CaptureError {
    PermissionDenied,
    NoDevice(String),
    NoAudioTrack,
    Unsupported,
    DeviceFailed(String),
    Encode(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::PermissionDenied => write!(f, "capture permission denied"),
            CaptureError::NoDevice(what) => write!(f, "no capture device: {what}"),
            CaptureError::NoAudioTrack => write!(f, "capture handle has no audio track"),
            CaptureError::Unsupported => write!(f, "media capture not supported on this build"),
            CaptureError::DeviceFailed(msg) => write!(f, "capture device failed: {msg}"),
            CaptureError::Encode(msg) => write!(f, "audio encode failed: {msg}"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Used when the build has no capture backend; every acquisition fails.
pub struct NoMediaDevices;

#[async_trait]
impl MediaDevices for NoMediaDevices {
    async fn acquire(&self, _constraints: MediaConstraints) -> Result<Arc<dyn MediaHandle>, CaptureError> {
        Err(CaptureError::Unsupported)
    }
}

/// Headless preview: remembers whether a feed is bound.
#[derive(Default)]
pub struct HeadlessPreview {
    attached: Mutex<bool>,
}

impl HeadlessPreview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        *self.attached.lock()
    }
}

impl VideoSink for HeadlessPreview {
    fn attach(&self, media: &Arc<dyn MediaHandle>) {
        *self.attached.lock() = true;
        info!(video = media.has_video(), "preview attached");
    }

    fn detach(&self) {
        let mut attached = self.attached.lock();
        if *attached {
            debug!("preview detached");
        }
        *attached = false;
    }
}
