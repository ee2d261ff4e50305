//! Microphone capture via cpal. Audio only; segments are encoded as WAV.
//! The cpal stream is not Send, so it lives on its own thread until the
//! handle's tracks are stopped.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel as cb;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::{AudioRecorder, CaptureError, MediaConstraints, MediaDevices, MediaHandle};
use crate::classifier::AudioClip;

pub struct MicrophoneDevices;

#[async_trait]
impl MediaDevices for MicrophoneDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Arc<dyn MediaHandle>, CaptureError> {
        if !constraints.audio {
            return Err(CaptureError::NoDevice("audio not requested".into()));
        }
        if constraints.video {
            info!("no camera backend, continuing with microphone only");
        }
        let handle = tokio::task::spawn_blocking(open_microphone)
            .await
            .map_err(|e| CaptureError::DeviceFailed(format!("open task failed: {e}")))??;
        Ok(Arc::new(handle))
    }
}

/// Shared between the cpal callback and recorders.
struct Shared {
    buffer: Mutex<Vec<i16>>,
    recording: AtomicBool,
    stopped: AtomicBool,
}

pub struct MicrophoneHandle {
    shared: Arc<Shared>,
    stop_tx: Mutex<Option<cb::Sender<()>>>,
    sample_rate: u32,
    channels: u16,
}

fn open_microphone() -> Result<MicrophoneHandle, CaptureError> {
    let shared = Arc::new(Shared {
        buffer: Mutex::new(Vec::new()),
        recording: AtomicBool::new(false),
        stopped: AtomicBool::new(false),
    });
    let (ready_tx, ready_rx) = cb::bounded::<Result<(u32, u16), CaptureError>>(1);
    let (stop_tx, stop_rx) = cb::bounded::<()>(1);

    let shared_stream = Arc::clone(&shared);
    std::thread::Builder::new()
        .name("microphone".into())
        .spawn(move || match start_stream(shared_stream) {
            Ok((stream, rate, channels)) => {
                let _ = ready_tx.send(Ok((rate, channels)));
                // Hold the stream until stop_tracks (or the handle is dropped).
                let _ = stop_rx.recv();
                drop(stream);
                info!("microphone stream closed");
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        })
        .map_err(|e| CaptureError::DeviceFailed(format!("failed to spawn microphone thread: {e}")))?;

    let (sample_rate, channels) = ready_rx
        .recv()
        .map_err(|_| CaptureError::DeviceFailed("microphone thread exited".into()))??;

    Ok(MicrophoneHandle {
        shared,
        stop_tx: Mutex::new(Some(stop_tx)),
        sample_rate,
        channels,
    })
}

fn start_stream(shared: Arc<Shared>) -> Result<(cpal::Stream, u32, u16), CaptureError> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::NoDevice("no audio input device available".into()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::DeviceFailed(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let on_error = |err: cpal::StreamError| error!(error = %err, "microphone stream error");

    let stream = match sample_format {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if shared.recording.load(Ordering::Relaxed) {
                    shared.buffer.lock().extend_from_slice(data);
                }
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if shared.recording.load(Ordering::Relaxed) {
                    let mut buf = shared.buffer.lock();
                    buf.extend(data.iter().map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16));
                }
            },
            on_error,
            None,
        ),
        other => {
            return Err(CaptureError::DeviceFailed(format!(
                "unsupported sample format {other:?}"
            )))
        }
    }
    .map_err(|e| CaptureError::DeviceFailed(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| CaptureError::DeviceFailed(format!("failed to start input stream: {e}")))?;
    info!(sample_rate = config.sample_rate.0, channels = config.channels, "microphone stream started");
    Ok((stream, config.sample_rate.0, config.channels))
}

impl MediaHandle for MicrophoneHandle {
    fn audio_recorder(&self) -> Result<Box<dyn AudioRecorder>, CaptureError> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceFailed("tracks already stopped".into()));
        }
        Ok(Box::new(MicrophoneRecorder {
            shared: Arc::clone(&self.shared),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }))
    }

    fn stop_tracks(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.recording.store(false, Ordering::SeqCst);
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    fn has_video(&self) -> bool {
        false
    }
}

impl Drop for MicrophoneHandle {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

struct MicrophoneRecorder {
    shared: Arc<Shared>,
    sample_rate: u32,
    channels: u16,
}

/// Clears the recording flag even when the window is abandoned mid-way.
struct RecordingFlag<'a>(&'a AtomicBool);

impl Drop for RecordingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioRecorder for MicrophoneRecorder {
    async fn record_segment(&mut self, window: Duration) -> Result<AudioClip, CaptureError> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceFailed("tracks stopped".into()));
        }
        self.shared.buffer.lock().clear();
        {
            self.shared.recording.store(true, Ordering::SeqCst);
            let _flag = RecordingFlag(&self.shared.recording);
            tokio::time::sleep(window).await;
        }
        let samples = std::mem::take(&mut *self.shared.buffer.lock());
        if samples.is_empty() {
            warn!("microphone window captured no samples");
            return Ok(AudioClip::new("audio/wav", Vec::new()));
        }
        let bytes = encode_wav(&samples, self.sample_rate, self.channels)?;
        Ok(AudioClip::new("audio/wav", bytes))
    }
}

fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>, CaptureError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(samples.len() * 2 + 44));
    let mut writer =
        hound::WavWriter::new(&mut cursor, spec).map_err(|e| CaptureError::Encode(e.to_string()))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(cursor.into_inner())
}
