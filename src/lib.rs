//! SlideSafe: slide-to-activate personal safety SOS.
//! Main library: composition root, tracing setup, console front-end.

pub mod state_machine;
pub mod cancellation;
pub mod event_log;
pub mod notify;
pub mod slider;
pub mod classifier;
pub mod media;
pub mod location;
pub mod peer;
pub mod report;
pub mod session;
pub mod config;
mod console;

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel as cb;
use tracing::{error, info, warn};

use classifier::{GeminiClassifier, ThreatClassifier, UnconfiguredClassifier};
use config::Config;
use location::{FixedLocation, LocationProvider, NoLocation};
use media::{HeadlessPreview, MediaDevices};
use notify::{Notice, Notifier};
use peer::SignalingOnlyConnector;
use report::{HttpReporter, ReportError};
use session::{SessionDeps, SessionSettings, SosSession};

/// How often a fixed position is re-reported.
const FIXED_LOCATION_INTERVAL: Duration = Duration::from_secs(30);

/// The running application: one session plus the notice feed for the UI.
pub struct AppContext {
    pub session: Arc<SosSession>,
    pub notices: cb::Receiver<Notice>,
}

impl AppContext {
    /// Wire the session to the default backends for `config`.
    pub fn from_config(config: &Config) -> Result<Self, ReportError> {
        let (notifier, notices) = Notifier::channel();

        let classifier: Arc<dyn ThreatClassifier> = match &config.gemini_api_key {
            Some(key) => match GeminiClassifier::new(key.clone(), config.model.clone()) {
                Ok(client) => {
                    info!(model = %config.model, "threat classifier initialized");
                    Arc::new(client)
                }
                Err(e) => {
                    warn!(error = %e, "threat classifier init failed, analysis disabled");
                    Arc::new(UnconfiguredClassifier)
                }
            },
            None => {
                warn!("GEMINI_API_KEY not set, audio threat analysis disabled");
                Arc::new(UnconfiguredClassifier)
            }
        };

        let location: Arc<dyn LocationProvider> = match config.fixed_position {
            Some(position) => Arc::new(FixedLocation::new(position, FIXED_LOCATION_INTERVAL)),
            None => Arc::new(NoLocation),
        };

        let deps = SessionDeps {
            media: default_media_devices(),
            video: Arc::new(HeadlessPreview::new()),
            location,
            peer: Arc::new(SignalingOnlyConnector::new(config.negotiation_timeout)),
            classifier,
            reporter: Arc::new(HttpReporter::new(&config.alert_url, &config.signal_url)?),
            notifier,
        };
        let settings = SessionSettings {
            user_id: config.user_id.clone(),
            segment_window: config.segment_window,
        };

        Ok(Self {
            session: SosSession::new(deps, settings),
            notices,
        })
    }
}

#[cfg(feature = "device-capture")]
fn default_media_devices() -> Arc<dyn MediaDevices> {
    Arc::new(media::MicrophoneDevices)
}

#[cfg(not(feature = "device-capture"))]
fn default_media_devices() -> Arc<dyn MediaDevices> {
    warn!("built without device-capture, SOS activation will be refused");
    Arc::new(media::NoMediaDevices)
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("slidesafe=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Build and run the application with the console front-end.
pub fn run() {
    init_tracing();
    info!("slidesafe starting");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration rejected");
            return;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return;
        }
    };

    let result = runtime.block_on(async {
        let ctx = AppContext::from_config(&config).map_err(|e| e.to_string())?;
        console::run_console(ctx).await.map_err(|e| e.to_string())
    });
    if let Err(e) = result {
        error!(error = %e, "slidesafe exited with error");
    }
    info!("slidesafe stopped");
}
