//! Best-effort submissions: SOS/threat alerts and stream signaling.
//! Fire-and-forget; failures are absorbed and only logged at debug level.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

use crate::location::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    SosTriggered,
    ThreatDetected,
}

/// Alert body. `threatKeywords` and `log` are only present on threat alerts.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// ISO-8601, UTC, millisecond precision.
    pub timestamp: String,
    pub user_id: String,
    pub status: AlertStatus,
    #[serde(rename = "threatKeywords", skip_serializing_if = "Option::is_none")]
    pub threat_keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<Vec<String>>,
}

impl Alert {
    pub fn sos_triggered(location: Option<Position>, user_id: &str) -> Self {
        Self {
            lat: location.map(|p| p.lat),
            lng: location.map(|p| p.lng),
            timestamp: now_iso8601(),
            user_id: user_id.to_string(),
            status: AlertStatus::SosTriggered,
            threat_keywords: None,
            log: None,
        }
    }

    pub fn threat_detected(
        location: Option<Position>,
        user_id: &str,
        keywords: Vec<String>,
        log: Vec<String>,
    ) -> Self {
        Self {
            threat_keywords: Some(keywords),
            log: Some(log),
            status: AlertStatus::ThreatDetected,
            ..Self::sos_triggered(location, user_id)
        }
    }
}

/// Stream signaling body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Signal {
    Offer { sdp: String, user_id: String },
    IceCandidate { candidate: String, user_id: String },
}

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn send_alert(&self, alert: &Alert) -> Result<(), ReportError>;
    async fn send_signal(&self, signal: &Signal) -> Result<(), ReportError>;
}

#[derive(Debug)]
pub enum ReportError {
    Http(String),
    Status(u16),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Http(msg) => write!(f, "submission failed: {msg}"),
            ReportError::Status(code) => write!(f, "submission rejected with status {code}"),
        }
    }
}

impl std::error::Error for ReportError {}

/// JSON POSTs to the alert and signaling endpoints.
pub struct HttpReporter {
    http: reqwest::Client,
    alert_url: String,
    signal_url: String,
}

impl HttpReporter {
    pub fn new(alert_url: impl Into<String>, signal_url: impl Into<String>) -> Result<Self, ReportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ReportError::Http(e.to_string()))?;
        Ok(Self {
            http,
            alert_url: alert_url.into(),
            signal_url: signal_url.into(),
        })
    }

    async fn post<T: Serialize + Sync>(&self, url: &str, body: &T) -> Result<(), ReportError> {
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ReportError::Http(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ReportError::Status(resp.status().as_u16()))
        }
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn send_alert(&self, alert: &Alert) -> Result<(), ReportError> {
        self.post(&self.alert_url, alert).await
    }

    async fn send_signal(&self, signal: &Signal) -> Result<(), ReportError> {
        self.post(&self.signal_url, signal).await
    }
}

/// Submit without waiting. Never retried.
pub fn spawn_alert(reporter: &Arc<dyn Reporter>, alert: Alert) {
    let reporter = Arc::clone(reporter);
    tokio::spawn(async move {
        match reporter.send_alert(&alert).await {
            Ok(()) => debug!(status = ?alert.status, "alert submitted"),
            Err(e) => debug!(status = ?alert.status, error = %e, "alert submission failed"),
        }
    });
}

/// Submit without waiting. Never retried.
pub fn spawn_signal(reporter: &Arc<dyn Reporter>, signal: Signal) {
    let reporter = Arc::clone(reporter);
    tokio::spawn(async move {
        if let Err(e) = reporter.send_signal(&signal).await {
            debug!(error = %e, "signal submission failed");
        }
    });
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
