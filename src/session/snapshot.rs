use serde::Serialize;

use crate::classifier::ThreatVerdict;
use crate::location::Position;
use crate::state_machine::{SosState, StreamState};

/// Point-in-time copy of the session for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SosState,
    pub stream_state: StreamState,
    pub location: Option<Position>,
    pub last_threat: Option<ThreatVerdict>,
    pub log_len: usize,
}

impl SessionSnapshot {
    pub fn is_active(&self) -> bool {
        self.state == SosState::Active
    }

    pub fn geolocation_status(&self) -> String {
        match (self.is_active(), self.location) {
            (true, Some(position)) => position.to_string(),
            _ => "Inactive".into(),
        }
    }

    pub fn threat_status(&self) -> &'static str {
        match (self.is_active(), &self.last_threat) {
            (false, _) => "Offline",
            (true, None) => "Listening...",
            (true, Some(v)) if v.threat_detected => "Threat",
            (true, Some(_)) => "Clear",
        }
    }

    /// Keyword and confidence lines, shown only while active with a verdict.
    pub fn threat_details(&self) -> Option<(String, String)> {
        if !self.is_active() {
            return None;
        }
        let verdict = self.last_threat.as_ref()?;
        let keywords = if verdict.threat_keywords.is_empty() {
            "None".to_string()
        } else {
            verdict.threat_keywords.join(", ")
        };
        Some((keywords, format!("{}%", verdict.confidence_percent())))
    }

    pub fn evidence_status(&self) -> &'static str {
        if self.is_active() {
            "Encrypting & Storing"
        } else {
            "Secure"
        }
    }

    pub fn feed_status(&self) -> &'static str {
        if self.is_active() {
            "Live"
        } else {
            "Feed is offline"
        }
    }
}
