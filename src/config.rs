//! Runtime configuration from environment variables.

use std::time::Duration;

use crate::classifier::gemini::DEFAULT_MODEL;
use crate::location::Position;

#[derive(Debug, Clone)]
pub struct Config {
    /// `GEMINI_API_KEY`. Without it every segment fails classification.
    pub gemini_api_key: Option<String>,
    pub model: String,
    pub alert_url: String,
    pub signal_url: String,
    pub user_id: String,
    pub segment_window: Duration,
    pub negotiation_timeout: Duration,
    /// `SLIDESAFE_LAT` + `SLIDESAFE_LNG`, both or neither.
    pub fixed_position: Option<Position>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            model: DEFAULT_MODEL.into(),
            alert_url: "http://localhost:3000/api/alert".into(),
            signal_url: "http://localhost:3000/api/signal".into(),
            user_id: "anonymous".into(),
            segment_window: Duration::from_secs(5),
            negotiation_timeout: Duration::from_secs(15),
            fixed_position: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Incomplete(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::Incomplete(msg) => write!(f, "incomplete configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let lat = get("SLIDESAFE_LAT").map(|v| parse_f64("SLIDESAFE_LAT", v)).transpose()?;
        let lng = get("SLIDESAFE_LNG").map(|v| parse_f64("SLIDESAFE_LNG", v)).transpose()?;
        let fixed_position = match (lat, lng) {
            (Some(lat), Some(lng)) => Some(Position::new(lat, lng)),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Incomplete(
                    "SLIDESAFE_LAT and SLIDESAFE_LNG must be set together",
                ))
            }
        };

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY"),
            model: get("SLIDESAFE_MODEL").unwrap_or(defaults.model),
            alert_url: get("SLIDESAFE_ALERT_URL").unwrap_or(defaults.alert_url),
            signal_url: get("SLIDESAFE_SIGNAL_URL").unwrap_or(defaults.signal_url),
            user_id: get("SLIDESAFE_USER_ID").unwrap_or(defaults.user_id),
            segment_window: get("SLIDESAFE_SEGMENT_SECS")
                .map(|v| parse_secs("SLIDESAFE_SEGMENT_SECS", v))
                .transpose()?
                .unwrap_or(defaults.segment_window),
            negotiation_timeout: get("SLIDESAFE_NEGOTIATION_TIMEOUT_SECS")
                .map(|v| parse_secs("SLIDESAFE_NEGOTIATION_TIMEOUT_SECS", v))
                .transpose()?
                .unwrap_or(defaults.negotiation_timeout),
            fixed_position,
        })
    }
}

fn parse_secs(var: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Invalid { var, value }),
    }
}

fn parse_f64(var: &'static str, value: String) -> Result<f64, ConfigError> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ConfigError::Invalid { var, value }),
    }
}
