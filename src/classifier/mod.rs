//! Audio threat classification.
//! One audio segment in (as a base64 data URI), one `ThreatVerdict` out.
//! Malformed or empty model output degrades to `ThreatVerdict::safe_default()`
//! instead of an error; transport and API failures are errors.

pub mod gemini;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

pub use gemini::GeminiClassifier;

/// Structured classifier output for one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatVerdict {
    pub threat_detected: bool,
    #[serde(default)]
    pub threat_keywords: Vec<String>,
    pub confidence_score: f64,
}

impl ThreatVerdict {
    /// No threat, no keywords, zero confidence.
    pub fn safe_default() -> Self {
        Self {
            threat_detected: false,
            threat_keywords: Vec::new(),
            confidence_score: 0.0,
        }
    }

    /// Clamp confidence into [0, 1]; non-finite scores become 0.
    pub fn normalized(mut self) -> Self {
        self.confidence_score = if self.confidence_score.is_finite() {
            self.confidence_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Confidence as a whole percentage, rounded half up.
    pub fn confidence_percent(&self) -> i64 {
        (self.confidence_score * 100.0).round() as i64
    }
}

/// One recorded audio segment.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl AudioClip {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `data:<mime>;base64,<payload>`
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            BASE64_STANDARD.encode(&self.bytes)
        )
    }
}

/// Classifier request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    pub audio_data_uri: String,
}

impl ClassifyRequest {
    pub fn from_clip(clip: &AudioClip) -> Self {
        Self {
            audio_data_uri: clip.to_data_uri(),
        }
    }
}

/// Borrowed view of a parsed `data:` URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUri<'a> {
    pub mime_type: &'a str,
    /// Still base64-encoded.
    pub payload: &'a str,
}

impl<'a> DataUri<'a> {
    /// Parse `data:<mime>;base64,<payload>`. The payload must be valid base64.
    pub fn parse(uri: &'a str) -> Result<Self, ClassifyError> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| ClassifyError::InvalidInput("missing data: scheme".into()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| ClassifyError::InvalidInput("missing payload separator".into()))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| ClassifyError::InvalidInput("payload is not base64".into()))?;
        if mime_type.is_empty() || !mime_type.contains('/') {
            return Err(ClassifyError::InvalidInput(format!(
                "bad mime type: {mime_type:?}"
            )));
        }
        BASE64_STANDARD
            .decode(payload)
            .map_err(|e| ClassifyError::InvalidInput(format!("bad base64 payload: {e}")))?;
        Ok(Self { mime_type, payload })
    }
}

/// Classifier backend (adapter for different hosted models).
#[async_trait]
pub trait ThreatClassifier: Send + Sync {
    async fn classify(&self, request: ClassifyRequest) -> Result<ThreatVerdict, ClassifyError>;
}

#[derive(Debug)]
pub enum ClassifyError {
    InvalidInput(String),
    ApiError(String),
    Timeout,
    NotConfigured,
}

impl std::fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifyError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            ClassifyError::ApiError(msg) => write!(f, "API error: {msg}"),
            ClassifyError::Timeout => write!(f, "classification timeout"),
            ClassifyError::NotConfigured => write!(f, "classifier not configured"),
        }
    }
}

impl std::error::Error for ClassifyError {}

/// Stand-in when no model key is configured: every segment fails, which the
/// session logs as a failed analysis rather than a clean verdict.
pub struct UnconfiguredClassifier;

#[async_trait]
impl ThreatClassifier for UnconfiguredClassifier {
    async fn classify(&self, _request: ClassifyRequest) -> Result<ThreatVerdict, ClassifyError> {
        Err(ClassifyError::NotConfigured)
    }
}

/// Decode model text into a verdict, falling back to the safe default.
/// Returns the verdict and whether the fallback was taken.
pub fn parse_verdict(text: Option<&str>) -> (ThreatVerdict, bool) {
    let Some(text) = text.map(strip_code_fence).filter(|t| !t.is_empty()) else {
        return (ThreatVerdict::safe_default(), true);
    };
    match serde_json::from_str::<ThreatVerdict>(text) {
        Ok(verdict) => (verdict.normalized(), false),
        Err(_) => (ThreatVerdict::safe_default(), true),
    }
}

/// Models sometimes wrap JSON in a ```json fence.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_carries_mime_and_base64() {
        let clip = AudioClip::new("audio/webm", b"abc".to_vec());
        assert_eq!(clip.to_data_uri(), "data:audio/webm;base64,YWJj");

        let uri = clip.to_data_uri();
        let parsed = DataUri::parse(&uri).unwrap();
        assert_eq!(parsed.mime_type, "audio/webm");
        assert_eq!(parsed.payload, "YWJj");
    }

    #[test]
    fn malformed_data_uris_are_rejected() {
        for bad in [
            "audio/webm;base64,YWJj",
            "data:audio/webm;base64YWJj",
            "data:audio/webm,YWJj",
            "data:;base64,YWJj",
            "data:audio/webm;base64,***",
        ] {
            assert!(
                matches!(DataUri::parse(bad), Err(ClassifyError::InvalidInput(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn request_serializes_camel_case() {
        let req = ClassifyRequest::from_clip(&AudioClip::new("audio/wav", vec![1, 2]));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["audioDataUri"], "data:audio/wav;base64,AQI=");
    }

    #[test]
    fn well_formed_output_parses() {
        let (verdict, fallback) = parse_verdict(Some(
            r#"{"threatDetected":true,"threatKeywords":["help"],"confidenceScore":0.82}"#,
        ));
        assert!(!fallback);
        assert!(verdict.threat_detected);
        assert_eq!(verdict.threat_keywords, vec!["help"]);
        assert_eq!(verdict.confidence_percent(), 82);
    }

    #[test]
    fn fenced_output_parses() {
        let (verdict, fallback) = parse_verdict(Some(
            "```json\n{\"threatDetected\":false,\"threatKeywords\":[],\"confidenceScore\":0}\n```",
        ));
        assert!(!fallback);
        assert_eq!(verdict, ThreatVerdict::safe_default());
    }

    #[test]
    fn empty_or_malformed_output_falls_back() {
        for text in [None, Some(""), Some("   "), Some("not json"), Some(r#"{"threatDetected":"yes"}"#)] {
            let (verdict, fallback) = parse_verdict(text);
            assert!(fallback, "{text:?}");
            assert_eq!(verdict, ThreatVerdict::safe_default());
        }
    }

    #[test]
    fn confidence_is_clamped() {
        let (verdict, _) = parse_verdict(Some(
            r#"{"threatDetected":true,"threatKeywords":["scream"],"confidenceScore":1.7}"#,
        ));
        assert_eq!(verdict.confidence_score, 1.0);

        let negative = ThreatVerdict {
            threat_detected: false,
            threat_keywords: vec![],
            confidence_score: -0.2,
        };
        assert_eq!(negative.normalized().confidence_score, 0.0);
    }

    #[test]
    fn percent_rounds_half_up() {
        let mut v = ThreatVerdict::safe_default();
        v.confidence_score = 0.125;
        assert_eq!(v.confidence_percent(), 13);
        v.confidence_score = 0.004;
        assert_eq!(v.confidence_percent(), 0);
    }
}
