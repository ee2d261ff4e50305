//! Gemini generateContent client for audio threat classification.
//! The clip travels as inline base64 data next to a fixed instruction; the
//! model is asked for JSON matching `ThreatVerdict`. No retries.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{parse_verdict, ClassifyError, ClassifyRequest, DataUri, ThreatClassifier, ThreatVerdict};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const THREAT_PROMPT: &str = "You are an AI expert in threat detection. Analyze the provided audio \
stream and identify potential threats based on keywords, sound patterns, and context.\n\n\
Determine if a threat is present and extract relevant keywords. Provide a confidence score for \
the detection. If no specific threat is detected, the audio is silent, or the audio is unclear, \
you MUST return a response with 'threatDetected' as false, an empty 'threatKeywords' array, and \
a 'confidenceScore' of 0.";

pub struct GeminiClassifier {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClassifier {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ClassifyError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ClassifyError::ApiError(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: BASE_URL.into(),
        })
    }

    /// Point at a different endpoint root (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(audio: &DataUri<'_>) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user".into(),
                parts: vec![
                    Part::Text {
                        text: THREAT_PROMPT.into(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: audio.mime_type.to_string(),
                            data: audio.payload.to_string(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: verdict_schema(),
                temperature: 0.0,
            },
        }
    }
}

#[async_trait]
impl ThreatClassifier for GeminiClassifier {
    async fn classify(&self, request: ClassifyRequest) -> Result<ThreatVerdict, ClassifyError> {
        let audio = DataUri::parse(&request.audio_data_uri)?;
        let body = Self::build_body(&audio);

        let start = Instant::now();
        let response = self
            .http
            .post(format!("{}/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifyError::Timeout
                } else {
                    ClassifyError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ClassifyError::ApiError(format!(
                "unexpected status {}: {}",
                status,
                body_text.chars().take(200).collect::<String>()
            )));
        }

        // An unreadable body is the same as an empty model answer.
        let text = match response.json::<GenerateContentResponse>().await {
            Ok(parsed) => extract_text(parsed),
            Err(e) => {
                warn!(error = %e, "classifier response body unreadable");
                None
            }
        };

        let (verdict, fallback) = parse_verdict(text.as_deref());
        if fallback {
            warn!(model = %self.model, "classifier produced no structured verdict, using safe default");
        }
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            threat = verdict.threat_detected,
            confidence = verdict.confidence_score,
            "classification done"
        );
        Ok(verdict)
    }
}

fn extract_text(response: GenerateContentResponse) -> Option<String> {
    response
        .candidates?
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .find_map(|part| part.text)
}

fn verdict_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "threatDetected": { "type": "BOOLEAN" },
            "threatKeywords": { "type": "ARRAY", "items": { "type": "STRING" } },
            "confidenceScore": { "type": "NUMBER" }
        },
        "required": ["threatDetected", "threatKeywords", "confidenceScore"]
    })
}

// --- Wire types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_prompt_and_inline_audio() {
        let uri = "data:audio/webm;base64,YWJj";
        let audio = DataUri::parse(uri).unwrap();
        let body = serde_json::to_value(GeminiClassifier::build_body(&audio)).unwrap();

        let parts = &body["contents"][0]["parts"];
        assert!(parts[0]["text"].as_str().unwrap().contains("threat detection"));
        assert_eq!(parts[1]["inlineData"]["mimeType"], "audio/webm");
        assert_eq!(parts[1]["inlineData"]["data"], "YWJj");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn text_is_taken_from_first_candidate() {
        let response: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"a\":1}" }] } }]
        }))
        .unwrap();
        assert_eq!(extract_text(response).as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn missing_candidates_yield_no_text() {
        let response: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(extract_text(response).is_none());

        let blocked: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({ "candidates": [{}] })).unwrap();
        assert!(extract_text(blocked).is_none());
    }

    #[tokio::test]
    async fn malformed_data_uri_is_rejected_before_any_request() {
        let classifier = GeminiClassifier::new("key", DEFAULT_MODEL)
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let err = classifier
            .classify(ClassifyRequest {
                audio_data_uri: "not a data uri".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidInput(_)));
    }
}
