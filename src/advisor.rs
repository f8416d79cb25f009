//! ==============================================================================
//! advisor.rs - soil advice from a hosted language model
//! ==============================================================================
//!
//! purpose:
//!     turns the latest sensor values and a user question into a prompt and
//!     asks the Gemini `generateContent` endpoint for an answer.
//!
//!     the model call is opaque to the rest of the host: `advise(prompt)`
//!     either returns text or one of the AdviceError variants, which the web
//!     layer maps to a status code and a friendly message.
//!
//! relationships:
//!     - used by: main.rs (POST /api/ai)
//!     - uses: reqwest (https), config.rs (AdvisorConfig)
//!
//! ==============================================================================

use crate::config::AdvisorConfig;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AdviceError {
    /// the provider refused the prompt on safety grounds
    #[error("prompt was blocked: {0}")]
    BlockedContent(String),
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("request timed out")]
    Timeout,
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("{0}")]
    Unexpected(String),
}

impl AdviceError {
    /// http status returned to the dashboard for this failure
    pub fn status_code(&self) -> u16 {
        match self {
            AdviceError::BlockedContent(_) => 400,
            AdviceError::ProviderError(_) => 500,
            AdviceError::Timeout => 504,
            AdviceError::ConnectionError(_) => 503,
            AdviceError::Unexpected(_) => 500,
        }
    }

    /// text shown to the user in place of an answer
    pub fn user_message(&self) -> String {
        match self {
            AdviceError::BlockedContent(_) => {
                "Sorry, this question cannot be processed because of the AI safety policy.".to_string()
            }
            AdviceError::ProviderError(_) => {
                "Sorry, there was a problem getting an answer from the AI. Please try again.".to_string()
            }
            AdviceError::Timeout => {
                "Sorry, the AI took too long to answer. Please try again or check the internet connection."
                    .to_string()
            }
            AdviceError::ConnectionError(_) => {
                "Sorry, the AI could not be reached. Please check the internet connection.".to_string()
            }
            AdviceError::Unexpected(e) => format!("Error while analysing with the AI: {}", e),
        }
    }
}

impl From<reqwest::Error> for AdviceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdviceError::Timeout
        } else if err.is_connect() {
            AdviceError::ConnectionError(err.to_string())
        } else if err.is_decode() {
            AdviceError::ProviderError(err.to_string())
        } else {
            AdviceError::Unexpected(err.to_string())
        }
    }
}

#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, prompt: &str) -> Result<String, AdviceError>;
}

// ==============================================================================
// prompt assembly
// ==============================================================================

const ROLE_AND_CONSTRAINTS: &str = "You are now the world's leading expert on soil and plants. \
You give the user advice based on these measured soil values: \
Temperature, Humidity, EC (electrical conductivity), pH, Nitrogen, Phosphorus and Potassium. \
Answer the user's question and give advice based on the input from the NPK sensor. \
Answer casually, without heavy technical jargon, like a friend giving advice, \
in the same language the user writes in. \
If the user asks about anything other than soil and plants, do not answer it; \
only reply that you are sorry but you cannot help with that.";

/// (json key, label, unit suffix)
const SENSOR_LINES: [(&str, &str, &str); 7] = [
    ("humidity", "Humidity", "%RH"),
    ("temperature", "Temperature", "°C"),
    ("ec", "Electrical conductivity (EC)", " µS/cm"),
    ("ph", "pH", ""),
    ("nitrogen", "Nitrogen (N)", " mg/kg"),
    ("phosphorus", "Phosphorus (P)", " mg/kg"),
    ("potassium", "Potassium (K)", " mg/kg"),
];

fn field_text(sensor_data: &Value, key: &str) -> String {
    match sensor_data.get(key) {
        None | Some(Value::Null) => "--".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// the "current soil conditions" block; missing values render as "--"
pub fn sensor_block(sensor_data: &Value) -> String {
    let mut block = String::from("Current soil conditions:\n");
    for (key, label, unit) in SENSOR_LINES {
        block.push_str(&format!("- {}: {}{}\n", label, field_text(sensor_data, key), unit));
    }
    block
}

pub fn build_prompt(question: &str, sensor_data: &Value) -> String {
    format!(
        "{}\n\n{}\nUser question: {}",
        ROLE_AND_CONSTRAINTS,
        sensor_block(sensor_data),
        question
    )
}

// ==============================================================================
// gemini client
// ==============================================================================

pub struct GeminiAdvisor {
    client: reqwest::Client,
    config: AdvisorConfig,
}

impl GeminiAdvisor {
    pub fn new(config: AdvisorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

const BLOCKING_FINISH_REASONS: [&str; 4] = ["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

/// pull the answer text out of a generateContent body
fn extract_text(body: GenerateResponse) -> Result<String, AdviceError> {
    if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(AdviceError::BlockedContent(reason));
    }
    let candidate = body
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AdviceError::ProviderError("response has no candidates".to_string()))?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if BLOCKING_FINISH_REASONS.contains(&reason) {
            return Err(AdviceError::BlockedContent(reason.to_string()));
        }
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(AdviceError::ProviderError("response has no text".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl Advisor for GeminiAdvisor {
    async fn advise(&self, prompt: &str) -> Result<String, AdviceError> {
        if self.config.api_key.is_empty() {
            return Err(AdviceError::ProviderError("no api key configured".to_string()));
        }

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&json!({ "contents": [{ "parts": [{ "text": prompt }] }] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AdviceError::ProviderError(format!("{}: {}", status, detail.trim())));
        }

        let body: GenerateResponse = response.json().await?;
        extract_text(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_block_with_reading() {
        let data = json!({
            "humidity": 45.5, "temperature": -10.2, "ec": 980, "ph": 6.8,
            "nitrogen": 12, "phosphorus": 5, "potassium": 33
        });
        let block = sensor_block(&data);
        assert!(block.starts_with("Current soil conditions:\n"));
        assert!(block.contains("- Humidity: 45.5%RH\n"));
        assert!(block.contains("- Temperature: -10.2°C\n"));
        assert!(block.contains("- Electrical conductivity (EC): 980 µS/cm\n"));
        assert!(block.contains("- pH: 6.8\n"));
        assert!(block.contains("- Potassium (K): 33 mg/kg\n"));
        assert_eq!(block.lines().count(), 8);
    }

    #[test]
    fn test_missing_fields_render_dashes() {
        let block = sensor_block(&json!({ "humidity": null, "ph": "7.0" }));
        assert!(block.contains("- Humidity: --%RH\n"));
        assert!(block.contains("- pH: 7.0\n"));
        assert!(block.contains("- Nitrogen (N): -- mg/kg\n"));
    }

    #[test]
    fn test_prompt_layout() {
        let prompt = build_prompt("Is my soil too acidic?", &json!({}));
        assert!(prompt.starts_with(ROLE_AND_CONSTRAINTS));
        assert!(prompt.contains("\n\nCurrent soil conditions:\n"));
        assert!(prompt.ends_with("mg/kg\n\nUser question: Is my soil too acidic?"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AdviceError::BlockedContent("SAFETY".into()).status_code(), 400);
        assert_eq!(AdviceError::ProviderError("x".into()).status_code(), 500);
        assert_eq!(AdviceError::Timeout.status_code(), 504);
        assert_eq!(AdviceError::ConnectionError("x".into()).status_code(), 503);
        assert_eq!(AdviceError::Unexpected("x".into()).status_code(), 500);
        assert!(AdviceError::Unexpected("boom".into()).user_message().contains("boom"));
    }

    fn parse(body: Value) -> Result<String, AdviceError> {
        extract_text(serde_json::from_value(body).unwrap())
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let text = parse(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Add " }, { "text": "compost." }] },
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(text, "Add compost.");
    }

    #[test]
    fn test_extract_text_blocked_prompt() {
        let err = parse(json!({ "promptFeedback": { "blockReason": "SAFETY" } })).unwrap_err();
        assert!(matches!(err, AdviceError::BlockedContent(_)));
    }

    #[test]
    fn test_extract_text_blocked_candidate() {
        let err = parse(json!({ "candidates": [{ "finishReason": "SAFETY" }] })).unwrap_err();
        assert!(matches!(err, AdviceError::BlockedContent(_)));
    }

    #[test]
    fn test_extract_text_empty() {
        let err = parse(json!({ "candidates": [] })).unwrap_err();
        assert!(matches!(err, AdviceError::ProviderError(_)));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_provider_error() {
        let advisor = GeminiAdvisor::new(AdvisorConfig::default()).unwrap();
        let err = advisor.advise("hello").await.unwrap_err();
        assert!(matches!(err, AdviceError::ProviderError(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        let config = AdvisorConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            api_key: "test".to_string(),
            timeout_seconds: 5,
            ..AdvisorConfig::default()
        };
        let err = GeminiAdvisor::new(config).unwrap().advise("hello").await.unwrap_err();
        assert!(matches!(err, AdviceError::ConnectionError(_)), "{:?}", err);
    }
}
