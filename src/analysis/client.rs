//! # Hosted Model Client
//!
//! REST calls to the hosted model for two one-shot jobs:
//! - **analyze**: structured risk verdict for a transaction scan
//! - **synthesize_speech**: spoken narration as base64 PCM16 (24 kHz mono)
//!
//! Settings are passed per call, so runtime config updates (models, voices, timeouts)
//! take effect on the next request.

use crate::analysis::types::RiskAnalysis;
use crate::config::GeminiConfig;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const ANALYST_INSTRUCTION: &str = r#"You are EthosShield, a Web3 security agent backed by the Ethos Network reputation graph.
Speak as a calm blockchain security mentor. Translate technical scan data and social sentiment into guidance a non-expert can act on.

ETHOS REPUTATION BANDS:
- 350 and below: Low trust (anonymous or negatively attested).
- 351 to 650: Neutral (developing reputation).
- Above 650: High credibility (vouched for by trusted peers).

SOCIAL SIGNALS:
Fold in social signals (reports of scams, hacks or rugs; community sentiment) and cross-check them against the Ethos score.

MALFORMED INPUT:
If the input is not a transaction JSON with transaction_type, asset, ethos_score, risk_score and flags:
1. Set risk_level to null.
2. Explain in the summary which data is missing.
3. Put a JSON template of the expected input in education.
4. Set tts_text to: "I cannot analyze this. Please provide a valid transaction JSON including asset and risk scores."

RULES:
1. risk_score to risk_level: 0-30 LOW, 31-60 MEDIUM, 61-100 HIGH.
2. tts_text must be very short and actionable.
3. recommendation is one of: DO NOT PROCEED, SAFE TO PROCEED, CAUTION."#;

/// Failures of a single model call. Never leaves this module: `analyze` falls back
/// and `synthesize_speech` returns `None`.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no API key configured")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model response had no usable content")]
    EmptyResponse,

    #[error("model output is not a valid analysis: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

impl GenerateContentResponse {
    fn first_part(self) -> Option<Part> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()
    }
}

/// HTTP client for the hosted model's REST API.
#[derive(Debug, Clone, Default)]
pub struct GeminiClient {
    http: Client,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self { http: Client::new() }
    }

    /// Analyze a transaction scan.
    ///
    /// ## Parameters:
    /// - **settings**: Current `gemini` config section
    /// - **input**: Scanner data. Strings are sent verbatim, anything else as JSON.
    ///
    /// ## Returns:
    /// The model's verdict, or `RiskAnalysis::protocol_error_fallback()` if the call
    /// fails or the output does not parse. This never returns an error.
    pub async fn analyze(&self, settings: &GeminiConfig, input: &Value) -> RiskAnalysis {
        match self.request_analysis(settings, input).await {
            Ok(analysis) => {
                info!(
                    risk_level = ?analysis.risk_level,
                    recommendation = %analysis.recommendation,
                    "Analysis complete"
                );
                analysis
            }
            Err(e) => {
                error!("Analysis failed, returning fallback: {}", e);
                RiskAnalysis::protocol_error_fallback()
            }
        }
    }

    /// Synthesize narration.
    ///
    /// ## Returns:
    /// Base64 PCM16 at 24 kHz from the first inline-data part, or `None` on any failure.
    pub async fn synthesize_speech(&self, settings: &GeminiConfig, text: &str) -> Option<String> {
        match self.request_speech(settings, text).await {
            Ok(audio) => Some(audio),
            Err(e) => {
                warn!("Speech synthesis failed: {}", e);
                None
            }
        }
    }

    async fn request_analysis(&self, settings: &GeminiConfig, input: &Value) -> Result<RiskAnalysis, AnalysisError> {
        let contents = match input {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": contents }] }],
            "systemInstruction": { "parts": [{ "text": ANALYST_INSTRUCTION }] },
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": analysis_schema()
            }
        });

        let part = self
            .generate(settings, &settings.analysis_model, &body)
            .await?
            .first_part()
            .ok_or(AnalysisError::EmptyResponse)?;
        let text = part.text.ok_or(AnalysisError::EmptyResponse)?;

        Ok(serde_json::from_str(&text)?)
    }

    async fn request_speech(&self, settings: &GeminiConfig, text: &str) -> Result<String, AnalysisError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": settings.tts_voice }
                    }
                }
            }
        });

        self.generate(settings, &settings.tts_model, &body)
            .await?
            .first_part()
            .and_then(|part| part.inline_data)
            .map(|inline| inline.data)
            .filter(|data| !data.is_empty())
            .ok_or(AnalysisError::EmptyResponse)
    }

    async fn generate(
        &self,
        settings: &GeminiConfig,
        model: &str,
        body: &Value,
    ) -> Result<GenerateContentResponse, AnalysisError> {
        if settings.api_key.trim().is_empty() {
            return Err(AnalysisError::MissingApiKey);
        }

        let url = format!("{}/models/{}:generateContent", settings.api_base, model);
        debug!(model, "Calling generateContent");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &settings.api_key)
            .timeout(settings.request_timeout())
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AnalysisError::Status { status, body });
        }

        Ok(response.json().await?)
    }
}

fn analysis_schema() -> Value {
    let strings = json!({ "type": "ARRAY", "items": { "type": "STRING" } });
    json!({
        "type": "OBJECT",
        "properties": {
            "risk_level": { "type": "STRING", "nullable": true },
            "summary": { "type": "STRING" },
            "explanation": strings,
            "recommendation": { "type": "STRING" },
            "education": { "type": "STRING" },
            "tts_text": { "type": "STRING" },
            "enhanced_metadata": {
                "type": "OBJECT",
                "properties": {
                    "scenario_tags": strings,
                    "social_verification": {
                        "type": "OBJECT",
                        "properties": {
                            "sentiment": { "type": "STRING" },
                            "sources": strings
                        }
                    }
                }
            }
        },
        "required": ["summary", "explanation", "recommendation", "tts_text"]
    })
}
