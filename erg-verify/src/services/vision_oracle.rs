//! Vision oracle client
//!
//! Sends the photo and the claimed distance to an external multimodal model
//! and turns its free-text answer into a [`VisionResult`].
//!
//! The model is asked for a bare JSON object, but the answer is not trusted:
//! parsing first tries the whole text, then the outermost `{...}` span.
//! Every failure (not configured, network, timeout, rate limit, bad status,
//! unparseable text) becomes a `success: false` result with confidence 0.
//! Nothing escapes [`VisionOracle::verify`] as an error.

use async_trait::async_trait;
use base64::Engine;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::services::decision_fusion::exceeds_tolerance;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 15;
const USER_AGENT: &str = concat!("ergtally/", env!("CARGO_PKG_VERSION"));

/// Display label when the oracle names none
pub const UNKNOWN_DISPLAY: &str = "unknown";

/// Concern attached to every failed oracle call
pub const FAILURE_CONCERN: &str = "AI verification failed";

/// Oracle client errors
///
/// Internal to this module; callers only ever see a `VisionResult`.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Oracle API key not configured")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Oracle call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid oracle API key")]
    InvalidApiKey,

    #[error("Oracle rate limit exceeded")]
    RateLimited,

    #[error("Oracle API error {0}: {1}")]
    Api(u16, String),

    #[error("Oracle returned no text")]
    EmptyResponse,

    #[error("Could not parse oracle response: {0}")]
    Parse(String),
}

/// Structured oracle verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionResult {
    /// Call completed and the answer was parseable
    pub success: bool,
    /// Image appears to show a rowing machine display
    pub is_plausible_display: bool,
    /// Distance read from the display
    pub extracted_value: Option<f64>,
    /// Display model / type as described by the oracle
    pub display_type: Option<String>,
    pub matches_claimed: bool,
    /// Claimed minus extracted, in meters
    pub value_difference: Option<f64>,
    /// 0-100
    pub confidence: u8,
    pub concerns: Vec<String>,
    pub reasoning: String,
    /// Diagnostic for failed calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VisionResult {
    /// Negative result for any oracle failure
    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            is_plausible_display: false,
            extracted_value: None,
            display_type: None,
            matches_claimed: false,
            value_difference: None,
            confidence: 0,
            concerns: vec![FAILURE_CONCERN.to_string()],
            reasoning: String::new(),
            error: Some(diagnostic.into()),
        }
    }
}

/// External image-understanding service
#[async_trait]
pub trait VisionOracle: Send + Sync {
    /// Judge the photo against the claim. Never fails.
    async fn verify(&self, image: &[u8], mime_type: &str, claimed_meters: f64) -> VisionResult;

    /// Replace the credential used for subsequent calls
    async fn set_api_key(&self, key: String);
}

/// Connection settings for [`GeminiVisionClient`]
#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub requests_per_minute: u32,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
        }
    }
}

/// Instruction sent with every image
pub fn build_prompt(claimed_meters: f64) -> String {
    format!(
        r#"You are verifying a rowing workout submission. The user claims they rowed {claimed} meters.

Examine the image and determine:
1. Is this a photo of a rowing machine display (ergometer monitor such as a Concept2 PM5)?
2. What total distance in meters is shown on the display?
3. Does the displayed distance match the claimed {claimed} meters?
4. Is there anything suspicious (edited digits, a photo of a screen, a different exercise machine)?

Respond with ONLY a JSON object, no other text, in exactly this format:
{{
  "isRowingMachineDisplay": true or false,
  "extractedMeters": number or null,
  "displayType": "short description of the display",
  "confidence": number from 0 to 100,
  "matchesClaimed": true or false,
  "valueDifference": claimed meters minus extracted meters, or null,
  "concerns": ["short concern", ...],
  "reasoning": "one or two sentences"
}}"#,
        claimed = claimed_meters
    )
}

// ============================================================================
// Response parsing
// ============================================================================

/// Parse oracle text into a successful `VisionResult`
///
/// Missing fields take conservative defaults: not a display, confidence 0,
/// no concerns. A missing `matchesClaimed` is derived from the extracted
/// value with the same tolerance decision fusion uses.
pub fn parse_oracle_response(text: &str, claimed_meters: f64) -> Result<VisionResult, OracleError> {
    let object = parse_object(text.trim())
        .or_else(|| extract_braced(text).and_then(parse_object))
        .ok_or_else(|| {
            OracleError::Parse(format!("no JSON object in response: {}", truncate(text, 120)))
        })?;

    let extracted_value = object.get("extractedMeters").and_then(as_number);

    let matches_claimed = match object.get("matchesClaimed").and_then(as_bool) {
        Some(matches) => matches,
        None => extracted_value
            .map(|extracted| !exceeds_tolerance(claimed_meters, extracted))
            .unwrap_or(false),
    };

    let value_difference = object
        .get("valueDifference")
        .and_then(as_number)
        .or_else(|| extracted_value.map(|extracted| claimed_meters - extracted));

    let confidence = object
        .get("confidence")
        .and_then(as_number)
        .map(|c| c.clamp(0.0, 100.0).round() as u8)
        .unwrap_or(0);

    let concerns = match object.get("concerns") {
        Some(Value::Array(items)) => items.iter().filter_map(as_text).collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };

    Ok(VisionResult {
        success: true,
        is_plausible_display: object
            .get("isRowingMachineDisplay")
            .and_then(as_bool)
            .unwrap_or(false),
        extracted_value,
        display_type: Some(
            object
                .get("displayType")
                .and_then(as_text)
                .unwrap_or_else(|| UNKNOWN_DISPLAY.to_string()),
        ),
        matches_claimed,
        value_difference,
        confidence,
        concerns,
        reasoning: object.get("reasoning").and_then(as_text).unwrap_or_default(),
        error: None,
    })
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Outermost brace-delimited span: first `{` through last `}`
fn extract_braced(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Numbers arrive as JSON numbers or strings such as "5,000" or "5000m"
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => leading_number(s),
        _ => None,
    }
}

/// First numeric token in free text: "5,000 m at 2:00/500m" reads as 5000
fn leading_number(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|b| b.is_ascii_digit())?;
    let negative = start > 0 && bytes[start - 1] == b'-';
    let end = bytes[start..]
        .iter()
        .position(|b| !(b.is_ascii_digit() || *b == b',' || *b == b'.'))
        .map_or(bytes.len(), |offset| start + offset);

    let token: String = text[start..end]
        .trim_end_matches(['.', ','])
        .chars()
        .filter(|c| *c != ',')
        .collect();
    let value = token.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(if negative { -value } else { value })
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ============================================================================
// HTTP client
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Client for a Gemini-compatible `generateContent` endpoint
pub struct GeminiVisionClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
    api_key: RwLock<Option<String>>,
    rate_limiter: DefaultDirectRateLimiter,
}

impl GeminiVisionClient {
    pub fn new(settings: OracleSettings) -> Result<Self, OracleError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| OracleError::Network(e.to_string()))?;

        let per_minute =
            NonZeroU32::new(settings.requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model,
            timeout: settings.timeout,
            api_key: RwLock::new(settings.api_key.filter(|k| !k.trim().is_empty())),
            rate_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        })
    }

    pub async fn has_api_key(&self) -> bool {
        self.api_key.read().await.is_some()
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    /// One round trip to the model, returning its concatenated text
    async fn request_text(
        &self,
        image: &[u8],
        mime_type: &str,
        claimed_meters: f64,
    ) -> Result<String, OracleError> {
        let api_key = self
            .api_key
            .read()
            .await
            .clone()
            .ok_or(OracleError::NotConfigured)?;

        self.rate_limiter.until_ready().await;

        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: build_prompt(claimed_meters),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: mime_type.to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 1024,
            },
        };

        tracing::debug!(
            model = %self.model,
            image_bytes = image.len(),
            claimed_meters,
            "Querying vision oracle"
        );

        let response = self
            .http_client
            .post(self.endpoint())
            .query(&[("key", api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(self.timeout)
                } else {
                    // URL carries the key
                    OracleError::Network(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(OracleError::InvalidApiKey);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(OracleError::Api(status.as_u16(), truncate(&error_text, 200)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(OracleError::EmptyResponse);
        }

        Ok(text)
    }
}

#[async_trait]
impl VisionOracle for GeminiVisionClient {
    async fn verify(&self, image: &[u8], mime_type: &str, claimed_meters: f64) -> VisionResult {
        let started = Instant::now();

        let text = match tokio::time::timeout(
            self.timeout,
            self.request_text(image, mime_type, claimed_meters),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout(self.timeout)),
        };

        match text.and_then(|t| parse_oracle_response(&t, claimed_meters)) {
            Ok(result) => {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    plausible = result.is_plausible_display,
                    extracted = ?result.extracted_value,
                    confidence = result.confidence,
                    "Vision oracle verification complete"
                );
                result
            }
            Err(e) => {
                tracing::warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Vision oracle verification failed"
                );
                VisionResult::failed(e.to_string())
            }
        }
    }

    async fn set_api_key(&self, key: String) {
        *self.api_key.write().await = Some(key);
        tracing::info!("Oracle API key updated");
    }
}
