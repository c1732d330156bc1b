//! Directive generator: the language-model service behind directives, task
//! splitting and synthesis.
//!
//! Every adapter returns the same [`Completion`]; callers never look at
//! provider-specific response shapes.

use crate::config::GeminiSettings;
use crate::error::{RelayError, RelayResult, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Ask the model for strict JSON output.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub format: ResponseFormat,
}

impl CompletionRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            format: ResponseFormat::Text,
        }
    }

    pub fn json(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            format: ResponseFormat::Json,
        }
    }
}

/// Normalized model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
}

#[async_trait]
pub trait DirectiveGenerator: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> RelayResult<Completion>;
}

/// Remove one leading ```` ```lang ```` fence and one trailing ```` ``` ```` fence, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = match rest.find('\n') {
            Some(pos) => &rest[pos + 1..],
            // Single-line fence such as ```json[1,2]```: drop the language tag.
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
    }
    if let Some(rest) = s.trim_end().strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

// Gemini generateContent request/response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

impl GenerateResponse {
    /// Text parts of the first candidate, concatenated.
    fn into_text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default()
    }
}

/// Gemini REST adapter. Built once per process and shared.
pub struct GeminiClient {
    api_key: String,
    model: String,
    api_base: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(settings: &GeminiSettings, api_key: &str, timeout: Duration) -> RelayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Configuration(format!("http client: {}", e)))?;
        Ok(Self {
            api_key: api_key.trim().to_string(),
            model: settings.model.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }
}

#[async_trait]
impl DirectiveGenerator for GeminiClient {
    async fn complete(&self, request: CompletionRequest) -> RelayResult<Completion> {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart {
                    text: &request.prompt,
                }],
            }],
            generation_config: match request.format {
                ResponseFormat::Json => Some(GenerationConfig {
                    response_mime_type: "application/json",
                }),
                ResponseFormat::Text => None,
            },
        };

        tracing::debug!(
            target: "kamos::generator",
            model = %self.model,
            json = request.format == ResponseFormat::Json,
            prompt_chars = request.prompt.chars().count(),
            "requesting completion"
        );

        let res = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::transport(Service::Gemini, e))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| RelayError::transport(Service::Gemini, e))?;

        let parsed: Option<GenerateResponse> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|p| p.error)
                .map(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or(text);
            return Err(RelayError::status(Service::Gemini, status.as_u16(), message));
        }

        let parsed = parsed.ok_or_else(|| RelayError::Parse("Gemini response is not valid JSON".into()))?;
        if let Some(err) = parsed.error {
            return Err(RelayError::upstream(Service::Gemini, err.message));
        }

        let text = parsed.into_text();
        if text.trim().is_empty() {
            return Err(RelayError::upstream(Service::Gemini, "empty completion"));
        }
        Ok(Completion { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tagged_fence() {
        assert_eq!(strip_code_fence("```json\n[\"a\", \"b\"]\n```"), "[\"a\", \"b\"]");
    }

    #[test]
    fn strips_untagged_fence_with_whitespace() {
        assert_eq!(strip_code_fence("  ```\n{\"k\": 1}\n```  \n"), "{\"k\": 1}");
    }

    #[test]
    fn single_line_fence() {
        assert_eq!(strip_code_fence("```json[1]```"), "[1]");
    }

    #[test]
    fn unfenced_text_is_only_trimmed() {
        assert_eq!(strip_code_fence("  [1, 2]\n"), "[1, 2]");
        assert_eq!(strip_code_fence(""), "");
    }

    #[test]
    fn request_body_carries_json_mime_type() {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: "hi" }],
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json",
            }),
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(v["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn text_request_omits_generation_config() {
        let body = GenerateRequest {
            contents: vec![],
            generation_config: None,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert!(v.get("generationConfig").is_none());
    }

    #[test]
    fn response_parts_are_concatenated() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Hello, "},{"text":"world"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_text(), "Hello, world");
    }
}
