//! Analysis client: the downstream Kamos API.

use crate::error::{RelayError, RelayResult, Service};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Feature switches forwarded with every analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnalysisFlags {
    pub use_search: bool,
    pub include_past_articles: bool,
    pub include_saved_analyses: bool,
    /// Ground the analysis in the Kamos framework documentation.
    pub include_specs: bool,
}

impl AnalysisFlags {
    /// Relay requests carry one history switch that drives both history sources.
    pub fn relay(use_search: bool, include_history: bool) -> Self {
        Self {
            use_search,
            include_past_articles: include_history,
            include_saved_analyses: include_history,
            include_specs: false,
        }
    }
}

/// Inline image sent along with a direct analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    pub mime_type: String,
    /// Standard base64, no data-URL prefix.
    pub data: String,
}

impl ImageContent {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn from_path(path: &Path) -> RelayResult<Self> {
        let mime_type = image_mime_type(path).ok_or_else(|| {
            RelayError::Input(format!("unsupported image format: {}", path.display()))
        })?;
        let bytes = std::fs::read(path)
            .map_err(|e| RelayError::Input(format!("cannot read image {}: {}", path.display(), e)))?;
        Ok(Self::from_bytes(mime_type, &bytes))
    }
}

/// MIME type for a supported image extension (case-insensitive).
pub fn image_mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Analyze one directive and return the service's structured result.
    async fn analyze(&self, prompt: &str, flags: AnalysisFlags) -> RelayResult<Value>;
}

#[derive(Serialize)]
struct AnalysisEnvelope<'a> {
    data: AnalysisPayload<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisPayload<'a> {
    prompt: &'a str,
    use_google_search: bool,
    include_past_articles: bool,
    include_saved_analyses: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    include_kamos_specs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_content: Option<&'a ImageContent>,
}

impl<'a> AnalysisEnvelope<'a> {
    fn new(prompt: &'a str, flags: AnalysisFlags, image: Option<&'a ImageContent>) -> Self {
        Self {
            data: AnalysisPayload {
                prompt,
                use_google_search: flags.use_search,
                include_past_articles: flags.include_past_articles,
                include_saved_analyses: flags.include_saved_analyses,
                include_kamos_specs: flags.include_specs,
                image_content: image,
            },
        }
    }
}

#[derive(Deserialize, Default)]
struct AnalysisResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl AnalysisResponse {
    fn has_error(&self) -> bool {
        self.error.as_ref().is_some_and(|e| !e.is_null())
    }

    fn into_result(self) -> RelayResult<Value> {
        match self.error {
            Some(Value::Null) | None => Ok(self.result.unwrap_or(Value::Null)),
            Some(Value::String(message)) => Err(RelayError::upstream(Service::Kamos, message)),
            Some(other) => Err(RelayError::upstream(Service::Kamos, other.to_string())),
        }
    }
}

/// HTTP adapter for the Kamos endpoint. Holds the bearer token; built once per process.
pub struct KamosClient {
    api_url: String,
    token: String,
    client: reqwest::Client,
}

impl KamosClient {
    pub fn new(api_url: impl Into<String>, token: &str, timeout: Duration) -> RelayResult<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(RelayError::Configuration(
                "KAMOS_API_TOKEN missing in server environment".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Configuration(format!("http client: {}", e)))?;
        Ok(Self {
            api_url: api_url.into(),
            token: token.to_string(),
            client,
        })
    }
}

impl KamosClient {
    /// One analysis request, optionally with an attached image.
    pub async fn analyze_with(
        &self,
        prompt: &str,
        flags: AnalysisFlags,
        image: Option<&ImageContent>,
    ) -> RelayResult<Value> {
        tracing::debug!(
            target: "kamos::analysis",
            use_search = flags.use_search,
            past_articles = flags.include_past_articles,
            saved_analyses = flags.include_saved_analyses,
            specs = flags.include_specs,
            image = image.map(|i| i.mime_type.as_str()),
            prompt_chars = prompt.chars().count(),
            "calling analysis service"
        );

        let res = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&AnalysisEnvelope::new(prompt, flags, image))
            .send()
            .await
            .map_err(|e| RelayError::transport(Service::Kamos, e))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| RelayError::transport(Service::Kamos, e))?;

        match serde_json::from_str::<AnalysisResponse>(&text) {
            // An error payload wins over the status code so the message reaches the caller.
            Ok(body) if body.has_error() => body.into_result(),
            _ if !status.is_success() => Err(RelayError::status(Service::Kamos, status.as_u16(), text)),
            Ok(body) => body.into_result(),
            Err(e) => Err(RelayError::Parse(format!("Kamos response: {}", e))),
        }
    }
}

#[async_trait]
impl AnalysisClient for KamosClient {
    async fn analyze(&self, prompt: &str, flags: AnalysisFlags) -> RelayResult<Value> {
        self.analyze_with(prompt, flags, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relay_flags_mirror_history_into_both_fields() {
        let flags = AnalysisFlags::relay(true, true);
        let v = serde_json::to_value(AnalysisEnvelope::new("市場動向", flags, None)).unwrap();
        assert_eq!(
            v,
            json!({"data": {
                "prompt": "市場動向",
                "useGoogleSearch": true,
                "includePastArticles": true,
                "includeSavedAnalyses": true
            }})
        );
    }

    #[test]
    fn direct_flags_are_independent() {
        let flags = AnalysisFlags {
            use_search: false,
            include_past_articles: false,
            include_saved_analyses: true,
            include_specs: true,
        };
        let image = ImageContent::from_bytes("image/png", b"\x89PNG");
        let v = serde_json::to_value(AnalysisEnvelope::new("q", flags, Some(&image))).unwrap();
        assert_eq!(
            v,
            json!({"data": {
                "prompt": "q",
                "useGoogleSearch": false,
                "includePastArticles": false,
                "includeSavedAnalyses": true,
                "includeKamosSpecs": true,
                "imageContent": {"mimeType": "image/png", "data": "iVBORw=="}
            }})
        );
    }

    #[test]
    fn image_types_follow_the_extension() {
        assert_eq!(image_mime_type(Path::new("shot.PNG")), Some("image/png"));
        assert_eq!(image_mime_type(Path::new("a/b.jpeg")), Some("image/jpeg"));
        assert_eq!(image_mime_type(Path::new("notes.txt")), None);
        assert_eq!(image_mime_type(Path::new("no_extension")), None);
    }

    #[test]
    fn image_is_read_and_encoded_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.jpg");
        std::fs::write(&path, b"hello").unwrap();
        let image = ImageContent::from_path(&path).unwrap();
        assert_eq!(image, ImageContent { mime_type: "image/jpeg".into(), data: "aGVsbG8=".into() });

        let missing = ImageContent::from_path(&dir.path().join("gone.png")).unwrap_err();
        assert!(matches!(missing, RelayError::Input(_)));
        let unsupported = ImageContent::from_path(&dir.path().join("doc.pdf")).unwrap_err();
        assert!(unsupported.to_string().contains("unsupported image format"));
    }

    #[test]
    fn result_body_is_returned() {
        let body: AnalysisResponse = serde_json::from_value(json!({"result": {"title": "t"}})).unwrap();
        assert_eq!(body.into_result().unwrap(), json!({"title": "t"}));
    }

    #[test]
    fn error_body_becomes_tagged_upstream_error() {
        let body: AnalysisResponse = serde_json::from_value(json!({"error": "quota"})).unwrap();
        let err = body.into_result().unwrap_err();
        assert_eq!(err.to_string(), "Kamos API Error: quota");
    }

    #[test]
    fn missing_token_is_a_configuration_error() {
        let err = KamosClient::new("http://localhost", "  ", Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, RelayError::Configuration(_)));
    }
}
