//! HTTP surface of the relay: single-pass JSON and autonomous SSE on `/` and `/ask`.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use kamos_core::{AnalysisFlags, GeminiClient, KamosClient, PhaseLoop, RelayConfig, RelayResult};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

const KEEP_ALIVE_SECS: u64 = 15;

#[derive(Clone)]
pub struct AppState {
    phase_loop: Arc<PhaseLoop>,
}

impl AppState {
    pub fn new(phase_loop: PhaseLoop) -> Self {
        Self {
            phase_loop: Arc::new(phase_loop),
        }
    }

    /// Build both service clients once; missing credentials are fatal here, not per request.
    pub fn from_config(config: &RelayConfig) -> RelayResult<Self> {
        let token = config.require_kamos_token()?;
        let api_key = config.require_gemini_key()?;
        let analysis = KamosClient::new(config.kamos.api_url.clone(), token, config.timeout())?;
        let generator = GeminiClient::new(&config.gemini, api_key, config.timeout())?;
        Ok(Self::new(PhaseLoop::new(
            Arc::new(analysis),
            Arc::new(generator),
            config.relay.phase_count,
        )))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AskRequest {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    use_google_search: bool,
    #[serde(default)]
    include_past_articles: bool,
    #[serde(default)]
    autonomous_mode: bool,
}

pub fn build_app(state: AppState) -> Router {
    // Browser UI and CLI may live on any origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(ask))
        .route("/ask", post(ask))
        .route("/health", get(health))
        .with_state(state)
        .layer(cors)
}

async fn health() -> &'static str {
    "OK"
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// POST / and /ask
async fn ask(State(state): State<AppState>, payload: Result<Json<AskRequest>, JsonRejection>) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_body(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let prompt = match body.prompt {
        Some(p) if !p.is_empty() => p,
        _ => return error_body(StatusCode::BAD_REQUEST, "Prompt is required"),
    };
    let flags = AnalysisFlags::relay(body.use_google_search, body.include_past_articles);

    if !body.autonomous_mode {
        return single_pass(&state, &prompt, flags).await;
    }

    tracing::info!(
        target: "kamos::gateway",
        phases = state.phase_loop.phase_count(),
        prompt = %prompt,
        "starting autonomous stream"
    );
    autonomous(&state, prompt, flags).into_response()
}

async fn single_pass(state: &AppState, prompt: &str, flags: AnalysisFlags) -> Response {
    match state.phase_loop.run_single(prompt, flags).await {
        Ok(phase) => Json(serde_json::json!({ "phases": [phase] })).into_response(),
        Err(e) => {
            tracing::error!(target: "kamos::gateway", error = %e, "single pass failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// One SSE frame per loop event. Dropping the response drops the receiver, which stops the loop.
fn autonomous(
    state: &AppState,
    prompt: String,
    flags: AnalysisFlags,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    use async_stream::stream;
    let mut rx = state.phase_loop.clone().spawn(prompt, flags);
    let stream = stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(Event::default().json_data(&event).unwrap_or_else(|_| Event::default().data("{}")));
        }
    };
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keepalive"),
    )
}
