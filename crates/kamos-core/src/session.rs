//! Session runner: one remote autonomous run consumed as one task.

use crate::error::{RelayError, RelayResult, Service};
use crate::event::PhaseEvent;
use crate::stream::{decode_stream, ByteStream, StreamValidator};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Opens the byte stream of a remote autonomous run.
#[async_trait]
pub trait RemoteLoop: Send + Sync {
    async fn open(&self, prompt: &str) -> RelayResult<ByteStream>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AutonomousRequest<'a> {
    prompt: &'a str,
    autonomous_mode: bool,
    use_google_search: bool,
    include_past_articles: bool,
}

/// reqwest adapter for the relay's `/ask` endpoint.
pub struct RemoteLoopClient {
    url: String,
    client: reqwest::Client,
}

impl RemoteLoopClient {
    /// `connect_timeout` bounds connection setup only; read deadlines belong to [`SessionRunner`].
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> RelayResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RelayError::Configuration(format!("http client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RemoteLoop for RemoteLoopClient {
    async fn open(&self, prompt: &str) -> RelayResult<ByteStream> {
        let body = AutonomousRequest {
            prompt,
            autonomous_mode: true,
            use_google_search: true,
            include_past_articles: false,
        };
        let res = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::transport(Service::Relay, e))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(RelayError::status(Service::Relay, status.as_u16(), text));
        }

        let bytes = res
            .bytes_stream()
            .map_err(|e| RelayError::transport(Service::Relay, e));
        Ok(Box::pin(bytes))
    }
}

/// One collected phase, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPhase {
    pub phase_num: u32,
    pub prompt: String,
    pub result: Value,
}

impl SessionPhase {
    /// The part of the result worth feeding into synthesis: `report`, else `summary`, else all of it.
    pub fn digest(&self) -> Value {
        ["report", "summary"]
            .iter()
            .filter_map(|k| self.result.get(*k))
            .find(|v| truthy(v))
            .cloned()
            .unwrap_or_else(|| match &self.result {
                Value::Null => Value::String("No data".into()),
                other => other.clone(),
            })
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSession {
    pub task_id: usize,
    pub task_prompt: String,
    pub phases: Vec<SessionPhase>,
    /// `None` when the stream closed before the wrap-up record.
    pub local_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedSession {
    pub task_id: usize,
    pub task_prompt: String,
    pub phases: Vec<SessionPhase>,
    pub error: String,
}

/// Terminal state of one session; exactly one shape per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionOutcome {
    Failed(FailedSession),
    Completed(CompletedSession),
}

impl SessionOutcome {
    pub fn task_id(&self) -> usize {
        match self {
            SessionOutcome::Completed(s) => s.task_id,
            SessionOutcome::Failed(s) => s.task_id,
        }
    }

    pub fn task_prompt(&self) -> &str {
        match self {
            SessionOutcome::Completed(s) => &s.task_prompt,
            SessionOutcome::Failed(s) => &s.task_prompt,
        }
    }

    pub fn phases(&self) -> &[SessionPhase] {
        match self {
            SessionOutcome::Completed(s) => &s.phases,
            SessionOutcome::Failed(s) => &s.phases,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SessionOutcome::Failed(s) => Some(&s.error),
            SessionOutcome::Completed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SessionOutcome::Failed(_))
    }
}

pub struct SessionRunner {
    remote: Arc<dyn RemoteLoop>,
    timeout: Duration,
}

impl SessionRunner {
    /// `timeout` bounds opening the stream and every gap between reads.
    pub fn new(remote: Arc<dyn RemoteLoop>, timeout: Duration) -> Self {
        Self { remote, timeout }
    }

    /// Run one task. Never fails: every error is folded into the outcome.
    pub async fn run(&self, task_prompt: &str, session_id: usize) -> SessionOutcome {
        tracing::info!(
            target: "kamos::session",
            session = session_id,
            prompt = %preview(task_prompt, 30),
            "starting session"
        );

        let mut phases = Vec::new();
        match self.collect(task_prompt, session_id, &mut phases).await {
            Ok(local_summary) => {
                tracing::info!(
                    target: "kamos::session",
                    session = session_id,
                    phases = phases.len(),
                    "session finished"
                );
                SessionOutcome::Completed(CompletedSession {
                    task_id: session_id,
                    task_prompt: task_prompt.to_string(),
                    phases,
                    local_summary,
                })
            }
            Err(err) => {
                tracing::warn!(target: "kamos::session", session = session_id, error = %err, "session failed");
                SessionOutcome::Failed(FailedSession {
                    task_id: session_id,
                    task_prompt: task_prompt.to_string(),
                    phases: Vec::new(),
                    error: err.to_string(),
                })
            }
        }
    }

    async fn collect(
        &self,
        task_prompt: &str,
        session_id: usize,
        phases: &mut Vec<SessionPhase>,
    ) -> RelayResult<Option<String>> {
        let bytes = tokio::time::timeout(self.timeout, self.remote.open(task_prompt))
            .await
            .map_err(|_| self.timed_out("opening the stream"))??;

        let mut events = Box::pin(decode_stream(bytes));
        let mut validator = StreamValidator::new();
        let mut summary = None;

        loop {
            let next = tokio::time::timeout(self.timeout, events.next())
                .await
                .map_err(|_| self.timed_out("waiting for the next frame"))?;
            let Some(event) = next else { break };
            let event = event?;

            if let Err(reason) = validator.check(&event) {
                tracing::warn!(target: "kamos::session", session = session_id, reason = %reason, "frame rejected");
                continue;
            }

            match event {
                PhaseEvent::Progress(p) => {
                    tracing::debug!(target: "kamos::session", session = session_id, role = ?p.role, status = %p.status);
                }
                PhaseEvent::Phase(result) => {
                    tracing::info!(
                        target: "kamos::session",
                        session = session_id,
                        phase = result.phase_num,
                        "phase complete"
                    );
                    phases.push(SessionPhase {
                        phase_num: result.phase_num,
                        prompt: result.director_prompt,
                        result: result.analysis,
                    });
                }
                PhaseEvent::Final(result) => {
                    summary = Some(result.summary().unwrap_or_default().to_string());
                }
                PhaseEvent::Error(failure) => {
                    return Err(RelayError::upstream(Service::Relay, failure.error));
                }
            }
        }

        if phases.is_empty() {
            return Err(RelayError::Parse(format!("Session {} produced no phases.", session_id)));
        }
        if summary.is_none() {
            tracing::warn!(
                target: "kamos::session",
                session = session_id,
                phases = phases.len(),
                "stream closed without a wrap-up record; task incomplete"
            );
        }
        Ok(summary)
    }

    fn timed_out(&self, what: &str) -> RelayError {
        RelayError::timeout(
            Service::Relay,
            format!("no response within {:?} while {}", self.timeout, what),
        )
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
