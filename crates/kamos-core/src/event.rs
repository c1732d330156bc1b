//! Events emitted by the phase loop and carried by the stream transport.
//!
//! Wire payloads are distinguished by which fields are present, not by a tag:
//! `{status, role}`, `{phaseNum, directorPrompt, analysis, isFinal}`, `{error}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed label used as the directive of the terminal wrap-up record.
pub const WRAP_UP_DIRECTIVE: &str = "分析のふりかえり (Wrap-up)";
/// Title of the terminal wrap-up record.
pub const WRAP_UP_TITLE: &str = "全体を通して見えたこと";

/// Who a progress notice is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    /// Directive generator.
    Gemini,
    /// Analysis service.
    Kamos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub status: String,
    pub role: Role,
}

/// Outcome of one phase. `is_final` marks the synthesis record appended after the last phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseResult {
    pub phase_num: u32,
    pub director_prompt: String,
    pub analysis: Value,
    pub is_final: bool,
}

/// Analysis body of the terminal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapUp {
    pub summary: String,
    pub title: String,
}

impl PhaseResult {
    pub fn phase(phase_num: u32, director_prompt: impl Into<String>, analysis: Value) -> Self {
        Self {
            phase_num,
            director_prompt: director_prompt.into(),
            analysis,
            is_final: false,
        }
    }

    /// Terminal record for a loop of `phase_count` phases.
    pub fn wrap_up(phase_count: u32, summary: impl Into<String>) -> Self {
        let wrap_up = WrapUp {
            summary: summary.into(),
            title: WRAP_UP_TITLE.to_string(),
        };
        Self {
            phase_num: phase_count + 1,
            director_prompt: WRAP_UP_DIRECTIVE.to_string(),
            analysis: serde_json::to_value(wrap_up).unwrap_or(Value::Null),
            is_final: true,
        }
    }

    /// Summary text of a terminal record, if the analysis carries one.
    pub fn summary(&self) -> Option<&str> {
        self.analysis.get("summary").and_then(Value::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.analysis.get("title").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFailure {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PhaseEvent {
    Progress(Progress),
    Phase(PhaseResult),
    Final(PhaseResult),
    Error(StreamFailure),
}

impl PhaseEvent {
    pub fn progress(role: Role, status: impl Into<String>) -> Self {
        PhaseEvent::Progress(Progress {
            status: status.into(),
            role,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        PhaseEvent::Error(StreamFailure {
            error: message.into(),
        })
    }

    /// True for events after which nothing else may be emitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseEvent::Final(_) | PhaseEvent::Error(_))
    }

    /// Classify a decoded payload by shape.
    ///
    /// Order matters: `status` wins, then `error`, then a truthy `isFinal`, then a numeric
    /// `phaseNum`. Payloads matching none of these yield `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        let obj = value.as_object()?;

        if let Some(status) = obj.get("status") {
            let role = obj
                .get("role")
                .cloned()
                .and_then(|r| serde_json::from_value(r).ok())
                .unwrap_or(Role::System);
            return Some(PhaseEvent::progress(role, value_text(status)));
        }

        if let Some(error) = obj.get("error") {
            return Some(PhaseEvent::error(value_text(error)));
        }

        let is_final = obj.get("isFinal").map(truthy).unwrap_or(false);
        let phase_num = obj.get("phaseNum").and_then(Value::as_f64);

        if is_final {
            return Some(PhaseEvent::Final(PhaseResult {
                phase_num: phase_num.map(|n| n.max(0.0) as u32).unwrap_or(0),
                director_prompt: obj.get("directorPrompt").map(value_text).unwrap_or_default(),
                analysis: obj.get("analysis").cloned().unwrap_or(Value::Null),
                is_final: true,
            }));
        }

        let n = phase_num?;
        Some(PhaseEvent::Phase(PhaseResult {
            // Non-positive numbers survive as 0 so the stream validator can reject them.
            phase_num: if n >= 1.0 { n as u32 } else { 0 },
            director_prompt: obj.get("directorPrompt").map(value_text).unwrap_or_default(),
            analysis: obj.get("analysis").cloned().unwrap_or(Value::Null),
            is_final: false,
        }))
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
