//! Matrix orchestrator: split, fan out sessions, join, synthesize.

use crate::error::{RelayError, RelayResult};
use crate::generator::{strip_code_fence, CompletionRequest, DirectiveGenerator};
use crate::prompts;
use crate::session::{SessionOutcome, SessionRunner};
use crate::splitter::TaskSplitter;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;

/// Size used when no usable number was given.
pub const DEFAULT_MATRIX_SIZE: usize = 3;

/// Normalize a requested matrix size: missing or non-positive → 3, above `max` → `max`.
pub fn clamp_matrix_size(requested: Option<i64>, max: usize) -> usize {
    let max = max.max(1);
    match requested {
        Some(n) if n > 0 => (n as u64).min(max as u64) as usize,
        _ => DEFAULT_MATRIX_SIZE.min(max),
    }
}

/// Cross-task synthesis, kept exactly as the model produced it.
///
/// Any JSON document is accepted; the prompt asks for `executive_summary`,
/// `dimensions` and `roadmap` but their shapes are not enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrandSynthesis(pub Value);

impl GrandSynthesis {
    pub fn executive_summary(&self) -> Option<&Value> {
        self.0.get("executive_summary")
    }

    pub fn dimensions(&self) -> Option<&Value> {
        self.0.get("dimensions")
    }

    pub fn roadmap(&self) -> Option<&Value> {
        self.0.get("roadmap")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SynthesisOutcome {
    Parsed {
        #[serde(rename = "grandSynthesis")]
        synthesis: GrandSynthesis,
    },
    Failed {
        #[serde(rename = "grandSynthesisError")]
        error: String,
        #[serde(rename = "rawText")]
        raw_text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrandReport {
    pub master_prompt: String,
    pub sessions: Vec<SessionOutcome>,
    #[serde(flatten)]
    pub synthesis: SynthesisOutcome,
}

impl GrandReport {
    pub fn failed_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_failed()).count()
    }
}

/// Parse the synthesis answer. Only malformed JSON is an error; the error string is
/// recorded next to the raw text.
pub fn parse_synthesis(text: &str) -> Result<GrandSynthesis, String> {
    serde_json::from_str::<Value>(strip_code_fence(text))
        .map(GrandSynthesis)
        .map_err(|e| e.to_string())
}

/// Flatten every session into the text block fed to the synthesis prompt.
pub fn synthesis_input(sessions: &[SessionOutcome]) -> String {
    let mut out = String::new();
    for session in sessions {
        let _ = write!(out, "\n### Task {}: {}\n", session.task_id(), session.task_prompt());
        if let Some(error) = session.error() {
            let _ = writeln!(out, "(Error: {})", error);
            continue;
        }
        for phase in session.phases() {
            let digest = serde_json::to_string(&phase.digest()).unwrap_or_else(|_| "null".to_string());
            let _ = write!(
                out,
                "- Phase {} Directive: {}\n  Result: {}\n",
                phase.phase_num, phase.prompt, digest
            );
        }
    }
    out
}

pub struct MatrixOrchestrator {
    splitter: TaskSplitter,
    sessions: Arc<SessionRunner>,
    generator: Arc<dyn DirectiveGenerator>,
    phase_count: u32,
}

impl MatrixOrchestrator {
    pub fn new(generator: Arc<dyn DirectiveGenerator>, sessions: Arc<SessionRunner>, phase_count: u32) -> Self {
        Self {
            splitter: TaskSplitter::new(generator.clone()),
            sessions,
            generator,
            phase_count,
        }
    }

    /// Split `master` into `size` tasks, run them all concurrently, then synthesize.
    ///
    /// Individual session failures are carried in the report. Only the loss of every
    /// session is an error.
    pub async fn run(&self, master: &str, size: usize) -> RelayResult<GrandReport> {
        let size = size.max(1);

        tracing::info!(target: "kamos::matrix", size, "splitting prompt into tasks");
        let tasks = self.splitter.split(master, size).await;
        tracing::info!(target: "kamos::matrix", tasks = ?tasks, "tasks identified");

        let sessions: Vec<SessionOutcome> = join_all(
            tasks
                .iter()
                .enumerate()
                .map(|(i, task)| self.sessions.run(task, i + 1)),
        )
        .await;

        let failed = sessions.iter().filter(|s| s.is_failed()).count();
        if failed == sessions.len() {
            let errors = sessions
                .iter()
                .filter_map(|s| s.error().map(|e| format!("Task {}: {}", s.task_id(), e)))
                .collect();
            return Err(RelayError::AllSessionsFailed(errors));
        }
        if failed > 0 {
            tracing::warn!(target: "kamos::matrix", failed, total = sessions.len(), "continuing with partial results");
        }

        tracing::info!(
            target: "kamos::matrix",
            steps = sessions.iter().map(|s| s.phases().len()).sum::<usize>(),
            "aggregating and synthesizing"
        );
        let prompt = prompts::grand_synthesis_prompt(
            master,
            sessions.len(),
            self.phase_count,
            &synthesis_input(&sessions),
        );
        let synthesis = match self.generator.complete(CompletionRequest::json(prompt)).await {
            Ok(completion) => match parse_synthesis(&completion.text) {
                Ok(synthesis) => SynthesisOutcome::Parsed { synthesis },
                Err(error) => {
                    tracing::warn!(target: "kamos::matrix", error = %error, "synthesis is not valid JSON");
                    SynthesisOutcome::Failed {
                        error,
                        raw_text: completion.text,
                    }
                }
            },
            Err(e) => {
                tracing::error!(target: "kamos::matrix", error = %e, "synthesis call failed");
                SynthesisOutcome::Failed {
                    error: e.to_string(),
                    raw_text: String::new(),
                }
            }
        };

        Ok(GrandReport {
            master_prompt: master.to_string(),
            sessions,
            synthesis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CompletedSession, FailedSession, SessionPhase};
    use serde_json::json;

    #[test]
    fn matrix_size_clamping() {
        assert_eq!(clamp_matrix_size(None, 5), 3);
        assert_eq!(clamp_matrix_size(Some(0), 5), 3);
        assert_eq!(clamp_matrix_size(Some(-4), 5), 3);
        assert_eq!(clamp_matrix_size(Some(2), 5), 2);
        assert_eq!(clamp_matrix_size(Some(9), 5), 5);
        assert_eq!(clamp_matrix_size(None, 2), 2);
    }

    #[test]
    fn synthesis_input_lists_failed_tasks_with_their_error() {
        let sessions = vec![
            SessionOutcome::Completed(CompletedSession {
                task_id: 1,
                task_prompt: "pricing".into(),
                phases: vec![SessionPhase {
                    phase_num: 1,
                    prompt: "pricing".into(),
                    result: json!({"report": {"A1": "x"}}),
                }],
                local_summary: None,
            }),
            SessionOutcome::Failed(FailedSession {
                task_id: 2,
                task_prompt: "hiring".into(),
                phases: vec![],
                error: "Relay timeout: idle".into(),
            }),
        ];
        assert_eq!(
            synthesis_input(&sessions),
            "\n### Task 1: pricing\n- Phase 1 Directive: pricing\n  Result: {\"A1\":\"x\"}\n\n### Task 2: hiring\n(Error: Relay timeout: idle)\n"
        );
    }

    #[test]
    fn report_serializes_parsed_synthesis() {
        let report = GrandReport {
            master_prompt: "m".into(),
            sessions: vec![],
            synthesis: SynthesisOutcome::Parsed {
                synthesis: parse_synthesis("```json\n{\"executive_summary\":\"e\",\"roadmap\":[\"r\"]}\n```").unwrap(),
            },
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["masterPrompt"], "m");
        assert_eq!(v["grandSynthesis"]["executive_summary"], "e");
        assert_eq!(v["grandSynthesis"]["roadmap"], json!(["r"]));
        assert!(v["grandSynthesis"].get("dimensions").is_none());
        assert!(v.get("grandSynthesisError").is_none());
    }

    #[test]
    fn any_valid_json_synthesis_is_accepted_as_is() {
        let s = parse_synthesis(r#"{"executive_summary":"e","dimensions":{"market":"x"},"roadmap":["r"]}"#).unwrap();
        assert_eq!(s.dimensions(), Some(&json!({"market": "x"})));
        assert_eq!(s.roadmap(), Some(&json!(["r"])));

        let s = parse_synthesis(r#"{"dimensions":[],"roadmap":"ship it"}"#).unwrap();
        assert_eq!(s.executive_summary(), None);
        assert_eq!(s.roadmap(), Some(&json!("ship it")));

        let s = parse_synthesis(r#"["only", "a", "list"]"#).unwrap();
        assert_eq!(s.0, json!(["only", "a", "list"]));
    }

    #[test]
    fn only_malformed_json_is_a_synthesis_error() {
        assert!(parse_synthesis("{\"executive_summary\": ").is_err());
        assert!(parse_synthesis("Here is my summary").is_err());
    }

    #[test]
    fn report_serializes_failed_synthesis_with_raw_text() {
        let report = GrandReport {
            master_prompt: "m".into(),
            sessions: vec![],
            synthesis: SynthesisOutcome::Failed {
                error: parse_synthesis("oops").unwrap_err(),
                raw_text: "oops".into(),
            },
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["rawText"], "oops");
        assert!(v["grandSynthesisError"].is_string());
        assert!(v.get("grandSynthesis").is_none());
    }
}
