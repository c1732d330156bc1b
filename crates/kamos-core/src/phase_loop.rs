//! Autonomous driver: N sequential directive-then-analyze phases and a final wrap-up.
//!
//! Events go out through a bounded channel as soon as they are produced. A
//! closed receiver means the consumer went away; the loop stops quietly.

use crate::analysis::{AnalysisClient, AnalysisFlags};
use crate::error::{RelayError, RelayResult};
use crate::event::{PhaseEvent, PhaseResult, Role};
use crate::generator::{CompletionRequest, DirectiveGenerator};
use crate::history::{History, HistorySnapshot};
use crate::prompts;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capacity of the event channel handed out by [`PhaseLoop::spawn`].
pub const EVENT_BUFFER: usize = 32;

const STATUS_CONSULTING: &str = "思考パートナーのGeminiがこれまでの結果を振り返り、次の視点を探しています...";
const STATUS_SYNTHESIZING: &str = "すべての分析が完了しました。Geminiが全体を統合して最終報告をまとめています...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Phase(u32),
    Synthesizing,
    Done,
    Failed,
    /// The event consumer dropped its end of the channel.
    Disconnected,
}

/// How a run ended, plus the history it accumulated.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub state: LoopState,
    pub history: HistorySnapshot,
    pub error: Option<String>,
}

enum Halt {
    Failed(RelayError),
    Disconnected,
}

struct Run<'a> {
    tx: &'a mpsc::Sender<PhaseEvent>,
    state: LoopState,
    history: History,
}

impl Run<'_> {
    async fn emit(&self, event: PhaseEvent) -> Result<(), Halt> {
        self.tx.send(event).await.map_err(|_| Halt::Disconnected)
    }

    fn enter(&mut self, next: LoopState) {
        tracing::debug!(target: "kamos::phase_loop", from = ?self.state, to = ?next, "state");
        self.state = next;
    }
}

pub struct PhaseLoop {
    analysis: Arc<dyn AnalysisClient>,
    generator: Arc<dyn DirectiveGenerator>,
    phase_count: u32,
}

impl PhaseLoop {
    pub fn new(
        analysis: Arc<dyn AnalysisClient>,
        generator: Arc<dyn DirectiveGenerator>,
        phase_count: u32,
    ) -> Self {
        Self {
            analysis,
            generator,
            phase_count: phase_count.max(1),
        }
    }

    pub fn phase_count(&self) -> u32 {
        self.phase_count
    }

    /// Non-autonomous mode: one analysis call, no generator, no stream.
    pub async fn run_single(&self, prompt: &str, flags: AnalysisFlags) -> RelayResult<PhaseResult> {
        let analysis = self.analysis.analyze(prompt, flags).await?;
        Ok(PhaseResult::phase(1, prompt, analysis))
    }

    /// Drive one autonomous run to completion, sending every event to `tx`.
    ///
    /// Ends with exactly one terminal or error event unless the receiver is gone.
    pub async fn run(&self, prompt: &str, flags: AnalysisFlags, tx: &mpsc::Sender<PhaseEvent>) -> LoopReport {
        let mut run = Run {
            tx,
            state: LoopState::Idle,
            history: History::new(),
        };

        tracing::info!(
            target: "kamos::phase_loop",
            phases = self.phase_count,
            prompt_chars = prompt.chars().count(),
            "starting autonomous run"
        );

        let outcome = self.drive(prompt, flags, &mut run).await;
        let mut error = None;
        match outcome {
            Ok(()) => run.enter(LoopState::Done),
            Err(Halt::Disconnected) => {
                tracing::info!(
                    target: "kamos::phase_loop",
                    at = ?run.state,
                    "consumer disconnected; stopping"
                );
                run.enter(LoopState::Disconnected);
            }
            Err(Halt::Failed(err)) => {
                tracing::error!(
                    target: "kamos::phase_loop",
                    at = ?run.state,
                    completed = run.history.len(),
                    error = %err,
                    "autonomous run failed"
                );
                let message = err.to_string();
                // A consumer that already left does not change the outcome.
                let _ = run.emit(PhaseEvent::error(message.clone())).await;
                error = Some(message);
                run.enter(LoopState::Failed);
            }
        }

        LoopReport {
            state: run.state,
            history: run.history.snapshot(),
            error,
        }
    }

    /// Run on a background task and hand back the event receiver.
    pub fn spawn(self: Arc<Self>, prompt: String, flags: AnalysisFlags) -> mpsc::Receiver<PhaseEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let report = self.run(&prompt, flags, &tx).await;
            tracing::debug!(
                target: "kamos::phase_loop",
                state = ?report.state,
                phases = report.history.len(),
                "autonomous run ended"
            );
        });
        rx
    }

    async fn drive(&self, prompt: &str, flags: AnalysisFlags, run: &mut Run<'_>) -> Result<(), Halt> {
        let total = self.phase_count;

        for phase in 1..=total {
            run.enter(LoopState::Phase(phase));

            let directive = if phase == 1 {
                run.emit(PhaseEvent::progress(
                    Role::System,
                    format!("フェーズ 1: \"{}\" を分析します", prompt),
                ))
                .await?;
                prompt.to_string()
            } else {
                run.emit(PhaseEvent::progress(Role::Gemini, STATUS_CONSULTING)).await?;
                let history = run.history.snapshot();
                let request = CompletionRequest::text(prompts::directive_prompt(
                    prompt,
                    &history.to_string(),
                    phase,
                    total,
                ));
                let completion = self.generator.complete(request).await.map_err(Halt::Failed)?;
                tracing::info!(target: "kamos::phase_loop", phase, directive = %completion.text, "directive");
                completion.text
            };

            run.emit(PhaseEvent::progress(
                Role::Kamos,
                format!("Kamosが分析を実行中: \"{}\"", directive),
            ))
            .await?;

            let analysis = self
                .analysis
                .analyze(&directive, flags)
                .await
                .map_err(Halt::Failed)?;

            run.history.append(phase, directive.clone(), analysis.clone());
            run.emit(PhaseEvent::Phase(PhaseResult::phase(phase, directive, analysis)))
                .await?;
        }

        run.enter(LoopState::Synthesizing);
        run.emit(PhaseEvent::progress(Role::Gemini, STATUS_SYNTHESIZING)).await?;

        let history = run.history.snapshot();
        let request = CompletionRequest::text(prompts::wrap_up_prompt(prompt, &history.to_string(), total));
        let summary = self.generator.complete(request).await.map_err(Halt::Failed)?;

        run.emit(PhaseEvent::Final(PhaseResult::wrap_up(total, summary.text))).await
    }
}
