//! Prompt templates for the directive generator.
//!
//! Placeholders in braces are substituted by the builder functions below.

/// Phase 2..N: ask for the next question to put to the analysis service.
pub const DIRECTIVE_TEMPLATE: &str = r#"あなたは、ユーザーと一緒に考えを深める「フラットな思考パートナー」です。
ユーザーが知りたいこと: {goal}
これまでの分析の流れ: {history}
現在のステップ: {phase} / {total}

これまでの分析結果を読み、まだ掘り下げられていない論点や足りない視点を一つ見つけてください。
それを踏まえて、次に Kamos に分析させる「新しい問い」を一つだけ書いてください。

- 中盤のステップ: 表面的な話の裏にある具体的な課題への深掘り
- 最後のステップ: 全体のまとめに向けたつなぎ、または具体的な一歩の提案

出力は日本語で、問いの本文だけを返してください。"#;

/// After the last phase: free-form wrap-up of the whole run.
pub const WRAP_UP_TEMPLATE: &str = r#"あなたは、ユーザーと一緒に考えを深めてきた「フラットな思考パートナー」です。
これまでの {total} フェーズの分析を振り返り、全体として何が見えてきたかをニュートラルにまとめてください。

目的: {goal}
分析の全履歴: {history}

構成:
1. 今回の分析のポイント
2. 分析を通じて見えてきた意外な視点
3. 次のステップへのヒント

出力は日本語の Markdown で、簡潔に書いてください。"#;

/// Break a master prompt into independent sub-tasks.
pub const SPLIT_TEMPLATE: &str = r#"You are a strategic planning assistant.
Break the following user input into {count} distinct analysis tasks for Kamos, an analysis agent.
Each task must explore a different aspect of the problem so that together they cover it.

User Input: "{prompt}"

Output ONLY a raw JSON array of {count} strings, e.g. ["Task 1...", "Task {count}..."].
Do not include markdown formatting or explanations."#;

/// Cross-task synthesis for the matrix orchestrator.
pub const GRAND_SYNTHESIS_TEMPLATE: &str = r#"You are the Grand Orchestrator.
A master prompt was split into {tasks} sub-tasks, each analysed by a {phases}-phase chain.

Master Prompt: "{prompt}"

Aggregated results:
{matrices}

Synthesize all of this into one report:
1. executive_summary: the core finding across every perspective.
2. dimensions: how the sub-tasks interact, with conflicts and synergies.
3. roadmap: concrete next steps.

Output ONLY JSON of the form
{"executive_summary": "...", "dimensions": [...], "roadmap": [...]}
without markdown fencing."#;

pub fn directive_prompt(goal: &str, history: &str, phase: u32, total: u32) -> String {
    DIRECTIVE_TEMPLATE
        .replace("{goal}", goal)
        .replace("{history}", history)
        .replace("{phase}", &phase.to_string())
        .replace("{total}", &total.to_string())
}

pub fn wrap_up_prompt(goal: &str, history: &str, total: u32) -> String {
    WRAP_UP_TEMPLATE
        .replace("{total}", &total.to_string())
        .replace("{goal}", goal)
        .replace("{history}", history)
}

pub fn split_prompt(prompt: &str, count: usize) -> String {
    SPLIT_TEMPLATE
        .replace("{count}", &count.to_string())
        .replace("{prompt}", prompt)
}

pub fn grand_synthesis_prompt(prompt: &str, tasks: usize, phases: u32, matrices: &str) -> String {
    GRAND_SYNTHESIS_TEMPLATE
        .replace("{tasks}", &tasks.to_string())
        .replace("{phases}", &phases.to_string())
        .replace("{prompt}", prompt)
        .replace("{matrices}", matrices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_prompt_fills_every_placeholder() {
        let p = directive_prompt("goal text", "\nPhase 1 Target: x\n", 2, 3);
        assert!(p.contains("goal text"));
        assert!(p.contains("Phase 1 Target: x"));
        assert!(p.contains("2 / 3"));
        assert!(!p.contains('{'));
    }

    #[test]
    fn split_prompt_mentions_count() {
        let p = split_prompt("Plan Q3", 5);
        assert!(p.contains("into 5 distinct"));
        assert!(p.contains("\"Plan Q3\""));
    }

    #[test]
    fn grand_synthesis_keeps_json_braces() {
        let p = grand_synthesis_prompt("m", 2, 3, "### Task 1: a");
        assert!(p.contains("\"executive_summary\""));
        assert!(p.contains("### Task 1: a"));
        assert!(p.contains("2 sub-tasks"));
    }
}
