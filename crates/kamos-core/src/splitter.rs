//! Task splitter: one master prompt into `count` independent sub-task prompts.

use crate::generator::{strip_code_fence, CompletionRequest, DirectiveGenerator};
use crate::prompts;
use serde_json::Value;
use std::sync::Arc;

pub struct TaskSplitter {
    generator: Arc<dyn DirectiveGenerator>,
}

impl TaskSplitter {
    pub fn new(generator: Arc<dyn DirectiveGenerator>) -> Self {
        Self { generator }
    }

    /// Always returns exactly `count` prompts; any generator or format problem falls back.
    pub async fn split(&self, master: &str, count: usize) -> Vec<String> {
        let request = CompletionRequest::text(prompts::split_prompt(master, count));
        let parsed = match self.generator.complete(request).await {
            Ok(completion) => parse_task_list(&completion.text, count),
            Err(e) => Err(e.to_string()),
        };
        match parsed {
            Ok(tasks) => tasks,
            Err(reason) => {
                tracing::warn!(target: "kamos::splitter", count, reason = %reason, "task split rejected; using fallback");
                fallback_tasks(master, count)
            }
        }
    }
}

/// Validate a generator answer: a JSON array of exactly `count` strings, optionally fenced.
pub fn parse_task_list(text: &str, count: usize) -> Result<Vec<String>, String> {
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body).map_err(|e| format!("not JSON: {}", e))?;
    let Value::Array(items) = value else {
        return Err("not a JSON array".to_string());
    };
    if items.len() != count {
        return Err(format!("expected {} tasks, got {}", count, items.len()));
    }
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(s) => Ok(s),
            _ => Err(format!("task {} is not a string", i + 1)),
        })
        .collect()
}

/// `"<master> (Aspect k)"` for k = 1..=count.
pub fn fallback_tasks(master: &str, count: usize) -> Vec<String> {
    (1..=count).map(|k| format!("{} (Aspect {})", master, k)).collect()
}
