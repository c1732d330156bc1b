//! Append-only history of one phase-loop run.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub phase: u32,
    pub directive: String,
    pub result: Value,
}

/// Ordered log of completed phases. Owned by a single loop run; entries are never edited.
#[derive(Debug, Default)]
pub struct History {
    entries: Vec<Arc<HistoryEntry>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, phase: u32, directive: impl Into<String>, result: Value) {
        self.entries.push(Arc::new(HistoryEntry {
            phase,
            directive: directive.into(),
            result,
        }));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Immutable view of the entries recorded so far.
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            entries: self.entries.clone(),
        }
    }
}

/// Frozen view handed to the directive generator. Later appends do not show up here.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    entries: Vec<Arc<HistoryEntry>>,
}

impl HistorySnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().map(|e| e.as_ref())
    }
}

/// Renders one block per phase: `Phase {i} Target: {directive}\nResult: {json}\n`.
impl fmt::Display for HistorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let result = serde_json::to_string(&entry.result).unwrap_or_else(|_| "null".to_string());
            write!(f, "\nPhase {} Target: {}\nResult: {}\n", entry.phase, entry.directive, result)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_is_not_affected_by_later_appends() {
        let mut h = History::new();
        h.append(1, "first", json!({"a": 1}));
        let snap = h.snapshot();
        h.append(2, "second", json!({"b": 2}));
        assert_eq!(snap.len(), 1);
        assert_eq!(h.len(), 2);
        assert_eq!(h.snapshot().entries().map(|e| e.phase).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn rendering_matches_block_format() {
        let mut h = History::new();
        h.append(1, "目標", json!({"title": "x"}));
        h.append(2, "next", json!("plain"));
        assert_eq!(
            h.snapshot().to_string(),
            "\nPhase 1 Target: 目標\nResult: {\"title\":\"x\"}\n\nPhase 2 Target: next\nResult: \"plain\"\n"
        );
    }

    #[test]
    fn empty_history_renders_nothing() {
        assert_eq!(History::new().snapshot().to_string(), "");
        assert!(History::new().is_empty());
    }
}
