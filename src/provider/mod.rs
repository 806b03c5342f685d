//! Decision and summary providers: the model-facing seams of the core.
//!
//! Neither trait says anything about how a decision or a summary is produced.
//! Implementations may call a hosted model, run rules, or replay a script.

use async_trait::async_trait;

use crate::controller::ContextPayload;
use crate::error::CortexResult;
use crate::types::Decision;

/// Chooses the next actions from a context payload.
///
/// An `Err` is never fatal: the controller treats it as an empty decision for
/// that step and keeps going.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(&self, payload: &ContextPayload) -> CortexResult<Decision>;
}

/// Produces the short text shown for a collapsed node.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, path: &str, content: &str) -> CortexResult<String>;
}

/// First non-empty line of the content, cut to `max_chars` characters.
#[derive(Debug, Clone)]
pub struct TruncatingSummarizer {
    pub max_chars: usize,
}

impl TruncatingSummarizer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Default for TruncatingSummarizer {
    fn default() -> Self {
        Self::new(280)
    }
}

#[async_trait]
impl Summarizer for TruncatingSummarizer {
    async fn summarize(&self, _path: &str, content: &str) -> CortexResult<String> {
        let line = content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("");
        if line.chars().count() <= self.max_chars {
            return Ok(line.to_string());
        }
        let cut: String = line.chars().take(self.max_chars.saturating_sub(3)).collect();
        Ok(format!("{}...", cut.trim_end()))
    }
}
