//! Node tool surface exposed to the decision layer.
//!
//! `expand_node`, `collapse_node`, `pin_node`, `unpin_node`,
//! `refresh_summary` and `get_expansion_status`. Every path goes through
//! [`NodeStore::resolve`] first, so near-miss paths still land.

use serde::{Deserialize, Serialize};

use crate::node::{ExpansionStatus, NodeStore, Resolution};
use crate::provider::Summarizer;
use crate::types::ActionKind;
use crate::world::WorldState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeToolResult {
    pub success: bool,
    pub message: String,
    /// The store path the requested path resolved to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_collapsed_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExpansionStatus>,
}

impl NodeToolResult {
    fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            resolved_path: None,
            auto_collapsed_node: None,
            status: None,
        }
    }

    fn on(mut self, path: String) -> Self {
        self.resolved_path = Some(path);
        self
    }
}

pub struct NodeTools<'a> {
    nodes: &'a mut NodeStore,
    world: &'a dyn WorldState,
    summarizer: &'a dyn Summarizer,
    known: &'a [String],
}

impl<'a> NodeTools<'a> {
    pub fn new(
        nodes: &'a mut NodeStore,
        world: &'a dyn WorldState,
        summarizer: &'a dyn Summarizer,
        known: &'a [String],
    ) -> Self {
        Self {
            nodes,
            world,
            summarizer,
            known,
        }
    }

    /// Run the node tool named by `kind`.
    pub async fn invoke(
        &mut self,
        kind: &ActionKind,
        parameters: &serde_json::Value,
    ) -> NodeToolResult {
        if *kind == ActionKind::GetExpansionStatus {
            return self.get_expansion_status();
        }
        let path = parameters
            .get("node_path")
            .or_else(|| parameters.get("path"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        match kind {
            ActionKind::ExpandNode => self.expand_node(path),
            ActionKind::CollapseNode => self.collapse_node(path),
            ActionKind::PinNode => self.pin_node(path),
            ActionKind::UnpinNode => self.unpin_node(path),
            ActionKind::RefreshSummary => self.refresh_summary(path).await,
            other => NodeToolResult::new(false, format!("'{other}' is not a node tool")),
        }
    }

    fn resolve(&self, requested: &str) -> Result<String, NodeToolResult> {
        if requested.trim().is_empty() {
            return Err(NodeToolResult::new(false, "node_path is required"));
        }
        let resolution = self.nodes.resolve(requested, self.known);
        match resolution {
            Resolution::NotFound { .. } => Err(NodeToolResult::new(false, resolution.describe())),
            found => {
                if !matches!(found, Resolution::Exact { .. }) {
                    tracing::debug!(requested, resolved = ?found.path(), "node path corrected");
                }
                Ok(found.path().unwrap_or(requested).to_string())
            }
        }
    }

    pub fn expand_node(&mut self, path: &str) -> NodeToolResult {
        let path = match self.resolve(path) {
            Ok(p) => p,
            Err(r) => return r,
        };
        let out = self.nodes.expand(&path);
        NodeToolResult {
            auto_collapsed_node: out.auto_collapsed,
            ..NodeToolResult::new(out.ok, out.message).on(path)
        }
    }

    pub fn collapse_node(&mut self, path: &str) -> NodeToolResult {
        match self.resolve(path) {
            Ok(p) => {
                let out = self.nodes.collapse(&p, false);
                NodeToolResult::new(out.ok, out.message).on(p)
            }
            Err(r) => r,
        }
    }

    pub fn pin_node(&mut self, path: &str) -> NodeToolResult {
        match self.resolve(path) {
            Ok(p) => {
                let out = self.nodes.pin(&p);
                NodeToolResult::new(out.ok, out.message).on(p)
            }
            Err(r) => r,
        }
    }

    pub fn unpin_node(&mut self, path: &str) -> NodeToolResult {
        match self.resolve(path) {
            Ok(p) => {
                let out = self.nodes.unpin(&p);
                NodeToolResult::new(out.ok, out.message).on(p)
            }
            Err(r) => r,
        }
    }

    /// Regenerate a node's summary from its current content.
    pub async fn refresh_summary(&mut self, path: &str) -> NodeToolResult {
        let path = match self.resolve(path) {
            Ok(p) => p,
            Err(r) => return r,
        };
        let content = match self.world.content(&path).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                return NodeToolResult::new(false, format!("No content for '{path}'")).on(path)
            }
            Err(e) => {
                let message = format!("Reading '{path}' failed: {e}");
                return NodeToolResult::new(false, message).on(path);
            }
        };
        self.nodes.content_changed(&path, &content);
        let result = match self.summarizer.summarize(&path, &content).await {
            Ok(summary) => {
                let out = self.nodes.update_summary(&path, summary);
                NodeToolResult::new(out.ok, out.message)
            }
            Err(e) => NodeToolResult::new(false, format!("Summarizing '{path}' failed: {e}")),
        };
        result.on(path)
    }

    pub fn get_expansion_status(&self) -> NodeToolResult {
        let status = self.nodes.expansion_status();
        let message = format!(
            "{}/{} nodes expanded, {} pinned",
            status.expanded.len(),
            status.max_expanded,
            status.pinned.len()
        );
        NodeToolResult {
            status: Some(status),
            ..NodeToolResult::new(true, message)
        }
    }
}
