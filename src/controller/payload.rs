//! Context payload handed to the decision provider at each step.

use serde::{Deserialize, Serialize};

use crate::backlog::{CycleContext, StatusSummary};
use crate::node::SystemEvent;
use crate::types::ActionRecord;

/// A node shown in full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedNode {
    pub path: String,
    pub pinned: bool,
    #[serde(default)]
    pub content: String,
}

/// A node shown only by its summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollapsedNode {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPayload {
    pub cycle_id: String,
    pub step: usize,
    pub trigger: CycleContext,
    /// Most recently expanded first.
    pub expanded: Vec<ExpandedNode>,
    pub collapsed: Vec<CollapsedNode>,
    /// Node store events since the previous payload.
    pub system_events: Vec<SystemEvent>,
    pub backlog: StatusSummary,
    /// What this cycle has done so far.
    pub history: Vec<ActionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guidance: Vec<String>,
}

impl ContextPayload {
    pub fn expanded_paths(&self) -> Vec<&str> {
        self.expanded.iter().map(|n| n.path.as_str()).collect()
    }

    pub fn find_expanded(&self, path: &str) -> Option<&ExpandedNode> {
        self.expanded.iter().find(|n| n.path == path)
    }

    pub fn find_collapsed(&self, path: &str) -> Option<&CollapsedNode> {
        self.collapsed.iter().find(|n| n.path == path)
    }

    /// Render as a compact text block, for providers that take plain prompts.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Cycle {} step {}\n", self.cycle_id, self.step));

        if !self.expanded.is_empty() {
            out.push_str("\n## Expanded\n");
            for node in &self.expanded {
                let pin = if node.pinned { " [pinned]" } else { "" };
                out.push_str(&format!("### {}{pin}\n{}\n", node.path, node.content));
            }
        }

        if !self.collapsed.is_empty() {
            out.push_str("\n## Collapsed\n");
            for node in &self.collapsed {
                let summary = node.summary.as_deref().unwrap_or("(no summary)");
                out.push_str(&format!("- {}: {summary}\n", node.path));
            }
        }

        if !self.system_events.is_empty() {
            out.push_str("\n## System events\n");
            for event in &self.system_events {
                out.push_str(&format!("- {}\n", event.message));
            }
        }

        let q = &self.backlog.queued;
        out.push_str(&format!(
            "\n## Backlog\nqueued {} (critical {}, high {}, medium {}, low {}), in progress {}/{}, failed {}\n",
            q.total(),
            q.critical,
            q.high,
            q.medium,
            q.low,
            self.backlog.in_progress,
            self.backlog.max_in_progress,
            self.backlog.failed
        ));

        if !self.history.is_empty() {
            out.push_str("\n## This cycle\n");
            for r in &self.history {
                let status = if r.success { "ok" } else { "failed" };
                out.push_str(&format!("- step {} {} ({status}): {}\n", r.step, r.action_type, r.message));
            }
        }

        if !self.guidance.is_empty() {
            out.push_str("\n## Guidance\n");
            for hint in &self.guidance {
                out.push_str(&format!("- {hint}\n"));
            }
        }
        out
    }
}
