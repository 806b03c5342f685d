use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backlog::ActionId;
use crate::controller::CycleReport;
use crate::node::SystemEvent;

// ─── Action Kinds ───────────────────────────────────────────────────────────

/// Broad grouping of action kinds; drives routing and default priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    /// The "nothing to do" sentinel.
    Control,
    /// Operations on the node store, executed in-process.
    NodeLocal,
    /// Externally visible messages, reactions and media.
    Messaging,
    /// Search, fetches and history reads.
    Exploration,
    /// Memory, settings and cleanup.
    Housekeeping,
    /// Anything else registered with the dispatcher.
    Other,
}

/// Closed set of action types the core knows how to route.
///
/// Unknown type strings are preserved in [`ActionKind::Other`] and handed to
/// the dispatcher untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    Wait,
    ExpandNode,
    CollapseNode,
    PinNode,
    UnpinNode,
    RefreshSummary,
    GetExpansionStatus,
    SendMessage,
    ReplyToMessage,
    AddReaction,
    SendMedia,
    EditMessage,
    DeleteMessage,
    Search,
    FetchUrl,
    ReadHistory,
    StoreMemory,
    UpdateSettings,
    Cleanup,
    Other(String),
}

impl ActionKind {
    /// Parse an action type string, accepting the common aliases.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" | "no_action" | "none" => ActionKind::Wait,
            "expand_node" | "expand" => ActionKind::ExpandNode,
            "collapse_node" | "collapse" => ActionKind::CollapseNode,
            "pin_node" | "pin" => ActionKind::PinNode,
            "unpin_node" | "unpin" => ActionKind::UnpinNode,
            "refresh_summary" => ActionKind::RefreshSummary,
            "get_expansion_status" => ActionKind::GetExpansionStatus,
            "send_message" | "send" => ActionKind::SendMessage,
            "reply_to_message" | "reply" | "send_reply" => ActionKind::ReplyToMessage,
            "add_reaction" | "react" => ActionKind::AddReaction,
            "send_media" | "upload_media" | "send_image" => ActionKind::SendMedia,
            "edit_message" => ActionKind::EditMessage,
            "delete_message" => ActionKind::DeleteMessage,
            "search" | "web_search" => ActionKind::Search,
            "fetch_url" | "web_fetch" => ActionKind::FetchUrl,
            "read_history" | "get_messages" => ActionKind::ReadHistory,
            "store_memory" | "remember" => ActionKind::StoreMemory,
            "update_settings" => ActionKind::UpdateSettings,
            "cleanup" => ActionKind::Cleanup,
            _ => ActionKind::Other(s.trim().to_string()),
        }
    }

    /// Canonical type string.
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Wait => "wait",
            ActionKind::ExpandNode => "expand_node",
            ActionKind::CollapseNode => "collapse_node",
            ActionKind::PinNode => "pin_node",
            ActionKind::UnpinNode => "unpin_node",
            ActionKind::RefreshSummary => "refresh_summary",
            ActionKind::GetExpansionStatus => "get_expansion_status",
            ActionKind::SendMessage => "send_message",
            ActionKind::ReplyToMessage => "reply_to_message",
            ActionKind::AddReaction => "add_reaction",
            ActionKind::SendMedia => "send_media",
            ActionKind::EditMessage => "edit_message",
            ActionKind::DeleteMessage => "delete_message",
            ActionKind::Search => "search",
            ActionKind::FetchUrl => "fetch_url",
            ActionKind::ReadHistory => "read_history",
            ActionKind::StoreMemory => "store_memory",
            ActionKind::UpdateSettings => "update_settings",
            ActionKind::Cleanup => "cleanup",
            ActionKind::Other(s) => s,
        }
    }

    pub fn category(&self) -> ActionCategory {
        match self {
            ActionKind::Wait => ActionCategory::Control,
            ActionKind::ExpandNode
            | ActionKind::CollapseNode
            | ActionKind::PinNode
            | ActionKind::UnpinNode
            | ActionKind::RefreshSummary
            | ActionKind::GetExpansionStatus => ActionCategory::NodeLocal,
            ActionKind::SendMessage
            | ActionKind::ReplyToMessage
            | ActionKind::AddReaction
            | ActionKind::SendMedia
            | ActionKind::EditMessage
            | ActionKind::DeleteMessage => ActionCategory::Messaging,
            ActionKind::Search | ActionKind::FetchUrl | ActionKind::ReadHistory => {
                ActionCategory::Exploration
            }
            ActionKind::StoreMemory | ActionKind::UpdateSettings | ActionKind::Cleanup => {
                ActionCategory::Housekeeping
            }
            ActionKind::Other(_) => ActionCategory::Other,
        }
    }

    pub fn is_wait(&self) -> bool {
        matches!(self, ActionKind::Wait)
    }

    pub fn is_node_local(&self) -> bool {
        self.category() == ActionCategory::NodeLocal
    }

    /// Whether executing this action changes what the next payload should show.
    ///
    /// Messaging is externally visible; expanding or re-summarizing a node
    /// reveals content the provider has not seen yet.
    pub fn is_state_changing(&self) -> bool {
        matches!(
            self,
            ActionKind::SendMessage
                | ActionKind::ReplyToMessage
                | ActionKind::AddReaction
                | ActionKind::SendMedia
                | ActionKind::EditMessage
                | ActionKind::DeleteMessage
                | ActionKind::ExpandNode
                | ActionKind::RefreshSummary
        )
    }
}

impl From<String> for ActionKind {
    fn from(s: String) -> Self {
        ActionKind::parse(&s)
    }
}

impl From<&str> for ActionKind {
    fn from(s: &str) -> Self {
        ActionKind::parse(s)
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Decisions ──────────────────────────────────────────────────────────────

/// One action proposed by the decision provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub reasoning: String,
}

impl CandidateAction {
    pub fn new(action_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            action_type: action_type.into(),
            parameters,
            reasoning: String::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn wait() -> Self {
        Self::new("wait", serde_json::Value::Null)
    }

    pub fn kind(&self) -> ActionKind {
        ActionKind::parse(&self.action_type)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    /// Node path targeted by this action, if any (`node_path` or `path`).
    pub fn node_path(&self) -> Option<&str> {
        self.param_str("node_path").or_else(|| self.param_str("path"))
    }
}

/// The decision provider's answer for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub actions: Vec<CandidateAction>,
}

impl Decision {
    pub fn new(actions: Vec<CandidateAction>) -> Self {
        Self {
            reasoning: String::new(),
            actions,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

// ─── Cycle History ──────────────────────────────────────────────────────────

/// What happened to one candidate action during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub step: usize,
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub success: bool,
    pub message: String,
    /// Set when the action went through the backlog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_id: Option<ActionId>,
    pub at: DateTime<Utc>,
}

// ─── Streaming Events ───────────────────────────────────────────────────────

/// Events emitted while a cycle runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CycleEvent {
    CycleStart {
        cycle_id: String,
    },
    StepStart {
        cycle_id: String,
        step: usize,
    },
    DecisionReceived {
        cycle_id: String,
        step: usize,
        action_count: usize,
        reasoning: String,
    },
    ActionStart {
        cycle_id: String,
        action_type: String,
    },
    ActionEnd {
        cycle_id: String,
        record: ActionRecord,
    },
    NodeEvent {
        event: SystemEvent,
    },
    CycleEnd {
        report: CycleReport,
    },
    Error {
        message: String,
    },
}
