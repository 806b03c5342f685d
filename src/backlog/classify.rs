//! Priority and destination rules for batches of candidate actions.
//!
//! Classification depends only on the action type, its parameters and the
//! cycle context, never on the current queue state.

use serde::{Deserialize, Serialize};

use super::Priority;
use crate::types::{ActionCategory, ActionKind};

pub const NODE_LOCAL: &str = "node-local";
pub const SEARCH: &str = "search";
pub const WEB: &str = "web";
pub const HOUSEKEEPING: &str = "housekeeping";
pub const MESSAGING: &str = "messaging";
pub const GENERAL: &str = "general";

/// Provenance of the cycle that produced a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleContext {
    pub cycle_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Platform the triggering activity came from, used as the messaging destination.
    #[serde(default)]
    pub platform: Option<String>,
    /// The cycle was triggered by a direct mention of the agent.
    #[serde(default)]
    pub mention_triggered: bool,
}

impl CycleContext {
    pub fn new(cycle_id: impl Into<String>) -> Self {
        Self {
            cycle_id: cycle_id.into(),
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn mentioned(mut self) -> Self {
        self.mention_triggered = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub priority: Priority,
    pub destination: String,
}

/// Priority for an action kind in a given cycle.
pub fn priority_for(kind: &ActionKind, default_priority: Priority, ctx: &CycleContext) -> Priority {
    match kind.category() {
        ActionCategory::Messaging if ctx.mention_triggered => Priority::Critical,
        ActionCategory::Messaging => Priority::High,
        ActionCategory::NodeLocal => Priority::High,
        ActionCategory::Exploration => Priority::Medium,
        ActionCategory::Housekeeping => Priority::Low,
        ActionCategory::Control | ActionCategory::Other => default_priority,
    }
}

/// Destination (rate limiter key) for an action.
///
/// An explicit `destination` parameter always wins.
pub fn destination_for(kind: &ActionKind, parameters: &serde_json::Value, ctx: &CycleContext) -> String {
    if let Some(explicit) = parameters.get("destination").and_then(|v| v.as_str()) {
        if !explicit.is_empty() {
            return explicit.to_string();
        }
    }
    match kind.category() {
        ActionCategory::Control | ActionCategory::NodeLocal => NODE_LOCAL.to_string(),
        ActionCategory::Messaging => parameters
            .get("platform")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| ctx.platform.clone())
            .unwrap_or_else(|| MESSAGING.to_string()),
        ActionCategory::Exploration => match kind {
            ActionKind::FetchUrl => WEB.to_string(),
            _ => SEARCH.to_string(),
        },
        ActionCategory::Housekeeping => HOUSEKEEPING.to_string(),
        ActionCategory::Other => GENERAL.to_string(),
    }
}

pub fn classify(
    kind: &ActionKind,
    parameters: &serde_json::Value,
    default_priority: Priority,
    ctx: &CycleContext,
) -> Classification {
    Classification {
        priority: priority_for(kind, default_priority, ctx),
        destination: destination_for(kind, parameters, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replies_are_high_unless_mentioned() {
        let ctx = CycleContext::new("c1");
        assert_eq!(
            priority_for(&ActionKind::ReplyToMessage, Priority::Low, &ctx),
            Priority::High
        );
        let mentioned = CycleContext::new("c2").mentioned();
        assert_eq!(
            priority_for(&ActionKind::ReplyToMessage, Priority::Low, &mentioned),
            Priority::Critical
        );
    }

    #[test]
    fn exploration_medium_housekeeping_low() {
        let ctx = CycleContext::new("c1").mentioned();
        assert_eq!(
            priority_for(&ActionKind::Search, Priority::High, &ctx),
            Priority::Medium
        );
        assert_eq!(
            priority_for(&ActionKind::Cleanup, Priority::High, &ctx),
            Priority::Low
        );
    }

    #[test]
    fn unknown_kinds_use_default_priority() {
        let ctx = CycleContext::new("c1");
        let kind = ActionKind::Other("launch".into());
        assert_eq!(priority_for(&kind, Priority::Low, &ctx), Priority::Low);
        assert_eq!(destination_for(&kind, &json!({}), &ctx), GENERAL);
    }

    #[test]
    fn messaging_destination_prefers_parameter_then_context() {
        let ctx = CycleContext::new("c1").with_platform("discord");
        assert_eq!(
            destination_for(&ActionKind::SendMessage, &json!({"platform": "telegram"}), &ctx),
            "telegram"
        );
        assert_eq!(
            destination_for(&ActionKind::SendMessage, &json!({}), &ctx),
            "discord"
        );
        assert_eq!(
            destination_for(&ActionKind::SendMessage, &json!({}), &CycleContext::new("c")),
            MESSAGING
        );
    }

    #[test]
    fn explicit_destination_wins() {
        let ctx = CycleContext::new("c1");
        let c = classify(
            &ActionKind::Search,
            &json!({"destination": "vector-db"}),
            Priority::Low,
            &ctx,
        );
        assert_eq!(c.destination, "vector-db");
        assert_eq!(c.priority, Priority::Medium);
    }

    #[test]
    fn fixed_destinations() {
        let ctx = CycleContext::new("c1");
        assert_eq!(destination_for(&ActionKind::ExpandNode, &json!({}), &ctx), NODE_LOCAL);
        assert_eq!(destination_for(&ActionKind::FetchUrl, &json!({}), &ctx), WEB);
        assert_eq!(destination_for(&ActionKind::Search, &json!({}), &ctx), SEARCH);
        assert_eq!(
            destination_for(&ActionKind::StoreMemory, &json!({}), &ctx),
            HOUSEKEEPING
        );
    }
}
