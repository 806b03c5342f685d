//! Action dispatch: the seam between the core and platform connectors.
//!
//! The controller only knows [`ActionDispatcher`]. [`HandlerRegistry`] is the
//! stock implementation: a map from action type to an [`ActionHandler`] that
//! validates its parameters before it executes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CortexError, CortexResult};

/// Why a dispatch failed, which decides how the backlog treats it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed parameters. Never retried.
    Validation,
    /// The destination asked us to slow down. Retried later without cost.
    Backpressure { retry_after_secs: u64 },
    /// Anything else. Retried while attempts remain.
    Transient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl DispatchOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            failure: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: error.clone(),
            error: Some(error),
            failure: Some(FailureKind::Transient),
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            failure: Some(FailureKind::Validation),
            ..Self::failure(error)
        }
    }

    pub fn backpressure(retry_after_secs: u64, error: impl Into<String>) -> Self {
        Self {
            failure: Some(FailureKind::Backpressure { retry_after_secs }),
            ..Self::failure(error)
        }
    }

    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or(&self.message)
    }
}

/// Performs externally dispatched actions.
///
/// An `Err` is treated like a transient failure by the controller.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn execute(
        &self,
        action_type: &str,
        parameters: serde_json::Value,
    ) -> CortexResult<DispatchOutcome>;

    /// Extra action types this dispatcher considers state-changing, on top
    /// of the built-in messaging kinds.
    fn is_state_changing(&self, _action_type: &str) -> bool {
        false
    }
}

/// One action type's argument check and executor.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> &str;

    /// Reject malformed parameters before anything is sent.
    fn validate(&self, _parameters: &serde_json::Value) -> CortexResult<()> {
        Ok(())
    }

    async fn execute(&self, parameters: serde_json::Value) -> CortexResult<DispatchOutcome>;

    fn state_changing(&self) -> bool {
        false
    }
}

/// Require a non-empty string parameter.
pub fn require_str<'a>(
    action_type: &str,
    parameters: &'a serde_json::Value,
    key: &str,
) -> CortexResult<&'a str> {
    parameters
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| CortexError::Validation {
            action_type: action_type.to_string(),
            message: format!("missing required parameter '{key}'"),
        })
}

pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    fallback: Option<Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: None,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers
            .insert(handler.action_type().to_string(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Handler for action types with no registration of their own.
    pub fn set_fallback(&mut self, handler: Arc<dyn ActionHandler>) {
        self.fallback = Some(handler);
    }

    pub fn get(&self, action_type: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action_type).or(self.fallback.as_ref())
    }

    pub fn has_handler(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type) || self.fallback.is_some()
    }

    pub fn action_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionDispatcher for HandlerRegistry {
    async fn execute(
        &self,
        action_type: &str,
        parameters: serde_json::Value,
    ) -> CortexResult<DispatchOutcome> {
        let Some(handler) = self.get(action_type) else {
            return Ok(DispatchOutcome::invalid(format!(
                "No handler registered for action '{action_type}'"
            )));
        };

        match handler.validate(&parameters) {
            Ok(()) => {}
            Err(CortexError::Validation { message, .. }) => {
                tracing::debug!(action_type, %message, "validation failed");
                return Ok(DispatchOutcome::invalid(message));
            }
            Err(e) => return Err(e),
        }

        handler.execute(parameters).await
    }

    fn is_state_changing(&self, action_type: &str) -> bool {
        self.get(action_type).is_some_and(|h| h.state_changing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct PostHandler;

    #[async_trait]
    impl ActionHandler for PostHandler {
        fn action_type(&self) -> &str {
            "post_update"
        }

        fn validate(&self, parameters: &serde_json::Value) -> CortexResult<()> {
            require_str(self.action_type(), parameters, "text").map(|_| ())
        }

        async fn execute(&self, parameters: serde_json::Value) -> CortexResult<DispatchOutcome> {
            let text = parameters["text"].as_str().unwrap_or_default();
            Ok(DispatchOutcome::success(format!("posted: {text}")))
        }

        fn state_changing(&self) -> bool {
            true
        }
    }

    struct Catchall;

    #[async_trait]
    impl ActionHandler for Catchall {
        fn action_type(&self) -> &str {
            "*"
        }

        async fn execute(&self, _parameters: serde_json::Value) -> CortexResult<DispatchOutcome> {
            Ok(DispatchOutcome::backpressure(30, "slow down"))
        }
    }

    #[tokio::test]
    async fn routes_to_registered_handler() {
        let registry = HandlerRegistry::new().with_handler(Arc::new(PostHandler));
        let out = registry
            .execute("post_update", json!({"text": "hello"}))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.message, "posted: hello");
    }

    #[tokio::test]
    async fn validation_failure_is_an_outcome() {
        let registry = HandlerRegistry::new().with_handler(Arc::new(PostHandler));
        let out = registry.execute("post_update", json!({})).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.failure, Some(FailureKind::Validation));
        assert!(out.error_text().contains("'text'"));
    }

    #[tokio::test]
    async fn unknown_type_without_fallback_is_invalid() {
        let registry = HandlerRegistry::new();
        let out = registry.execute("teleport", json!({})).await.unwrap();
        assert_eq!(out.failure, Some(FailureKind::Validation));
    }

    #[tokio::test]
    async fn fallback_handles_unregistered_types() {
        let mut registry = HandlerRegistry::new();
        registry.set_fallback(Arc::new(Catchall));
        assert!(registry.has_handler("anything"));
        let out = registry.execute("anything", json!({})).await.unwrap();
        assert_eq!(
            out.failure,
            Some(FailureKind::Backpressure {
                retry_after_secs: 30
            })
        );
    }

    #[test]
    fn state_changing_comes_from_handler() {
        let registry = HandlerRegistry::new().with_handler(Arc::new(PostHandler));
        assert!(registry.is_state_changing("post_update"));
        assert!(!registry.is_state_changing("other"));
        assert_eq!(registry.action_types(), vec!["post_update"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn state_changing_fallback_covers_unregistered_types() {
        let mut registry = HandlerRegistry::new();
        registry.set_fallback(Arc::new(PostHandler));
        assert!(registry.is_state_changing("announce"));

        registry.set_fallback(Arc::new(Catchall));
        assert!(!registry.is_state_changing("announce"));
    }

    #[test]
    fn outcome_serializes_failure_kind() {
        let out = DispatchOutcome::backpressure(5, "429");
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["failure"]["kind"], "backpressure");
        assert_eq!(v["failure"]["retry_after_secs"], 5);
    }

    #[test]
    fn dispatcher_is_object_safe() {
        fn _assert_object_safe(_: &dyn ActionDispatcher) {}
    }
}
