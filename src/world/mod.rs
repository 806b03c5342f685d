//! Read-only view of the world the agent is curating.
//!
//! The controller asks the world which node paths exist, what a node's
//! current content is, and when each path last saw activity. Connectors and
//! persistence live behind this trait.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CortexResult;

#[async_trait]
pub trait WorldState: Send + Sync {
    /// Every addressable node path.
    async fn paths(&self) -> CortexResult<Vec<String>>;

    /// Current full content of a node, or `None` if the path is unknown.
    async fn content(&self, path: &str) -> CortexResult<Option<String>>;

    /// Last activity time per path, used for auto-expansion.
    async fn activity(&self) -> CortexResult<HashMap<String, DateTime<Utc>>>;
}

/// An in-memory world, handy for hosts with a fixed set of nodes and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticWorld {
    nodes: BTreeMap<String, String>,
    activity: HashMap<String, DateTime<Utc>>,
}

impl StaticWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.set_content(path, content);
        self
    }

    pub fn set_content(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.nodes.insert(path.into(), content.into());
    }

    pub fn touch(&mut self, path: impl Into<String>, at: DateTime<Utc>) {
        self.activity.insert(path.into(), at);
    }

    pub fn with_activity(mut self, path: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.touch(path, at);
        self
    }
}

#[async_trait]
impl WorldState for StaticWorld {
    async fn paths(&self) -> CortexResult<Vec<String>> {
        Ok(self.nodes.keys().cloned().collect())
    }

    async fn content(&self, path: &str) -> CortexResult<Option<String>> {
        Ok(self.nodes.get(path).cloned())
    }

    async fn activity(&self) -> CortexResult<HashMap<String, DateTime<Utc>>> {
        Ok(self.activity.clone())
    }
}
