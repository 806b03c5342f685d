//! Node store: the bounded "working memory" over the world state.
//!
//! Every piece of world state is addressed by a dotted path
//! (`channels.discord.general`). The store keeps only metadata per path:
//! whether it is expanded (full content visible to the decision provider) or
//! collapsed (summary only), whether it is pinned, its cached summary, and the
//! last content hash seen.
//!
//! Only `max_expanded` nodes can be expanded at once. Expanding past the cap
//! evicts the least-recently-expanded **unpinned** node; pinned nodes are never
//! eviction candidates. If every expanded node is pinned the expansion fails
//! and nothing changes.
//!
//! ```rust
//! use cortex_core::node::{NodeStore, NodeStoreConfig};
//!
//! let mut store = NodeStore::new(NodeStoreConfig { max_expanded: 2, ..Default::default() });
//! store.expand("a");
//! store.expand("b");
//! store.pin("a");
//! let outcome = store.expand("c");
//! assert!(outcome.ok);
//! assert_eq!(outcome.auto_collapsed.as_deref(), Some("b"));
//! ```

pub mod resolve;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::{self, system_clock, SharedClock};

pub use resolve::Resolution;

/// Node store tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStoreConfig {
    /// Maximum number of simultaneously expanded nodes.
    pub max_expanded: usize,
    /// Capacity of the system event log (oldest dropped first).
    pub event_log_capacity: usize,
    /// Maximum number of nodes `auto_expand_active` expands per call.
    pub auto_expand_limit: usize,
    /// Activity window for priority paths (notifications and the like).
    pub priority_window_secs: i64,
    /// Activity window for everything else.
    pub regular_window_secs: i64,
    /// Path prefixes treated as priority categories.
    pub priority_prefixes: Vec<String>,
    /// Known aliases used by path resolution (`alias -> canonical path`).
    pub aliases: HashMap<String, String>,
}

impl Default for NodeStoreConfig {
    fn default() -> Self {
        Self {
            max_expanded: 5,
            event_log_capacity: 50,
            auto_expand_limit: 5,
            priority_window_secs: 3600,
            regular_window_secs: 300,
            priority_prefixes: vec!["notifications".into()],
            aliases: HashMap::new(),
        }
    }
}

/// Per-node metadata. A path with no entry behaves like `NodeMetadata::default()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub is_expanded: bool,
    pub is_pinned: bool,
    pub cached_summary: Option<String>,
    pub summary_updated_at: Option<DateTime<Utc>>,
    pub last_expanded_at: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    /// Pinned by `auto_expand_active` rather than by hand.
    #[serde(default)]
    pub auto_pinned: bool,
    /// Monotonic expansion counter; breaks `last_expanded_at` ties.
    #[serde(default)]
    touch_seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEventKind {
    Expanded,
    AutoExpanded,
    Collapsed,
    AutoCollapsed,
    Pinned,
    Unpinned,
    SummaryUpdated,
    ContentChanged,
}

/// A structured record of a node store mutation, surfaced to the next payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: SystemEventKind,
    pub message: String,
    pub paths: Vec<String>,
}

/// Result of [`NodeStore::expand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandOutcome {
    pub ok: bool,
    pub auto_collapsed: Option<String>,
    pub message: String,
}

/// Result of the simpler node operations (collapse, pin, unpin, summary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOpOutcome {
    pub ok: bool,
    pub message: String,
}

impl NodeOpOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedEntry {
    pub path: String,
    pub pinned: bool,
    pub last_expanded_at: Option<DateTime<Utc>>,
}

/// Snapshot answering `get_expansion_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionStatus {
    pub max_expanded: usize,
    pub expanded: Vec<ExpandedEntry>,
    pub pinned: Vec<String>,
}

pub struct NodeStore {
    config: NodeStoreConfig,
    nodes: BTreeMap<String, NodeMetadata>,
    events: VecDeque<SystemEvent>,
    next_seq: u64,
    clock: SharedClock,
}

impl NodeStore {
    pub fn new(config: NodeStoreConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: NodeStoreConfig, clock: SharedClock) -> Self {
        Self {
            config,
            nodes: BTreeMap::new(),
            events: VecDeque::new(),
            next_seq: 0,
            clock,
        }
    }

    pub fn config(&self) -> &NodeStoreConfig {
        &self.config
    }

    /// Metadata for `path`, or the implicit default if it was never touched.
    pub fn get(&self, path: &str) -> NodeMetadata {
        self.nodes.get(path).cloned().unwrap_or_default()
    }

    pub fn is_expanded(&self, path: &str) -> bool {
        self.nodes.get(path).is_some_and(|m| m.is_expanded)
    }

    pub fn is_pinned(&self, path: &str) -> bool {
        self.nodes.get(path).is_some_and(|m| m.is_pinned)
    }

    /// Expanded paths, most recently expanded first.
    pub fn expanded_paths(&self) -> Vec<String> {
        let mut expanded: Vec<(&String, &NodeMetadata)> =
            self.nodes.iter().filter(|(_, m)| m.is_expanded).collect();
        expanded.sort_by(|a, b| {
            (b.1.last_expanded_at, b.1.touch_seq).cmp(&(a.1.last_expanded_at, a.1.touch_seq))
        });
        expanded.into_iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn expanded_count(&self) -> usize {
        self.nodes.values().filter(|m| m.is_expanded).count()
    }

    /// Expand a node, evicting the least-recently-expanded unpinned node if at capacity.
    pub fn expand(&mut self, path: &str) -> ExpandOutcome {
        self.expand_inner(path, &HashSet::new(), SystemEventKind::Expanded)
    }

    fn expand_inner(
        &mut self,
        path: &str,
        protected: &HashSet<String>,
        kind: SystemEventKind,
    ) -> ExpandOutcome {
        if path.is_empty() {
            return ExpandOutcome {
                ok: false,
                auto_collapsed: None,
                message: "Node path must not be empty".into(),
            };
        }

        let now = self.clock.now();

        if self.is_expanded(path) {
            self.touch(path, now);
            return ExpandOutcome {
                ok: true,
                auto_collapsed: None,
                message: format!("Node '{path}' is already expanded"),
            };
        }

        let mut auto_collapsed = None;
        if self.expanded_count() >= self.config.max_expanded {
            let Some(victim) = self.eviction_candidate(protected) else {
                tracing::debug!(path, "expand rejected: every expanded node is pinned");
                return ExpandOutcome {
                    ok: false,
                    auto_collapsed: None,
                    message: format!(
                        "Cannot expand '{path}': all {} expanded nodes are pinned. Unpin or collapse one first.",
                        self.expanded_count()
                    ),
                };
            };
            self.set_collapsed(&victim);
            self.push_event(
                SystemEventKind::AutoCollapsed,
                format!("Auto-collapsed '{victim}' to make room for '{path}'"),
                vec![victim.clone()],
            );
            auto_collapsed = Some(victim);
        }

        let meta = self.nodes.entry(path.to_string()).or_default();
        meta.is_expanded = true;
        self.touch(path, now);

        let message = match &auto_collapsed {
            Some(victim) => format!("Expanded '{path}' (auto-collapsed '{victim}')"),
            None => format!("Expanded '{path}'"),
        };
        tracing::debug!(path, evicted = ?auto_collapsed, "node expanded");
        self.push_event(kind, message.clone(), vec![path.to_string()]);

        ExpandOutcome {
            ok: true,
            auto_collapsed,
            message,
        }
    }

    /// Oldest unpinned expanded node; ties broken by expansion order, then path.
    fn eviction_candidate(&self, protected: &HashSet<String>) -> Option<String> {
        self.nodes
            .iter()
            .filter(|(path, m)| m.is_expanded && !m.is_pinned && !protected.contains(*path))
            .min_by(|a, b| {
                (a.1.last_expanded_at, a.1.touch_seq, a.0)
                    .cmp(&(b.1.last_expanded_at, b.1.touch_seq, b.0))
            })
            .map(|(path, _)| path.clone())
    }

    fn touch(&mut self, path: &str, now: DateTime<Utc>) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let meta = self.nodes.entry(path.to_string()).or_default();
        meta.last_expanded_at = Some(now);
        meta.touch_seq = seq;
    }

    fn set_collapsed(&mut self, path: &str) {
        if let Some(meta) = self.nodes.get_mut(path) {
            meta.is_expanded = false;
        }
    }

    /// Collapse a node. Fails only if it was not expanded.
    pub fn collapse(&mut self, path: &str, is_auto: bool) -> NodeOpOutcome {
        if !self.is_expanded(path) {
            return NodeOpOutcome::failed(format!("Node '{path}' is already collapsed"));
        }
        self.set_collapsed(path);
        let (kind, message) = if is_auto {
            (
                SystemEventKind::AutoCollapsed,
                format!("Auto-collapsed '{path}'"),
            )
        } else {
            (SystemEventKind::Collapsed, format!("Collapsed '{path}'"))
        };
        self.push_event(kind, message.clone(), vec![path.to_string()]);
        NodeOpOutcome::ok(message)
    }

    pub fn pin(&mut self, path: &str) -> NodeOpOutcome {
        if path.is_empty() {
            return NodeOpOutcome::failed("Node path must not be empty");
        }
        if self.is_pinned(path) {
            return NodeOpOutcome::failed(format!("Node '{path}' is already pinned"));
        }
        let meta = self.nodes.entry(path.to_string()).or_default();
        meta.is_pinned = true;
        meta.auto_pinned = false;
        let message = format!("Pinned '{path}'");
        self.push_event(SystemEventKind::Pinned, message.clone(), vec![path.to_string()]);
        NodeOpOutcome::ok(message)
    }

    pub fn unpin(&mut self, path: &str) -> NodeOpOutcome {
        if !self.is_pinned(path) {
            return NodeOpOutcome::failed(format!("Node '{path}' is not pinned"));
        }
        if let Some(meta) = self.nodes.get_mut(path) {
            meta.is_pinned = false;
            meta.auto_pinned = false;
        }
        let message = format!("Unpinned '{path}'");
        self.push_event(SystemEventKind::Unpinned, message.clone(), vec![path.to_string()]);
        NodeOpOutcome::ok(message)
    }

    /// Collapsed paths among `paths` that have no usable summary.
    pub fn needs_summary<S: AsRef<str>>(&self, paths: &[S]) -> Vec<String> {
        paths
            .iter()
            .map(AsRef::as_ref)
            .filter(|path| match self.nodes.get(*path) {
                Some(meta) => {
                    !meta.is_expanded
                        && (meta.cached_summary.is_none() || meta.summary_updated_at.is_none())
                }
                None => true,
            })
            .map(str::to_string)
            .collect()
    }

    pub fn update_summary(&mut self, path: &str, text: impl Into<String>) -> NodeOpOutcome {
        if path.is_empty() {
            return NodeOpOutcome::failed("Node path must not be empty");
        }
        let now = self.clock.now();
        let meta = self.nodes.entry(path.to_string()).or_default();
        meta.cached_summary = Some(text.into());
        meta.summary_updated_at = Some(now);
        let message = format!("Updated summary for '{path}'");
        self.push_event(
            SystemEventKind::SummaryUpdated,
            message.clone(),
            vec![path.to_string()],
        );
        NodeOpOutcome::ok(message)
    }

    /// Compare `current` against the last-seen hash for `path` and record it.
    ///
    /// The first observation of a path always reports a change. A change on a
    /// collapsed node invalidates its summary so it is regenerated.
    pub fn content_changed(&mut self, path: &str, current: &str) -> bool {
        let hash = content_hash(current);
        let meta = self.nodes.entry(path.to_string()).or_default();
        let previous = meta.content_hash.replace(hash.clone());
        match previous {
            None => true,
            Some(prev) if prev == hash => false,
            Some(_) => {
                if !meta.is_expanded && meta.cached_summary.is_some() {
                    meta.summary_updated_at = None;
                }
                self.push_event(
                    SystemEventKind::ContentChanged,
                    format!("Content of '{path}' changed"),
                    vec![path.to_string()],
                );
                true
            }
        }
    }

    /// Expand the most recently active paths, priority categories first.
    ///
    /// Priority paths use the longer activity window and are pinned once
    /// expanded; auto-pins whose activity fell out of the window are released
    /// first. Returns the paths newly expanded by this call.
    pub fn auto_expand_active(&mut self, activity: &HashMap<String, DateTime<Utc>>) -> Vec<String> {
        let now = self.clock.now();
        let priority_window = clock::window(self.config.priority_window_secs);
        let regular_window = clock::window(self.config.regular_window_secs);

        self.release_stale_auto_pins(activity, now, priority_window);

        let mut candidates: Vec<(bool, DateTime<Utc>, &String)> = activity
            .iter()
            .filter(|(path, _)| !path.is_empty())
            .filter_map(|(path, &ts)| {
                let priority = self.is_priority_path(path);
                let window = if priority { priority_window } else { regular_window };
                (now - ts <= window).then_some((priority, ts, path))
            })
            .filter(|(_, _, path)| !self.is_expanded(path))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(b.2)));

        let picked: Vec<(bool, String)> = candidates
            .into_iter()
            .take(self.config.auto_expand_limit)
            .map(|(priority, _, path)| (priority, path.clone()))
            .collect();

        let mut expanded = Vec::new();
        let mut protected = HashSet::new();
        for (priority, path) in picked {
            let outcome = self.expand_inner(&path, &protected, SystemEventKind::AutoExpanded);
            if !outcome.ok {
                continue;
            }
            if priority && !self.is_pinned(&path) {
                if let Some(meta) = self.nodes.get_mut(&path) {
                    meta.is_pinned = true;
                    meta.auto_pinned = true;
                }
                self.push_event(
                    SystemEventKind::Pinned,
                    format!("Pinned '{path}' automatically (priority activity)"),
                    vec![path.clone()],
                );
            }
            protected.insert(path.clone());
            expanded.push(path);
        }
        if !expanded.is_empty() {
            tracing::debug!(count = expanded.len(), "auto-expanded active nodes");
        }
        expanded
    }

    fn release_stale_auto_pins(
        &mut self,
        activity: &HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
        window: Duration,
    ) {
        let stale: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, m)| m.auto_pinned)
            .filter(|(path, _)| activity.get(*path).map_or(true, |ts| now - *ts > window))
            .map(|(path, _)| path.clone())
            .collect();
        for path in stale {
            if let Some(meta) = self.nodes.get_mut(&path) {
                meta.is_pinned = false;
                meta.auto_pinned = false;
            }
            self.push_event(
                SystemEventKind::Unpinned,
                format!("Released automatic pin on '{path}' (no recent activity)"),
                vec![path],
            );
        }
    }

    fn is_priority_path(&self, path: &str) -> bool {
        self.config.priority_prefixes.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    pub fn expansion_status(&self) -> ExpansionStatus {
        let expanded = self
            .expanded_paths()
            .into_iter()
            .map(|path| {
                let meta = self.get(&path);
                ExpandedEntry {
                    path,
                    pinned: meta.is_pinned,
                    last_expanded_at: meta.last_expanded_at,
                }
            })
            .collect();
        let pinned = self
            .nodes
            .iter()
            .filter(|(_, m)| m.is_pinned)
            .map(|(p, _)| p.clone())
            .collect();
        ExpansionStatus {
            max_expanded: self.config.max_expanded,
            expanded,
            pinned,
        }
    }

    /// Resolve a possibly inexact path against the known paths and alias table.
    pub fn resolve<S: AsRef<str>>(&self, path: &str, known: &[S]) -> Resolution {
        resolve::resolve_path(path, known, &self.nodes, &self.config.aliases)
    }

    /// Take every pending system event, clearing the log.
    pub fn drain_events(&mut self) -> Vec<SystemEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    fn push_event(&mut self, kind: SystemEventKind, message: String, paths: Vec<String>) {
        if self.config.event_log_capacity == 0 {
            return;
        }
        while self.events.len() >= self.config.event_log_capacity {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            timestamp: self.clock.now(),
            kind,
            message,
            paths,
        });
    }
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new(NodeStoreConfig::default())
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn content_hash(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::sync::Arc;

    fn store_with(max: usize) -> (NodeStore, ManualClock) {
        let clock = ManualClock::default();
        let store = NodeStore::with_clock(
            NodeStoreConfig {
                max_expanded: max,
                ..Default::default()
            },
            Arc::new(clock.clone()),
        );
        (store, clock)
    }

    #[test]
    fn absent_node_is_default() {
        let store = NodeStore::default();
        let meta = store.get("channels.nowhere");
        assert!(!meta.is_expanded);
        assert!(!meta.is_pinned);
        assert!(meta.cached_summary.is_none());
    }

    #[test]
    fn expand_under_capacity() {
        let (mut store, _) = store_with(3);
        let outcome = store.expand("a");
        assert!(outcome.ok);
        assert!(outcome.auto_collapsed.is_none());
        assert!(store.is_expanded("a"));
        assert_eq!(store.expanded_count(), 1);
    }

    #[test]
    fn expand_already_expanded_refreshes() {
        let (mut store, clock) = store_with(2);
        store.expand("a");
        clock.advance(Duration::seconds(1));
        store.expand("b");
        clock.advance(Duration::seconds(1));
        let outcome = store.expand("a");
        assert!(outcome.ok);
        assert!(outcome.auto_collapsed.is_none());

        // "a" was refreshed, so "b" is now the oldest.
        let outcome = store.expand("c");
        assert_eq!(outcome.auto_collapsed.as_deref(), Some("b"));
    }

    #[test]
    fn lru_evicts_oldest_unpinned() {
        let (mut store, clock) = store_with(3);
        for path in ["a", "b", "c"] {
            store.expand(path);
            clock.advance(Duration::seconds(1));
        }
        let outcome = store.expand("d");
        assert!(outcome.ok);
        assert_eq!(outcome.auto_collapsed.as_deref(), Some("a"));
        assert!(!store.is_expanded("a"));
        assert_eq!(store.expanded_count(), 3);
    }

    #[test]
    fn lru_holds_with_identical_timestamps() {
        // ManualClock never advances: ordering falls back to expansion order.
        let (mut store, _) = store_with(2);
        store.expand("zeta");
        store.expand("alpha");
        let outcome = store.expand("mid");
        assert_eq!(outcome.auto_collapsed.as_deref(), Some("zeta"));
        let outcome = store.expand("last");
        assert_eq!(outcome.auto_collapsed.as_deref(), Some("alpha"));
    }

    #[test]
    fn lru_property_over_long_sequences() {
        let (mut store, clock) = store_with(3);
        let paths = ["p0", "p1", "p2", "p3", "p4", "p5"];
        let mut order: Vec<String> = Vec::new();
        for i in 0..60 {
            let path = paths[(i * 7 + i / 3) % paths.len()];
            clock.advance(Duration::milliseconds(10));
            let was_expanded = store.is_expanded(path);
            let outcome = store.expand(path);
            assert!(outcome.ok);
            if was_expanded {
                assert!(outcome.auto_collapsed.is_none());
                order.retain(|p| p != path);
            } else if order.len() == 3 {
                let oldest = order.remove(0);
                assert_eq!(outcome.auto_collapsed.as_deref(), Some(oldest.as_str()));
            }
            order.push(path.to_string());
            assert!(store.expanded_count() <= 3);
        }
    }

    #[test]
    fn pinned_node_survives_eviction() {
        let (mut store, clock) = store_with(2);
        store.expand("A");
        clock.advance(Duration::seconds(1));
        store.expand("B");
        store.pin("A");
        clock.advance(Duration::seconds(1));

        let outcome = store.expand("C");
        assert!(outcome.ok);
        assert_eq!(outcome.auto_collapsed.as_deref(), Some("B"));
        assert!(store.is_expanded("A"));
        assert!(store.is_pinned("A"));
        assert!(store.is_expanded("C"));
    }

    #[test]
    fn all_pinned_rejects_expand_without_change() {
        let (mut store, _) = store_with(2);
        store.expand("a");
        store.expand("b");
        store.pin("a");
        store.pin("b");
        store.drain_events();

        let before = store.expansion_status();
        let outcome = store.expand("c");
        assert!(!outcome.ok);
        assert!(outcome.auto_collapsed.is_none());
        assert_eq!(store.expansion_status(), before);
        assert!(!store.is_expanded("c"));
        assert_eq!(store.pending_events(), 0);
    }

    #[test]
    fn empty_path_is_rejected() {
        let mut store = NodeStore::default();
        assert!(!store.expand("").ok);
        assert!(!store.pin("").ok);
    }

    #[test]
    fn collapse_semantics() {
        let mut store = NodeStore::default();
        assert!(!store.collapse("a", false).ok);
        store.expand("a");
        assert!(store.collapse("a", false).ok);
        assert!(!store.is_expanded("a"));
        assert!(!store.collapse("a", true).ok);
    }

    #[test]
    fn pin_and_unpin_are_idempotent_failures() {
        let mut store = NodeStore::default();
        assert!(store.pin("a").ok);
        let again = store.pin("a");
        assert!(!again.ok);
        assert!(again.message.contains("already pinned"));
        assert!(store.unpin("a").ok);
        let again = store.unpin("a");
        assert!(!again.ok);
        assert!(again.message.contains("not pinned"));
    }

    #[test]
    fn needs_summary_skips_expanded_and_summarized() {
        let mut store = NodeStore::default();
        store.expand("open");
        store.update_summary("done", "all caught up");
        let need = store.needs_summary(&["open", "done", "fresh"]);
        assert_eq!(need, vec!["fresh".to_string()]);
    }

    #[test]
    fn content_changed_tracks_hash() {
        let mut store = NodeStore::default();
        assert!(store.content_changed("a", "hello"));
        assert!(!store.content_changed("a", "hello"));
        assert!(store.content_changed("a", "hello!"));
    }

    #[test]
    fn content_change_invalidates_collapsed_summary() {
        let mut store = NodeStore::default();
        store.content_changed("room", "v1");
        store.update_summary("room", "old summary");
        assert!(store.needs_summary(&["room"]).is_empty());

        store.content_changed("room", "v2");
        assert_eq!(store.needs_summary(&["room"]), vec!["room".to_string()]);
        assert_eq!(store.get("room").cached_summary.as_deref(), Some("old summary"));
    }

    #[test]
    fn events_are_recorded_and_drained() {
        let (mut store, _) = store_with(1);
        store.expand("a");
        store.expand("b");
        let events = store.drain_events();
        let kinds: Vec<SystemEventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SystemEventKind::Expanded,
                SystemEventKind::AutoCollapsed,
                SystemEventKind::Expanded
            ]
        );
        assert_eq!(events[1].paths, vec!["a".to_string()]);
        assert!(store.drain_events().is_empty());
    }

    #[test]
    fn event_log_is_bounded() {
        let mut store = NodeStore::new(NodeStoreConfig {
            event_log_capacity: 3,
            ..Default::default()
        });
        for i in 0..10 {
            store.pin(&format!("n{i}"));
        }
        let events = store.drain_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].paths, vec!["n7".to_string()]);
    }

    #[test]
    fn auto_expand_prefers_priority_and_pins_it() {
        let (mut store, clock) = store_with(5);
        let now = clock.now();
        let mut activity = HashMap::new();
        activity.insert("channels.x.general".to_string(), now - Duration::seconds(10));
        activity.insert("notifications.mentions".to_string(), now - Duration::seconds(1200));
        activity.insert("channels.x.stale".to_string(), now - Duration::seconds(900));

        let expanded = store.auto_expand_active(&activity);
        assert_eq!(
            expanded,
            vec![
                "notifications.mentions".to_string(),
                "channels.x.general".to_string()
            ]
        );
        assert!(store.is_pinned("notifications.mentions"));
        assert!(!store.is_pinned("channels.x.general"));
        assert!(!store.is_expanded("channels.x.stale"));

        let pins: Vec<_> = store
            .drain_events()
            .into_iter()
            .filter(|e| e.kind == SystemEventKind::Pinned)
            .collect();
        assert_eq!(pins.len(), 1);
        assert_eq!(pins[0].paths, vec!["notifications.mentions".to_string()]);
    }

    #[test]
    fn auto_expand_skips_already_expanded() {
        let (mut store, clock) = store_with(5);
        store.expand("channels.a");
        let mut activity = HashMap::new();
        activity.insert("channels.a".to_string(), clock.now());
        assert!(store.auto_expand_active(&activity).is_empty());
    }

    #[test]
    fn auto_expand_respects_limit_and_eviction() {
        let clock = ManualClock::default();
        let mut store = NodeStore::with_clock(
            NodeStoreConfig {
                max_expanded: 2,
                auto_expand_limit: 5,
                ..Default::default()
            },
            Arc::new(clock.clone()),
        );
        store.expand("old");
        store.pin("old");
        let now = clock.now();
        let activity: HashMap<String, DateTime<Utc>> = (0..4)
            .map(|i| (format!("channels.c{i}"), now - Duration::seconds(i)))
            .collect();

        let expanded = store.auto_expand_active(&activity);
        // One free slot; later candidates may not evict the one just expanded.
        assert_eq!(expanded, vec!["channels.c0".to_string()]);
        assert!(store.is_expanded("old"));
        assert_eq!(store.expanded_count(), 2);
    }

    #[test]
    fn stale_auto_pins_are_released() {
        let (mut store, clock) = store_with(5);
        let mut activity = HashMap::new();
        activity.insert("notifications.dm".to_string(), clock.now());
        store.auto_expand_active(&activity);
        assert!(store.is_pinned("notifications.dm"));

        clock.advance(Duration::seconds(7200));
        store.auto_expand_active(&activity);
        assert!(!store.is_pinned("notifications.dm"));
    }

    #[test]
    fn manual_pin_is_not_released() {
        let (mut store, clock) = store_with(5);
        store.pin("notifications.dm");
        clock.advance(Duration::seconds(7200));
        store.auto_expand_active(&HashMap::new());
        assert!(store.is_pinned("notifications.dm"));
    }

    #[test]
    fn expansion_status_reports_recent_first() {
        let (mut store, clock) = store_with(3);
        store.expand("a");
        clock.advance(Duration::seconds(1));
        store.expand("b");
        store.pin("a");
        let status = store.expansion_status();
        assert_eq!(status.max_expanded, 3);
        assert_eq!(status.expanded[0].path, "b");
        assert_eq!(status.expanded[1].path, "a");
        assert!(status.expanded[1].pinned);
        assert_eq!(status.pinned, vec!["a".to_string()]);
    }

    #[test]
    fn content_hash_is_stable_hex() {
        let h = content_hash("abc");
        assert_eq!(h.len(), 64);
        assert!(h.starts_with("ba7816bf"));
    }
}
