//! Action backlog: priority work queue with dependencies, retries and
//! per-destination admission control.
//!
//! Four FIFO queues, one per [`Priority`]. [`ActionBacklog::next`] scans them
//! from most to least urgent and hands out the first action whose retry delay
//! has elapsed, whose dependencies are all completed, and whose destination
//! has a free slot. [`ActionBacklog::start`] reserves that slot; exactly one of
//! [`complete`](ActionBacklog::complete),
//! [`schedule_delayed_retry`](ActionBacklog::schedule_delayed_retry) or
//! [`abandon`](ActionBacklog::abandon) releases it again.
//!
//! ```rust
//! use cortex_core::backlog::{ActionBacklog, BacklogConfig, NewAction, Priority};
//! use serde_json::json;
//!
//! let mut backlog = ActionBacklog::new(BacklogConfig::default());
//! let id = backlog.enqueue(NewAction::new("search", json!({"q": "rust"}), Priority::Medium, "search"));
//! let action = backlog.next().unwrap();
//! assert_eq!(action.id, id);
//! assert!(backlog.start(id));
//! backlog.complete(id, true, None).unwrap();
//! ```

pub mod classify;
pub mod limiter;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{self, system_clock, SharedClock};
use crate::error::{CortexError, CortexResult};
use crate::types::{ActionKind, CandidateAction};

pub use classify::CycleContext;
pub use limiter::{LimiterConfig, RateLimiter};

/// Unique action identifier (monotonically increasing).
pub type ActionId = u64;

/// Urgency level. Lower discriminant = more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }
}

/// A unit of work owned by the backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: ActionId,
    pub action_type: String,
    pub parameters: serde_json::Value,
    pub priority: Priority,
    pub destination: String,
    pub status: ActionStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
    pub depends_on: BTreeSet<ActionId>,
    pub reasoning: String,
    pub cycle_id: Option<String>,
    pub channel_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl QueuedAction {
    pub fn kind(&self) -> ActionKind {
        ActionKind::parse(&self.action_type)
    }
}

/// Everything needed to enqueue an action.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub action_type: String,
    pub parameters: serde_json::Value,
    pub priority: Priority,
    pub destination: String,
    pub max_attempts: Option<u32>,
    pub depends_on: BTreeSet<ActionId>,
    pub reasoning: String,
    pub cycle_id: Option<String>,
    pub channel_id: Option<String>,
}

impl NewAction {
    pub fn new(
        action_type: impl Into<String>,
        parameters: serde_json::Value,
        priority: Priority,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            parameters,
            priority,
            destination: destination.into(),
            max_attempts: None,
            depends_on: BTreeSet::new(),
            reasoning: String::new(),
            cycle_id: None,
            channel_id: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn depends_on(mut self, id: ActionId) -> Self {
        self.depends_on.insert(id);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_context(mut self, ctx: &CycleContext) -> Self {
        self.cycle_id = Some(ctx.cycle_id.clone());
        self.channel_id = ctx.channel_id.clone();
        self
    }
}

/// Backlog tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacklogConfig {
    /// Global cap on simultaneously in-progress actions.
    pub max_in_progress: usize,
    pub default_max_attempts: u32,
    /// Limiter used for destinations without their own entry.
    pub default_limiter: LimiterConfig,
    /// Destinations with explicit limits; these are the throttled ones.
    pub limiters: HashMap<String, LimiterConfig>,
    /// Window for the recent-completion count in status summaries.
    pub recent_window_secs: i64,
    /// Finished actions older than this are pruned at the end of each cycle.
    pub retention_secs: i64,
    /// How many completion timestamps to retain.
    pub completed_history: usize,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            max_in_progress: 3,
            default_max_attempts: 3,
            default_limiter: LimiterConfig::default(),
            limiters: HashMap::new(),
            recent_window_secs: 300,
            retention_secs: 3600,
            completed_history: 100,
        }
    }
}

impl BacklogConfig {
    pub fn with_limiter(mut self, destination: impl Into<String>, limiter: LimiterConfig) -> Self {
        self.limiters.insert(destination.into(), limiter);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepths {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationStatus {
    pub active: usize,
    pub max_concurrent: usize,
    pub utilization: f64,
    pub last_execution_at: Option<DateTime<Utc>>,
}

/// Observability snapshot; not consulted by scheduling decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub queued: QueueDepths,
    pub in_progress: usize,
    pub max_in_progress: usize,
    pub recent_completions: usize,
    pub failed: usize,
    pub destinations: BTreeMap<String, DestinationStatus>,
}

pub struct ActionBacklog {
    config: BacklogConfig,
    actions: HashMap<ActionId, QueuedAction>,
    queues: [VecDeque<ActionId>; 4],
    limiters: HashMap<String, RateLimiter>,
    in_progress: HashSet<ActionId>,
    completions: VecDeque<DateTime<Utc>>,
    next_id: ActionId,
    clock: SharedClock,
}

impl ActionBacklog {
    pub fn new(config: BacklogConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: BacklogConfig, clock: SharedClock) -> Self {
        Self {
            config,
            actions: HashMap::new(),
            queues: Default::default(),
            limiters: HashMap::new(),
            in_progress: HashSet::new(),
            completions: VecDeque::new(),
            next_id: 1,
            clock,
        }
    }

    pub fn config(&self) -> &BacklogConfig {
        &self.config
    }

    /// Whether `destination` has explicit limits configured.
    pub fn is_throttled(&self, destination: &str) -> bool {
        self.config.limiters.contains_key(destination)
    }

    /// Add an action to the back of its priority level. Always succeeds.
    pub fn enqueue(&mut self, new: NewAction) -> ActionId {
        let id = self.next_id;
        self.next_id += 1;
        let action = QueuedAction {
            id,
            action_type: new.action_type,
            parameters: new.parameters,
            priority: new.priority,
            destination: new.destination,
            status: ActionStatus::Queued,
            attempts: 0,
            max_attempts: new
                .max_attempts
                .unwrap_or(self.config.default_max_attempts)
                .max(1),
            last_attempt_at: None,
            retry_after: None,
            depends_on: new.depends_on,
            reasoning: new.reasoning,
            cycle_id: new.cycle_id,
            channel_id: new.channel_id,
            created_at: self.clock.now(),
            finished_at: None,
            last_error: None,
        };
        tracing::debug!(
            id,
            action_type = %action.action_type,
            priority = ?action.priority,
            destination = %action.destination,
            "action enqueued"
        );
        self.queues[action.priority.index()].push_back(id);
        self.actions.insert(id, action);
        id
    }

    /// Classify and enqueue a decision batch.
    ///
    /// Within the batch, each state-changing action depends on the previous
    /// state-changing action for the same destination, so visible effects keep
    /// the order the provider chose.
    pub fn enqueue_batch(
        &mut self,
        candidates: &[CandidateAction],
        default_priority: Priority,
        ctx: &CycleContext,
    ) -> Vec<ActionId> {
        let mut last_visible: HashMap<String, ActionId> = HashMap::new();
        let mut ids = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let kind = candidate.kind();
            let class = classify::classify(&kind, &candidate.parameters, default_priority, ctx);
            let mut new = NewAction::new(
                kind.as_str(),
                candidate.parameters.clone(),
                class.priority,
                class.destination.clone(),
            )
            .with_reasoning(candidate.reasoning.clone())
            .with_context(ctx);
            if kind.is_state_changing() {
                if let Some(&prev) = last_visible.get(&class.destination) {
                    new = new.depends_on(prev);
                }
            }
            let id = self.enqueue(new);
            if kind.is_state_changing() {
                last_visible.insert(class.destination, id);
            }
            ids.push(id);
        }
        ids
    }

    /// Take the most urgent eligible action off its queue.
    ///
    /// Returns `None` when the WIP cap is reached or nothing is eligible.
    pub fn next(&mut self) -> Option<QueuedAction> {
        if self.in_progress.len() >= self.config.max_in_progress {
            return None;
        }
        let now = self.clock.now();
        let (level, pos) = self.find_eligible(now)?;
        let id = self.queues[level].remove(pos)?;
        self.actions.get(&id).cloned()
    }

    fn find_eligible(&self, now: DateTime<Utc>) -> Option<(usize, usize)> {
        for (level, queue) in self.queues.iter().enumerate() {
            for (pos, id) in queue.iter().enumerate() {
                let Some(action) = self.actions.get(id) else {
                    continue;
                };
                if action.retry_after.is_some_and(|at| at > now) {
                    continue;
                }
                if !self.dependencies_met(action) {
                    continue;
                }
                if !self.has_capacity(&action.destination, now) {
                    continue;
                }
                return Some((level, pos));
            }
        }
        None
    }

    fn dependencies_met(&self, action: &QueuedAction) -> bool {
        action.depends_on.iter().all(|dep| {
            self.actions
                .get(dep)
                .is_some_and(|d| d.status == ActionStatus::Completed)
        })
    }

    fn has_capacity(&self, destination: &str, now: DateTime<Utc>) -> bool {
        match self.limiters.get(destination) {
            Some(limiter) => limiter.can_start(now),
            None => RateLimiter::new(self.limiter_config(destination)).can_start(now),
        }
    }

    fn limiter_config(&self, destination: &str) -> &LimiterConfig {
        self.config
            .limiters
            .get(destination)
            .unwrap_or(&self.config.default_limiter)
    }

    /// Reserve a destination slot and mark the action in progress.
    ///
    /// On failure the action stays queued (at the front of its level) and
    /// nothing else changes.
    pub fn start(&mut self, id: ActionId) -> bool {
        let now = self.clock.now();
        let Some(action) = self.actions.get(&id) else {
            tracing::warn!(id, "start requested for unknown action");
            return false;
        };
        if action.status != ActionStatus::Queued {
            tracing::warn!(id, status = ?action.status, "start requested for non-queued action");
            return false;
        }
        let level = action.priority.index();
        let destination = action.destination.clone();

        let admitted = self.in_progress.len() < self.config.max_in_progress && {
            let config = self.limiter_config(&destination).clone();
            self.limiters
                .entry(destination.clone())
                .or_insert_with(|| RateLimiter::new(&config))
                .acquire(now)
        };

        if !admitted {
            if !self.queues[level].contains(&id) {
                self.queues[level].push_front(id);
            }
            tracing::debug!(id, destination = %destination, "start refused: no capacity");
            return false;
        }

        self.queues[level].retain(|queued| *queued != id);
        self.in_progress.insert(id);
        if let Some(action) = self.actions.get_mut(&id) {
            action.status = ActionStatus::InProgress;
            action.attempts += 1;
            action.last_attempt_at = Some(now);
        }
        true
    }

    /// Finish an in-progress action.
    ///
    /// Failures with attempts left go back to the front of their level.
    pub fn complete(
        &mut self,
        id: ActionId,
        success: bool,
        error: Option<String>,
    ) -> CortexResult<ActionStatus> {
        self.take_in_progress(id)?;
        let now = self.clock.now();
        let action = self
            .actions
            .get_mut(&id)
            .ok_or(CortexError::UnknownAction { id })?;

        if success {
            action.status = ActionStatus::Completed;
            action.finished_at = Some(now);
            action.last_error = None;
            self.record_completion(now);
            return Ok(ActionStatus::Completed);
        }

        action.last_error = error;
        if action.attempts < action.max_attempts {
            action.status = ActionStatus::Queued;
            let level = action.priority.index();
            tracing::debug!(
                id,
                attempts = action.attempts,
                max_attempts = action.max_attempts,
                "action failed, requeued"
            );
            self.queues[level].push_front(id);
            return Ok(ActionStatus::Queued);
        }

        action.status = ActionStatus::Failed;
        action.finished_at = Some(now);
        tracing::warn!(
            id,
            action_type = %action.action_type,
            attempts = action.attempts,
            error = action.last_error.as_deref().unwrap_or(""),
            "action failed permanently"
        );
        self.cascade_failure(id);
        Ok(ActionStatus::Failed)
    }

    /// Put an in-progress action back for a later retry without charging an attempt.
    pub fn schedule_delayed_retry(&mut self, id: ActionId, delay_secs: u64) -> CortexResult<()> {
        self.take_in_progress(id)?;
        let now = self.clock.now();
        let action = self
            .actions
            .get_mut(&id)
            .ok_or(CortexError::UnknownAction { id })?;
        action.attempts = action.attempts.saturating_sub(1);
        let delay = Duration::seconds(delay_secs.min(i64::MAX as u64 / 1000) as i64);
        action.retry_after = Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
        action.status = ActionStatus::Queued;
        let level = action.priority.index();
        tracing::debug!(id, delay_secs, "action deferred");
        self.queues[level].push_front(id);
        Ok(())
    }

    /// Fail an action permanently without retry (e.g. invalid parameters).
    ///
    /// Works on queued and in-progress actions; an in-progress slot is released.
    pub fn abandon(&mut self, id: ActionId, error: impl Into<String>) -> CortexResult<()> {
        let status = self
            .actions
            .get(&id)
            .map(|a| a.status)
            .ok_or(CortexError::UnknownAction { id })?;
        match status {
            ActionStatus::InProgress => self.take_in_progress(id)?,
            ActionStatus::Queued => {
                for queue in &mut self.queues {
                    queue.retain(|queued| *queued != id);
                }
            }
            other => {
                return Err(CortexError::InvalidTransition {
                    id,
                    status: other,
                    expected: ActionStatus::InProgress,
                })
            }
        }
        let now = self.clock.now();
        if let Some(action) = self.actions.get_mut(&id) {
            action.status = ActionStatus::Failed;
            action.finished_at = Some(now);
            action.last_error = Some(error.into());
        }
        self.cascade_failure(id);
        Ok(())
    }

    /// Release the slot of an in-progress action, validating its state first.
    fn take_in_progress(&mut self, id: ActionId) -> CortexResult<()> {
        let action = self
            .actions
            .get(&id)
            .ok_or(CortexError::UnknownAction { id })?;
        if action.status != ActionStatus::InProgress || !self.in_progress.contains(&id) {
            return Err(CortexError::InvalidTransition {
                id,
                status: action.status,
                expected: ActionStatus::InProgress,
            });
        }
        let destination = action.destination.clone();
        self.in_progress.remove(&id);
        if let Some(limiter) = self.limiters.get_mut(&destination) {
            limiter.release();
        }
        Ok(())
    }

    /// Fail every queued action that transitively depends on `root`.
    fn cascade_failure(&mut self, root: ActionId) {
        let now = self.clock.now();
        let mut failed = vec![root];
        while let Some(dep) = failed.pop() {
            let dependents: Vec<ActionId> = self
                .actions
                .values()
                .filter(|a| a.status == ActionStatus::Queued && a.depends_on.contains(&dep))
                .map(|a| a.id)
                .collect();
            for id in dependents {
                if let Some(action) = self.actions.get_mut(&id) {
                    action.status = ActionStatus::Failed;
                    action.finished_at = Some(now);
                    action.last_error = Some(format!("dependency {dep} failed"));
                    self.queues[action.priority.index()].retain(|queued| *queued != id);
                }
                failed.push(id);
            }
        }
    }

    fn record_completion(&mut self, at: DateTime<Utc>) {
        self.completions.push_back(at);
        while self.completions.len() > self.config.completed_history {
            self.completions.pop_front();
        }
    }

    /// Drop terminal actions older than `max_age` that no live action depends on.
    pub fn prune_finished(&mut self, max_age: Duration) -> usize {
        let Some(cutoff) = self.clock.now().checked_sub_signed(max_age) else {
            return 0;
        };
        let referenced: HashSet<ActionId> = self
            .actions
            .values()
            .filter(|a| !a.status.is_terminal())
            .flat_map(|a| a.depends_on.iter().copied())
            .collect();
        let before = self.actions.len();
        self.actions.retain(|id, a| {
            !(a.status.is_terminal()
                && a.finished_at.is_some_and(|t| t <= cutoff)
                && !referenced.contains(id))
        });
        before - self.actions.len()
    }

    pub fn get(&self, id: ActionId) -> Option<&QueuedAction> {
        self.actions.get(&id)
    }

    pub fn limiter(&self, destination: &str) -> Option<&RateLimiter> {
        self.limiters.get(destination)
    }

    pub fn queued_count(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn in_progress_count(&self) -> usize {
        self.in_progress.len()
    }

    /// Nothing queued and nothing running.
    pub fn is_idle(&self) -> bool {
        self.queued_count() == 0 && self.in_progress.is_empty()
    }

    pub fn status_summary(&self) -> StatusSummary {
        let now = self.clock.now();
        let window = clock::window(self.config.recent_window_secs);
        let depth = |p: Priority| self.queues[p.index()].len();
        let destinations = self
            .limiters
            .iter()
            .map(|(name, l)| {
                (
                    name.clone(),
                    DestinationStatus {
                        active: l.active_count,
                        max_concurrent: l.max_concurrent,
                        utilization: l.utilization(),
                        last_execution_at: l.last_execution_at,
                    },
                )
            })
            .collect();
        StatusSummary {
            queued: QueueDepths {
                critical: depth(Priority::Critical),
                high: depth(Priority::High),
                medium: depth(Priority::Medium),
                low: depth(Priority::Low),
            },
            in_progress: self.in_progress.len(),
            max_in_progress: self.config.max_in_progress,
            recent_completions: self
                .completions
                .iter()
                .filter(|t| now - **t <= window)
                .count(),
            failed: self
                .actions
                .values()
                .filter(|a| a.status == ActionStatus::Failed)
                .count(),
            destinations,
        }
    }
}

impl Default for ActionBacklog {
    fn default() -> Self {
        Self::new(BacklogConfig::default())
    }
}
