//! Cycle controller: one pass of prime, build payload, decide, act, finalize.
//!
//! ```text
//!   Prime ──▶ BuildPayload ──▶ Decide ──▶ Act ─┐
//!                 ▲   │                        │ batch done / state changed
//!                 │   └──▶ Finalize ◀── wait   │
//!                 └────────────────────────────┘
//! ```
//!
//! The controller owns the [`NodeStore`] and the [`ActionBacklog`]; nothing
//! else mutates them while a cycle runs. The only suspension points are the
//! decision provider, the dispatcher, the summarizer and the world reads.

pub mod guidance;
pub mod payload;
pub mod tools;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::backlog::{classify, ActionBacklog, CycleContext, Priority, QueuedAction};
use crate::clock::{self, system_clock, SharedClock};
use crate::config::CortexConfig;
use crate::dispatch::{ActionDispatcher, DispatchOutcome, FailureKind};
use crate::journal::{Journal, JournalEntry, JournalLevel};
use crate::node::{NodeStore, SystemEvent};
use crate::provider::{DecisionProvider, Summarizer, TruncatingSummarizer};
use crate::types::{ActionKind, ActionRecord, CandidateAction, CycleEvent, Decision};
use crate::world::WorldState;

pub use payload::{CollapsedNode, ContextPayload, ExpandedNode};
pub use tools::{NodeToolResult, NodeTools};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Hard cap on decide steps per cycle.
    pub max_steps: usize,
    /// Summaries regenerated during Finalize, at most.
    pub summary_refresh_limit: usize,
    /// Repeats of an action type or target that produce a guidance hint.
    pub history_hint_threshold: usize,
    /// Length cap for the default summarizer.
    pub summary_max_chars: usize,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            summary_refresh_limit: 5,
            history_hint_threshold: 2,
            summary_max_chars: 280,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Prime,
    BuildPayload,
    Decide,
    Act,
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleExit {
    /// The provider chose the wait sentinel.
    Wait,
    /// No candidates and no runnable backlog work.
    NoActions,
    /// `max_steps` reached.
    StepCap,
    Shutdown,
}

/// What started a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleTrigger {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub mention: bool,
    pub default_priority: Priority,
}

impl CycleTrigger {
    pub fn new() -> Self {
        Self {
            platform: None,
            channel_id: None,
            mention: false,
            default_priority: Priority::Medium,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn mentioned(mut self) -> Self {
        self.mention = true;
        self
    }

    pub fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    fn context(&self, cycle_id: &str) -> CycleContext {
        CycleContext {
            cycle_id: cycle_id.to_string(),
            channel_id: self.channel_id.clone(),
            platform: self.platform.clone(),
            mention_triggered: self.mention,
        }
    }
}

impl Default for CycleTrigger {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub steps: usize,
    pub actions_executed: usize,
    pub actions_failed: usize,
    pub exit: CycleExit,
    pub duration_ms: u64,
    pub summaries_refreshed: usize,
    #[serde(default)]
    pub records: Vec<ActionRecord>,
}

/// Per-cycle working state.
struct CycleState {
    cycle_id: String,
    ctx: CycleContext,
    default_priority: Priority,
    step: usize,
    known: Vec<String>,
    history: Vec<ActionRecord>,
    pending: VecDeque<CandidateAction>,
    payload: Option<ContextPayload>,
    executed: usize,
    failed: usize,
    exit: Option<CycleExit>,
}

impl CycleState {
    fn record(&mut self, record: ActionRecord) {
        if record.success {
            self.executed += 1;
        } else {
            self.failed += 1;
        }
        self.history.push(record);
    }
}

pub struct CycleController {
    config: CycleConfig,
    nodes: NodeStore,
    backlog: ActionBacklog,
    provider: Arc<dyn DecisionProvider>,
    dispatcher: Arc<dyn ActionDispatcher>,
    world: Arc<dyn WorldState>,
    summarizer: Arc<dyn Summarizer>,
    journal: Journal,
    clock: SharedClock,
    event_tx: Option<mpsc::UnboundedSender<CycleEvent>>,
    shutdown: Option<watch::Receiver<bool>>,
    /// Events drained during Finalize, shown in the next cycle's first payload.
    carried_events: Vec<SystemEvent>,
}

impl CycleController {
    pub fn new(
        config: CortexConfig,
        provider: Arc<dyn DecisionProvider>,
        dispatcher: Arc<dyn ActionDispatcher>,
        world: Arc<dyn WorldState>,
    ) -> Self {
        Self::with_clock(config, provider, dispatcher, world, system_clock())
    }

    pub fn with_clock(
        config: CortexConfig,
        provider: Arc<dyn DecisionProvider>,
        dispatcher: Arc<dyn ActionDispatcher>,
        world: Arc<dyn WorldState>,
        clock: SharedClock,
    ) -> Self {
        let summarizer = Arc::new(TruncatingSummarizer::new(config.cycle.summary_max_chars));
        Self {
            nodes: NodeStore::with_clock(config.nodes, clock.clone()),
            backlog: ActionBacklog::with_clock(config.backlog, clock.clone()),
            config: config.cycle,
            provider,
            dispatcher,
            world,
            summarizer,
            journal: Journal::new(),
            clock,
            event_tx: None,
            shutdown: None,
            carried_events: Vec::new(),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<CycleEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Abort at the next step boundary once the receiver reads `true`.
    pub fn with_shutdown(mut self, rx: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(rx);
        self
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut NodeStore {
        &mut self.nodes
    }

    pub fn backlog(&self) -> &ActionBacklog {
        &self.backlog
    }

    pub fn backlog_mut(&mut self) -> &mut ActionBacklog {
        &mut self.backlog
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Run one cycle to completion. Collaborator failures never escape.
    pub async fn run_cycle(&mut self, trigger: CycleTrigger) -> CycleReport {
        let started = Instant::now();
        let cycle_id = uuid::Uuid::new_v4().to_string();
        let mut state = CycleState {
            ctx: trigger.context(&cycle_id),
            cycle_id,
            default_priority: trigger.default_priority,
            step: 0,
            known: Vec::new(),
            history: Vec::new(),
            pending: VecDeque::new(),
            payload: None,
            executed: 0,
            failed: 0,
            exit: None,
        };

        tracing::info!(cycle_id = %state.cycle_id, "cycle start");
        self.emit(CycleEvent::CycleStart {
            cycle_id: state.cycle_id.clone(),
        });

        let mut phase = CyclePhase::Prime;
        loop {
            tracing::trace!(cycle_id = %state.cycle_id, ?phase, "phase");
            phase = match phase {
                CyclePhase::Prime => self.prime(&mut state).await,
                CyclePhase::BuildPayload => self.build_payload(&mut state).await,
                CyclePhase::Decide => self.decide(&mut state).await,
                CyclePhase::Act => self.act(&mut state).await,
                CyclePhase::Finalize => break,
            };
        }

        self.finalize(state, started).await
    }

    fn emit(&self, event: CycleEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn note(&self, level: JournalLevel, state: &CycleState, message: impl Into<String>) {
        self.journal.record(
            &JournalEntry::new(level, "controller", message)
                .at(self.clock.now())
                .with_cycle(state.cycle_id.clone()),
        );
    }

    async fn known_paths(&self, state: &CycleState) -> Vec<String> {
        match self.world.paths().await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(error = %e, "listing world paths failed");
                self.note(JournalLevel::Warn, state, format!("Listing paths failed: {e}"));
                state.known.clone()
            }
        }
    }

    // ─── Phases ─────────────────────────────────────────────────────────────

    async fn prime(&mut self, state: &mut CycleState) -> CyclePhase {
        state.known = self.known_paths(state).await;
        match self.world.activity().await {
            Ok(activity) => {
                self.nodes.auto_expand_active(&activity);
            }
            Err(e) => {
                tracing::warn!(error = %e, "reading activity failed");
                self.note(JournalLevel::Warn, state, format!("Reading activity failed: {e}"));
            }
        }
        // Leftover work from earlier cycles.
        self.pump_backlog(state).await;
        CyclePhase::BuildPayload
    }

    async fn build_payload(&mut self, state: &mut CycleState) -> CyclePhase {
        if self.shutdown_requested() {
            state.exit = Some(CycleExit::Shutdown);
            return CyclePhase::Finalize;
        }
        if state.step >= self.config.max_steps {
            tracing::warn!(cycle_id = %state.cycle_id, max_steps = self.config.max_steps, "step cap reached");
            state.exit = Some(CycleExit::StepCap);
            return CyclePhase::Finalize;
        }
        state.step += 1;
        self.emit(CycleEvent::StepStart {
            cycle_id: state.cycle_id.clone(),
            step: state.step,
        });

        state.known = self.known_paths(state).await;

        let mut expanded = Vec::new();
        for path in self.nodes.expanded_paths() {
            let content = match self.world.content(&path).await {
                Ok(content) => content.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "reading node content failed");
                    String::new()
                }
            };
            expanded.push(ExpandedNode {
                pinned: self.nodes.is_pinned(&path),
                path,
                content,
            });
        }
        let collapsed = state
            .known
            .iter()
            .filter(|p| !self.nodes.is_expanded(p))
            .map(|p| CollapsedNode {
                path: p.clone(),
                summary: self.nodes.get(p).cached_summary,
            })
            .collect();

        let mut system_events = std::mem::take(&mut self.carried_events);
        let fresh = self.nodes.drain_events();
        self.log_node_events(state, &fresh);
        system_events.extend(fresh);

        state.payload = Some(ContextPayload {
            cycle_id: state.cycle_id.clone(),
            step: state.step,
            trigger: state.ctx.clone(),
            expanded,
            collapsed,
            system_events,
            backlog: self.backlog.status_summary(),
            history: state.history.clone(),
            guidance: guidance::self_avoidance_hints(
                &state.history,
                self.config.history_hint_threshold,
            ),
        });
        CyclePhase::Decide
    }

    async fn decide(&mut self, state: &mut CycleState) -> CyclePhase {
        let Some(payload) = state.payload.take() else {
            return CyclePhase::BuildPayload;
        };
        let decision = match self.provider.decide(&payload).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(cycle_id = %state.cycle_id, step = state.step, error = %e, "decision provider failed");
                self.note(JournalLevel::Error, state, format!("Decision provider failed: {e}"));
                self.emit(CycleEvent::Error {
                    message: format!("Decision provider failed: {e}"),
                });
                Decision::default()
            }
        };
        self.emit(CycleEvent::DecisionReceived {
            cycle_id: state.cycle_id.clone(),
            step: state.step,
            action_count: decision.actions.len(),
            reasoning: decision.reasoning.clone(),
        });

        if decision.actions.is_empty() {
            // Nothing new to do; keep going only while the backlog makes progress.
            if self.pump_backlog(state).await > 0 {
                return CyclePhase::BuildPayload;
            }
            state.exit = Some(CycleExit::NoActions);
            return CyclePhase::Finalize;
        }

        state.pending = decision.actions.into();
        CyclePhase::Act
    }

    async fn act(&mut self, state: &mut CycleState) -> CyclePhase {
        while let Some(candidate) = state.pending.pop_front() {
            if self.shutdown_requested() {
                state.pending.clear();
                state.exit = Some(CycleExit::Shutdown);
                return CyclePhase::Finalize;
            }

            let kind = candidate.kind();
            if kind.is_wait() {
                state.pending.clear();
                state.exit = Some(CycleExit::Wait);
                return CyclePhase::Finalize;
            }

            self.emit(CycleEvent::ActionStart {
                cycle_id: state.cycle_id.clone(),
                action_type: kind.as_str().to_string(),
            });

            if kind.is_node_local() {
                let result = NodeTools::new(
                    &mut self.nodes,
                    self.world.as_ref(),
                    self.summarizer.as_ref(),
                    &state.known,
                )
                .invoke(&kind, &candidate.parameters)
                .await;
                let mut record =
                    self.make_record(state, &candidate, result.success, result.message, None);
                if result.resolved_path.is_some() {
                    record.target = result.resolved_path;
                }
                self.finish_record(state, record);
            } else {
                self.act_external(state, &kind, &candidate).await;
            }

            let state_changing =
                kind.is_state_changing() || self.dispatcher.is_state_changing(kind.as_str());
            if state_changing && !state.pending.is_empty() {
                tracing::debug!(
                    cycle_id = %state.cycle_id,
                    action_type = %kind,
                    dropped = state.pending.len(),
                    "state-changing action, rebuilding payload"
                );
                state.pending.clear();
            }
        }
        CyclePhase::BuildPayload
    }

    async fn act_external(&mut self, state: &mut CycleState, kind: &ActionKind, candidate: &CandidateAction) {
        let destination = classify::destination_for(kind, &candidate.parameters, &state.ctx);

        if !self.backlog.is_throttled(&destination) {
            let outcome = self.dispatch(kind.as_str(), candidate.parameters.clone()).await;
            let message = if outcome.success {
                outcome.message.clone()
            } else {
                outcome.error_text().to_string()
            };
            let record = self.make_record(state, candidate, outcome.success, message, None);
            self.finish_record(state, record);
            return;
        }

        let ids = self.backlog.enqueue_batch(
            std::slice::from_ref(candidate),
            state.default_priority,
            &state.ctx,
        );
        let Some(&id) = ids.first() else {
            return;
        };
        self.pump_backlog(state).await;

        // If the pump ran it, its record is already in the history.
        let ran = state.history.iter().any(|r| r.queued_id == Some(id));
        if !ran {
            let message = format!("Queued as #{id} for '{destination}'");
            let record = self.make_record(state, candidate, true, message, Some(id));
            self.emit(CycleEvent::ActionEnd {
                cycle_id: state.cycle_id.clone(),
                record: record.clone(),
            });
            // Queued work counts as neither executed nor failed.
            state.history.push(record);
        }
    }

    async fn dispatch(&self, action_type: &str, parameters: serde_json::Value) -> DispatchOutcome {
        match self.dispatcher.execute(action_type, parameters).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(action_type, error = %e, "dispatch failed");
                DispatchOutcome::failure(e.to_string())
            }
        }
    }

    /// Run every eligible backlog action. Returns how many were dispatched.
    async fn pump_backlog(&mut self, state: &mut CycleState) -> usize {
        // Immediate retries are bounded by attempts; this also bounds backpressure loops.
        let budget = (self.backlog.queued_count() as u64)
            .saturating_mul(u64::from(self.backlog.config().default_max_attempts) + 1);
        let mut ran = 0;
        while (ran as u64) < budget {
            let Some(action) = self.backlog.next() else {
                break;
            };
            if !self.backlog.start(action.id) {
                break;
            }
            let outcome = self
                .dispatch(&action.action_type, action.parameters.clone())
                .await;
            self.settle(&action, &outcome);
            ran += 1;

            let message = if outcome.success {
                outcome.message.clone()
            } else {
                outcome.error_text().to_string()
            };
            let candidate = CandidateAction::new(action.action_type.clone(), action.parameters.clone());
            let record =
                self.make_record(state, &candidate, outcome.success, message, Some(action.id));
            self.finish_record(state, record);
        }
        ran
    }

    /// Release the action's slot exactly once, routed by failure kind.
    fn settle(&mut self, action: &QueuedAction, outcome: &DispatchOutcome) {
        let id = action.id;
        let result = if outcome.success {
            self.backlog.complete(id, true, None).map(|_| ())
        } else {
            match outcome.failure {
                Some(FailureKind::Validation) => self.backlog.abandon(id, outcome.error_text()),
                Some(FailureKind::Backpressure { retry_after_secs }) => self
                    .backlog
                    .schedule_delayed_retry(id, retry_after_secs.max(1)),
                Some(FailureKind::Transient) | None => self
                    .backlog
                    .complete(id, false, Some(outcome.error_text().to_string()))
                    .map(|_| ()),
            }
        };
        if let Err(e) = result {
            tracing::warn!(id, error = %e, "settling backlog action failed");
        }
    }

    fn make_record(
        &self,
        state: &CycleState,
        candidate: &CandidateAction,
        success: bool,
        message: String,
        queued_id: Option<u64>,
    ) -> ActionRecord {
        let target = candidate
            .node_path()
            .or_else(|| candidate.param_str("channel_id"))
            .map(str::to_string);
        ActionRecord {
            step: state.step,
            action_type: candidate.kind().as_str().to_string(),
            target,
            success,
            message,
            queued_id,
            at: self.clock.now(),
        }
    }

    fn finish_record(&self, state: &mut CycleState, record: ActionRecord) {
        tracing::debug!(
            cycle_id = %state.cycle_id,
            action_type = %record.action_type,
            success = record.success,
            "action finished"
        );
        self.emit(CycleEvent::ActionEnd {
            cycle_id: state.cycle_id.clone(),
            record: record.clone(),
        });
        state.record(record);
    }

    fn log_node_events(&self, state: &CycleState, events: &[SystemEvent]) {
        let journaled = self.journal.enabled(JournalLevel::Info);
        for event in events {
            if journaled {
                let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
                self.journal.record(
                    &JournalEntry::new(JournalLevel::Info, "node", event.message.clone())
                        .at(event.timestamp)
                        .with_cycle(state.cycle_id.clone())
                        .with_payload(payload),
                );
            }
            self.emit(CycleEvent::NodeEvent {
                event: event.clone(),
            });
        }
    }

    // ─── Finalize ───────────────────────────────────────────────────────────

    async fn refresh_summaries(&mut self, state: &CycleState) -> usize {
        let limit = self.config.summary_refresh_limit;
        if limit == 0 {
            return 0;
        }

        let collapsed: Vec<String> = state
            .known
            .iter()
            .filter(|p| !self.nodes.is_expanded(p))
            .cloned()
            .collect();
        let mut contents = std::collections::HashMap::new();
        for path in &collapsed {
            match self.world.content(path).await {
                Ok(Some(content)) => {
                    self.nodes.content_changed(path, &content);
                    contents.insert(path.clone(), content);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path, error = %e, "reading node content failed"),
            }
        }

        let mut refreshed = 0;
        for path in self.nodes.needs_summary(&state.known) {
            if refreshed >= limit {
                break;
            }
            let Some(content) = contents.get(&path) else {
                continue;
            };
            match self.summarizer.summarize(&path, content).await {
                Ok(summary) => {
                    self.nodes.update_summary(&path, summary);
                    refreshed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "summarizer failed");
                    self.note(JournalLevel::Warn, state, format!("Summarizing '{path}' failed: {e}"));
                }
            }
        }
        refreshed
    }

    async fn finalize(&mut self, state: CycleState, started: Instant) -> CycleReport {
        let summaries_refreshed = self.refresh_summaries(&state).await;

        let retention = clock::window(self.backlog.config().retention_secs);
        let pruned = self.backlog.prune_finished(retention);
        if pruned > 0 {
            tracing::debug!(cycle_id = %state.cycle_id, pruned, "pruned finished actions");
        }

        let events = self.nodes.drain_events();
        self.log_node_events(&state, &events);
        self.carried_events = events;

        let report = CycleReport {
            cycle_id: state.cycle_id.clone(),
            steps: state.step,
            actions_executed: state.executed,
            actions_failed: state.failed,
            exit: state.exit.unwrap_or(CycleExit::NoActions),
            duration_ms: started.elapsed().as_millis() as u64,
            summaries_refreshed,
            records: state.history.clone(),
        };

        tracing::info!(
            cycle_id = %report.cycle_id,
            steps = report.steps,
            executed = report.actions_executed,
            failed = report.actions_failed,
            exit = ?report.exit,
            duration_ms = report.duration_ms,
            "cycle end"
        );
        if self.journal.enabled(JournalLevel::Info) {
            let metrics = serde_json::json!({
                "steps": report.steps,
                "actions_executed": report.actions_executed,
                "actions_failed": report.actions_failed,
                "exit": report.exit,
                "duration_ms": report.duration_ms,
                "summaries_refreshed": report.summaries_refreshed,
                "backlog": self.backlog.status_summary(),
            });
            self.journal.record(
                &JournalEntry::new(JournalLevel::Info, "controller", "cycle complete")
                    .at(self.clock.now())
                    .with_cycle(state.cycle_id.clone())
                    .with_payload(metrics),
            );
        }
        self.journal.flush();

        self.emit(CycleEvent::CycleEnd {
            report: report.clone(),
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::LimiterConfig;
    use crate::error::{CortexError, CortexResult};
    use crate::journal::MemorySink;
    use crate::world::StaticWorld;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays canned decisions, then returns empty ones.
    struct ScriptedProvider {
        decisions: Mutex<VecDeque<CortexResult<Decision>>>,
        seen: Mutex<Vec<ContextPayload>>,
    }

    impl ScriptedProvider {
        fn new(decisions: Vec<CortexResult<Decision>>) -> Arc<Self> {
            Arc::new(Self {
                decisions: Mutex::new(decisions.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn payloads(&self) -> Vec<ContextPayload> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DecisionProvider for ScriptedProvider {
        async fn decide(&self, payload: &ContextPayload) -> CortexResult<Decision> {
            self.seen.lock().unwrap().push(payload.clone());
            self.decisions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Decision::default()))
        }
    }

    /// Succeeds for everything except types listed in `fail`.
    #[derive(Default)]
    struct RecordingDispatcher {
        calls: Mutex<Vec<String>>,
        fail: Vec<String>,
    }

    #[async_trait]
    impl ActionDispatcher for RecordingDispatcher {
        async fn execute(
            &self,
            action_type: &str,
            _parameters: serde_json::Value,
        ) -> CortexResult<DispatchOutcome> {
            self.calls.lock().unwrap().push(action_type.to_string());
            if self.fail.iter().any(|f| f == action_type) {
                return Ok(DispatchOutcome::failure("nope"));
            }
            Ok(DispatchOutcome::success(format!("did {action_type}")))
        }
    }

    fn world() -> Arc<StaticWorld> {
        Arc::new(
            StaticWorld::new()
                .with_node("channels.discord.general", "alice: hi")
                .with_node("channels.discord.random", "bob: memes")
                .with_node("channels.slack.ops", "deploy at 5"),
        )
    }

    fn controller(
        config: CortexConfig,
        provider: Arc<ScriptedProvider>,
        dispatcher: Arc<RecordingDispatcher>,
    ) -> CycleController {
        CycleController::new(config, provider, dispatcher, world())
    }

    fn decision(actions: Vec<CandidateAction>) -> CortexResult<Decision> {
        Ok(Decision::new(actions))
    }

    #[tokio::test]
    async fn wait_ends_cycle_immediately() {
        let provider = ScriptedProvider::new(vec![decision(vec![
            CandidateAction::wait(),
            CandidateAction::new("search", json!({"query": "x"})),
        ])]);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut ctl = controller(CortexConfig::default(), provider, dispatcher.clone());

        let report = ctl.run_cycle(CycleTrigger::new()).await;
        assert_eq!(report.exit, CycleExit::Wait);
        assert_eq!(report.steps, 1);
        assert!(dispatcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_decision_finalizes_with_no_actions() {
        let provider = ScriptedProvider::new(vec![]);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut ctl = controller(CortexConfig::default(), provider, dispatcher);
        let report = ctl.run_cycle(CycleTrigger::new()).await;
        assert_eq!(report.exit, CycleExit::NoActions);
        assert_eq!(report.steps, 1);
    }

    #[tokio::test]
    async fn state_changing_action_drops_rest_of_batch() {
        let provider = ScriptedProvider::new(vec![
            decision(vec![
                CandidateAction::new("send_message", json!({"text": "hi"})),
                CandidateAction::new("search", json!({"query": "stale"})),
            ]),
            decision(vec![CandidateAction::wait()]),
        ]);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut ctl = controller(CortexConfig::default(), provider.clone(), dispatcher.clone());

        let report = ctl.run_cycle(CycleTrigger::new()).await;
        assert_eq!(*dispatcher.calls.lock().unwrap(), vec!["send_message"]);
        assert_eq!(report.steps, 2);
        assert_eq!(report.actions_executed, 1);

        let payloads = provider.payloads();
        assert_eq!(payloads[1].history.len(), 1);
        assert_eq!(payloads[1].history[0].action_type, "send_message");
    }

    #[tokio::test]
    async fn non_state_changing_batch_runs_in_order() {
        let provider = ScriptedProvider::new(vec![decision(vec![
            CandidateAction::new("search", json!({})),
            CandidateAction::new("fetch_url", json!({})),
            CandidateAction::new("store_memory", json!({})),
        ])]);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut ctl = controller(CortexConfig::default(), provider, dispatcher.clone());

        let report = ctl.run_cycle(CycleTrigger::new()).await;
        assert_eq!(
            *dispatcher.calls.lock().unwrap(),
            vec!["search", "fetch_url", "store_memory"]
        );
        assert_eq!(report.actions_executed, 3);
        assert_eq!(report.exit, CycleExit::NoActions);
    }

    #[tokio::test]
    async fn step_cap_stops_runaway_provider() {
        let decisions = (0..20)
            .map(|_| decision(vec![CandidateAction::new("search", json!({}))]))
            .collect();
        let provider = ScriptedProvider::new(decisions);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut config = CortexConfig::default();
        config.cycle.max_steps = 3;
        let mut ctl = controller(config, provider, dispatcher.clone());

        let report = ctl.run_cycle(CycleTrigger::new()).await;
        assert_eq!(report.exit, CycleExit::StepCap);
        assert_eq!(report.steps, 3);
        assert_eq!(dispatcher.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn provider_failure_is_not_fatal() {
        let provider = ScriptedProvider::new(vec![Err(CortexError::Provider("timeout".into()))]);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sink = Arc::new(MemorySink::new());
        let mut ctl = controller(CortexConfig::default(), provider, dispatcher)
            .with_journal(Journal::new().with_sink(sink.clone()));

        let report = ctl.run_cycle(CycleTrigger::new()).await;
        assert_eq!(report.exit, CycleExit::NoActions);
        assert!(sink
            .from_source("controller")
            .iter()
            .any(|e| e.level == JournalLevel::Error && e.message.contains("timeout")));
        let entries = sink.for_cycle(&report.cycle_id);
        assert_eq!(entries.last().map(|e| e.message.as_str()), Some("cycle complete"));
    }

    #[tokio::test]
    async fn node_actions_apply_directly_and_refresh_payload() {
        let provider = ScriptedProvider::new(vec![
            decision(vec![
                CandidateAction::new("pin_node", json!({"node_path": "slack.ops"})),
                CandidateAction::new("expand_node", json!({"node_path": "discord.general"})),
                CandidateAction::new("search", json!({})),
            ]),
            decision(vec![CandidateAction::wait()]),
        ]);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut ctl = controller(CortexConfig::default(), provider.clone(), dispatcher.clone());

        let report = ctl.run_cycle(CycleTrigger::new()).await;
        assert!(ctl.nodes().is_pinned("channels.slack.ops"));
        assert!(ctl.nodes().is_expanded("channels.discord.general"));
        // expand_node is state-changing, so the search was dropped.
        assert!(dispatcher.calls.lock().unwrap().is_empty());
        assert_eq!(report.actions_executed, 2);

        let second = &provider.payloads()[1];
        let general = second.find_expanded("channels.discord.general").unwrap();
        assert_eq!(general.content, "alice: hi");
        assert!(second
            .system_events
            .iter()
            .any(|e| e.paths.contains(&"channels.discord.general".to_string())));
    }

    #[tokio::test]
    async fn throttled_destination_goes_through_backlog() {
        let provider = ScriptedProvider::new(vec![decision(vec![
            CandidateAction::new("search", json!({"query": "a"})),
            CandidateAction::new("search", json!({"query": "b"})),
        ])]);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut config = CortexConfig::default();
        config.backlog = config
            .backlog
            .with_limiter("search", LimiterConfig::new(1, 60_000));
        let mut ctl = controller(config, provider, dispatcher.clone());

        let report = ctl.run_cycle(CycleTrigger::new()).await;
        // The second search waits out the minimum interval.
        assert_eq!(dispatcher.calls.lock().unwrap().len(), 1);
        assert_eq!(ctl.backlog().queued_count(), 1);
        assert!(report.records.iter().all(|r| r.queued_id.is_some()));
        assert!(report.records[1].message.starts_with("Queued as #"));
        assert_eq!(ctl.backlog().in_progress_count(), 0);
    }

    #[tokio::test]
    async fn finalize_refreshes_summaries_up_to_limit() {
        let provider = ScriptedProvider::new(vec![]);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut config = CortexConfig::default();
        config.cycle.summary_refresh_limit = 2;
        let mut ctl = controller(config, provider, dispatcher);

        let report = ctl.run_cycle(CycleTrigger::new()).await;
        assert_eq!(report.summaries_refreshed, 2);
        let report = ctl.run_cycle(CycleTrigger::new()).await;
        assert_eq!(report.summaries_refreshed, 1);
        assert_eq!(
            ctl.nodes().get("channels.slack.ops").cached_summary.as_deref(),
            Some("deploy at 5")
        );
    }

    #[tokio::test]
    async fn shutdown_moves_to_finalize() {
        let provider = ScriptedProvider::new(vec![decision(vec![CandidateAction::new(
            "search",
            json!({}),
        )])]);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let (tx, rx) = watch::channel(true);
        let mut ctl = controller(CortexConfig::default(), provider, dispatcher.clone())
            .with_shutdown(rx);

        let report = ctl.run_cycle(CycleTrigger::new()).await;
        assert_eq!(report.exit, CycleExit::Shutdown);
        assert_eq!(report.steps, 0);
        assert!(dispatcher.calls.lock().unwrap().is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn repeated_actions_produce_guidance() {
        let provider = ScriptedProvider::new(vec![
            decision(vec![
                CandidateAction::new("search", json!({})),
                CandidateAction::new("search", json!({})),
            ]),
            decision(vec![CandidateAction::wait()]),
        ]);
        let dispatcher = Arc::new(RecordingDispatcher {
            fail: vec!["search".into()],
            ..Default::default()
        });
        let mut ctl = controller(CortexConfig::default(), provider.clone(), dispatcher);

        let report = ctl.run_cycle(CycleTrigger::new()).await;
        assert_eq!(report.actions_failed, 2);
        let guidance = &provider.payloads()[1].guidance;
        assert!(guidance.iter().any(|h| h.contains("'search' 2 times in a row")));
        assert!(guidance.iter().any(|h| h.contains("failed: nope")));
    }

    #[tokio::test]
    async fn emits_cycle_events() {
        let provider = ScriptedProvider::new(vec![decision(vec![CandidateAction::new(
            "search",
            json!({}),
        )])]);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctl = controller(CortexConfig::default(), provider, dispatcher).with_events(tx);

        ctl.run_cycle(CycleTrigger::new()).await;
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                CycleEvent::CycleStart { .. } => "start",
                CycleEvent::StepStart { .. } => "step",
                CycleEvent::DecisionReceived { .. } => "decision",
                CycleEvent::ActionStart { .. } => "action_start",
                CycleEvent::ActionEnd { .. } => "action_end",
                CycleEvent::NodeEvent { .. } => "node",
                CycleEvent::CycleEnd { .. } => "end",
                CycleEvent::Error { .. } => "error",
            });
        }
        assert_eq!(kinds.first(), Some(&"start"));
        assert_eq!(kinds.last(), Some(&"end"));
        assert!(kinds.contains(&"action_start"));
        assert!(kinds.contains(&"action_end"));
    }
}
