//! # cortex-core
//!
//! Decision-and-execution core for a multi-platform autonomous agent: a
//! bounded working memory over a large world state, a throttled action
//! backlog, and the cycle controller that ties them to a decision provider.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use cortex_core::controller::{ContextPayload, CycleController, CycleTrigger};
//! use cortex_core::config::CortexConfig;
//! use cortex_core::dispatch::HandlerRegistry;
//! use cortex_core::error::CortexResult;
//! use cortex_core::provider::DecisionProvider;
//! use cortex_core::types::{CandidateAction, Decision};
//! use cortex_core::world::StaticWorld;
//!
//! struct AlwaysWait;
//!
//! #[async_trait]
//! impl DecisionProvider for AlwaysWait {
//!     async fn decide(&self, _payload: &ContextPayload) -> CortexResult<Decision> {
//!         Ok(Decision::new(vec![CandidateAction::wait()]))
//!     }
//! }
//!
//! # async fn run() -> CortexResult<()> {
//! let config = CortexConfig::from_file("cortex.yaml")?;
//! let world = StaticWorld::new().with_node("channels.discord.general", "alice: hi");
//! let mut controller = CycleController::new(
//!     config,
//!     Arc::new(AlwaysWait),
//!     Arc::new(HandlerRegistry::new()),
//!     Arc::new(world),
//! );
//! let report = controller.run_cycle(CycleTrigger::new().with_platform("discord")).await;
//! println!("{} steps, exit {:?}", report.steps, report.exit);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`node`] | `NodeStore`: LRU-with-pinning expansion, summaries, content hashes, path resolution |
//! | [`backlog`] | `ActionBacklog`: priority queues, dependencies, retries, per-destination rate limiters |
//! | [`controller`] | `CycleController`: prime, build payload, decide, act, finalize |
//! | [`provider`] | `DecisionProvider` and `Summarizer` traits |
//! | [`dispatch`] | `ActionDispatcher` trait and the `HandlerRegistry` |
//! | [`world`] | `WorldState` trait: node paths, content, activity |
//! | [`journal`] | Structured journal with pluggable sinks |
//! | [`config`] | `CortexConfig` loaded from YAML or JSON |
//! | [`clock`] | Injectable time source |
//! | [`types`] | `ActionKind`, `CandidateAction`, `Decision`, `ActionRecord`, `CycleEvent` |
//! | [`error`] | `CortexError` with thiserror |
//!
//! ## Slot accounting
//!
//! Every successful [`backlog::ActionBacklog::start`] reserves one slot on the
//! action's destination limiter. Exactly one of `complete`,
//! `schedule_delayed_retry` or `abandon` releases it. The controller settles
//! every started action, including ones whose parameters fail validation.

pub mod backlog;
pub mod clock;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod journal;
pub mod node;
pub mod provider;
pub mod types;
pub mod world;
