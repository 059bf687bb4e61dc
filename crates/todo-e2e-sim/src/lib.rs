//! todo-e2e-sim library.
//!
//! Checks the isolation protocol of `todo-e2e-core` without a browser or
//! a live service. A [`SimulatedBackend`] models one shared collection
//! with delayed visibility and injected faults; every simulated worker
//! runs the real [`ScenarioRunner`](todo_e2e_core::ScenarioRunner) on its
//! own thread under a seeded [`Scheduler`]; the [`IsolationOracle`] then
//! inspects who deleted what and what was left behind.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

#![forbid(unsafe_code)]

pub mod backend;
pub mod campaign;
pub mod clock;
pub mod oracle;
pub mod page;
pub mod rng;
pub mod sched;

pub use backend::{BackendHandle, DeleteRecord, FaultConfig, OwnedItem, SimulatedBackend};
pub use campaign::{CampaignConfig, CampaignReport, SeedFailure, SeedTrace, replay_seed, run_campaign};
pub use clock::VirtualClock;
pub use oracle::{InvariantViolation, IsolationOracle, OracleResult, format_violation};
pub use page::SimulatedPage;
pub use rng::DeterministicRng;
pub use sched::{Scheduler, Turn};
