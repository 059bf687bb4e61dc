//! todo-e2e-core library.
//!
//! End-to-end tests against a TODO service share one mutable collection
//! across every parallel worker, and the service offers no namespaces.
//! This crate keeps each test's view of that collection to the items it
//! created:
//!
//! - [`tag`] embeds a scope tag in every item text a test creates.
//! - [`cleanup`] removes exactly one scope's items before and after a test.
//! - [`wait`] bridges the lag between a write and its visibility.
//! - [`scenario`] sequences navigate → clean → act → converge → assert →
//!   clean, and always runs the final clean.
//! - [`suite`] runs the scenarios on many workers at once.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums in the library ([`error`]); `anyhow`
//!   only for config loading.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

#![forbid(unsafe_code)]

pub mod api;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod page;
pub mod scenario;
pub mod suite;
pub mod tag;
pub mod wait;

pub use api::{HttpTodoApi, TodoApi};
pub use cleanup::{CleanupPolicy, CleanupReport, ScopedCleanup};
pub use clock::{Clock, SystemClock};
pub use config::{HarnessConfig, load_config};
pub use error::{AssertionFailure, ErrorCode, HarnessError, SutError};
pub use model::{TodoId, TodoItem};
pub use page::{HttpPage, Page};
pub use scenario::{Phase, RunnerSettings, Scenario, ScenarioOutcome, ScenarioRunner, ScenarioStatus};
pub use suite::{HttpWorkerFactory, SuiteReport, WorkerFactory, run_suite};
pub use tag::{Label, MatchMode, ScopeFilter, ScopeTag, ScopedKey, TagStyle, Tagger, make_label};
pub use wait::{ConvergenceWaiter, PollBudget, WaitStrategy};
