//! Campaign runner for deterministic simulation campaigns.
//!
//! Runs the real scenario runner for every worker against a fresh
//! [`SimulatedBackend`] per seed, checks the run with the
//! [`IsolationOracle`], and identifies the first failing seed for replay.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use todo_e2e_core::{Clock, RunnerSettings, Scenario, ScenarioOutcome, ScenarioRunner};
use tracing::{debug, error, info, warn};

use crate::backend::{BackendHandle, DeleteRecord, FaultConfig, OwnedItem, SimulatedBackend};
use crate::clock::VirtualClock;
use crate::oracle::{IsolationOracle, OracleResult, format_violation};
use crate::page::SimulatedPage;
use crate::rng::DeterministicRng;
use crate::sched::Scheduler;

const NONCE_STREAM: u64 = 0x4E4F_4E43_0000_0000;

/// Campaign-level configuration: which seeds to run and how each seed's
/// workers and backend behave.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g., `0..100`.
    pub seed_range: Range<u64>,
    /// Worker identities; one simulated browser each.
    pub workers: Vec<String>,
    /// Scenarios every worker runs, in order.
    pub scenarios: Vec<Scenario>,
    pub fault: FaultConfig,
    /// Cleanup policy, matching, waits and tagging under test.
    pub settings: RunnerSettings,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seed_range: 0..100,
            workers: ["chromium", "firefox", "webkit"].map(String::from).to_vec(),
            scenarios: Scenario::ALL.to_vec(),
            fault: FaultConfig::default(),
            settings: RunnerSettings::default(),
        }
    }
}

impl CampaignConfig {
    /// Validate configuration before running.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.workers.is_empty() {
            bail!("at least one worker is required");
        }
        if self.workers.iter().any(|worker| worker.trim().is_empty()) {
            bail!("worker names must not be blank");
        }
        let unique: BTreeSet<&str> = self.workers.iter().map(String::as_str).collect();
        if unique.len() != self.workers.len() {
            bail!("worker names must be unique");
        }
        if self.scenarios.is_empty() {
            bail!("at least one scenario is required");
        }
        if self.fault.delete_failure_percent > 100 || self.fault.unavailable_rate_percent > 100 {
            bail!("fault percentages must be within 0..=100");
        }
        Ok(())
    }
}

/// Failure details for a single seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    /// Invariant violations found, formatted for humans.
    pub violations: Vec<String>,
}

/// Aggregate report produced by a campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed (for prioritized replay).
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds in which some cleanup listed items belonging to other scopes,
    /// i.e. where workers actually overlapped on the shared collection.
    pub contended_seeds: usize,
}

impl CampaignReport {
    /// True if every seed passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Everything one seed did, for replay and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedTrace {
    pub seed: u64,
    pub outcomes: Vec<ScenarioOutcome>,
    /// Accepted deletes, in time order.
    pub deletes: Vec<DeleteRecord>,
    /// Items still present once every write became visible.
    pub residue: Vec<OwnedItem>,
    pub panicked_workers: Vec<String>,
    /// Virtual time at the end of the run.
    pub elapsed_ms: u64,
    pub oracle: OracleResult,
}

impl SeedTrace {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.oracle.passed && self.panicked_workers.is_empty()
    }

    /// Whether any cleanup saw items it left alone.
    #[must_use]
    pub fn contended(&self) -> bool {
        self.outcomes.iter().any(|outcome| {
            [&outcome.cleanup_before, &outcome.cleanup_after]
                .into_iter()
                .flatten()
                .any(|report| report.listed > report.matched)
        })
    }

    /// Human-readable lines for every problem in this seed.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        self.panicked_workers
            .iter()
            .map(|worker| format!("WorkerPanicked: {worker}"))
            .chain(self.oracle.violations.iter().map(format_violation))
            .collect()
    }
}

/// Run a full campaign across all seeds in the config.
///
/// # Errors
///
/// Returns an error if config validation fails.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;
    info!(
        seeds = ?config.seed_range,
        workers = config.workers.len(),
        policy = ?config.settings.policy,
        match_mode = ?config.settings.match_mode,
        "campaign start"
    );

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        contended_seeds: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let trace = simulate(seed, config);
        if trace.contended() {
            report.contended_seeds += 1;
        }

        if trace.passed() {
            report.seeds_passed += 1;
            debug!(seed, elapsed_ms = trace.elapsed_ms, "seed passed");
        } else {
            warn!(seed, violations = trace.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: trace.problems(),
            });
        }
    }

    info!(
        seeds_run = report.seeds_run,
        seeds_passed = report.seeds_passed,
        first_failure = ?report.first_failure,
        "campaign finished"
    );
    Ok(report)
}

/// Replay a single seed with full trace details for debugging.
///
/// # Errors
///
/// Returns an error when config validation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<SeedTrace> {
    config.validate()?;
    Ok(simulate(seed, config))
}

fn simulate(seed: u64, config: &CampaignConfig) -> SeedTrace {
    let clock = VirtualClock::new();
    let backend = Arc::new(SimulatedBackend::new(seed, config.fault, clock.clone()));
    let scheduler = Scheduler::new(config.workers.len(), clock.clone(), seed);

    let joined: Vec<(String, std::thread::Result<Vec<ScenarioOutcome>>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = config
            .workers
            .iter()
            .enumerate()
            .map(|(index, worker)| {
                let api = backend.handle(worker.as_str());
                let scheduler = &scheduler;
                let handle = scope.spawn(move || run_worker(seed, index, scheduler, api, config));
                (worker.clone(), handle)
            })
            .collect();
        handles
            .into_iter()
            .map(|(worker, handle)| (worker, handle.join()))
            .collect()
    });

    let mut outcomes = Vec::new();
    let mut panicked_workers = Vec::new();
    for (worker, result) in joined {
        match result {
            Ok(worker_outcomes) => outcomes.extend(worker_outcomes),
            Err(_) => {
                error!(seed, %worker, "simulated worker panicked");
                panicked_workers.push(worker);
            }
        }
    }

    debug!(seed, pending = backend.pending_len(), "quiescing backend");
    backend.quiesce();
    let deletes = backend.delete_log();
    let residue = backend.visible_items();
    let oracle = IsolationOracle::check_all(&outcomes, &deletes, &residue);

    SeedTrace {
        seed,
        outcomes,
        deletes,
        residue,
        panicked_workers,
        elapsed_ms: u64::try_from(clock.now().as_millis()).unwrap_or(u64::MAX),
        oracle,
    }
}

fn run_worker(
    seed: u64,
    index: usize,
    scheduler: &Scheduler,
    api: BackendHandle,
    config: &CampaignConfig,
) -> Vec<ScenarioOutcome> {
    let turn = scheduler.enter(index);
    let mut page = SimulatedPage::new(api.clone());
    let mut rng = DeterministicRng::fork(seed, NONCE_STREAM ^ index as u64);
    let runner = ScenarioRunner::new(&api, &turn, &config.settings);

    config
        .scenarios
        .iter()
        .map(|&scenario| {
            api.set_test(scenario.title());
            runner.run(api.actor(), scenario, &mut page, &mut rng)
        })
        .collect()
}
