//! Parallel execution of the scenario suite, one thread per worker.
//!
//! Workers share the service and nothing else: each gets its own page,
//! API handle and RNG from a [`WorkerFactory`]. Within a worker the
//! scenarios run strictly in order; across workers there is no ordering
//! at all, which is exactly the situation scoped cleanup has to survive.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{error, info};

use crate::api::{HttpTodoApi, TodoApi};
use crate::clock::{Clock, SystemClock};
use crate::error::SutError;
use crate::page::{HttpPage, Page};
use crate::scenario::{Phase, RunnerSettings, Scenario, ScenarioOutcome, ScenarioRunner, ScenarioStatus};

/// Builds the per-worker collaborators of a suite run.
pub trait WorkerFactory: Sync {
    type Api: TodoApi;
    type Page: Page;
    type Rng: Rng;

    fn api(&self, worker: &str) -> Self::Api;

    /// # Errors
    ///
    /// Returns a [`SutError`] when no page can be opened for the worker.
    fn page(&self, worker: &str) -> Result<Self::Page, SutError>;

    fn rng(&self, worker: &str) -> Self::Rng;

    fn clock(&self) -> &dyn Clock;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SuiteReport {
    pub outcomes: Vec<ScenarioOutcome>,
    /// Workers whose thread panicked; their outcomes are missing.
    pub panicked_workers: Vec<String>,
}

impl SuiteReport {
    #[must_use]
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.passed()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.panicked_workers.is_empty() && self.outcomes.iter().all(ScenarioOutcome::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.passed())
    }
}

/// Run `scenarios` on every worker concurrently.
pub fn run_suite<F: WorkerFactory>(
    factory: &F,
    workers: &[String],
    scenarios: &[Scenario],
    settings: &RunnerSettings,
) -> SuiteReport {
    info!(workers = workers.len(), scenarios = scenarios.len(), "suite start");

    let joined: Vec<(String, std::thread::Result<Vec<ScenarioOutcome>>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = workers
            .iter()
            .map(|worker| {
                let handle = scope.spawn(move || run_worker(factory, worker, scenarios, settings));
                (worker.clone(), handle)
            })
            .collect();
        handles
            .into_iter()
            .map(|(worker, handle)| (worker, handle.join()))
            .collect()
    });

    let mut report = SuiteReport::default();
    for (worker, result) in joined {
        match result {
            Ok(outcomes) => report.outcomes.extend(outcomes),
            Err(_) => {
                error!(%worker, "worker thread panicked");
                report.panicked_workers.push(worker);
            }
        }
    }

    info!(passed = report.passed(), failed = report.failed(), "suite finished");
    report
}

fn run_worker<F: WorkerFactory>(
    factory: &F,
    worker: &str,
    scenarios: &[Scenario],
    settings: &RunnerSettings,
) -> Vec<ScenarioOutcome> {
    let mut page = match factory.page(worker) {
        Ok(page) => page,
        Err(err) => {
            error!(worker, error = %err, "could not open page");
            return scenarios
                .iter()
                .map(|&scenario| unrun(worker, scenario, &err))
                .collect();
        }
    };
    let api = factory.api(worker);
    let mut rng = factory.rng(worker);
    let runner = ScenarioRunner::new(&api, factory.clock(), settings);

    scenarios
        .iter()
        .map(|&scenario| runner.run(worker, scenario, &mut page, &mut rng))
        .collect()
}

fn unrun(worker: &str, scenario: Scenario, err: &SutError) -> ScenarioOutcome {
    ScenarioOutcome {
        worker: worker.to_string(),
        scenario,
        status: ScenarioStatus::Failed {
            code: err.code().code(),
            timed_out: false,
            message: err.to_string(),
        },
        phases: vec![Phase::Pending],
        cleanup_before: None,
        cleanup_after: None,
        created: Vec::new(),
    }
}

/// Workers that talk to a live service over HTTP.
pub struct HttpWorkerFactory {
    base_url: String,
    timeout: Duration,
    clock: SystemClock,
}

impl HttpWorkerFactory {
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.to_string(),
            timeout,
            clock: SystemClock::new(),
        }
    }
}

impl WorkerFactory for HttpWorkerFactory {
    type Api = HttpTodoApi;
    type Page = HttpPage;
    type Rng = StdRng;

    fn api(&self, _worker: &str) -> HttpTodoApi {
        HttpTodoApi::new(&self.base_url, self.timeout)
    }

    fn page(&self, _worker: &str) -> Result<HttpPage, SutError> {
        Ok(HttpPage::new(&self.base_url, self.timeout))
    }

    fn rng(&self, _worker: &str) -> StdRng {
        StdRng::from_entropy()
    }

    fn clock(&self) -> &dyn Clock {
        &self.clock
    }
}
