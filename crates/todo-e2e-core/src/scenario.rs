//! Per-test orchestration.
//!
//! Every scenario walks the same phases:
//!
//! ```text
//! Pending → Navigated → CleanBefore → (ActionsApplied | Converged → Asserted)* → CleanAfter → Done
//! ```
//!
//! Actions require a finished `CleanBefore`, assertions require a fresh
//! observation (`Converged`), and `CleanAfter` runs whatever happened
//! before it.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::api::TodoApi;
use crate::cleanup::{CleanupPolicy, CleanupReport, DEFAULT_MAX_CONCURRENCY, ScopedCleanup};
use crate::clock::Clock;
use crate::error::{AssertionFailure, HarnessError};
use crate::page::Page;
use crate::tag::{Label, MatchMode, ScopeFilter, ScopeTag, Tagger};
use crate::wait::{ConvergenceWaiter, WaitStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Pending,
    Navigated,
    CleanBefore,
    ActionsApplied,
    Converged,
    Asserted,
    CleanAfter,
    Done,
}

impl Phase {
    #[must_use]
    pub const fn can_advance_to(self, to: Self) -> bool {
        use Phase::{ActionsApplied, Asserted, CleanAfter, CleanBefore, Converged, Done, Navigated, Pending};
        match (self, to) {
            (Pending, Navigated) | (Navigated, CleanBefore) | (Converged, Asserted) | (CleanAfter, Done) => true,
            (CleanBefore | ActionsApplied | Converged | Asserted, ActionsApplied | Converged) => true,
            (Pending | Navigated | CleanBefore | ActionsApplied | Converged | Asserted, CleanAfter) => true,
            _ => false,
        }
    }
}

/// Enforces the phase order of one scenario and records the path taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTracker {
    history: Vec<Phase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: vec![Phase::Pending],
        }
    }

    #[must_use]
    pub fn current(&self) -> Phase {
        self.history.last().copied().unwrap_or(Phase::Pending)
    }

    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidTransition`] when `to` may not follow
    /// the current phase.
    pub fn advance(&mut self, to: Phase) -> Result<(), HarnessError> {
        let from = self.current();
        if !from.can_advance_to(to) {
            return Err(HarnessError::InvalidTransition { from, to });
        }
        self.history.push(to);
        Ok(())
    }

    #[must_use]
    pub fn into_history(self) -> Vec<Phase> {
        self.history
    }
}

/// The built-in suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    EmptyState,
    SingleAdd,
    MultipleAdd,
    Remove,
    PageTitle,
}

impl Scenario {
    pub const ALL: [Self; 5] = [
        Self::EmptyState,
        Self::SingleAdd,
        Self::MultipleAdd,
        Self::Remove,
        Self::PageTitle,
    ];

    /// Human-readable test name, embedded in every label the test creates.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::EmptyState => "initial state should have no TODOs",
            Self::SingleAdd => "can add a new TODO entry",
            Self::MultipleAdd => "can add multiple TODOs",
            Self::Remove => "can remove a TODO item",
            Self::PageTitle => "should display correct page title",
        }
    }

    fn execute<P, R>(self, ctx: &mut ScenarioContext<'_, P, R>) -> Result<(), HarnessError>
    where
        P: Page + ?Sized,
        R: Rng + ?Sized,
    {
        match self {
            Self::EmptyState => {
                let total = ctx.await_scoped(0)?;
                ctx.expect_scoped(0, total)
            }
            Self::SingleAdd => {
                let todo = ctx.new_label();
                ctx.add(&todo)?;
                let shown = ctx.await_label(&todo, 1)?;
                ctx.expect_label(&todo, 1, shown)?;
                let total = ctx.await_scoped(1)?;
                ctx.expect_scoped(1, total)
            }
            Self::MultipleAdd => {
                let first = ctx.new_label();
                let second = ctx.new_label();
                for todo in [&first, &second] {
                    ctx.add(todo)?;
                }
                for todo in [&first, &second] {
                    let shown = ctx.await_label(todo, 1)?;
                    ctx.expect_label(todo, 1, shown)?;
                }
                let total = ctx.await_scoped(2)?;
                ctx.expect_scoped(2, total)
            }
            Self::Remove => {
                let first = ctx.new_label();
                let second = ctx.new_label();
                for todo in [&first, &second] {
                    ctx.add(todo)?;
                }
                for todo in [&first, &second] {
                    let shown = ctx.await_label(todo, 1)?;
                    ctx.expect_label(todo, 1, shown)?;
                }

                ctx.remove(&first)?;

                let shown = ctx.await_label(&first, 0)?;
                ctx.expect_label(&first, 0, shown)?;
                let shown = ctx.await_label(&second, 1)?;
                ctx.expect_label(&second, 1, shown)?;
                let total = ctx.await_scoped(1)?;
                ctx.expect_scoped(1, total)
            }
            Self::PageTitle => {
                let title = ctx.observe_title()?;
                ctx.expect_title(&title)
            }
        }
    }
}

/// Knobs shared by every scenario of a run.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub home_path: String,
    pub policy: CleanupPolicy,
    pub match_mode: MatchMode,
    pub settle_before: Duration,
    pub settle_after: Duration,
    /// Deletes a cleanup pass keeps in flight at once.
    pub cleanup_concurrency: usize,
    pub wait: WaitStrategy,
    pub tagger: Tagger,
    pub expected_title: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            home_path: "/".to_string(),
            policy: CleanupPolicy::Scoped,
            match_mode: MatchMode::Exact,
            settle_before: Duration::from_millis(500),
            settle_after: Duration::from_millis(300),
            cleanup_concurrency: DEFAULT_MAX_CONCURRENCY,
            wait: WaitStrategy::default(),
            tagger: Tagger::default(),
            expected_title: "TODO 📃".to_string(),
        }
    }
}

/// The state a scenario body works through.
pub struct ScenarioContext<'c, P: Page + ?Sized, R: Rng + ?Sized> {
    page: &'c mut P,
    rng: &'c mut R,
    tracker: &'c mut PhaseTracker,
    waiter: ConvergenceWaiter<'c>,
    tagger: &'c Tagger,
    expected_title: &'c str,
    scope: ScopeTag,
    filter: ScopeFilter,
    created: Vec<String>,
}

impl<P: Page + ?Sized, R: Rng + ?Sized> ScenarioContext<'_, P, R> {
    pub fn new_label(&mut self) -> Label {
        self.tagger.label(&self.scope, &mut *self.rng)
    }

    /// Type a label into the input and submit it.
    ///
    /// # Errors
    ///
    /// Fails on driver errors or when called before `CleanBefore`.
    pub fn add(&mut self, label: &Label) -> Result<(), HarnessError> {
        self.tracker.advance(Phase::ActionsApplied)?;
        self.page.fill_input(label.as_str())?;
        self.page.click_add()?;
        self.created.push(label.as_str().to_string());
        Ok(())
    }

    /// Click the delete control of the entry showing `label`.
    ///
    /// # Errors
    ///
    /// Fails on driver errors, or with an assertion failure when no entry
    /// for `label` is rendered.
    pub fn remove(&mut self, label: &Label) -> Result<(), HarnessError> {
        self.tracker.advance(Phase::ActionsApplied)?;
        if self.page.click_delete(label.as_str())? {
            return Ok(());
        }
        Err(HarnessError::Assertion(AssertionFailure {
            expectation: format!("delete control for {:?}", label.as_str()),
            expected: "present".into(),
            actual: "absent".into(),
            leaked: Vec::new(),
        }))
    }

    /// # Errors
    ///
    /// See [`ConvergenceWaiter::await_count`].
    pub fn await_scoped(&mut self, expected: usize) -> Result<usize, HarnessError> {
        self.tracker.advance(Phase::Converged)?;
        let result = self
            .waiter
            .await_stable_count(&mut *self.page, &self.filter, expected);
        if matches!(result, Err(HarnessError::ConvergenceTimeout { .. })) {
            let leaked = self.leaked_items();
            if !leaked.is_empty() {
                warn!(scope = %self.scope, ?leaked, "scoped count timed out with foreign items in scope");
            }
        }
        result
    }

    /// # Errors
    ///
    /// See [`ConvergenceWaiter::await_count`].
    pub fn await_label(&mut self, label: &Label, expected: usize) -> Result<usize, HarnessError> {
        self.tracker.advance(Phase::Converged)?;
        let filter = ScopeFilter::Label(label.as_str().to_string());
        self.waiter.await_stable_count(&mut *self.page, &filter, expected)
    }

    /// # Errors
    ///
    /// Fails on driver errors.
    pub fn observe_title(&mut self) -> Result<String, HarnessError> {
        self.tracker.advance(Phase::Converged)?;
        Ok(self.page.title()?)
    }

    /// # Errors
    ///
    /// Returns an assertion failure naming any leaked items when the counts
    /// differ.
    pub fn expect_scoped(&mut self, expected: usize, actual: usize) -> Result<(), HarnessError> {
        let expectation = self.filter.describe();
        self.expect_count(expectation, expected, actual)
    }

    /// # Errors
    ///
    /// Returns an assertion failure when the counts differ.
    pub fn expect_label(&mut self, label: &Label, expected: usize, actual: usize) -> Result<(), HarnessError> {
        self.expect_count(format!("entries showing {:?}", label.as_str()), expected, actual)
    }

    /// # Errors
    ///
    /// Returns an assertion failure when the title lacks the expected text.
    pub fn expect_title(&mut self, title: &str) -> Result<(), HarnessError> {
        self.tracker.advance(Phase::Asserted)?;
        if title.contains(self.expected_title) {
            return Ok(());
        }
        Err(HarnessError::Assertion(AssertionFailure {
            expectation: "page title".into(),
            expected: format!("to contain {:?}", self.expected_title),
            actual: format!("{title:?}"),
            leaked: Vec::new(),
        }))
    }

    fn expect_count(&mut self, expectation: String, expected: usize, actual: usize) -> Result<(), HarnessError> {
        self.tracker.advance(Phase::Asserted)?;
        if expected == actual {
            return Ok(());
        }
        Err(HarnessError::Assertion(AssertionFailure {
            expectation,
            expected: expected.to_string(),
            actual: actual.to_string(),
            leaked: self.leaked_items(),
        }))
    }

    /// In-scope entries this scenario did not create.
    fn leaked_items(&mut self) -> Vec<String> {
        let Ok(texts) = self.page.item_texts() else {
            return Vec::new();
        };
        texts
            .into_iter()
            .filter(|text| self.filter.matches(text))
            .filter(|text| !self.created.iter().any(|own| text.contains(own.as_str())))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ScenarioStatus {
    Passed,
    Failed {
        code: &'static str,
        timed_out: bool,
        message: String,
    },
}

impl ScenarioStatus {
    fn from_error(err: &HarnessError) -> Self {
        Self::Failed {
            code: err.code().code(),
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

/// Everything one scenario run did, for reports and oracles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioOutcome {
    pub worker: String,
    pub scenario: Scenario,
    pub status: ScenarioStatus,
    pub phases: Vec<Phase>,
    pub cleanup_before: Option<CleanupReport>,
    pub cleanup_after: Option<CleanupReport>,
    pub created: Vec<String>,
}

impl ScenarioOutcome {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

/// Runs scenarios for one worker against a shared service.
pub struct ScenarioRunner<'a, A: TodoApi + ?Sized> {
    api: &'a A,
    clock: &'a dyn Clock,
    settings: &'a RunnerSettings,
}

impl<'a, A: TodoApi + ?Sized> ScenarioRunner<'a, A> {
    pub fn new(api: &'a A, clock: &'a dyn Clock, settings: &'a RunnerSettings) -> Self {
        Self {
            api,
            clock,
            settings,
        }
    }

    /// Run one scenario to `Done`. Cleanup-after runs even when an earlier
    /// phase failed.
    pub fn run<P, R>(&self, worker: &str, scenario: Scenario, page: &mut P, rng: &mut R) -> ScenarioOutcome
    where
        P: Page + ?Sized,
        R: Rng + ?Sized,
    {
        let scope = ScopeTag::new(worker, scenario.title());
        let cleanup_filter = self.settings.policy.filter_for(&scope, self.settings.match_mode);
        let cleaner =
            ScopedCleanup::new(self.api, self.clock).with_max_concurrency(self.settings.cleanup_concurrency);
        let mut tracker = PhaseTracker::new();
        let mut outcome = ScenarioOutcome {
            worker: worker.to_string(),
            scenario,
            status: ScenarioStatus::Passed,
            phases: Vec::new(),
            cleanup_before: None,
            cleanup_after: None,
            created: Vec::new(),
        };

        info!(worker, scenario = scenario.title(), "scenario start");

        let body = self.run_body(&scope, &cleaner, &cleanup_filter, &mut tracker, &mut outcome, page, rng);
        if let Err(err) = &body {
            warn!(worker, scenario = scenario.title(), code = %err.code(), error = %err, "scenario failed");
            outcome.status = ScenarioStatus::from_error(err);
        }

        let after = tracker
            .advance(Phase::CleanAfter)
            .and_then(|()| Ok(cleaner.cleanup(&cleanup_filter, self.settings.settle_after)?));
        if let Err(err) = tracker.advance(Phase::Done) {
            warn!(worker, error = %err, "scenario did not reach done");
        }
        match after {
            Ok(report) => outcome.cleanup_after = Some(report),
            Err(err) => {
                warn!(worker, scenario = scenario.title(), error = %err, "cleanup after scenario failed");
                if body.is_ok() {
                    outcome.status = ScenarioStatus::from_error(&err);
                }
            }
        }

        outcome.phases = tracker.into_history();
        info!(
            worker,
            scenario = scenario.title(),
            passed = outcome.passed(),
            "scenario finished"
        );
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn run_body<P, R>(
        &self,
        scope: &ScopeTag,
        cleaner: &ScopedCleanup<'_, A>,
        cleanup_filter: &ScopeFilter,
        tracker: &mut PhaseTracker,
        outcome: &mut ScenarioOutcome,
        page: &mut P,
        rng: &mut R,
    ) -> Result<(), HarnessError>
    where
        P: Page + ?Sized,
        R: Rng + ?Sized,
    {
        page.goto(&self.settings.home_path)?;
        tracker.advance(Phase::Navigated)?;

        outcome.cleanup_before = Some(cleaner.cleanup(cleanup_filter, self.settings.settle_before)?);
        tracker.advance(Phase::CleanBefore)?;

        let mut ctx = ScenarioContext {
            page,
            rng,
            tracker,
            waiter: ConvergenceWaiter::new(self.settings.wait, self.clock),
            tagger: &self.settings.tagger,
            expected_title: &self.settings.expected_title,
            scope: scope.clone(),
            filter: ScopeFilter::scoped(scope.clone(), self.settings.match_mode),
            created: Vec::new(),
        };
        let result = outcome.scenario.execute(&mut ctx);
        outcome.created = ctx.created;
        result
    }
}
