use serde::Serialize;
use todo_e2e_core::{ScenarioOutcome, ScenarioStatus};

use crate::backend::{DeleteRecord, OwnedItem};

// ── Core result types ─────────────────────────────────────────────────────────

/// Oracle result for an invariant check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    #[must_use]
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        if violations.is_empty() {
            Self::pass()
        } else {
            Self {
                passed: false,
                violations,
            }
        }
    }

    /// Merge another result into this one (failures accumulate).
    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InvariantViolation {
    /// A test deleted an item created under another (worker, test) scope.
    CrossScopeDeletion {
        actor: String,
        actor_test: String,
        owner: String,
        owner_test: String,
        text: String,
        at_ms: u64,
    },

    /// A test-created item outlived the whole run.
    Residue { owner: String, text: String },

    /// A scenario did not pass.
    ScenarioFailed {
        worker: String,
        scenario: String,
        timed_out: bool,
        message: String,
    },
}

impl InvariantViolation {
    /// Short, stable name of the violated invariant.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CrossScopeDeletion { .. } => "CrossScopeDeletion",
            Self::Residue { .. } => "Residue",
            Self::ScenarioFailed { .. } => "ScenarioFailed",
        }
    }
}

// ── Oracle ────────────────────────────────────────────────────────────────────

/// Checks a finished run for isolation failures.
///
/// # Invariants checked
///
/// 1. **Scope isolation** (`check_deletions`): every delete was issued by
///    the same worker and test that created the item.
/// 2. **No residue** (`check_residue`): once every write is visible, no
///    test-created item remains.
/// 3. **Scenario success** (`check_outcomes`): every scenario passed.
pub struct IsolationOracle;

impl IsolationOracle {
    #[must_use]
    pub fn check_deletions(deletes: &[DeleteRecord]) -> OracleResult {
        OracleResult::from_violations(
            deletes
                .iter()
                .filter(|record| {
                    (&record.actor, &record.actor_test) != (&record.creator, &record.creator_test)
                })
                .map(|record| InvariantViolation::CrossScopeDeletion {
                    actor: record.actor.clone(),
                    actor_test: record.actor_test.clone(),
                    owner: record.creator.clone(),
                    owner_test: record.creator_test.clone(),
                    text: record.text.clone(),
                    at_ms: record.at_ms,
                })
                .collect(),
        )
    }

    /// `remaining` must be taken after the backend has quiesced.
    #[must_use]
    pub fn check_residue(remaining: &[OwnedItem]) -> OracleResult {
        OracleResult::from_violations(
            remaining
                .iter()
                .map(|item| InvariantViolation::Residue {
                    owner: item.creator.clone(),
                    text: item.text.clone(),
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn check_outcomes(outcomes: &[ScenarioOutcome]) -> OracleResult {
        OracleResult::from_violations(
            outcomes
                .iter()
                .filter_map(|outcome| match &outcome.status {
                    ScenarioStatus::Passed => None,
                    ScenarioStatus::Failed {
                        timed_out, message, ..
                    } => Some(InvariantViolation::ScenarioFailed {
                        worker: outcome.worker.clone(),
                        scenario: outcome.scenario.title().to_string(),
                        timed_out: *timed_out,
                        message: message.clone(),
                    }),
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn check_all(
        outcomes: &[ScenarioOutcome],
        deletes: &[DeleteRecord],
        remaining: &[OwnedItem],
    ) -> OracleResult {
        OracleResult::pass()
            .merge(Self::check_deletions(deletes))
            .merge(Self::check_residue(remaining))
            .merge(Self::check_outcomes(outcomes))
    }
}

/// Format an invariant violation into a human-readable string.
#[must_use]
pub fn format_violation(violation: &InvariantViolation) -> String {
    match violation {
        InvariantViolation::CrossScopeDeletion {
            actor,
            actor_test,
            owner,
            owner_test,
            text,
            at_ms,
        } => format!(
            "CrossScopeDeletion: {actor} deleted {owner}'s item {text:?} at {at_ms}ms \
             (test {actor_test:?} removed an item of {owner_test:?})"
        ),
        InvariantViolation::Residue { owner, text } => {
            format!("Residue: {owner}'s item {text:?} was never cleaned up")
        }
        InvariantViolation::ScenarioFailed {
            worker,
            scenario,
            timed_out,
            message,
        } => {
            let kind = if *timed_out { "timed out" } else { "failed" };
            format!("ScenarioFailed: {worker} {scenario:?} {kind}: {message}")
        }
    }
}
