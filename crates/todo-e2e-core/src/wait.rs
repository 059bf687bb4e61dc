//! Waiting for a write to show up in the rendered view.
//!
//! A completed add or delete does not guarantee the next read reflects it.
//! [`WaitStrategy::Poll`] re-observes with backoff until the expected
//! count appears or the budget runs out, and reports exhaustion as
//! [`HarnessError::ConvergenceTimeout`] so it cannot be mistaken for a
//! wrong answer. [`WaitStrategy::Fixed`] sleeps once and observes once.

use std::time::Duration;

use serde::Serialize;
use tracing::{trace, warn};

use crate::clock::Clock;
use crate::error::{HarnessError, SutError};
use crate::page::Page;
use crate::tag::ScopeFilter;

/// Retry budget for polling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PollBudget {
    pub interval: Duration,
    pub max_interval: Duration,
    /// Multiplier applied to the interval after each miss.
    pub backoff: f64,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for PollBudget {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(400),
            backoff: 2.0,
            timeout: Duration::from_secs(5),
            max_attempts: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum WaitStrategy {
    /// Sleep once, then observe once. The caller's assertion decides.
    Fixed(Duration),
    /// Observe until the expected value appears or the budget is spent.
    Poll(PollBudget),
}

impl Default for WaitStrategy {
    fn default() -> Self {
        Self::Poll(PollBudget::default())
    }
}

pub struct ConvergenceWaiter<'a> {
    strategy: WaitStrategy,
    clock: &'a dyn Clock,
}

/// Largest backoff factor a config may ask for.
pub const MAX_BACKOFF: f64 = 16.0;

/// Grow `interval` by the backoff factor, capped at `max_interval`. A factor
/// that does not yield a representable duration saturates at the cap.
fn next_interval(interval: Duration, budget: PollBudget) -> Duration {
    Duration::try_from_secs_f64(interval.as_secs_f64() * budget.backoff)
        .map_or(budget.max_interval, |next| next.min(budget.max_interval))
}

impl<'a> ConvergenceWaiter<'a> {
    pub fn new(strategy: WaitStrategy, clock: &'a dyn Clock) -> Self {
        Self { strategy, clock }
    }

    #[must_use]
    pub const fn strategy(&self) -> WaitStrategy {
        self.strategy
    }

    /// Observe a count until it equals `expected`, returning the last
    /// observation.
    ///
    /// Under [`WaitStrategy::Fixed`] the single observation is returned
    /// whatever it is.
    ///
    /// # Errors
    ///
    /// Propagates observation failures, and returns
    /// [`HarnessError::ConvergenceTimeout`] when polling exhausts its budget.
    pub fn await_count<F>(&self, what: &str, expected: usize, mut observe: F) -> Result<usize, HarnessError>
    where
        F: FnMut() -> Result<usize, SutError>,
    {
        let budget = match self.strategy {
            WaitStrategy::Fixed(delay) => {
                self.clock.sleep(delay);
                return Ok(observe()?);
            }
            WaitStrategy::Poll(budget) => budget,
        };

        let start = self.clock.now();
        let mut interval = budget.interval;
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            let observed = observe()?;
            if observed == expected {
                trace!(what, expected, attempts, "converged");
                return Ok(observed);
            }

            let waited = self.clock.now().saturating_sub(start);
            if attempts >= budget.max_attempts || waited >= budget.timeout {
                warn!(what, expected, observed, attempts, ?waited, "convergence budget exhausted");
                return Err(HarnessError::ConvergenceTimeout {
                    what: what.to_string(),
                    expected,
                    observed,
                    attempts,
                    waited,
                });
            }

            trace!(what, expected, observed, attempts, ?interval, "not converged yet");
            self.clock.sleep(interval.min(budget.timeout - waited));
            interval = next_interval(interval, budget);
        }
    }

    /// Wait until the rendered list shows `expected` entries accepted by
    /// `filter`.
    ///
    /// # Errors
    ///
    /// See [`ConvergenceWaiter::await_count`].
    pub fn await_stable_count<P: Page + ?Sized>(
        &self,
        page: &mut P,
        filter: &ScopeFilter,
        expected: usize,
    ) -> Result<usize, HarnessError> {
        self.await_count(&filter.describe(), expected, || {
            Ok(page
                .item_texts()?
                .iter()
                .filter(|text| filter.matches(text))
                .count())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Clock whose sleeps only advance a counter.
    #[derive(Default)]
    struct StepClock {
        now: Mutex<Duration>,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl Clock for StepClock {
        fn now(&self) -> Duration {
            *self.now.lock().expect("lock")
        }

        fn sleep(&self, duration: Duration) {
            *self.now.lock().expect("lock") += duration;
            self.sleeps.lock().expect("lock").push(duration);
        }
    }

    fn budget() -> PollBudget {
        PollBudget {
            interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(40),
            backoff: 2.0,
            timeout: Duration::from_millis(200),
            max_attempts: 100,
        }
    }

    #[test]
    fn poll_returns_once_expected_value_appears() {
        let clock = StepClock::default();
        let waiter = ConvergenceWaiter::new(WaitStrategy::Poll(budget()), &clock);
        let mut reads = [0, 0, 1].into_iter();

        let observed = waiter
            .await_count("items", 1, || Ok(reads.next().unwrap_or(1)))
            .expect("converges");

        assert_eq!(observed, 1);
        assert_eq!(
            *clock.sleeps.lock().expect("lock"),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[test]
    fn poll_interval_backs_off_up_to_cap() {
        let clock = StepClock::default();
        let waiter = ConvergenceWaiter::new(WaitStrategy::Poll(budget()), &clock);
        let mut calls = 0;
        let _ = waiter.await_count("items", 1, || {
            calls += 1;
            Ok(if calls > 5 { 1 } else { 0 })
        });

        let sleeps = clock.sleeps.lock().expect("lock").clone();
        assert_eq!(
            sleeps,
            [10, 20, 40, 40, 40].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn poll_timeout_is_an_explicit_error() {
        let clock = StepClock::default();
        let waiter = ConvergenceWaiter::new(WaitStrategy::Poll(budget()), &clock);

        let err = waiter
            .await_count("items", 2, || Ok(1))
            .expect_err("never converges");

        match err {
            HarnessError::ConvergenceTimeout {
                expected,
                observed,
                waited,
                ..
            } => {
                assert_eq!(expected, 2);
                assert_eq!(observed, 1);
                assert!(waited >= Duration::from_millis(200));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(clock.now() <= Duration::from_millis(200));
    }

    #[test]
    fn attempt_budget_bounds_a_frozen_clock() {
        struct Frozen;
        impl Clock for Frozen {
            fn now(&self) -> Duration {
                Duration::ZERO
            }
            fn sleep(&self, _: Duration) {}
        }

        let waiter = ConvergenceWaiter::new(
            WaitStrategy::Poll(PollBudget {
                max_attempts: 3,
                ..budget()
            }),
            &Frozen,
        );
        let mut calls = 0;
        let err = waiter
            .await_count("items", 1, || {
                calls += 1;
                Ok(0)
            })
            .expect_err("budget");
        assert!(err.is_timeout());
        assert_eq!(calls, 3);
    }

    #[test]
    fn unbounded_backoff_saturates_at_max_interval() {
        for backoff in [f64::INFINITY, f64::NAN, 1e300] {
            let clock = StepClock::default();
            let waiter = ConvergenceWaiter::new(
                WaitStrategy::Poll(PollBudget { backoff, ..budget() }),
                &clock,
            );

            let err = waiter.await_count("items", 1, || Ok(0)).expect_err("never converges");

            assert!(err.is_timeout(), "backoff {backoff}");
            let sleeps = clock.sleeps.lock().expect("lock").clone();
            assert_eq!(sleeps[0], Duration::from_millis(10));
            assert!(sleeps[1..].iter().all(|sleep| *sleep <= Duration::from_millis(40)));
        }
    }

    #[test]
    fn fixed_delay_observes_once_and_reports_whatever_it_saw() {
        let clock = StepClock::default();
        let waiter = ConvergenceWaiter::new(WaitStrategy::Fixed(Duration::from_millis(500)), &clock);
        let mut calls = 0;

        let observed = waiter
            .await_count("items", 3, || {
                calls += 1;
                Ok(1)
            })
            .expect("fixed never times out");

        assert_eq!(observed, 1);
        assert_eq!(calls, 1);
        assert_eq!(clock.now(), Duration::from_millis(500));
    }

    #[test]
    fn observation_failure_propagates() {
        let clock = StepClock::default();
        let waiter = ConvergenceWaiter::new(WaitStrategy::Poll(budget()), &clock);
        let err = waiter
            .await_count("items", 1, || Err(SutError::Driver("page closed".into())))
            .expect_err("propagates");
        assert!(matches!(err, HarnessError::Sut(SutError::Driver(_))));
    }
}
