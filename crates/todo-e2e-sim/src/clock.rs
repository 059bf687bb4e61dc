use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use todo_e2e_core::Clock;

/// Shared virtual time, in microseconds since the start of a run.
///
/// Clones observe the same time. Used directly, [`Clock::sleep`] simply
/// advances the shared time; the [`Scheduler`](crate::sched::Scheduler)
/// uses it as the time base for many workers at once.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    micros: AtomicU64,
    frozen: AtomicBool,
}

fn to_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl VirtualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `duration`, unless frozen.
    pub fn advance(&self, duration: Duration) {
        if self.is_frozen() {
            return;
        }
        self.inner
            .micros
            .fetch_add(to_micros(duration), Ordering::SeqCst);
    }

    /// Move time forward to `at`. Never moves backwards.
    pub fn advance_to(&self, at: Duration) {
        if self.is_frozen() {
            return;
        }
        self.inner.micros.fetch_max(to_micros(at), Ordering::SeqCst);
    }

    /// Stop time. Sleeps return immediately without advancing.
    pub fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::SeqCst);
    }

    pub fn unfreeze(&self) {
        self.inner.frozen.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::SeqCst)
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.inner.micros.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
