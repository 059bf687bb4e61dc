//! Scoped cleanup of the shared collection at test boundaries.
//!
//! One pass reads the whole collection, keeps the items a [`ScopeFilter`]
//! accepts, deletes them concurrently in batches of at most
//! `max_concurrency` requests, then lets the settle delay elapse so the
//! service's read path can catch up. Failed deletes are reported, never
//! retried.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::TodoApi;
use crate::clock::Clock;
use crate::error::SutError;
use crate::model::{TodoId, TodoItem};
use crate::tag::{MatchMode, ScopeFilter, ScopeTag};

/// Which items a cleanup pass may remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupPolicy {
    /// Only items tagged for the current scope. Required with parallel workers.
    #[default]
    Scoped,
    /// Every item in the collection. Single-worker runs only: it deletes
    /// the items of concurrently running tests.
    DeleteAll,
}

impl CleanupPolicy {
    #[must_use]
    pub fn filter_for(self, scope: &ScopeTag, mode: MatchMode) -> ScopeFilter {
        match self {
            Self::Scoped => ScopeFilter::scoped(scope.clone(), mode),
            Self::DeleteAll => ScopeFilter::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDelete {
    pub id: TodoId,
    pub reason: String,
}

/// What one cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Items in the collection when it was read.
    pub listed: usize,
    /// Items the filter accepted.
    pub matched: usize,
    /// Deletes the service acknowledged.
    pub deleted: usize,
    /// Deletes that failed and may leave residue behind.
    pub failed: Vec<FailedDelete>,
}

impl CleanupReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Default upper bound on deletes in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Removes the items a filter selects from the shared collection.
pub struct ScopedCleanup<'a, A: TodoApi + ?Sized> {
    api: &'a A,
    clock: &'a dyn Clock,
    max_concurrency: usize,
}

impl<'a, A: TodoApi + ?Sized> ScopedCleanup<'a, A> {
    pub fn new(api: &'a A, clock: &'a dyn Clock) -> Self {
        Self {
            api,
            clock,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Cap the deletes in flight at once. Zero is treated as one.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Run one cleanup pass and wait `settle` afterwards.
    ///
    /// # Errors
    ///
    /// Returns the [`SutError`] of the initial list call. Individual delete
    /// failures do not fail the pass; they are listed in the report.
    pub fn cleanup(&self, filter: &ScopeFilter, settle: Duration) -> Result<CleanupReport, SutError> {
        let items = self.api.list()?;
        let listed = items.len();
        let matched: Vec<TodoItem> = items
            .into_iter()
            .filter(|item| filter.matches(&item.text))
            .collect();

        debug!(
            filter = %filter.describe(),
            listed,
            matched = matched.len(),
            "cleanup batch"
        );

        let results = self.delete_batch(&matched);

        let mut report = CleanupReport {
            listed,
            matched: matched.len(),
            ..CleanupReport::default()
        };
        for (id, result) in results {
            match result {
                Ok(()) => report.deleted += 1,
                Err(err) => {
                    warn!(%id, error = %err, "cleanup delete failed; item may leak into later tests");
                    report.failed.push(FailedDelete {
                        id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.clock.sleep(settle);
        Ok(report)
    }

    fn delete_batch(&self, items: &[TodoItem]) -> Vec<(TodoId, Result<(), SutError>)> {
        let api = self.api;
        let mut results = Vec::with_capacity(items.len());
        for chunk in items.chunks(self.max_concurrency) {
            std::thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|item| (item.id.clone(), scope.spawn(move || api.delete(&item.id))))
                    .collect();

                results.extend(handles.into_iter().map(|(id, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(SutError::Driver("delete thread panicked".into())));
                    (id, result)
                }));
            });
        }
        results
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Immediately consistent in-memory service for unit tests.
    #[derive(Default)]
    pub struct MemoryApi {
        pub items: Mutex<Vec<TodoItem>>,
        pub next_id: Mutex<u64>,
        pub failing_ids: BTreeSet<String>,
    }

    impl MemoryApi {
        pub fn with_texts(texts: &[&str]) -> Self {
            let api = Self::default();
            for text in texts {
                api.create(text).expect("seed");
            }
            api
        }

        pub fn texts(&self) -> Vec<String> {
            self.items
                .lock()
                .expect("lock")
                .iter()
                .map(|item| item.text.clone())
                .collect()
        }
    }

    impl TodoApi for MemoryApi {
        fn list(&self) -> Result<Vec<TodoItem>, SutError> {
            Ok(self.items.lock().expect("lock").clone())
        }

        fn create(&self, text: &str) -> Result<(), SutError> {
            let mut next = self.next_id.lock().expect("lock");
            *next += 1;
            self.items.lock().expect("lock").push(TodoItem {
                id: TodoId::from(*next),
                text: text.to_string(),
            });
            Ok(())
        }

        fn delete(&self, id: &TodoId) -> Result<(), SutError> {
            if self.failing_ids.contains(id.as_str()) {
                return Err(SutError::Status {
                    operation: "DELETE /api/todos".into(),
                    status: 500,
                });
            }
            self.items.lock().expect("lock").retain(|item| &item.id != id);
            Ok(())
        }
    }

    fn scoped(worker: &str, test: &str) -> ScopeFilter {
        ScopeFilter::scoped(ScopeTag::new(worker, test), MatchMode::Contains)
    }

    #[test]
    fn scoped_cleanup_leaves_other_scopes_alone() {
        let api = MemoryApi::with_texts(&[
            "TODO for chromium test1 aaaa0000",
            "TODO for chromium test1 bbbb1111",
            "TODO for firefox test1 cccc2222",
            "TODO for chromium test2 dddd3333",
        ]);
        let clock = SystemClock::new();
        let report = ScopedCleanup::new(&api, &clock)
            .cleanup(&scoped("chromium", "test1"), Duration::ZERO)
            .expect("cleanup");

        assert_eq!(report.listed, 4);
        assert_eq!(report.matched, 2);
        assert_eq!(report.deleted, 2);
        assert!(report.is_complete());
        assert_eq!(
            api.texts(),
            vec![
                "TODO for firefox test1 cccc2222".to_string(),
                "TODO for chromium test2 dddd3333".to_string(),
            ]
        );
    }

    #[test]
    fn delete_all_empties_the_collection() {
        let api = MemoryApi::with_texts(&["mine", "yours", "TODO for webkit t x"]);
        let clock = SystemClock::new();
        let report = ScopedCleanup::new(&api, &clock)
            .cleanup(&ScopeFilter::All, Duration::ZERO)
            .expect("cleanup");

        assert_eq!(report.deleted, 3);
        assert!(api.texts().is_empty());
    }

    #[test]
    fn cleanup_twice_is_idempotent() {
        let api = MemoryApi::with_texts(&["TODO for chromium t1 a", "TODO for chromium t1 b"]);
        let clock = SystemClock::new();
        let cleaner = ScopedCleanup::new(&api, &clock);
        let filter = scoped("chromium", "t1");

        let first = cleaner.cleanup(&filter, Duration::ZERO).expect("first");
        let second = cleaner.cleanup(&filter, Duration::ZERO).expect("second");

        assert_eq!(first.deleted, 2);
        assert_eq!(second.matched, 0);
        assert_eq!(second.deleted, 0);
        assert!(api.texts().is_empty());
    }

    #[test]
    fn failed_delete_is_reported_not_retried() {
        let mut api = MemoryApi::with_texts(&["TODO for chromium t1 a", "TODO for chromium t1 b"]);
        api.failing_ids.insert("1".into());
        let clock = SystemClock::new();

        let report = ScopedCleanup::new(&api, &clock)
            .cleanup(&scoped("chromium", "t1"), Duration::ZERO)
            .expect("cleanup");

        assert_eq!(report.deleted, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, TodoId::new("1"));
        assert!(!report.is_complete());
        assert_eq!(api.texts(), vec!["TODO for chromium t1 a".to_string()]);
    }

    /// Counts deletes in flight and remembers the peak.
    #[derive(Default)]
    struct SlowDeletes {
        inner: MemoryApi,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TodoApi for SlowDeletes {
        fn list(&self) -> Result<Vec<TodoItem>, SutError> {
            self.inner.list()
        }

        fn create(&self, text: &str) -> Result<(), SutError> {
            self.inner.create(text)
        }

        fn delete(&self, id: &TodoId) -> Result<(), SutError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            let result = self.inner.delete(id);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[test]
    fn deletes_in_flight_never_exceed_the_limit() {
        let api = SlowDeletes::default();
        for n in 0..25 {
            api.create(&format!("TODO for chromium t1 n{n}")).expect("seed");
        }
        let clock = SystemClock::new();

        let report = ScopedCleanup::new(&api, &clock)
            .with_max_concurrency(4)
            .cleanup(&scoped("chromium", "t1"), Duration::ZERO)
            .expect("cleanup");

        assert_eq!(report.matched, 25);
        assert_eq!(report.deleted, 25);
        assert!(api.inner.texts().is_empty());
        let peak = api.peak.load(Ordering::SeqCst);
        assert!((1..=4).contains(&peak), "peak {peak}");
    }

    #[test]
    fn zero_concurrency_still_deletes() {
        let api = MemoryApi::with_texts(&["TODO for webkit t a", "TODO for webkit t b"]);
        let clock = SystemClock::new();
        let report = ScopedCleanup::new(&api, &clock)
            .with_max_concurrency(0)
            .cleanup(&ScopeFilter::All, Duration::ZERO)
            .expect("cleanup");
        assert_eq!(report.deleted, 2);
    }

    #[test]
    fn policy_maps_to_filter() {
        let scope = ScopeTag::new("chromium", "t1");
        assert_eq!(
            CleanupPolicy::DeleteAll.filter_for(&scope, MatchMode::Exact),
            ScopeFilter::All
        );
        assert_eq!(
            CleanupPolicy::Scoped.filter_for(&scope, MatchMode::Exact),
            ScopeFilter::scoped(scope, MatchMode::Exact)
        );
    }
}
