use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use todo_e2e_core::{Clock, SutError, TodoApi, TodoId, TodoItem};
use tracing::{debug, trace};

use crate::clock::VirtualClock;
use crate::rng::DeterministicRng;

const TODOS: &str = "/api/todos";

/// Fault injection configuration for the simulated backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Upper bound on the time between a write and its visibility.
    pub max_visibility_lag_ms: u32,
    /// Percentage of reads returned in reverse order.
    pub reorder_rate_percent: u8,
    /// Percentage of deletes rejected with a server error.
    pub delete_failure_percent: u8,
    /// Percentage of reads and creates refused as unavailable.
    pub unavailable_rate_percent: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_visibility_lag_ms: 250,
            reorder_rate_percent: 10,
            delete_failure_percent: 0,
            unavailable_rate_percent: 0,
        }
    }
}

/// One accepted delete, attributed to the worker that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteRecord {
    pub at_ms: u64,
    pub actor: String,
    pub id: TodoId,
    pub text: String,
    /// Test the actor was running when it issued the delete.
    pub actor_test: String,
    /// Worker that created the item.
    pub creator: String,
    /// Test that created the item.
    pub creator_test: String,
}

/// An item together with the worker that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedItem {
    pub id: TodoId,
    pub text: String,
    pub creator: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum WriteKind {
    Create,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingWrite {
    visible_at: Duration,
    kind: WriteKind,
    id: u64,
}

#[derive(Debug, Clone)]
struct Record {
    text: String,
    creator: String,
    creator_test: String,
    visible_at: Duration,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    visible: Vec<u64>,
    pending: Vec<PendingWrite>,
    records: BTreeMap<u64, Record>,
    gone: BTreeSet<u64>,
    deletes: Vec<DeleteRecord>,
    reads: u64,
    delete_attempts: BTreeMap<u64, u64>,
}

impl State {
    fn apply_due(&mut self, now: Duration) {
        let (mut due, rest): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|write| write.visible_at <= now);
        self.pending = rest;
        due.sort_by_key(|write| (write.visible_at, write.id, write.kind));
        for write in due {
            match write.kind {
                WriteKind::Create => {
                    if !self.gone.contains(&write.id) {
                        self.visible.push(write.id);
                    }
                }
                WriteKind::Delete => {
                    self.visible.retain(|&id| id != write.id);
                    self.gone.insert(write.id);
                }
            }
        }
    }

    fn item(&self, id: u64) -> Option<TodoItem> {
        self.records.get(&id).map(|record| TodoItem {
            id: TodoId::from(id),
            text: record.text.clone(),
        })
    }
}

// Independent RNG streams per kind of draw, so draws made by concurrent
// delete threads never shift the randomness seen by anyone else.
const STREAM_CREATE: u64 = 1;
const STREAM_DELETE: u64 = 2;
const STREAM_READ: u64 = 3;

/// In-process stand-in for the shared TODO service.
///
/// Writes are acknowledged at once but become visible to reads only after
/// a seeded random lag. A delete never becomes visible before the create
/// of the same item. Deleting an unknown or already deleted id succeeds.
#[derive(Debug)]
pub struct SimulatedBackend {
    seed: u64,
    fault: FaultConfig,
    clock: VirtualClock,
    title: String,
    state: Mutex<State>,
}

impl SimulatedBackend {
    #[must_use]
    pub fn new(seed: u64, fault: FaultConfig, clock: VirtualClock) -> Self {
        Self {
            seed,
            fault,
            clock,
            title: "TODO 📃".to_string(),
            state: Mutex::new(State::default()),
        }
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// A client of this backend acting as `actor`. Clones of the handle
    /// share its current test.
    #[must_use]
    pub fn handle(self: &Arc<Self>, actor: impl Into<String>) -> BackendHandle {
        BackendHandle {
            backend: Arc::clone(self),
            actor: actor.into(),
            test: Arc::new(Mutex::new(String::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn draw(&self, stream: u64, key: u64) -> DeterministicRng {
        DeterministicRng::fork(self.seed, stream.wrapping_shl(56) ^ key)
    }

    fn lag(&self, rng: &mut DeterministicRng) -> Duration {
        let bound = u64::from(self.fault.max_visibility_lag_ms).saturating_add(1);
        Duration::from_millis(rng.next_bounded(bound))
    }

    /// Apply every pending write regardless of its visibility time.
    pub fn quiesce(&self) {
        let mut state = self.lock();
        let last = state
            .pending
            .iter()
            .map(|write| write.visible_at)
            .max()
            .unwrap_or_default();
        self.clock.advance_to(last);
        state.apply_due(last.max(self.clock.now()));
    }

    /// Number of writes not yet visible.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Items currently visible to reads, with their creators.
    #[must_use]
    pub fn visible_items(&self) -> Vec<OwnedItem> {
        let mut state = self.lock();
        state.apply_due(self.clock.now());
        state
            .visible
            .iter()
            .filter_map(|&id| {
                state.records.get(&id).map(|record| OwnedItem {
                    id: TodoId::from(id),
                    text: record.text.clone(),
                    creator: record.creator.clone(),
                })
            })
            .collect()
    }

    /// Accepted deletes, in time order.
    #[must_use]
    pub fn delete_log(&self) -> Vec<DeleteRecord> {
        let mut log = self.lock().deletes.clone();
        log.sort_by(|a, b| (a.at_ms, &a.actor, &a.id).cmp(&(b.at_ms, &b.actor, &b.id)));
        log
    }

    fn list(&self) -> Result<Vec<TodoItem>, SutError> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.apply_due(now);
        state.reads += 1;
        let mut rng = self.draw(STREAM_READ, state.reads);
        if rng.hit_rate_percent(self.fault.unavailable_rate_percent) {
            return Err(unavailable(format!("GET {TODOS}")));
        }
        let mut items: Vec<TodoItem> = state.visible.iter().filter_map(|&id| state.item(id)).collect();
        if items.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent) {
            items.reverse();
        }
        trace!(count = items.len(), "simulated list");
        Ok(items)
    }

    fn create(&self, actor: &str, test: String, text: &str) -> Result<(), SutError> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.apply_due(now);
        state.next_id += 1;
        let id = state.next_id;
        let mut rng = self.draw(STREAM_CREATE, id);
        if rng.hit_rate_percent(self.fault.unavailable_rate_percent) {
            return Err(unavailable(format!("POST {TODOS}")));
        }
        let visible_at = now + self.lag(&mut rng);
        state.records.insert(
            id,
            Record {
                text: text.to_string(),
                creator: actor.to_string(),
                creator_test: test,
                visible_at,
            },
        );
        state.pending.push(PendingWrite {
            visible_at,
            kind: WriteKind::Create,
            id,
        });
        debug!(actor, id, lag = ?(visible_at - now), "simulated create");
        Ok(())
    }

    fn delete(&self, actor: &str, test: String, id: &TodoId) -> Result<(), SutError> {
        let Ok(id) = id.as_str().parse::<u64>() else {
            return Ok(());
        };
        let now = self.clock.now();
        let mut state = self.lock();
        state.apply_due(now);
        let Some(record) = state.records.get(&id).cloned() else {
            return Ok(());
        };
        if state.gone.contains(&id) {
            return Ok(());
        }

        let attempt = {
            let counter = state.delete_attempts.entry(id).or_default();
            *counter += 1;
            *counter
        };
        let mut rng = self.draw(STREAM_DELETE, (id << 16) ^ attempt);
        if rng.hit_rate_percent(self.fault.delete_failure_percent) {
            return Err(SutError::Status {
                operation: format!("DELETE {TODOS}?id={id}"),
                status: 500,
            });
        }

        let visible_at = (now + self.lag(&mut rng)).max(record.visible_at);
        state.pending.push(PendingWrite {
            visible_at,
            kind: WriteKind::Delete,
            id,
        });
        state.deletes.push(DeleteRecord {
            at_ms: u64::try_from(now.as_millis()).unwrap_or(u64::MAX),
            actor: actor.to_string(),
            id: TodoId::from(id),
            text: record.text,
            actor_test: test,
            creator: record.creator,
            creator_test: record.creator_test,
        });
        debug!(actor, id, "simulated delete");
        Ok(())
    }
}

fn unavailable(operation: String) -> SutError {
    SutError::Transport {
        operation,
        message: "simulated service unavailable".to_string(),
    }
}

/// [`TodoApi`] onto a [`SimulatedBackend`], attributed to one worker and
/// the test it is currently running.
#[derive(Debug, Clone)]
pub struct BackendHandle {
    backend: Arc<SimulatedBackend>,
    actor: String,
    test: Arc<Mutex<String>>,
}

impl BackendHandle {
    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Attribute later writes through this handle and its clones to `test`.
    pub fn set_test(&self, test: &str) {
        let mut current = self.test.lock().unwrap_or_else(PoisonError::into_inner);
        current.clear();
        current.push_str(test);
    }

    fn current_test(&self) -> String {
        self.test.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn backend(&self) -> &SimulatedBackend {
        &self.backend
    }
}

impl TodoApi for BackendHandle {
    fn list(&self) -> Result<Vec<TodoItem>, SutError> {
        self.backend.list()
    }

    fn create(&self, text: &str) -> Result<(), SutError> {
        self.backend.create(&self.actor, self.current_test(), text)
    }

    fn delete(&self, id: &TodoId) -> Result<(), SutError> {
        self.backend.delete(&self.actor, self.current_test(), id)
    }
}
