//! Deterministic interleaving of worker threads on virtual time.
//!
//! Every worker runs on its own OS thread, but only the worker holding the
//! turn may act. A worker gives up the turn only by sleeping; the next turn
//! goes to the sleeper with the earliest wake time, ties broken by the
//! seeded RNG, and the shared [`VirtualClock`] jumps to that wake time.
//! The interleaving therefore depends on the seed alone.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use todo_e2e_core::Clock;
use tracing::trace;

use crate::clock::VirtualClock;
use crate::rng::DeterministicRng;

#[derive(Debug)]
struct State {
    running: Option<usize>,
    /// Participants waiting for a turn, with their wake time.
    ready: BTreeMap<usize, Duration>,
    rng: DeterministicRng,
}

impl State {
    fn pick_next(&mut self, clock: &VirtualClock) {
        self.running = None;
        let Some(earliest) = self.ready.values().min().copied() else {
            return;
        };
        let candidates: Vec<usize> = self
            .ready
            .iter()
            .filter(|&(_, wake)| *wake == earliest)
            .map(|(&participant, _)| participant)
            .collect();
        let slot = usize::try_from(self.rng.next_bounded(candidates.len() as u64)).unwrap_or(0);
        if let Some(&chosen) = candidates.get(slot) {
            self.ready.remove(&chosen);
            clock.advance_to(earliest);
            self.running = Some(chosen);
            trace!(participant = chosen, at = ?earliest, "turn");
        }
    }
}

/// Hands out turns to a fixed set of participants.
#[derive(Debug)]
pub struct Scheduler {
    clock: VirtualClock,
    state: Mutex<State>,
    turn: Condvar,
}

impl Scheduler {
    /// All `participants` start ready at the current time.
    #[must_use]
    pub fn new(participants: usize, clock: VirtualClock, seed: u64) -> Self {
        let now = clock.now();
        let mut state = State {
            running: None,
            ready: (0..participants).map(|participant| (participant, now)).collect(),
            rng: DeterministicRng::new(seed),
        };
        state.pick_next(&clock);
        Self {
            clock,
            state: Mutex::new(state),
            turn: Condvar::new(),
        }
    }

    #[must_use]
    pub const fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_for_turn<'g>(&self, guard: MutexGuard<'g, State>, participant: usize) -> MutexGuard<'g, State> {
        self.turn
            .wait_while(guard, |state| state.running != Some(participant))
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `participant` holds the turn.
    ///
    /// The returned [`Turn`] is the participant's clock. Dropping it, also
    /// during a panic, hands the turn on for good.
    pub fn enter(&self, participant: usize) -> Turn<'_> {
        let guard = self.lock();
        drop(self.wait_for_turn(guard, participant));
        Turn {
            scheduler: self,
            participant,
        }
    }

    fn yield_for(&self, participant: usize, duration: Duration) {
        let mut guard = self.lock();
        let wake = self.clock.now().saturating_add(duration);
        guard.ready.insert(participant, wake);
        guard.pick_next(&self.clock);
        self.turn.notify_all();
        drop(self.wait_for_turn(guard, participant));
    }

    fn leave(&self, participant: usize) {
        let mut guard = self.lock();
        guard.ready.remove(&participant);
        if guard.running == Some(participant) {
            guard.pick_next(&self.clock);
        }
        self.turn.notify_all();
    }
}

/// A participant's view of time while it holds the turn.
#[derive(Debug)]
pub struct Turn<'s> {
    scheduler: &'s Scheduler,
    participant: usize,
}

impl Clock for Turn<'_> {
    fn now(&self) -> Duration {
        self.scheduler.clock.now()
    }

    fn sleep(&self, duration: Duration) {
        self.scheduler.yield_for(self.participant, duration);
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.scheduler.leave(self.participant);
    }
}
