//! Cooperative timer queue on a virtual clock.
//!
//! Nothing here sleeps. The page advances the clock and runs whatever came
//! due, which keeps timeouts, debounces and polls deterministic in tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Shared flag that stops a scheduled task from running.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Rc<Cell<bool>>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

/// Handle to a scheduled task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    token: CancellationToken,
    started: Rc<Cell<bool>>,
}

impl TaskHandle {
    /// Prevent the task from running; no effect once it has started
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Still waiting to run
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.token.is_cancelled() && !self.started.get()
    }
}

struct Entry {
    token: CancellationToken,
    started: Rc<Cell<bool>>,
    task: Box<dyn FnOnce()>,
}

/// Timer queue ordered by due time, then by scheduling order.
#[derive(Default)]
pub struct Scheduler {
    now: Cell<Duration>,
    next_sequence: Cell<u64>,
    queue: RefCell<BTreeMap<(Duration, u64), Entry>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Scheduler")
            .field("now", &self.now.get())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time since the page started
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    /// Run `task` once `delay` has elapsed
    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + 'static) -> TaskHandle {
        let due = self.now.get() + delay;
        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence + 1);

        let token = CancellationToken::new();
        let started = Rc::new(Cell::new(false));
        self.queue.borrow_mut().insert(
            (due, sequence),
            Entry {
                token: token.clone(),
                started: started.clone(),
                task: Box::new(task),
            },
        );
        TaskHandle { token, started }
    }

    /// Number of tasks that are neither cancelled nor started
    pub fn pending(&self) -> usize {
        self.queue
            .borrow()
            .values()
            .filter(|entry| !entry.token.is_cancelled())
            .count()
    }

    /// Due time of the earliest live task
    pub fn next_due(&self) -> Option<Duration> {
        self.queue
            .borrow()
            .iter()
            .find(|(_, entry)| !entry.token.is_cancelled())
            .map(|((due, _), _)| *due)
    }

    /// Remove the earliest live task due at or before `until`, moving the
    /// clock to its due time. The caller runs the returned task with no
    /// borrow held, so tasks may schedule further tasks.
    pub fn pop_due(&self, until: Duration) -> Option<Box<dyn FnOnce()>> {
        loop {
            let mut queue = self.queue.borrow_mut();
            let key = *queue.keys().next()?;
            if key.0 > until {
                return None;
            }
            let entry = queue.remove(&key)?;
            drop(queue);

            if entry.token.is_cancelled() {
                continue;
            }
            if key.0 > self.now.get() {
                self.now.set(key.0);
            }
            entry.started.set(true);
            return Some(entry.task);
        }
    }

    /// Move the clock forward without running anything
    pub fn advance_clock_to(&self, instant: Duration) {
        if instant > self.now.get() {
            self.now.set(instant);
        }
    }
}
