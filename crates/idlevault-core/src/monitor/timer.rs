use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, trace};

use crate::error::Result;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Deadlines past the platform's `Instant` range are clamped to this.
const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Identifies one scheduled task for [`TimerQueue::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

#[derive(Default)]
struct State {
    tasks: BTreeMap<(Instant, u64), Task>,
    deadlines: HashMap<u64, Instant>,
    next_id: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Delayed one-shot callbacks, run in deadline order on a single worker
/// thread.
///
/// A cancelled task never runs. A panicking task is logged and the worker
/// carries on. Dropping the queue discards whatever is still pending.
pub struct TimerQueue {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl TimerQueue {
    pub fn new(name: &str, span: tracing::Span) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            wakeup: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _enter = span.enter();
                run_worker(&worker_shared);
            })?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Run `task` once, `delay` from now. Delays longer than a century are
    /// clamped.
    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> TaskHandle {
        let deadline = deadline_after(Instant::now(), delay);
        let mut state = self.shared.lock();
        let id = state.next_id;
        state.next_id += 1;
        if !state.shutdown {
            state.tasks.insert((deadline, id), Box::new(task));
            state.deadlines.insert(id, deadline);
        }
        drop(state);
        self.shared.wakeup.notify_one();
        TaskHandle(id)
    }

    /// Cancel a pending task. Returns `false` if it already ran, is running,
    /// or was cancelled before.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        let mut state = self.shared.lock();
        match state.deadlines.remove(&handle.0) {
            Some(deadline) => {
                state.tasks.remove(&(deadline, handle.0));
                drop(state);
                self.shared.wakeup.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Stop the worker and drop pending tasks. Waits for a running task to
    /// return unless called from that task.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.tasks.clear();
            state.deadlines.clear();
        }
        self.shared.wakeup.notify_all();

        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_DELAY)).unwrap_or(now)
}

fn run_worker(shared: &Shared) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return;
        }
        let now = Instant::now();
        let next = state.tasks.keys().next().copied();
        match next {
            None => {
                state = shared
                    .wakeup
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some((deadline, id)) if deadline <= now => {
                let task = state.tasks.remove(&(deadline, id));
                state.deadlines.remove(&id);
                drop(state);
                if let Some(task) = task {
                    trace!(task = id, "timer fired");
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!(task = id, "scheduled task panicked");
                    }
                }
                state = shared.lock();
            }
            Some((deadline, _)) => {
                state = shared
                    .wakeup
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }
    }
}
