use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::debug;

use super::timer::{TaskHandle, TimerQueue};
use crate::error::Result;

#[derive(Default)]
struct State {
    pending: Option<TaskHandle>,
    /// Bumped on every touch; a timer only fires if it is still current.
    generation: u64,
    closed: bool,
}

struct Inner {
    timers: TimerQueue,
    quiet: Duration,
    on_quiet: Box<dyn Fn() + Send + Sync>,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, generation: u64) {
        {
            let mut state = self.lock();
            if state.closed || state.generation != generation {
                return;
            }
            state.pending = None;
        }
        debug!("quiet window elapsed");
        (self.on_quiet)();
    }
}

/// Collapses a burst of [`touch`](Debouncer::touch) calls into one callback,
/// fired once `quiet` has passed without another touch.
///
/// At most one timer is outstanding: each touch cancels and replaces it.
/// After firing the debouncer is ready for the next burst.
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<Inner>,
}

impl Debouncer {
    pub fn new(
        quiet: Duration,
        on_quiet: impl Fn() + Send + Sync + 'static,
        span: tracing::Span,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                timers: TimerQueue::new("idlevault-debounce", span)?,
                quiet,
                on_quiet: Box::new(on_quiet),
                state: Mutex::new(State::default()),
            }),
        })
    }

    /// Restart the quiet window.
    pub fn touch(&self) {
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }
        if let Some(previous) = state.pending.take() {
            self.inner.timers.cancel(&previous);
        }
        state.generation += 1;
        let generation = state.generation;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = self.inner.timers.schedule(self.inner.quiet, move || {
            if let Some(inner) = weak.upgrade() {
                inner.fire(generation);
            }
        });
        state.pending = Some(handle);
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().pending.is_some()
    }

    /// Cancel the pending timer and ignore all future touches.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        state.closed = true;
        if let Some(pending) = state.pending.take() {
            self.inner.timers.cancel(&pending);
        }
    }
}
