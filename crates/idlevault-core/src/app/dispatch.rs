use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use tracing::{debug, error, info, info_span};

use crate::error::Result;
use crate::monitor::{Trigger, TriggerReason};
use crate::pipeline::RunReport;

/// One backup run. Receives the reason and a flag that is raised when the
/// service is shutting down.
pub type RunFn = Box<dyn FnMut(TriggerReason, &AtomicBool) -> Result<RunReport> + Send>;

struct Shared {
    /// Set from the moment a trigger is accepted until its run returns.
    busy: AtomicBool,
    cancel: AtomicBool,
    completed: AtomicU64,
    queue: Sender<TriggerReason>,
}

/// Runs backups on a dedicated thread, at most one at a time.
///
/// Triggers that arrive while a run is queued or in progress are dropped.
pub struct RunDispatcher {
    shared: Arc<Shared>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RunDispatcher {
    pub fn start(run: RunFn, span: tracing::Span) -> Result<Self> {
        let (queue_tx, queue_rx) = bounded::<TriggerReason>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::new(Shared {
            busy: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            queue: queue_tx,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("idlevault-runner".into())
            .spawn(move || {
                let _enter = span.enter();
                worker_loop(run, &worker_shared, &queue_rx, &stop_rx);
            })?;

        Ok(Self {
            shared,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        })
    }

    /// Request a run. Returns `false` if the request was coalesced into a
    /// run that is already queued or in progress, or the dispatcher is
    /// shutting down. Never blocks.
    pub fn trigger(&self, reason: TriggerReason) -> bool {
        request(&self.shared, reason)
    }

    /// A [`Trigger`] for the monitors that feeds this dispatcher.
    pub fn trigger_fn(&self) -> Trigger {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |reason| {
            request(&shared, reason);
        })
    }

    pub fn is_running(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst)
    }

    pub fn completed_runs(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Ask the current run to stop at the next dataset boundary and wait for
    /// the thread to exit. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.stop_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("backup runner thread panicked");
            }
        }
    }
}

impl Drop for RunDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn request(shared: &Shared, reason: TriggerReason) -> bool {
    if shared.cancel.load(Ordering::SeqCst) {
        debug!(reason = %reason, "ignoring trigger during shutdown");
        return false;
    }
    if shared
        .busy
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        info!(reason = %reason, "backup already in progress, trigger coalesced");
        return false;
    }
    match shared.queue.try_send(reason) {
        Ok(()) => {
            debug!(reason = %reason, "backup queued");
            true
        }
        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
            shared.busy.store(false, Ordering::SeqCst);
            false
        }
    }
}

fn worker_loop(
    mut run: RunFn,
    shared: &Shared,
    queue: &Receiver<TriggerReason>,
    stop: &Receiver<()>,
) {
    loop {
        let reason = select! {
            recv(stop) -> _ => break,
            recv(queue) -> msg => match msg {
                Ok(reason) => reason,
                Err(_) => break,
            },
        };
        if shared.cancel.load(Ordering::SeqCst) {
            shared.busy.store(false, Ordering::SeqCst);
            break;
        }

        let _busy = BusyGuard(&shared.busy);
        let span = info_span!("run", reason = %reason);
        let _enter = span.enter();
        info!("backup run starting");

        match panic::catch_unwind(AssertUnwindSafe(|| run(reason, &shared.cancel))) {
            Ok(Ok(report)) => {
                debug!(succeeded = report.succeeded(), failed = report.failed(), "run returned");
            }
            Ok(Err(e)) => error!(error = %e, "backup run failed"),
            Err(_) => error!("backup run panicked"),
        }
        shared.completed.fetch_add(1, Ordering::SeqCst);
    }
    debug!("backup runner stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::error::IdlevaultError;

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn trigger_during_run_is_coalesced() {
        let (release_tx, release_rx) = bounded::<()>(0);
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&reasons);
        let mut dispatcher = RunDispatcher::start(
            Box::new(move |reason, _| {
                seen.lock().unwrap().push(reason);
                let _ = release_rx.recv();
                Ok(RunReport::default())
            }),
            tracing::Span::none(),
        )
        .unwrap();

        assert!(dispatcher.trigger(TriggerReason::Change));
        assert!(wait_for(|| reasons.lock().unwrap().len() == 1));
        assert!(dispatcher.is_running());
        assert!(!dispatcher.trigger(TriggerReason::HostExited));
        assert!(!dispatcher.trigger(TriggerReason::Change));

        release_tx.send(()).unwrap();
        assert!(wait_for(|| dispatcher.completed_runs() == 1));
        assert!(wait_for(|| !dispatcher.is_running()));

        assert!(dispatcher.trigger(TriggerReason::HostExited));
        release_tx.send(()).unwrap();
        assert!(wait_for(|| dispatcher.completed_runs() == 2));

        dispatcher.shutdown();
        assert_eq!(
            *reasons.lock().unwrap(),
            [TriggerReason::Change, TriggerReason::HostExited]
        );
    }

    #[test]
    fn errors_and_panics_do_not_kill_the_runner() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let dispatcher = RunDispatcher::start(
            Box::new(move |_, _| match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(IdlevaultError::DataRootNotFound("/gone".into())),
                1 => panic!("boom"),
                _ => Ok(RunReport::default()),
            }),
            tracing::Span::none(),
        )
        .unwrap();

        for expected in 1..=3 {
            assert!(wait_for(|| dispatcher.trigger(TriggerReason::Manual)));
            assert!(wait_for(|| dispatcher.completed_runs() == expected));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn shutdown_raises_cancel_and_rejects_triggers() {
        let (started_tx, started_rx) = bounded::<()>(1);
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&saw_cancel);
        let mut dispatcher = RunDispatcher::start(
            Box::new(move |_, cancel| {
                let _ = started_tx.send(());
                while !cancel.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
                flag.store(true, Ordering::SeqCst);
                Ok(RunReport::default())
            }),
            tracing::Span::none(),
        )
        .unwrap();

        let trigger = dispatcher.trigger_fn();
        trigger(TriggerReason::Change);
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        dispatcher.shutdown();
        assert!(saw_cancel.load(Ordering::SeqCst));
        assert!(!dispatcher.trigger(TriggerReason::Manual));
    }
}
