use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, info, trace};

use super::{Trigger, TriggerReason};
use crate::error::Result;

/// One process-table entry that could not be read.
#[derive(Debug, Error)]
#[error("cannot read process entry: {0}")]
pub struct ProcessLookupError(pub String);

/// Source of running process names.
pub trait ProcessTable: Send {
    /// Names of all running processes. Entries that cannot be read are
    /// reported individually so the caller can skip them.
    fn entries(&mut self) -> Vec<std::result::Result<String, ProcessLookupError>>;
}

/// [`ProcessTable`] backed by the operating system.
pub struct SystemProcessTable {
    system: sysinfo::System,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: sysinfo::System::new(),
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn entries(&mut self) -> Vec<std::result::Result<String, ProcessLookupError>> {
        self.system.refresh_processes();
        self.system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let name = process.name();
                if name.is_empty() {
                    Err(ProcessLookupError(format!("pid {pid} has no name")))
                } else {
                    Ok(name.to_string())
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPresence {
    Running,
    Absent,
}

/// Single-scan liveness check against a process-name prefix.
pub struct LivenessProbe<T> {
    table: T,
    prefix: String,
}

impl<T: ProcessTable> LivenessProbe<T> {
    pub fn new(table: T, process_prefix: &str) -> Self {
        Self {
            table,
            prefix: process_prefix.to_lowercase(),
        }
    }

    /// Scan the process table once. Unreadable entries are skipped.
    pub fn poll_once(&mut self) -> HostPresence {
        let mut skipped = 0usize;
        for entry in self.table.entries() {
            match entry {
                Ok(name) if name.to_lowercase().starts_with(&self.prefix) => {
                    return HostPresence::Running;
                }
                Ok(_) => {}
                Err(e) => {
                    skipped += 1;
                    trace!(error = %e, "skipping process entry");
                }
            }
        }
        if skipped > 0 {
            debug!(skipped, "some process entries could not be read");
        }
        HostPresence::Absent
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LivenessSettings {
    pub poll_interval: Duration,
    /// Extra pause after a host-exit trigger.
    pub cooldown: Duration,
}

/// Polls for the host application on its own thread and fires
/// [`TriggerReason::HostExited`] whenever it is not running.
pub struct LivenessMonitor {
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    pub fn start<T: ProcessTable + 'static>(
        probe: LivenessProbe<T>,
        settings: LivenessSettings,
        trigger: Trigger,
        span: tracing::Span,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker = thread::Builder::new()
            .name("idlevault-liveness".into())
            .spawn(move || {
                let _enter = span.enter();
                poll_loop(probe, settings, &trigger, &stop_rx);
            })?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        })
    }

    /// Interrupt any sleep and wait for the poll thread to exit. Idempotent.
    pub fn stop(&mut self) {
        // Dropping the sender wakes the loop with `Disconnected`.
        self.stop_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop<T: ProcessTable>(
    mut probe: LivenessProbe<T>,
    settings: LivenessSettings,
    trigger: &Trigger,
    stop: &Receiver<()>,
) {
    info!(
        prefix = %probe.prefix,
        poll_secs = settings.poll_interval.as_secs_f64(),
        "watching host process"
    );
    loop {
        if probe.poll_once() == HostPresence::Absent {
            info!("host application not running, requesting backup");
            trigger(TriggerReason::HostExited);
            if stopped_during(stop, settings.cooldown) {
                break;
            }
        }
        if stopped_during(stop, settings.poll_interval) {
            break;
        }
    }
    debug!("liveness monitor stopped");
}

/// Sleep for `d`, returning `true` early if stop was requested.
fn stopped_during(stop: &Receiver<()>, d: Duration) -> bool {
    match stop.recv_timeout(d) {
        Err(RecvTimeoutError::Timeout) => false,
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
    }
}
