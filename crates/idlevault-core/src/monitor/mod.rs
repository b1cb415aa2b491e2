//! Inactivity detection: a debounced filesystem watcher and a host-process
//! liveness poller, both reporting through a [`Trigger`].

mod change;
mod debounce;
mod liveness;
mod timer;

use std::fmt;
use std::sync::Arc;

pub use self::change::ChangeMonitor;
pub use self::debounce::Debouncer;
pub use self::liveness::{
    HostPresence, LivenessMonitor, LivenessProbe, LivenessSettings, ProcessLookupError,
    ProcessTable, SystemProcessTable,
};
pub use self::timer::{TaskHandle, TimerQueue};

/// Why a backup run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// The watched tree went quiet after changes.
    Change,
    /// The host application is not running.
    HostExited,
    /// Requested by an operator.
    Manual,
}

impl TriggerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerReason::Change => "change",
            TriggerReason::HostExited => "host-exited",
            TriggerReason::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback the monitors use to request a run. Must not block.
pub type Trigger = Arc<dyn Fn(TriggerReason) + Send + Sync>;
