use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, trace, warn};

use super::debounce::Debouncer;
use super::{Trigger, TriggerReason};
use crate::error::{IdlevaultError, Result};
use crate::host::PERM_PROBE_NAME;

/// Watches a directory tree and fires [`TriggerReason::Change`] once the
/// tree has been quiet for the configured window.
pub struct ChangeMonitor {
    root: PathBuf,
    debouncer: Debouncer,
    watcher: Option<RecommendedWatcher>,
}

impl ChangeMonitor {
    /// Start watching `root` recursively.
    pub fn watch(
        root: &Path,
        quiet_window: Duration,
        trigger: Trigger,
        span: tracing::Span,
    ) -> Result<Self> {
        let fire_span = span.clone();
        let debouncer = Debouncer::new(
            quiet_window,
            move || {
                let _enter = fire_span.enter();
                info!("no changes for the quiet window, requesting backup");
                trigger(TriggerReason::Change);
            },
            span.clone(),
        )?;

        let handler_debouncer = debouncer.clone();
        let handler_span = span.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _enter = handler_span.enter();
            match res {
                Ok(event) if is_relevant(&event) => {
                    trace!(kind = ?event.kind, paths = ?event.paths, "filesystem event");
                    handler_debouncer.touch();
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            }
        })
        .map_err(|e| IdlevaultError::Watch(e.to_string()))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| IdlevaultError::Watch(format!("cannot watch '{}': {e}", root.display())))?;

        let _enter = span.enter();
        info!(root = %root.display(), quiet_secs = quiet_window.as_secs_f64(), "watching for changes");
        Ok(Self {
            root: root.to_path_buf(),
            debouncer,
            watcher: Some(watcher),
        })
    }

    /// Cancel any pending trigger, then stop listening. Idempotent.
    pub fn stop(&mut self) {
        self.debouncer.close();
        if let Some(watcher) = self.watcher.take() {
            drop(watcher);
            debug!(root = %self.root.display(), "filesystem watcher stopped");
        }
    }
}

impl Drop for ChangeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reads do not count as changes (the pipeline itself reads the whole tree),
/// and neither does the startup permission probe.
fn is_relevant(event: &Event) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    !(!event.paths.is_empty()
        && event
            .paths
            .iter()
            .all(|p| p.file_name().is_some_and(|n| n == PERM_PROBE_NAME)))
}
