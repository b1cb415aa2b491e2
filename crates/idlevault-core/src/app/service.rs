use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use super::dispatch::RunDispatcher;
use crate::config::IdlevaultConfig;
use crate::error::Result;
use crate::monitor::{
    ChangeMonitor, LivenessMonitor, LivenessProbe, LivenessSettings, ProcessTable,
    SystemProcessTable, TriggerReason,
};
use crate::pipeline::BackupPipeline;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub data_root: PathBuf,
    pub quiet_window: Duration,
    pub process_prefix: String,
    pub liveness: LivenessSettings,
}

impl ServiceSettings {
    pub fn from_config(config: &IdlevaultConfig, data_root: &Path) -> Self {
        Self {
            data_root: data_root.to_path_buf(),
            quiet_window: config.watch.quiet_window(),
            process_prefix: config.host.process_prefix.clone(),
            liveness: LivenessSettings {
                poll_interval: config.watch.poll_interval(),
                cooldown: config.watch.cooldown(),
            },
        }
    }
}

/// The running agent: both monitors feeding one backup runner.
pub struct AgentService {
    change: ChangeMonitor,
    liveness: LivenessMonitor,
    dispatcher: RunDispatcher,
    span: tracing::Span,
}

impl AgentService {
    /// Start with the operating system's process table.
    pub fn start(settings: ServiceSettings, pipeline: BackupPipeline) -> Result<Self> {
        Self::start_with(settings, pipeline, SystemProcessTable::new())
    }

    pub fn start_with<T: ProcessTable + 'static>(
        settings: ServiceSettings,
        pipeline: BackupPipeline,
        process_table: T,
    ) -> Result<Self> {
        let span = tracing::info_span!("agent", root = %settings.data_root.display());

        let root = settings.data_root.clone();
        let dispatcher = RunDispatcher::start(
            Box::new(move |_reason, cancel| pipeline.run(&root, cancel)),
            span.clone(),
        )?;

        let liveness = LivenessMonitor::start(
            LivenessProbe::new(process_table, &settings.process_prefix),
            settings.liveness,
            dispatcher.trigger_fn(),
            span.clone(),
        )?;

        let change = ChangeMonitor::watch(
            &settings.data_root,
            settings.quiet_window,
            dispatcher.trigger_fn(),
            span.clone(),
        )?;

        span.in_scope(|| info!("agent started"));
        Ok(Self {
            change,
            liveness,
            dispatcher,
            span,
        })
    }

    /// Queue a run now, outside of the monitors.
    pub fn backup_now(&self) -> bool {
        self.dispatcher.trigger(TriggerReason::Manual)
    }

    pub fn dispatcher(&self) -> &RunDispatcher {
        &self.dispatcher
    }

    /// Cancel the pending debounce, stop the watcher, stop the liveness loop,
    /// then let the current run finish its dataset and join the runner.
    pub fn stop(mut self) {
        let _enter = self.span.clone().entered();
        info!("agent stopping");
        self.change.stop();
        self.liveness.stop();
        self.dispatcher.shutdown();
        info!(runs = self.dispatcher.completed_runs(), "agent stopped");
    }
}
