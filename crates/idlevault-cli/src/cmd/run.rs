use std::time::Duration;

use idlevault_core::app::{self, AgentService, ServiceSettings};
use idlevault_core::config::IdlevaultConfig;
use idlevault_core::host::{self, CandidateLocator};

use crate::signal::{install_signal_handlers, wait_for_shutdown};

pub(crate) fn run_agent(config: &IdlevaultConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Everything that can fail at startup happens before any monitor runs.
    let locator = CandidateLocator::new(config.host.install_dir());
    let startup = host::startup_check(&config.host, config.pipeline.numeric_only, &locator)?;
    tracing::info!(
        root = %startup.data_root().display(),
        source = %startup.source,
        datasets = startup.validated.datasets.len(),
        permission = %startup.validated.permission,
        "data root ready"
    );
    let pipeline = app::build_pipeline(config)?;

    install_signal_handlers();
    let service = AgentService::start(
        ServiceSettings::from_config(config, startup.data_root()),
        pipeline,
    )?;

    wait_for_shutdown(Duration::from_millis(250));
    tracing::info!("shutdown signal received, finishing current dataset");
    service.stop();
    Ok(())
}
