use idlevault_core::app;
use idlevault_core::config::IdlevaultConfig;
use idlevault_core::host::{self, CandidateLocator};

use crate::signal::{install_signal_handlers, SHUTDOWN};

pub(crate) fn run_backup(config: &IdlevaultConfig) -> Result<(), Box<dyn std::error::Error>> {
    let locator = CandidateLocator::new(config.host.install_dir());
    let startup = host::startup_check(&config.host, config.pipeline.numeric_only, &locator)?;
    let pipeline = app::build_pipeline(config)?;

    install_signal_handlers();
    let report = pipeline.run(startup.data_root(), &SHUTDOWN)?;

    println!("Backup of {}:", startup.data_root().display());
    println!("{report}");

    if report.failed() > 0 {
        return Err(format!(
            "{} of {} datasets failed: {}",
            report.failed(),
            report.datasets.len(),
            report.failed_names().join(", ")
        )
        .into());
    }
    if report.interrupted {
        return Err("interrupted before every dataset was backed up".into());
    }
    Ok(())
}
