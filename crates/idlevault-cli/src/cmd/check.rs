use idlevault_core::config::IdlevaultConfig;
use idlevault_core::host::{self, CandidateLocator};

pub(crate) fn run_check(config: &IdlevaultConfig) -> Result<(), Box<dyn std::error::Error>> {
    let locator = CandidateLocator::new(config.host.install_dir());
    let startup = host::startup_check(&config.host, config.pipeline.numeric_only, &locator)?;
    let validated = &startup.validated;

    println!("Data root:   {}", validated.root.display());
    println!("Source:      {}", startup.source);
    if host::is_network_path(&validated.root) {
        println!("Location:    network share");
    }
    println!("Permission:  {}", validated.permission);
    println!("Datasets:    {}", validated.datasets.len());
    for dataset in &validated.datasets {
        let name = dataset
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dataset.display().to_string());
        println!("  {name}");
    }
    Ok(())
}
