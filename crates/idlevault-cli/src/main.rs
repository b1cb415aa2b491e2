mod cli;
mod cmd;
mod config_gen;
mod logging;
mod signal;

use clap::Parser;

use idlevault_core::app;
use idlevault_core::config;

use cli::{Cli, Commands};
use config_gen::run_config_generate;

fn main() {
    let cli = Cli::parse();

    // The agent logs at info by default; one-shot commands stay quiet.
    let filter = match cli.verbose {
        0 if matches!(cli.command, Commands::Run) => "info",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // `config` needs no config file.
    if let Commands::Config { dest } = &cli.command {
        logging::init(filter, None);
        if let Err(e) = run_config_generate(dest.as_deref()) {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        return;
    }

    if config::resolve_config_path(cli.config.as_deref()).is_none() {
        eprintln!("Error: no configuration file found.");
        eprintln!("Searched:");
        for (path, level) in config::default_config_search_paths() {
            eprintln!("  {} ({})", path.display(), level);
        }
        eprintln!();
        eprintln!("Run `idlevault config` to generate a starter config file.");
        std::process::exit(1);
    }

    let runtime = match app::load_runtime_config(cli.config.as_deref()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    // Only the long-running agent keeps a log file.
    let log_file = matches!(cli.command, Commands::Run).then_some(&runtime.config.logging);
    logging::init(filter, log_file);
    tracing::info!("Using config: {}", runtime.source);

    let result = match &cli.command {
        Commands::Run => cmd::run::run_agent(&runtime.config),
        Commands::Backup => cmd::backup::run_backup(&runtime.config),
        Commands::Check => cmd::check::run_check(&runtime.config),
        Commands::Config { .. } => Ok(()),
    };

    if let Err(e) = result {
        tracing::debug!(command = cli.command.name(), "command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
