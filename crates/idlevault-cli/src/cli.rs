use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "idlevault",
    version,
    about = "Encrypted off-site backups of accounting data, taken while it is idle",
    after_help = "\
Configuration file lookup order:
  1. --config <path>             (explicit flag)
  2. $IDLEVAULT_CONFIG           (environment variable)
  3. ./idlevault.yaml            (project)
  4. Platform user config dir + /idlevault/config.yaml (e.g. ~/.config or %APPDATA%)
  5. Platform system config path (Unix: /etc/idlevault/config.yaml, Windows: %PROGRAMDATA%/idlevault/config.yaml)

Environment variables:
  IDLEVAULT_CONFIG       Path to configuration file (overrides default search)
  IDLEVAULT_PASSPHRASE   Artifact passphrase (after encryption.passphrase and passcommand)
  AWS_ACCESS_KEY_ID      S3 credentials when not set in storage.*
  AWS_SECRET_ACCESS_KEY"
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides IDLEVAULT_CONFIG and default search)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the agent: back up whenever the data goes quiet or the host application exits
    Run,

    /// Back up every dataset once and exit
    Backup,

    /// Resolve and validate the data root without backing anything up
    Check,

    /// Generate a starter configuration file
    Config {
        /// Where to write the file (prompts for a location when omitted)
        dest: Option<String>,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Run => "run",
            Commands::Backup => "backup",
            Commands::Check => "check",
            Commands::Config { .. } => "config",
        }
    }
}
