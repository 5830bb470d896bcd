//! Command-line argument parsing and subcommands.
//!
//! Shape borrowed directly from the teacher: a `SharedOpts` flattened into
//! every subcommand, `Cli::config()`/`Cli::debug()` projecting out of
//! whichever subcommand ran, `Commands::default()` so bare `playdar` with
//! no subcommand still does the right thing.

use clap::{Parser, Subcommand};

use crate::config::ConfigFile;

#[derive(Parser, Clone)]
pub struct SharedOpts {
    #[clap(short, long, help = "Configuration directory")]
    config: Option<String>,
    #[clap(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon: registry, LAN resolver, HTTP API. The default.
    Server {
        #[clap(flatten)]
        sopt: SharedOpts,
    },
    /// Validate the config file and exit.
    ConfigCheck {
        #[clap(flatten)]
        sopt: SharedOpts,
    },
    /// Print a default `playdar.conf` to stdout.
    ExportConfig,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Server {
            sopt: SharedOpts {
                config: None,
                debug: false,
            },
        }
    }
}

#[derive(Parser)]
#[command(arg_required_else_help(false), version)]
/// Peer-to-peer music content resolver daemon.
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    fn command(&self) -> Commands {
        match &self.command {
            Some(Commands::Server { sopt }) => Commands::Server { sopt: sopt.clone() },
            Some(Commands::ConfigCheck { sopt }) => Commands::ConfigCheck { sopt: sopt.clone() },
            Some(Commands::ExportConfig) => Commands::ExportConfig,
            None => Commands::default(),
        }
    }

    pub fn config(&self) -> Option<String> {
        match self.command() {
            Commands::Server { sopt } | Commands::ConfigCheck { sopt } => sopt.config,
            Commands::ExportConfig => None,
        }
    }

    pub fn debug(&self) -> bool {
        match self.command() {
            Commands::Server { sopt } | Commands::ConfigCheck { sopt } => sopt.debug,
            Commands::ExportConfig => false,
        }
    }

    pub fn is_export_config(&self) -> bool {
        matches!(self.command(), Commands::ExportConfig)
    }

    pub fn is_config_check(&self) -> bool {
        matches!(self.command(), Commands::ConfigCheck { .. })
    }
}

/// Output a default configuration file, based on [`ConfigFile`].
pub fn default_config() {
    println!("{}", ConfigFile::default().as_json_pretty());
}
