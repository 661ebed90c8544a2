use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use index_rebuilder::Overrides;

#[derive(Debug, Parser)]
#[command(name = "index-rebuilder")]
#[command(
    about = "Rebuild fragmented SQL Server indexes one at a time, resumably",
    long_about = None
)]
pub struct Cli {
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan (or resume) and rebuild every index over the threshold
    Run {
        #[command(flatten)]
        job: JobArgs,
        /// Discard any existing checkpoint and start with a fresh scan
        #[arg(long)]
        fresh: bool,
    },
    /// List the indexes a run would rebuild, without rebuilding them
    Scan {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Show progress recorded in the checkpoint
    Status {
        #[command(flatten)]
        source: ConfigArgs,
    },
    /// Discard the checkpoint
    Reset {
        #[command(flatten)]
        source: ConfigArgs,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Print configuration values (secrets redacted)
    PrintConfig {
        #[command(flatten)]
        job: JobArgs,
    },
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Configuration file (default: optional ./Config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Checkpoint file
    #[arg(long, value_name = "FILE")]
    pub checkpoint: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct JobArgs {
    #[command(flatten)]
    pub source: ConfigArgs,
    /// Server host name
    #[arg(long)]
    pub server: Option<String>,
    /// Server port [default: 1433]
    #[arg(long)]
    pub port: Option<u16>,
    /// Database whose indexes are maintained
    #[arg(long)]
    pub database: Option<String>,
    /// Credential reference resolved through the credential stores
    #[arg(long)]
    pub credential: Option<String>,
    /// Minimum average fragmentation percent to rebuild [default: 20]
    #[arg(long, allow_negative_numbers = true)]
    pub threshold: Option<i64>,
    /// Retry offline when an index cannot be rebuilt online
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
    pub allow_offline_fallback: Option<bool>,
    /// Only rebuild indexes on this table
    #[arg(long)]
    pub table: Option<String>,
    /// Accept the server certificate without validation
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
    pub trust_server_certificate: Option<bool>,
}

impl ConfigArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            checkpoint_path: self.checkpoint.clone(),
            ..Overrides::default()
        }
    }
}

impl JobArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            server: self.server.clone(),
            port: self.port,
            database: self.database.clone(),
            credential: self.credential.clone(),
            threshold: self.threshold,
            allow_offline_fallback: self.allow_offline_fallback,
            table: self.table.clone(),
            trust_server_certificate: self.trust_server_certificate,
            ..self.source.overrides()
        }
    }
}
