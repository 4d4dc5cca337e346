use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "animals-detector")]
#[command(about = "Headless motion-triggered animal capture service")]
pub struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON (for journald)
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the capture / detection loop
    Run(RunArgs),

    /// Suspend the machine or schedule the evening RTC wake
    Power {
        /// `suspend` or `wake`
        action: Option<String>,
    },

    /// Install and start the systemd unit (requires root)
    InstallService(InstallArgs),

    /// Upload every stored capture that has not been uploaded yet
    Sync,

    /// Remove capture directories older than the retention window
    Cleanup {
        /// Override storage.days_to_keep
        #[arg(long)]
        days: Option<i64>,
    },

    /// Validate the configuration and print a summary
    CheckConfig,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Stop after this many frames
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Log CPU / memory usage periodically
    #[arg(long)]
    pub monitor: bool,

    /// Keep captures local even if upload is enabled in the config
    #[arg(long)]
    pub no_upload: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct InstallArgs {
    /// Binary the unit should execute (defaults to the running executable)
    #[arg(long)]
    pub binary: Option<PathBuf>,

    /// Override service.unit_dir
    #[arg(long)]
    pub unit_dir: Option<PathBuf>,
}
