use clap::{Parser, Subcommand, ValueEnum};
use sandbox_core::PrivilegeMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sandbox-run")]
#[command(version, about = "Run one command in an isolated judging sandbox", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Run from a configuration file and print the JSON report
    sandbox-run run judge.json

    # Read the configuration from stdin, force rootless mode
    sandbox-run run --rootless always - < judge.json

    # Check what this host supports
    sandbox-run check
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the command described by a configuration file
    Run {
        /// Configuration file, `-` for stdin
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Where the sandbox cgroup and ID maps come from
        #[arg(long, value_enum, default_value_t = Rootless::Auto)]
        rootless: Rootless,
    },

    /// Check sandbox requirements
    Check,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Rootless {
    /// Rooted when running as root with cgroup v2
    Auto,
    /// Use the delegated session scope and newuidmap
    Always,
    /// Write the cgroup hierarchy and ID maps directly
    Never,
}

impl From<Rootless> for PrivilegeMode {
    fn from(value: Rootless) -> Self {
        match value {
            Rootless::Auto => PrivilegeMode::Auto,
            Rootless::Always => PrivilegeMode::Rootless,
            Rootless::Never => PrivilegeMode::Rooted,
        }
    }
}
