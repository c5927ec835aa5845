//! Sandbox runner CLI - run one command in an isolated judging sandbox

mod cli;
mod commands;
mod logging;
mod runner;

use clap::Parser;
use cli::{Cli, Commands};
use commands::check_requirements;
use console::style;
use runner::{run_sandbox, RunConfig};

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    match cli.command {
        Commands::Run { config, rootless } => {
            let config = RunConfig {
                config,
                mode: rootless.into(),
            };
            let report = run_sandbox(config).and_then(|report| {
                serde_json::to_string(&report).map_err(|e| e.into())
            });
            match report {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("{} {}", style("error:").red().bold(), e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Check => check_requirements(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use sandbox_core::PrivilegeMode;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_parses_rootless_flag() {
        let cli = Cli::try_parse_from(["sandbox-run", "-v", "run", "--rootless", "always", "-"])
            .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run { config, rootless } => {
                assert_eq!(config.to_str(), Some("-"));
                assert_eq!(PrivilegeMode::from(rootless), PrivilegeMode::Rootless);
            }
            Commands::Check => panic!("expected run"),
        }
    }

    #[test]
    fn run_defaults_to_auto() {
        let cli = Cli::try_parse_from(["sandbox-run", "run", "judge.json"]).unwrap();
        match cli.command {
            Commands::Run { rootless, .. } => {
                assert_eq!(PrivilegeMode::from(rootless), PrivilegeMode::Auto)
            }
            Commands::Check => panic!("expected run"),
        }
    }

    #[test]
    fn check_requirements_runs() {
        check_requirements();
    }
}
