use log::{debug, info};
use sandbox_cgroup::{CgroupPathResolver, SessionScope};
use sandbox_core::capabilities::SystemCapabilities;
use sandbox_core::PrivilegeMode;
use sandbox_runner::{ContainerLauncher, ExecutionReport, NamespaceRuntime, SandboxSpec};
use std::path::PathBuf;

/// Configuration for sandbox execution
pub struct RunConfig {
    pub config: PathBuf,
    pub mode: PrivilegeMode,
}

/// Launch the sandbox and return the report to print.
///
/// Errors mean the sandbox could not be set up; a command that crashed or
/// timed out still produces a report.
pub fn run_sandbox(config: RunConfig) -> Result<ExecutionReport, Box<dyn std::error::Error>> {
    let spec = SandboxSpec::load(&config.config)?;
    debug!("Loaded configuration from {}", config.config.display());

    let caps = SystemCapabilities::detect();
    let mode = config.mode.resolve(&caps);
    info!("Running in {:?} mode", mode);

    let resolver = CgroupPathResolver::new(Box::new(SessionScope::new()));
    let launcher =
        ContainerLauncher::new(NamespaceRuntime::new(), resolver).rootless(mode.is_rootless());

    info!("Executing: {:?}", spec.command);
    let result = launcher.launch(&spec)?;
    info!(
        "Execution completed in {}ms with {:?}",
        result.wall_time.as_millis(),
        result.outcome
    );

    Ok(result.report())
}
