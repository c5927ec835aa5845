//! sandbox-runner: Launch and supervise one command in an isolated Linux execution context
//!
//! The launcher validates the configuration, resolves the cgroup, derives
//! the ID mappings, checks the overlay root and opens the standard streams.
//! It then asks a [`ContainerRuntime`] for the process and hands it to the
//! [`ResourceMonitor`].
//!
//! # Example
//!
//! ```ignore
//! use sandbox_runner::{ContainerLauncher, NamespaceRuntime, SandboxSpec};
//! use sandbox_cgroup::{CgroupPathResolver, SessionScope};
//!
//! let spec = SandboxSpec::load("judge.json")?;
//! let resolver = CgroupPathResolver::new(Box::new(SessionScope::new()));
//! let result = ContainerLauncher::new(NamespaceRuntime::new(), resolver).launch(&spec)?;
//! println!("{}", serde_json::to_string(&result.report())?);
//! ```

pub mod config;
pub mod controller;
pub mod execution;
pub mod fds;
pub mod monitoring;
pub mod report;
pub mod runtime;

pub use sandbox_core::{Result, SandboxError};

pub use config::{FdConfig, LimitsConfig, SandboxSpec, DEFAULT_CONTAINER_ID};
pub use controller::ContainerLauncher;
pub use execution::{NamespaceHandle, NamespaceRuntime};
pub use fds::{prepare_fds, OutputFds, PreparedFds, UmaskGuard};
pub use monitoring::ResourceMonitor;
pub use report::{ExecutionReport, ExecutionResult, ExecutionStatus, Outcome};
pub use runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, ExitStatus};
