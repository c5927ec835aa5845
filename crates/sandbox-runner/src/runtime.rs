//! Container runtime seam
//!
//! The launcher and the monitor only see these traits. `NamespaceRuntime`
//! in [`crate::execution`] is the clone(2) based implementation.

use sandbox_cgroup::{CgroupConfig, RlimitConfig};
use sandbox_core::Result;
use sandbox_fs::BindMount;
use sandbox_namespace::{IdMappings, UserNamespaceConfig};
use std::path::PathBuf;

use crate::fds::PreparedFds;

/// Everything the runtime needs to create the sandboxed process
#[derive(Debug)]
pub struct ContainerSpec {
    pub command: Vec<String>,
    pub paths: Vec<String>,
    pub cwd: PathBuf,
    /// Serialized overlay configuration, mounted by the child
    pub overlay: String,
    pub mounts: Vec<BindMount>,
    /// Present only when remapping is enabled
    pub user_namespace: Option<UserNamespaceConfig>,
    /// uid and gid the command runs as, inside the user namespace if any
    pub identity: (u32, u32),
    pub id_mappings: Option<IdMappings>,
    pub cgroup_path: PathBuf,
    pub cgroup: CgroupConfig,
    pub rlimit: RlimitConfig,
    pub no_new_keyring: bool,
    pub fds: PreparedFds,
}

/// How the sandboxed process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

/// Creates sandboxed processes
pub trait ContainerRuntime {
    /// Create the process, stopped before exec
    fn create(&self, spec: ContainerSpec) -> Result<Box<dyn ContainerHandle>>;
}

/// A created sandboxed process.
///
/// `wait` blocks on one thread while `terminate` may be called from another.
/// Dropping the handle releases the runtime's resources for it.
pub trait ContainerHandle: Send + Sync {
    /// Let the process exec the command
    fn start(&self) -> Result<()>;

    fn wait(&self) -> Result<ExitStatus>;

    /// Ask the process to stop, or kill everything in its cgroup when `force`
    fn terminate(&self, force: bool) -> Result<()>;
}
