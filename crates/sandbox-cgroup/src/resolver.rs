//! Cgroup path resolution for the sandboxed process
//!
//! Rooted supervisors write the unified hierarchy directly. Rootless ones can
//! only create cgroups below a scope the session manager delegated to them,
//! so that path comes from a [`ScopeProvider`].

use log::{debug, info};
use sandbox_core::{Result, SandboxError};
use std::fs;
use std::path::{Path, PathBuf};

pub const CGROUP_V2_ROOT: &str = "/sys/fs/cgroup";

/// Leaf the supervisor moves itself into, so its scope can host the sandbox cgroup.
const SUPERVISOR_LEAF: &str = "supervisor";

/// Mountpoint of the unified hierarchy; `SANDBOX_CGROUP_ROOT` overrides it.
pub fn cgroup_root_path() -> PathBuf {
    std::env::var("SANDBOX_CGROUP_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(CGROUP_V2_ROOT))
}

/// Name of the cgroup created for this supervisor's sandbox
pub fn sandbox_leaf_name() -> String {
    format!("sandbox-{}", std::process::id())
}

/// Where the sandbox cgroup lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCgroup {
    /// Logical parent reported by the session manager (rootless only)
    pub scheduler_parent: Option<String>,
    /// Filesystem path of the sandbox cgroup
    pub path: PathBuf,
}

/// Locates a delegated cgroup for rootless execution
pub trait ScopeProvider: Send + Sync {
    fn resolve_scope(&self) -> Result<ResolvedCgroup>;
}

/// Uses the delegated scope the supervisor was started in
/// (e.g. `systemd-run --user --scope -p Delegate=yes`).
pub struct SessionScope {
    mountpoint: PathBuf,
    proc_cgroup: PathBuf,
}

impl SessionScope {
    pub fn new() -> Self {
        Self::with_paths(cgroup_root_path(), "/proc/self/cgroup")
    }

    pub fn with_paths(mountpoint: impl AsRef<Path>, proc_cgroup: impl AsRef<Path>) -> Self {
        Self {
            mountpoint: mountpoint.as_ref().to_path_buf(),
            proc_cgroup: proc_cgroup.as_ref().to_path_buf(),
        }
    }

    fn current_cgroup(&self) -> Result<PathBuf> {
        let content = fs::read_to_string(&self.proc_cgroup).map_err(|e| {
            SandboxError::Cgroup(format!(
                "Failed to read {}: {}",
                self.proc_cgroup.display(),
                e
            ))
        })?;
        let relative = content
            .lines()
            .find_map(|line| line.strip_prefix("0::"))
            .ok_or_else(|| {
                SandboxError::Cgroup("No cgroup v2 entry for the current process".to_string())
            })?;
        Ok(PathBuf::from(relative.trim()))
    }
}

impl Default for SessionScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeProvider for SessionScope {
    fn resolve_scope(&self) -> Result<ResolvedCgroup> {
        let mut relative = self.current_cgroup()?;
        // A previous resolution already moved us into the supervisor leaf
        if relative.file_name().map(|n| n == SUPERVISOR_LEAF).unwrap_or(false) {
            relative.pop();
        }
        if relative.parent().is_none() {
            return Err(SandboxError::Cgroup(
                "Current process is in the root cgroup, no delegated scope to use".to_string(),
            ));
        }

        let scope = self
            .mountpoint
            .join(relative.strip_prefix("/").unwrap_or(&relative));

        // No internal processes: the scope may only hold child cgroups
        let supervisor = scope.join(SUPERVISOR_LEAF);
        fs::create_dir_all(&supervisor).map_err(|e| {
            SandboxError::Cgroup(format!(
                "Scope {} is not delegated: {}",
                scope.display(),
                e
            ))
        })?;
        fs::write(
            supervisor.join("cgroup.procs"),
            std::process::id().to_string(),
        )
        .map_err(|e| {
            SandboxError::Cgroup(format!(
                "Failed to move supervisor into {}: {}",
                supervisor.display(),
                e
            ))
        })?;

        let scheduler_parent = relative
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned());

        Ok(ResolvedCgroup {
            scheduler_parent,
            path: scope.join(sandbox_leaf_name()),
        })
    }
}

/// Decides which cgroup the sandboxed process is placed in
pub struct CgroupPathResolver {
    mountpoint: PathBuf,
    scope: Box<dyn ScopeProvider>,
}

impl CgroupPathResolver {
    pub fn new(scope: Box<dyn ScopeProvider>) -> Self {
        Self::with_mountpoint(cgroup_root_path(), scope)
    }

    pub fn with_mountpoint(mountpoint: impl AsRef<Path>, scope: Box<dyn ScopeProvider>) -> Self {
        Self {
            mountpoint: mountpoint.as_ref().to_path_buf(),
            scope,
        }
    }

    /// Resolve the sandbox cgroup.
    ///
    /// An explicit parent wins; otherwise rootless supervisors ask the scope
    /// provider and rooted ones use the root of the unified hierarchy.
    pub fn resolve(&self, explicit_parent: &str, rootless: bool) -> Result<ResolvedCgroup> {
        let resolved = if !explicit_parent.is_empty() {
            ResolvedCgroup {
                scheduler_parent: None,
                path: self.resolve_via_fs(&self.anchor(explicit_parent))?,
            }
        } else if rootless {
            self.scope.resolve_scope()?
        } else {
            ResolvedCgroup {
                scheduler_parent: None,
                path: self.resolve_via_fs(&self.mountpoint)?,
            }
        };

        info!("Resolved sandbox cgroup {}", resolved.path.display());
        Ok(resolved)
    }

    fn anchor(&self, parent: &str) -> PathBuf {
        let path = Path::new(parent);
        if path.starts_with(&self.mountpoint) {
            path.to_path_buf()
        } else {
            self.mountpoint
                .join(path.strip_prefix("/").unwrap_or(path))
        }
    }

    fn resolve_via_fs(&self, parent: &Path) -> Result<PathBuf> {
        if !parent.is_dir() {
            return Err(SandboxError::Cgroup(format!(
                "Cgroup parent {} does not exist",
                parent.display()
            )));
        }
        let path = parent.join(sandbox_leaf_name());
        debug!("Cgroup parent {} resolved to {}", parent.display(), path.display());
        Ok(path)
    }
}
