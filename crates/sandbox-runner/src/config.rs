//! Sandbox configuration document

use sandbox_cgroup::{CgroupConfig, RlimitConfig};
use sandbox_core::{Result, SandboxError};
use sandbox_fs::{MountConfig, OverlayConfig};
use sandbox_namespace::UserNamespaceConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// uid and gid of the command when it runs without a user namespace
pub const DEFAULT_CONTAINER_ID: u32 = 1000;

/// Root configuration for one sandboxed command
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SandboxSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_namespace: Option<UserNamespaceConfig>,
    pub overlayfs: OverlayConfig,
    /// Explicit cgroup parent; empty lets the resolver decide
    #[serde(default)]
    pub cgroup_path: String,
    pub cwd: PathBuf,
    pub command: Vec<String>,
    /// Search path for the command, exported as `PATH`
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fd: Option<FdConfig>,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
    pub limits: LimitsConfig,
    #[serde(default)]
    pub no_new_keyring: bool,
}

/// Standard stream redirection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FdConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<PathBuf>,
    #[serde(default)]
    pub stdout_to_stderr: bool,
    #[serde(default)]
    pub stderr_to_stdout: bool,
}

fn explicit(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

impl FdConfig {
    pub fn stdin_path(&self) -> Option<&Path> {
        explicit(&self.stdin)
    }

    pub fn stdout_path(&self) -> Option<&Path> {
        explicit(&self.stdout)
    }

    pub fn stderr_path(&self) -> Option<&Path> {
        explicit(&self.stderr)
    }

    /// Merge flags exclude each other and the path of the side being merged away
    pub fn check_conflicts(&self) -> Result<()> {
        if self.stdout_to_stderr && self.stderr_to_stdout {
            return Err(SandboxError::FdConflict(
                "stdout_to_stderr and stderr_to_stdout are both set".to_string(),
            ));
        }
        if self.stdout_to_stderr && self.stdout_path().is_some() {
            return Err(SandboxError::FdConflict(
                "stdout is set while stdout_to_stderr is enabled".to_string(),
            ));
        }
        if self.stderr_to_stdout && self.stderr_path().is_some() {
            return Err(SandboxError::FdConflict(
                "stderr is set while stderr_to_stdout is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Wall clock budget plus cgroup and rlimit ceilings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimitsConfig {
    pub time_ms: u64,
    pub cgroup: CgroupConfig,
    pub rlimit: RlimitConfig,
}

impl LimitsConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.time_ms == 0 {
            return Err(SandboxError::invalid_config(
                "limits.time_ms",
                "must be greater than 0",
            ));
        }
        self.cgroup.validate()?;
        self.rlimit.validate()
    }
}

impl SandboxSpec {
    /// Parse and validate a JSON document
    pub fn from_json(content: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(content)
            .map_err(|e| SandboxError::invalid_config("config", e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Load from a file, or from stdin when `path` is `-`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = if path == Path::new("-") {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        } else {
            fs::read_to_string(path).map_err(|e| SandboxError::Open {
                path: path.to_path_buf(),
                source: e,
            })?
        };
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(SandboxError::invalid_config("command", "must not be empty"));
        }
        if let Some(i) = self.command.iter().position(|arg| arg.is_empty()) {
            return Err(SandboxError::invalid_config(
                format!("command[{}]", i),
                "must not be empty",
            ));
        }
        if let Some(i) = self.paths.iter().position(|p| p.is_empty()) {
            return Err(SandboxError::invalid_config(
                format!("paths[{}]", i),
                "must not be empty",
            ));
        }
        if !self.cwd.is_absolute() {
            return Err(SandboxError::invalid_config(
                "cwd",
                "must be an absolute path",
            ));
        }

        if let Some(user_ns) = &self.user_namespace {
            user_ns.validate()?;
        }
        self.overlayfs.validate()?;
        if let Some(fd) = &self.fd {
            fd.check_conflicts()?;
        }
        for (i, mount) in self.mounts.iter().enumerate() {
            mount.validate(i)?;
        }
        self.limits.validate()
    }

    /// User namespace settings, only when remapping is enabled
    pub fn remapping(&self) -> Option<&UserNamespaceConfig> {
        self.user_namespace.as_ref().filter(|u| u.enabled)
    }

    /// uid and gid the command runs as.
    ///
    /// Without remapping there is no user namespace to contain root, so the
    /// command runs as [`DEFAULT_CONTAINER_ID`] on the host.
    pub fn identity(&self) -> (u32, u32) {
        match self.remapping() {
            Some(user_ns) => (user_ns.container_uid, user_ns.container_gid),
            None => (DEFAULT_CONTAINER_ID, DEFAULT_CONTAINER_ID),
        }
    }
}
