//! User namespace UID/GID mapping support
//!
//! The container sees two ranges per axis: container ID 0 is backed by a
//! dedicated host identity (`root_uid`/`root_gid`), and container IDs starting
//! at 1 are backed by the configured host range. Host root never appears
//! inside the namespace.

use log::debug;
use nix::unistd::Pid;
use sandbox_core::capabilities::{NEWGIDMAP_PATH, NEWUIDMAP_PATH};
use sandbox_core::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::process::Command;

/// User namespace remapping configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserNamespaceConfig {
    #[serde(default)]
    pub enabled: bool,
    pub root_uid: u32,
    pub uid_map_begin: u32,
    pub uid_map_count: u32,
    pub root_gid: u32,
    pub gid_map_begin: u32,
    pub gid_map_count: u32,
    pub container_uid: u32,
    pub container_gid: u32,
}

impl UserNamespaceConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let required = [
            ("root_uid", self.root_uid),
            ("uid_map_begin", self.uid_map_begin),
            ("uid_map_count", self.uid_map_count),
            ("root_gid", self.root_gid),
            ("gid_map_begin", self.gid_map_begin),
            ("gid_map_count", self.gid_map_count),
        ];
        for (name, value) in required {
            if value == 0 {
                return Err(SandboxError::invalid_config(
                    format!("user_namespace.{}", name),
                    "must be non-zero when remapping is enabled",
                ));
            }
        }

        if self.container_uid > self.uid_map_count {
            return Err(SandboxError::invalid_config(
                "user_namespace.container_uid",
                "is not covered by the mapped uid range",
            ));
        }
        if self.container_gid > self.gid_map_count {
            return Err(SandboxError::invalid_config(
                "user_namespace.container_gid",
                "is not covered by the mapped gid range",
            ));
        }
        Ok(())
    }
}

/// One contiguous ID range shared between host and container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapping {
    pub host_id: u32,
    pub container_id: u32,
    pub size: u32,
}

impl IdMapping {
    /// Line format of `/proc/<pid>/{uid,gid}_map`
    pub fn to_map_line(&self) -> String {
        format!("{} {} {}", self.container_id, self.host_id, self.size)
    }
}

/// UID and GID mappings for a user namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMappings {
    pub uid: Vec<IdMapping>,
    pub gid: Vec<IdMapping>,
}

/// Derive the UID and GID mappings for a remapped sandbox.
pub fn build_id_mappings(config: &UserNamespaceConfig) -> IdMappings {
    IdMappings {
        uid: vec![
            IdMapping {
                host_id: config.root_uid,
                container_id: 0,
                size: 1,
            },
            IdMapping {
                host_id: config.uid_map_begin,
                container_id: 1,
                size: config.uid_map_count,
            },
        ],
        gid: vec![
            IdMapping {
                host_id: config.root_gid,
                container_id: 0,
                size: 1,
            },
            IdMapping {
                host_id: config.gid_map_begin,
                container_id: 1,
                size: config.gid_map_count,
            },
        ],
    }
}

/// Install UID/GID mappings for a child blocked in its fresh user namespace.
///
/// Root writes the map files directly. Anyone else goes through the setuid
/// `newuidmap`/`newgidmap` helpers, which check `/etc/subuid` and `/etc/subgid`.
pub fn write_id_mappings(child_pid: Pid, mappings: &IdMappings) -> Result<()> {
    let pid = child_pid.as_raw();

    if nix::unistd::geteuid().is_root() {
        write_map_file(pid, "uid_map", &mappings.uid)?;
        write_map_file(pid, "gid_map", &mappings.gid)?;
    } else {
        run_map_helper(NEWUIDMAP_PATH, pid, &mappings.uid)?;
        run_map_helper(NEWGIDMAP_PATH, pid, &mappings.gid)?;
    }

    debug!("Installed id mappings for pid {}: {:?}", pid, mappings);
    Ok(())
}

fn write_map_file(pid: i32, file: &str, mappings: &[IdMapping]) -> Result<()> {
    let content = mappings
        .iter()
        .map(|m| m.to_map_line() + "\n")
        .collect::<String>();
    fs::write(format!("/proc/{}/{}", pid, file), content).map_err(|e| {
        SandboxError::Namespace(format!("Failed to write {} for pid {}: {}", file, pid, e))
    })
}

fn run_map_helper(helper: &str, pid: i32, mappings: &[IdMapping]) -> Result<()> {
    let mut command = Command::new(helper);
    command.arg(pid.to_string());
    for mapping in mappings {
        command
            .arg(mapping.container_id.to_string())
            .arg(mapping.host_id.to_string())
            .arg(mapping.size.to_string());
    }

    let output = command
        .output()
        .map_err(|e| SandboxError::Namespace(format!("Failed to run {}: {}", helper, e)))?;
    if !output.status.success() {
        return Err(SandboxError::Namespace(format!(
            "{} failed for pid {}: {}",
            helper,
            pid,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
