//! Cgroup v2 management for resource limits and post-mortem telemetry

use log::{debug, warn};
use nix::unistd::Pid;
use sandbox_core::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const CPU_PERIOD_US: u64 = 100_000;

/// Cgroup limits from the sandbox configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CgroupConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_quota: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpuset_cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpuset_mems: Option<String>,
    /// Memory ceiling in bytes; negative means unlimited
    pub memory: i64,
    /// Task ceiling; negative means unlimited
    pub pids_limit: i64,
}

impl CgroupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.memory == 0 {
            return Err(SandboxError::invalid_config(
                "limits.cgroup.memory",
                "is required and must be non-zero",
            ));
        }
        if self.pids_limit == 0 {
            return Err(SandboxError::invalid_config(
                "limits.cgroup.pids_limit",
                "is required and must be non-zero",
            ));
        }
        if let Some(shares) = self.cpu_shares {
            if !(2..=262_144).contains(&shares) {
                return Err(SandboxError::invalid_config(
                    "limits.cgroup.cpu_shares",
                    "must be between 2 and 262144",
                ));
            }
        }
        Ok(())
    }
}

/// Convert cgroup v1 `cpu.shares` to a cgroup v2 `cpu.weight`
pub fn cpu_shares_to_weight(shares: u64) -> u64 {
    1 + ((shares.saturating_sub(2)) * 9999) / 262_142
}

fn limit_value(value: i64) -> String {
    if value < 0 {
        "max".to_string()
    } else {
        value.to_string()
    }
}

/// CPU time consumed by every task of a cgroup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuUsage {
    pub user_usec: u64,
    pub system_usec: u64,
}

/// Cgroup v2 directory
pub struct Cgroup {
    path: PathBuf,
    owned: bool,
}

impl Cgroup {
    /// Create the cgroup directory; it is removed again when dropped
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path).map_err(|e| {
            SandboxError::Cgroup(format!(
                "Failed to create cgroup directory {}: {}",
                path.display(),
                e
            ))
        })?;
        debug!("Created cgroup {}", path.display());
        Ok(Self { path, owned: true })
    }

    /// Attach to an existing cgroup without taking ownership of it
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            owned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn apply_config(&self, config: &CgroupConfig) -> Result<()> {
        config.validate()?;

        self.write_file("memory.max", &limit_value(config.memory))?;
        self.write_file("pids.max", &limit_value(config.pids_limit))?;

        // Swap would hide memory pressure from the OOM counter
        self.write_optional("memory.swap.max", "0");
        self.write_optional("memory.oom.group", "1");

        if let Some(shares) = config.cpu_shares {
            self.write_file("cpu.weight", &cpu_shares_to_weight(shares).to_string())?;
        }
        if let Some(quota) = config.cpu_quota {
            let value = if quota > 0 {
                format!("{} {}", quota, CPU_PERIOD_US)
            } else {
                format!("max {}", CPU_PERIOD_US)
            };
            self.write_file("cpu.max", &value)?;
        }
        if let Some(cpus) = config.cpuset_cpus.as_deref().filter(|s| !s.is_empty()) {
            self.write_file("cpuset.cpus", cpus)?;
        }
        if let Some(mems) = config.cpuset_mems.as_deref().filter(|s| !s.is_empty()) {
            self.write_file("cpuset.mems", mems)?;
        }
        Ok(())
    }

    pub fn add_process(&self, pid: Pid) -> Result<()> {
        self.write_file("cgroup.procs", &pid.as_raw().to_string())
    }

    /// Kill every task in the cgroup (kernel 5.14+)
    pub fn kill_all(&self) -> Result<()> {
        self.write_file("cgroup.kill", "1")
    }

    /// Number of OOM kills recorded in `memory.events`
    pub fn oom_kill_count(&self) -> Result<u64> {
        let content = self.read_file("memory.events")?;
        parse_memory_events(&content, "oom_kill")
    }

    /// Peak memory usage in bytes from `memory.peak`
    pub fn memory_peak(&self) -> Result<u64> {
        let content = self.read_file("memory.peak")?;
        match content.trim().parse::<u64>() {
            Ok(peak) if peak > 0 => Ok(peak),
            _ => Err(SandboxError::Cgroup(format!(
                "Unexpected memory.peak value: {:?}",
                content.trim()
            ))),
        }
    }

    pub fn cpu_usage(&self) -> Result<CpuUsage> {
        let content = self.read_file("cpu.stat")?;
        let mut usage = CpuUsage::default();
        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() != 2 {
                continue;
            }
            let parse = |value: &str| {
                value.parse::<u64>().map_err(|e| {
                    SandboxError::Cgroup(format!("Failed to parse cpu.stat {}: {}", parts[0], e))
                })
            };
            match parts[0] {
                "user_usec" => usage.user_usec = parse(parts[1])?,
                "system_usec" => usage.system_usec = parse(parts[1])?,
                _ => {}
            }
        }
        Ok(usage)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn delete(&self) -> Result<()> {
        match fs::remove_dir(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxError::Cgroup(format!(
                "Failed to delete cgroup {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn write_file(&self, name: &str, content: &str) -> Result<()> {
        let path = self.path.join(name);
        let mut file = fs::OpenOptions::new().write(true).open(&path).map_err(|e| {
            SandboxError::Cgroup(format!("Failed to open {}: {}", path.display(), e))
        })?;
        write!(file, "{}", content).map_err(|e| {
            SandboxError::Cgroup(format!("Failed to write to {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    fn write_optional(&self, name: &str, content: &str) {
        if !self.path.join(name).exists() {
            return;
        }
        if let Err(e) = self.write_file(name, content) {
            warn!("Skipping {}: {}", name, e);
        }
    }

    fn read_file(&self, name: &str) -> Result<String> {
        let path = self.path.join(name);
        fs::read_to_string(&path).map_err(|e| {
            SandboxError::Cgroup(format!("Failed to read {}: {}", path.display(), e))
        })
    }
}

impl Drop for Cgroup {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = self.delete() {
                warn!("{}", e);
            }
        }
    }
}

/// Enable the controllers the sandbox needs for children of `parent`.
///
/// Best effort: controllers already enabled or not delegated to us are
/// reported and skipped; the limit writes fail later if one is really missing.
pub fn enable_subtree_controllers(parent: &Path) {
    let control = parent.join("cgroup.subtree_control");
    for controller in ["cpu", "cpuset", "memory", "pids"] {
        let result = fs::OpenOptions::new()
            .write(true)
            .open(&control)
            .and_then(|mut file| write!(file, "+{}", controller));
        if let Err(e) = result {
            debug!(
                "Could not enable {} in {}: {}",
                controller,
                control.display(),
                e
            );
        }
    }
}

/// Look up a counter in `memory.events`-style `key value` lines; absent keys count as zero.
pub fn parse_memory_events(content: &str, key: &str) -> Result<u64> {
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        if parts.next() != Some(key) {
            continue;
        }
        let value = parts.next().unwrap_or_default();
        return value.parse::<u64>().map_err(|e| {
            SandboxError::Cgroup(format!("Failed to parse memory.events {}: {}", key, e))
        });
    }
    Ok(0)
}
