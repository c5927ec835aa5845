//! setrlimit-based limits applied by the sandboxed process before exec

use nix::sys::resource::{Resource, setrlimit};
use sandbox_core::{Result, SandboxError};
use serde::{Deserialize, Serialize};

/// A soft/hard limit pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RlimitItem {
    pub hard: u64,
    pub soft: u64,
}

impl RlimitItem {
    /// Same value for soft and hard limit
    pub fn new_single(value: u64) -> Self {
        Self {
            hard: value,
            soft: value,
        }
    }
}

/// Per-process limits from the sandbox configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RlimitConfig {
    /// Core dump size (RLIMIT_CORE)
    pub core: RlimitItem,
    /// Largest file the process may write (RLIMIT_FSIZE)
    pub fsize: RlimitItem,
    /// Open file descriptors (RLIMIT_NOFILE)
    pub no_file: RlimitItem,
}

impl RlimitConfig {
    fn items(&self) -> [(&'static str, Resource, RlimitItem); 3] {
        [
            ("core", Resource::RLIMIT_CORE, self.core),
            ("fsize", Resource::RLIMIT_FSIZE, self.fsize),
            ("no_file", Resource::RLIMIT_NOFILE, self.no_file),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (name, _, item) in self.items() {
            if item.soft > item.hard {
                return Err(SandboxError::invalid_config(
                    format!("limits.rlimit.{}", name),
                    "soft limit exceeds hard limit",
                ));
            }
        }
        Ok(())
    }

    /// Apply the limits to the current process.
    /// Called in the sandboxed child after clone, before exec.
    pub fn apply(&self) -> Result<()> {
        for (name, resource, item) in self.items() {
            setrlimit(resource, item.soft, item.hard).map_err(|e| {
                SandboxError::Syscall(format!("setrlimit({}) failed: {}", name, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_soft_above_hard() {
        let config = RlimitConfig {
            core: RlimitItem::new_single(0),
            fsize: RlimitItem { hard: 10, soft: 20 },
            no_file: RlimitItem::new_single(64),
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("limits.rlimit.fsize"));
    }

    #[test]
    fn test_deserialize_pairs() {
        let config: RlimitConfig = serde_json::from_str(
            r#"{"core":{"hard":0,"soft":0},"fsize":{"hard":1024,"soft":512},"no_file":{"hard":64,"soft":64}}"#,
        )
        .unwrap();
        assert_eq!(config.fsize, RlimitItem { hard: 1024, soft: 512 });
        assert!(config.validate().is_ok());
    }
}
