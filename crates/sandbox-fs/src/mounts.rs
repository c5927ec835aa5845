//! Extra bind mounts layered under the sandbox root

use log::debug;
use nix::mount::{mount, MsFlags};
use sandbox_core::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Host path exposed inside the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MountConfig {
    pub from: PathBuf,
    pub to: PathBuf,
    #[serde(default)]
    pub options: Vec<String>,
}

impl MountConfig {
    pub fn validate(&self, index: usize) -> Result<()> {
        for (name, path) in [("from", &self.from), ("to", &self.to)] {
            if !path.is_absolute() {
                return Err(SandboxError::invalid_config(
                    format!("mounts[{}].{}", index, name),
                    "must be an absolute path",
                ));
            }
        }
        BindMount::parse(self).map_err(|e| match e {
            SandboxError::InvalidConfig { reason, .. } => SandboxError::invalid_config(
                format!("mounts[{}].options", index),
                reason,
            ),
            other => other,
        })?;
        Ok(())
    }
}

/// A parsed [`MountConfig`], ready to mount in the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub recursive: bool,
    pub read_only: bool,
    /// nosuid, nodev, noexec
    pub extra_flags: MsFlags,
    /// Propagation type applied after the bind, with `MS_REC` for the `r` forms
    pub propagation: Option<MsFlags>,
}

impl BindMount {
    pub fn parse(config: &MountConfig) -> Result<Self> {
        let mut bind = Self {
            source: config.from.clone(),
            destination: config.to.clone(),
            recursive: false,
            read_only: false,
            extra_flags: MsFlags::empty(),
            propagation: None,
        };

        for option in &config.options {
            match option.as_str() {
                "ro" => bind.read_only = true,
                "rw" => bind.read_only = false,
                "bind" => {}
                "rbind" => bind.recursive = true,
                "nosuid" => bind.extra_flags |= MsFlags::MS_NOSUID,
                "nodev" => bind.extra_flags |= MsFlags::MS_NODEV,
                "noexec" => bind.extra_flags |= MsFlags::MS_NOEXEC,
                "suid" => bind.extra_flags.remove(MsFlags::MS_NOSUID),
                "dev" => bind.extra_flags.remove(MsFlags::MS_NODEV),
                "exec" => bind.extra_flags.remove(MsFlags::MS_NOEXEC),
                other => match propagation_flags(other) {
                    Some(flags) => bind.propagation = Some(flags),
                    None => {
                        return Err(SandboxError::invalid_config(
                            "mounts.options",
                            format!("unsupported mount option `{}`", other),
                        ))
                    }
                },
            }
        }
        Ok(bind)
    }

    /// Destination resolved under the new root
    pub fn target(&self, root: &Path) -> PathBuf {
        root.join(
            self.destination
                .strip_prefix("/")
                .unwrap_or(&self.destination),
        )
    }

    fn remount_flags(&self) -> MsFlags {
        let mut flags = self.extra_flags;
        if self.read_only {
            flags |= MsFlags::MS_RDONLY;
        }
        flags
    }

    /// Bind the source under `root`, creating the mountpoint if needed.
    /// Runs in the sandboxed child before chroot.
    pub fn mount(&self, root: &Path) -> Result<()> {
        let target = self.target(root);
        create_mountpoint(&self.source, &target)?;

        let mut flags = MsFlags::MS_BIND;
        if self.recursive {
            flags |= MsFlags::MS_REC;
        }
        mount(
            Some(&self.source),
            &target,
            None::<&str>,
            flags,
            None::<&str>,
        )
        .map_err(|e| {
            SandboxError::Syscall(format!(
                "Failed to bind {} to {}: {}",
                self.source.display(),
                target.display(),
                e
            ))
        })?;

        // Per-mount flags only take effect on a bind remount
        let remount = self.remount_flags();
        if !remount.is_empty() {
            mount(
                None::<&str>,
                &target,
                None::<&str>,
                MsFlags::MS_REMOUNT | MsFlags::MS_BIND | remount,
                None::<&str>,
            )
            .map_err(|e| {
                SandboxError::Syscall(format!("Failed to remount {}: {}", target.display(), e))
            })?;
        }

        if let Some(propagation) = self.propagation {
            mount(
                None::<&str>,
                &target,
                None::<&str>,
                propagation,
                None::<&str>,
            )
            .map_err(|e| {
                SandboxError::Syscall(format!(
                    "Failed to set propagation on {}: {}",
                    target.display(),
                    e
                ))
            })?;
        }

        debug!(
            "Mounted {} at {} (read_only: {})",
            self.source.display(),
            target.display(),
            self.read_only
        );
        Ok(())
    }
}

fn propagation_flags(option: &str) -> Option<MsFlags> {
    let (recursive, kind) = match option.strip_prefix('r') {
        Some(kind) => (true, kind),
        None => (false, option),
    };
    let flags = match kind {
        "private" => MsFlags::MS_PRIVATE,
        "shared" => MsFlags::MS_SHARED,
        "slave" => MsFlags::MS_SLAVE,
        "unbindable" => MsFlags::MS_UNBINDABLE,
        _ => return None,
    };
    Some(if recursive { flags | MsFlags::MS_REC } else { flags })
}

fn create_mountpoint(source: &Path, target: &Path) -> Result<()> {
    let source_meta = fs::metadata(source).map_err(|e| SandboxError::Open {
        path: source.to_path_buf(),
        source: e,
    })?;
    if source_meta.is_dir() {
        fs::create_dir_all(target)?;
    } else if !target.exists() {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::File::create(target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(options: &[&str]) -> MountConfig {
        MountConfig {
            from: PathBuf::from("/usr/lib/jvm"),
            to: PathBuf::from("/opt/jvm"),
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_options() {
        let bind = BindMount::parse(&config(&["rbind", "ro", "nosuid", "nodev"])).unwrap();
        assert!(bind.recursive);
        assert!(bind.read_only);
        assert_eq!(
            bind.remount_flags(),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_RDONLY
        );
    }

    #[test]
    fn test_plain_bind_needs_no_remount() {
        let bind = BindMount::parse(&config(&[])).unwrap();
        assert!(!bind.recursive);
        assert!(bind.remount_flags().is_empty());
    }

    #[test]
    fn test_unknown_option_is_config_error() {
        let err = config(&["ro", "loud"]).validate(2).unwrap_err();
        assert!(err.to_string().contains("mounts[2].options"));
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn test_exec_is_accepted() {
        let config = config(&["exec"]);
        assert!(config.validate(0).is_ok());
        let bind = BindMount::parse(&config).unwrap();
        assert!(bind.remount_flags().is_empty());
    }

    #[test]
    fn test_inverse_options_clear_earlier_flags() {
        let bind =
            BindMount::parse(&config(&["nosuid", "nodev", "noexec", "suid", "dev", "exec"]))
                .unwrap();
        assert!(bind.remount_flags().is_empty());
    }

    #[test]
    fn test_propagation_options() {
        let bind = BindMount::parse(&config(&["rbind", "rprivate"])).unwrap();
        assert_eq!(
            bind.propagation,
            Some(MsFlags::MS_PRIVATE | MsFlags::MS_REC)
        );
        let bind = BindMount::parse(&config(&["bind", "slave"])).unwrap();
        assert_eq!(bind.propagation, Some(MsFlags::MS_SLAVE));
        assert!(BindMount::parse(&config(&["rshared"])).is_ok());
        assert!(BindMount::parse(&config(&["runbindable"])).is_ok());
        assert_eq!(BindMount::parse(&config(&[])).unwrap().propagation, None);
    }

    #[test]
    fn test_relative_paths_rejected() {
        let mut relative = config(&[]);
        relative.to = PathBuf::from("opt/jvm");
        assert!(relative.validate(0).is_err());
    }

    #[test]
    fn test_target_is_under_root() {
        let bind = BindMount::parse(&config(&[])).unwrap();
        assert_eq!(
            bind.target(Path::new("/srv/merged")),
            PathBuf::from("/srv/merged/opt/jvm")
        );
    }

    #[test]
    fn test_options_default_to_empty() {
        let config: MountConfig =
            serde_json::from_str(r#"{"from":"/a","to":"/b"}"#).unwrap();
        assert!(config.options.is_empty());
    }
}
