//! Overlay filesystem that becomes the sandbox root
//!
//! The supervisor checks the four overlay directories and hands a serialized
//! [`OverlayConfig`] to the child, which performs the mount inside its own
//! mount namespace.

use log::{debug, info};
use nix::mount::{mount, MsFlags};
use nix::unistd::{chown, Gid, Uid};
use sandbox_core::{Result, SandboxError};
use sandbox_namespace::UserNamespaceConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Lower layer must be readable and traversable by group and other
const LOWER_REQUIRED: u32 = 0o055;
/// Upper layer must be fully accessible to group and other
const UPPER_REQUIRED: u32 = 0o077;
/// Merged root is owner-only
const MERGED_REQUIRED: u32 = 0o700;
const MERGED_FORBIDDEN: u32 = 0o077;

/// Overlay filesystem configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OverlayConfig {
    pub lower_dir: PathBuf,
    pub upper_dir: PathBuf,
    pub work_dir: PathBuf,
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    fn dirs(&self) -> [(&'static str, &Path); 4] {
        [
            ("lower_dir", &self.lower_dir),
            ("upper_dir", &self.upper_dir),
            ("work_dir", &self.work_dir),
            ("merged_dir", &self.merged_dir),
        ]
    }

    /// All four directories must be distinct absolute paths
    pub fn validate(&self) -> Result<()> {
        let dirs = self.dirs();
        for (i, (name, dir)) in dirs.iter().enumerate() {
            if !dir.is_absolute() {
                return Err(SandboxError::invalid_config(
                    format!("overlayfs.{}", name),
                    "must be an absolute path",
                ));
            }
            if dirs[..i].iter().any(|(_, other)| other == dir) {
                return Err(SandboxError::invalid_config(
                    format!("overlayfs.{}", name),
                    "must differ from the other overlay directories",
                ));
            }
        }
        Ok(())
    }

    /// Inverse of the payload produced by [`prepare`]
    pub fn from_serialized(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| SandboxError::invalid_config("overlayfs", e.to_string()))
    }

    pub fn mount_options(&self, user_namespace: bool) -> Result<String> {
        let utf8 = |name: &str, dir: &Path| -> Result<String> {
            dir.to_str().map(str::to_string).ok_or_else(|| {
                SandboxError::invalid_config(format!("overlayfs.{}", name), "is not valid UTF-8")
            })
        };
        let mut options = format!(
            "lowerdir={},upperdir={},workdir={}",
            utf8("lower_dir", &self.lower_dir)?,
            utf8("upper_dir", &self.upper_dir)?,
            utf8("work_dir", &self.work_dir)?
        );
        if user_namespace {
            options.push_str(",userxattr");
        }
        Ok(options)
    }

    /// Mount the overlay on the merged directory.
    /// Runs in the sandboxed child, inside its private mount namespace.
    pub fn mount(&self, user_namespace: bool) -> Result<()> {
        let options = self.mount_options(user_namespace)?;
        mount(
            Some("overlay"),
            &self.merged_dir,
            Some("overlay"),
            MsFlags::empty(),
            Some(options.as_str()),
        )
        .map_err(|e| {
            SandboxError::Syscall(format!(
                "Failed to mount overlay on {}: {}",
                self.merged_dir.display(),
                e
            ))
        })
    }
}

fn mode_of(name: &str, dir: &Path) -> Result<u32> {
    let metadata = fs::metadata(dir).map_err(|e| {
        SandboxError::precondition(dir, format!("cannot stat {}: {}", name, e))
    })?;
    if !metadata.is_dir() {
        return Err(SandboxError::precondition(
            dir,
            format!("{} is not a directory", name),
        ));
    }
    Ok(metadata.permissions().mode() & 0o777)
}

fn check_permission(name: &str, dir: &Path, required: u32, forbidden: u32) -> Result<()> {
    let mode = mode_of(name, dir)?;
    if mode & required != required {
        return Err(SandboxError::precondition(
            dir,
            format!(
                "{} has mode {:o}, missing required bits {:o}",
                name,
                mode,
                required & !mode
            ),
        ));
    }
    if mode & forbidden != 0 {
        return Err(SandboxError::precondition(
            dir,
            format!(
                "{} has mode {:o}, must not grant {:o}",
                name,
                mode,
                mode & forbidden
            ),
        ));
    }
    Ok(())
}

fn ensure_empty(name: &str, dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(dir).map_err(|e| {
        SandboxError::precondition(dir, format!("cannot list {}: {}", name, e))
    })?;
    if entries.next().is_some() {
        return Err(SandboxError::precondition(
            dir,
            format!("{} is not empty", name),
        ));
    }
    Ok(())
}

/// Check the overlay directories and produce the payload the child mounts from.
///
/// Nothing is created or cleaned: a stale work directory is reported, not
/// removed. With remapping enabled the writable layers are handed to the host
/// identity backing container root.
pub fn prepare(user_ns: Option<&UserNamespaceConfig>, config: &OverlayConfig) -> Result<String> {
    config.validate()?;

    check_permission("lower_dir", &config.lower_dir, LOWER_REQUIRED, 0)?;
    check_permission("upper_dir", &config.upper_dir, UPPER_REQUIRED, 0)?;
    check_permission(
        "merged_dir",
        &config.merged_dir,
        MERGED_REQUIRED,
        MERGED_FORBIDDEN,
    )?;
    ensure_empty("work_dir", &config.work_dir)?;

    if let Some(user_ns) = user_ns.filter(|u| u.enabled) {
        let uid = Uid::from_raw(user_ns.root_uid);
        let gid = Gid::from_raw(user_ns.root_gid);
        for (name, dir) in [
            ("upper_dir", &config.upper_dir),
            ("merged_dir", &config.merged_dir),
        ] {
            chown(dir.as_path(), Some(uid), Some(gid)).map_err(|e| {
                SandboxError::precondition(dir, format!("cannot chown {}: {}", name, e))
            })?;
            debug!("Changed owner of {} to {}:{}", dir.display(), uid, gid);
        }
    }

    let payload = serde_json::to_string(config)
        .map_err(|e| SandboxError::invalid_config("overlayfs", e.to_string()))?;
    info!("Overlay root prepared at {}", config.merged_dir.display());
    Ok(payload)
}
