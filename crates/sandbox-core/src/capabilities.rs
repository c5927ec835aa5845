//! Runtime detection of host features the sandbox relies on
//!
//! Probes the running kernel and installed helpers so the CLI can explain why a
//! launch would fail before trying it, and so `Auto` privilege resolution has
//! something to decide on.

use log::debug;
use std::path::Path;

pub const NEWUIDMAP_PATH: &str = "/usr/bin/newuidmap";
pub const NEWGIDMAP_PATH: &str = "/usr/bin/newgidmap";

/// Detected host capabilities
#[derive(Debug, Clone)]
pub struct SystemCapabilities {
    /// Running as root (euid == 0)
    pub has_root: bool,
    /// Unprivileged user namespaces are available
    pub has_user_namespaces: bool,
    /// Cgroup v2 unified hierarchy is mounted
    pub has_cgroup_v2: bool,
    /// The cgroup the current process lives in is writable
    pub has_cgroup_delegation: bool,
    /// `newuidmap`/`newgidmap` are installed (multi-range maps without root)
    pub has_id_map_helpers: bool,
    /// The kernel knows the overlay filesystem
    pub has_overlayfs: bool,
}

impl SystemCapabilities {
    /// Detect all capabilities on the current system
    pub fn detect() -> Self {
        let caps = Self {
            has_root: detect_root(),
            has_user_namespaces: detect_user_namespaces(),
            has_cgroup_v2: detect_cgroup_v2(),
            has_cgroup_delegation: detect_cgroup_delegation(),
            has_id_map_helpers: Path::new(NEWUIDMAP_PATH).exists()
                && Path::new(NEWGIDMAP_PATH).exists(),
            has_overlayfs: detect_overlayfs(),
        };
        debug!("Detected host capabilities: {:?}", caps);
        caps
    }

    /// Rootless launches need user namespaces, the map helpers and a delegated cgroup
    pub fn can_run_rootless(&self) -> bool {
        self.has_user_namespaces && self.has_id_map_helpers && self.has_cgroup_delegation
    }

    /// Rooted launches write the cgroup hierarchy directly
    pub fn can_run_rooted(&self) -> bool {
        self.has_root && self.has_cgroup_v2
    }

    /// Human-readable summary of capabilities
    pub fn summary(&self) -> String {
        let check = |available: bool| if available { "[ok]" } else { "[--]" };

        [
            format!("{} Root privileges", check(self.has_root)),
            format!("{} User namespaces", check(self.has_user_namespaces)),
            format!("{} Cgroup v2", check(self.has_cgroup_v2)),
            format!("{} Cgroup delegation", check(self.has_cgroup_delegation)),
            format!("{} newuidmap/newgidmap", check(self.has_id_map_helpers)),
            format!("{} Overlay filesystem", check(self.has_overlayfs)),
        ]
        .join("\n")
    }
}

fn detect_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn detect_user_namespaces() -> bool {
    if let Ok(content) = std::fs::read_to_string("/proc/sys/kernel/unprivileged_userns_clone") {
        if content.trim() == "0" {
            return false;
        }
    }

    if let Ok(content) = std::fs::read_to_string("/proc/sys/user/max_user_namespaces") {
        if let Ok(max) = content.trim().parse::<u64>() {
            return max > 0;
        }
    }

    // Unreadable knobs: assume a modern kernel
    true
}

fn detect_cgroup_v2() -> bool {
    Path::new("/sys/fs/cgroup/cgroup.controllers").exists()
}

fn detect_cgroup_delegation() -> bool {
    if detect_root() {
        return true;
    }

    let Ok(content) = std::fs::read_to_string("/proc/self/cgroup") else {
        return false;
    };
    let Some(relative) = content.lines().find_map(|line| line.strip_prefix("0::")) else {
        return false;
    };

    let path = Path::new("/sys/fs/cgroup").join(relative.trim_start_matches('/'));
    let probe = path.join("sandbox-delegation-probe");
    match std::fs::create_dir(&probe) {
        Ok(()) => {
            let _ = std::fs::remove_dir(&probe);
            true
        }
        Err(_) => false,
    }
}

fn detect_overlayfs() -> bool {
    std::fs::read_to_string("/proc/filesystems")
        .map(|content| {
            content
                .lines()
                .any(|line| line.split_whitespace().last() == Some("overlay"))
        })
        .unwrap_or(false)
}
