//! Namespace selection for the sandboxed process

use nix::sched::CloneFlags;

/// Namespaces created for the sandboxed process
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceConfig {
    pub pid: bool,
    pub ipc: bool,
    pub net: bool,
    pub mount: bool,
    pub uts: bool,
    pub cgroup: bool,
    pub user: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self::isolated(false)
    }
}

impl NamespaceConfig {
    /// Every namespace the sandbox uses; the user namespace only when remapping is enabled
    pub fn isolated(user: bool) -> Self {
        Self {
            pid: true,
            ipc: true,
            net: true,
            mount: true,
            uts: true,
            cgroup: true,
            user,
        }
    }

    /// Convert to clone flags
    pub fn to_clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        if self.pid { flags |= CloneFlags::CLONE_NEWPID; }
        if self.ipc { flags |= CloneFlags::CLONE_NEWIPC; }
        if self.net { flags |= CloneFlags::CLONE_NEWNET; }
        if self.mount { flags |= CloneFlags::CLONE_NEWNS; }
        if self.uts { flags |= CloneFlags::CLONE_NEWUTS; }
        if self.cgroup { flags |= CloneFlags::CLONE_NEWCGROUP; }
        if self.user { flags |= CloneFlags::CLONE_NEWUSER; }
        flags
    }

    pub fn enabled_count(&self) -> usize {
        [self.pid, self.ipc, self.net, self.mount, self.uts, self.cgroup, self.user]
            .iter().filter(|&&x| x).count()
    }
}
