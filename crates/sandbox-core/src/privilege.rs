//! Rootless vs. rooted execution

use crate::capabilities::SystemCapabilities;

/// How the supervisor obtains its cgroup and ID mappings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivilegeMode {
    /// Unprivileged: cgroup comes from the session manager, maps go through newuidmap.
    Rootless,

    /// Root: writes the cgroup hierarchy and the ID maps directly.
    Rooted,

    /// Rooted when running as root with cgroup v2, rootless otherwise.
    #[default]
    Auto,
}

impl PrivilegeMode {
    /// Resolve to a concrete mode based on system capabilities
    pub fn resolve(&self, caps: &SystemCapabilities) -> ResolvedMode {
        match self {
            PrivilegeMode::Rooted => ResolvedMode::Rooted,
            PrivilegeMode::Rootless => ResolvedMode::Rootless,
            PrivilegeMode::Auto => {
                if caps.can_run_rooted() {
                    ResolvedMode::Rooted
                } else {
                    ResolvedMode::Rootless
                }
            }
        }
    }
}

/// A resolved (non-Auto) privilege mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedMode {
    Rootless,
    Rooted,
}

impl ResolvedMode {
    pub fn is_rootless(&self) -> bool {
        matches!(self, ResolvedMode::Rootless)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(has_root: bool, has_cgroup_v2: bool) -> SystemCapabilities {
        SystemCapabilities {
            has_root,
            has_user_namespaces: true,
            has_cgroup_v2,
            has_cgroup_delegation: has_root,
            has_id_map_helpers: true,
            has_overlayfs: true,
        }
    }

    #[test]
    fn default_is_auto() {
        assert_eq!(PrivilegeMode::default(), PrivilegeMode::Auto);
    }

    #[test]
    fn explicit_modes_ignore_capabilities() {
        assert_eq!(
            PrivilegeMode::Rooted.resolve(&caps(false, false)),
            ResolvedMode::Rooted
        );
        assert_eq!(
            PrivilegeMode::Rootless.resolve(&caps(true, true)),
            ResolvedMode::Rootless
        );
    }

    #[test]
    fn auto_resolves_to_rooted_when_root_with_cgroups() {
        assert_eq!(
            PrivilegeMode::Auto.resolve(&caps(true, true)),
            ResolvedMode::Rooted
        );
    }

    #[test]
    fn auto_resolves_to_rootless_without_root() {
        let resolved = PrivilegeMode::Auto.resolve(&caps(false, true));
        assert!(resolved.is_rootless());
    }
}
