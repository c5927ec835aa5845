//! sandbox-cgroup: Cgroup v2 limits, cgroup placement and per-process rlimits
//!
//! The supervisor creates and limits the sandbox cgroup and reads its
//! counters afterwards; the sandboxed child applies the rlimits itself.

pub mod cgroup;
pub mod resolver;
pub mod rlimit;

pub use cgroup::{
    cpu_shares_to_weight, enable_subtree_controllers, parse_memory_events, Cgroup, CgroupConfig,
    CpuUsage,
};
pub use resolver::{
    cgroup_root_path, sandbox_leaf_name, CgroupPathResolver, ResolvedCgroup, ScopeProvider,
    SessionScope,
};
pub use rlimit::{RlimitConfig, RlimitItem};
