//! sandbox-core: shared types, errors, and capability detection for the sandbox runner
//!
//! This crate provides the foundational types used by all sub-crates:
//! - Error taxonomy and Result alias
//! - Host capability detection (user namespaces, cgroup v2, id map helpers, overlayfs)
//! - Rootless/rooted privilege resolution

pub mod capabilities;
pub mod error;
pub mod privilege;

pub use error::{Result, SandboxError};
pub use privilege::{PrivilegeMode, ResolvedMode};
