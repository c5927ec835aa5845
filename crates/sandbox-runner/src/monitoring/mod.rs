//! Monitoring layer: deadline enforcement and post-mortem cgroup telemetry

pub mod monitor;

pub use monitor::{ResourceMonitor, TERMINATION_GRACE};
