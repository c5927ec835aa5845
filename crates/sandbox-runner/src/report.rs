//! Supervision results and the judge-facing report

use nix::sys::signal::Signal;
use sandbox_cgroup::CpuUsage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Terminal state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Exited(i32),
    Signaled(i32),
    /// Killed by the monitor after the wall clock budget ran out
    TimedOut,
    /// The exit status could not be collected
    Unknown,
}

/// Produced once per sandbox, after telemetry has been read
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub outcome: Outcome,
    pub wall_time: Duration,
    pub oom_killed: bool,
    /// `None` when `memory.peak` could not be read
    pub peak_memory_bytes: Option<u64>,
    pub cpu_usage: Option<CpuUsage>,
    /// Telemetry reads that failed, reported next to the outcome
    pub telemetry_errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Normal,
    RuntimeError,
    SignalTerminate,
    UserTimeLimitExceeded,
    WallTimeLimitExceeded,
    MemoryLimitExceeded,
    OutputLimitExceeded,
    Unknown,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "NORMAL",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::SignalTerminate => "SIGNAL_TERMINATE",
            Self::UserTimeLimitExceeded => "USER_TIME_LIMIT_EXCEEDED",
            Self::WallTimeLimitExceeded => "WALL_TIME_LIMIT_EXCEEDED",
            Self::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            Self::OutputLimitExceeded => "OUTPUT_LIMIT_EXCEEDED",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionReport {
    pub status: ExecutionStatus,
    pub exit_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    pub wall_time_ms: u64,
    pub cpu_user_time_ms: u64,
    pub cpu_kernel_time_ms: u64,
    pub memory_usage_kib: u64,
}

fn signal_name(signal: i32) -> String {
    Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("SIG{}", signal))
}

impl ExecutionResult {
    pub fn status(&self) -> ExecutionStatus {
        if self.oom_killed {
            return ExecutionStatus::MemoryLimitExceeded;
        }
        match self.outcome {
            Outcome::TimedOut => ExecutionStatus::WallTimeLimitExceeded,
            Outcome::Signaled(libc::SIGXFSZ) => ExecutionStatus::OutputLimitExceeded,
            Outcome::Signaled(libc::SIGXCPU) => ExecutionStatus::UserTimeLimitExceeded,
            Outcome::Signaled(_) => ExecutionStatus::SignalTerminate,
            Outcome::Exited(0) => ExecutionStatus::Normal,
            Outcome::Exited(_) => ExecutionStatus::RuntimeError,
            Outcome::Unknown => ExecutionStatus::Unknown,
        }
    }

    pub fn report(&self) -> ExecutionReport {
        let (exit_code, signal) = match self.outcome {
            Outcome::Exited(code) => (code as i64, None),
            Outcome::Signaled(signal) => (128 + signal as i64, Some(signal_name(signal))),
            Outcome::TimedOut => (128 + libc::SIGKILL as i64, Some(signal_name(libc::SIGKILL))),
            Outcome::Unknown => (-1, None),
        };
        let cpu = self.cpu_usage.unwrap_or_default();

        ExecutionReport {
            status: self.status(),
            exit_code,
            signal,
            wall_time_ms: self.wall_time.as_millis() as u64,
            cpu_user_time_ms: cpu.user_usec / 1000,
            cpu_kernel_time_ms: cpu.system_usec / 1000,
            memory_usage_kib: self.peak_memory_bytes.unwrap_or(0) / 1024,
        }
    }
}
