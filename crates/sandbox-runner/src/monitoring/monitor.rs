//! Supervision of a started sandbox: timeout enforcement and cgroup telemetry
//!
//! A waiter thread blocks in [`ContainerHandle::wait`] while the monitor
//! waits on a channel with the wall clock budget as deadline. Telemetry is
//! read once the process is dead; the counters it reads never decrease.

use log::{debug, info, warn};
use sandbox_cgroup::Cgroup;
use sandbox_core::Result;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::LimitsConfig;
use crate::report::{ExecutionResult, Outcome};
use crate::runtime::{ContainerHandle, ExitStatus};

/// Time between SIGTERM and the forced kill
pub const TERMINATION_GRACE: Duration = Duration::from_millis(100);
/// How long a force-killed process may take to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Supervises one started sandbox
pub struct ResourceMonitor {
    time_limit: Duration,
    cgroup_path: PathBuf,
}

impl ResourceMonitor {
    pub fn new(limits: &LimitsConfig, cgroup_path: impl AsRef<Path>) -> Self {
        Self {
            time_limit: limits.time_limit(),
            cgroup_path: cgroup_path.as_ref().to_path_buf(),
        }
    }

    /// Wait for the process, enforce the deadline and collect telemetry.
    ///
    /// The handle is dropped only after telemetry has been read. When no exit
    /// status can be obtained the outcome is [`Outcome::Unknown`] and the
    /// reason is recorded next to the telemetry errors.
    pub fn supervise(&self, handle: Box<dyn ContainerHandle>) -> Result<ExecutionResult> {
        let handle: Arc<dyn ContainerHandle> = Arc::from(handle);
        let start = Instant::now();

        let (tx, rx) = mpsc::channel();
        let waiter_handle = Arc::clone(&handle);
        let waiter = thread::spawn(move || {
            let _ = tx.send(waiter_handle.wait());
        });

        let mut telemetry_errors = Vec::new();
        let outcome = match rx.recv_timeout(self.time_limit) {
            Ok(status) => {
                let _ = waiter.join();
                match status {
                    Ok(ExitStatus::Exited(code)) => Outcome::Exited(code),
                    Ok(ExitStatus::Signaled(signal)) => Outcome::Signaled(signal),
                    Err(e) => {
                        telemetry_errors.push(format!("exit status unavailable: {}", e));
                        Outcome::Unknown
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                info!(
                    "Time limit of {:?} exceeded, terminating sandbox",
                    self.time_limit
                );
                if let Some(error) = escalate(handle.as_ref(), &rx) {
                    telemetry_errors.push(error);
                } else {
                    let _ = waiter.join();
                }
                Outcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => {
                telemetry_errors.push("waiter thread exited without a status".to_string());
                Outcome::Unknown
            }
        };
        let wall_time = start.elapsed();
        debug!("Sandbox finished with {:?} after {:?}", outcome, wall_time);

        let cgroup = Cgroup::open(&self.cgroup_path);
        let oom_killed = match cgroup.oom_kill_count() {
            Ok(count) => count > 0,
            Err(e) => {
                telemetry_errors.push(e.to_string());
                false
            }
        };
        let peak_memory_bytes = cgroup
            .memory_peak()
            .map_err(|e| telemetry_errors.push(e.to_string()))
            .ok();
        let cpu_usage = cgroup
            .cpu_usage()
            .map_err(|e| telemetry_errors.push(e.to_string()))
            .ok();

        for error in &telemetry_errors {
            warn!("Telemetry unavailable: {}", error);
        }
        drop(handle);

        Ok(ExecutionResult {
            outcome,
            wall_time,
            oom_killed,
            peak_memory_bytes,
            cpu_usage,
            telemetry_errors,
        })
    }
}

/// SIGTERM, a short grace period, then kill. Returns an error message if the
/// process still could not be reaped.
fn escalate(
    handle: &dyn ContainerHandle,
    rx: &mpsc::Receiver<Result<ExitStatus>>,
) -> Option<String> {
    if let Err(e) = handle.terminate(false) {
        warn!("Graceful termination failed: {}", e);
    }
    if rx.recv_timeout(TERMINATION_GRACE).is_ok() {
        return None;
    }

    if let Err(e) = handle.terminate(true) {
        warn!("Forced termination failed: {}", e);
    }
    match rx.recv_timeout(REAP_TIMEOUT) {
        Ok(_) => None,
        Err(_) => Some(format!(
            "process was not reaped within {:?} after SIGKILL",
            REAP_TIMEOUT
        )),
    }
}
