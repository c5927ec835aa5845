//! Launcher and monitor behaviour against a scripted runtime
//!
//! No namespaces or cgroups are touched: the fake runtime writes the cgroup
//! counter files into a temporary hierarchy and plays back an exit status.

use sandbox_cgroup::{CgroupPathResolver, ResolvedCgroup, ScopeProvider};
use sandbox_runner::{
    ContainerHandle, ContainerLauncher, ContainerRuntime, ContainerSpec, ExecutionStatus,
    ExitStatus, FdConfig, Outcome, Result, SandboxError, SandboxSpec, DEFAULT_CONTAINER_ID,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Copy)]
enum Script {
    Exit(ExitStatus),
    /// Runs until terminated; ignores SIGTERM unless `honor_sigterm`
    Hang { honor_sigterm: bool },
    OomKill,
    /// Killed by the OOM killer, but the exit status cannot be collected
    LostStatus,
    FailStart,
}

#[derive(Default)]
struct Calls {
    created: usize,
    terminations: Vec<bool>,
    merged_output: Option<bool>,
    identity: Option<(u32, u32)>,
}

struct FakeRuntime {
    script: Script,
    write_telemetry: bool,
    calls: Arc<Mutex<Calls>>,
}

struct FakeHandle {
    script: Script,
    cgroup_path: PathBuf,
    status: Mutex<Option<ExitStatus>>,
    exited: Condvar,
    calls: Arc<Mutex<Calls>>,
}

impl ContainerRuntime for FakeRuntime {
    fn create(&self, spec: ContainerSpec) -> Result<Box<dyn ContainerHandle>> {
        let mut calls = self.calls.lock().unwrap();
        calls.created += 1;
        calls.merged_output = Some(spec.fds.is_merged());
        calls.identity = Some(spec.identity);

        fs::create_dir_all(&spec.cgroup_path)?;
        if self.write_telemetry {
            let oom_kill = matches!(self.script, Script::OomKill | Script::LostStatus) as u8;
            fs::write(
                spec.cgroup_path.join("memory.events"),
                format!("low 0\nhigh 0\nmax 4\noom 1\noom_kill {}\n", oom_kill),
            )?;
            fs::write(spec.cgroup_path.join("memory.peak"), "10485760\n")?;
            fs::write(
                spec.cgroup_path.join("cpu.stat"),
                "usage_usec 250000\nuser_usec 200000\nsystem_usec 50000\n",
            )?;
        }

        let status = match self.script {
            Script::Exit(status) => Some(status),
            Script::OomKill => Some(ExitStatus::Signaled(libc::SIGKILL)),
            _ => None,
        };
        Ok(Box::new(FakeHandle {
            script: self.script,
            cgroup_path: spec.cgroup_path.clone(),
            status: Mutex::new(status),
            exited: Condvar::new(),
            calls: Arc::clone(&self.calls),
        }))
    }
}

impl ContainerHandle for FakeHandle {
    fn start(&self) -> Result<()> {
        match self.script {
            Script::FailStart => Err(SandboxError::Runtime(
                "execve failed: command not found: main".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn wait(&self) -> Result<ExitStatus> {
        if let Script::LostStatus = self.script {
            return Err(SandboxError::Syscall("waitpid failed: ECHILD".to_string()));
        }
        let mut status = self.status.lock().unwrap();
        loop {
            if let Some(status) = *status {
                return Ok(status);
            }
            status = self.exited.wait(status).unwrap();
        }
    }

    fn terminate(&self, force: bool) -> Result<()> {
        self.calls.lock().unwrap().terminations.push(force);
        let honored = match self.script {
            Script::Hang { honor_sigterm } => force || honor_sigterm,
            _ => true,
        };
        if honored {
            let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
            let mut status = self.status.lock().unwrap();
            status.get_or_insert(ExitStatus::Signaled(signal));
            self.exited.notify_all();
        }
        Ok(())
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.cgroup_path);
    }
}

struct NoScope;

impl ScopeProvider for NoScope {
    fn resolve_scope(&self) -> Result<ResolvedCgroup> {
        Err(SandboxError::Cgroup("no delegated scope in tests".to_string()))
    }
}

struct Fixture {
    tmp: TempDir,
    calls: Arc<Mutex<Calls>>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("cgroup")).unwrap();
        for (dir, mode) in [
            ("lower", 0o755),
            ("upper", 0o777),
            ("work", 0o700),
            ("merged", 0o700),
        ] {
            let path = tmp.path().join(dir);
            fs::create_dir(&path).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        }
        Self {
            tmp,
            calls: Arc::new(Mutex::new(Calls::default())),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.tmp.path().join(name)
    }

    fn spec(&self, time_ms: u64) -> SandboxSpec {
        let document = serde_json::json!({
            "overlayfs": {
                "lower_dir": self.path("lower"),
                "upper_dir": self.path("upper"),
                "work_dir": self.path("work"),
                "merged_dir": self.path("merged"),
            },
            "cwd": "/seele",
            "command": ["main"],
            "paths": ["/usr/bin", "/bin"],
            "limits": {
                "time_ms": time_ms,
                "cgroup": {"memory": 67108864, "pids_limit": 16},
                "rlimit": {
                    "core": {"hard": 0, "soft": 0},
                    "fsize": {"hard": 65536, "soft": 65536},
                    "no_file": {"hard": 32, "soft": 32}
                }
            }
        });
        SandboxSpec::from_json(&document.to_string()).unwrap()
    }

    fn launcher(&self, script: Script, write_telemetry: bool) -> ContainerLauncher<FakeRuntime> {
        let runtime = FakeRuntime {
            script,
            write_telemetry,
            calls: Arc::clone(&self.calls),
        };
        let resolver = CgroupPathResolver::with_mountpoint(self.path("cgroup"), Box::new(NoScope));
        ContainerLauncher::new(runtime, resolver)
    }

    fn created(&self) -> usize {
        self.calls.lock().unwrap().created
    }

    fn terminations(&self) -> Vec<bool> {
        self.calls.lock().unwrap().terminations.clone()
    }
}

fn sandbox_cgroup(root: &Path) -> PathBuf {
    root.join(format!("sandbox-{}", std::process::id()))
}

#[test]
fn normal_exit_reads_telemetry_before_release() {
    let fixture = Fixture::new();
    let result = fixture
        .launcher(Script::Exit(ExitStatus::Exited(0)), true)
        .launch(&fixture.spec(1000))
        .unwrap();

    assert_eq!(result.outcome, Outcome::Exited(0));
    assert!(!result.oom_killed);
    assert_eq!(result.peak_memory_bytes, Some(10 * 1024 * 1024));
    assert!(result.telemetry_errors.is_empty(), "{:?}", result.telemetry_errors);

    let report = result.report();
    assert_eq!(report.status, ExecutionStatus::Normal);
    assert_eq!(report.cpu_user_time_ms, 200);
    assert_eq!(report.cpu_kernel_time_ms, 50);
    assert_eq!(report.memory_usage_kib, 10240);

    // Handle released after supervision
    assert!(!sandbox_cgroup(&fixture.path("cgroup")).exists());
    assert!(fixture.terminations().is_empty());
}

#[test]
fn non_zero_exit_is_a_result_not_an_error() {
    let fixture = Fixture::new();
    let result = fixture
        .launcher(Script::Exit(ExitStatus::Exited(3)), true)
        .launch(&fixture.spec(1000))
        .unwrap();
    assert_eq!(result.outcome, Outcome::Exited(3));
    assert_eq!(result.report().status, ExecutionStatus::RuntimeError);
}

#[test]
fn timeout_escalates_to_forced_kill() {
    let fixture = Fixture::new();
    let result = fixture
        .launcher(Script::Hang { honor_sigterm: false }, true)
        .launch(&fixture.spec(200))
        .unwrap();

    assert_eq!(result.outcome, Outcome::TimedOut);
    assert!(result.wall_time >= Duration::from_millis(200));
    assert!(result.wall_time < Duration::from_secs(3));
    assert_eq!(fixture.terminations(), vec![false, true]);
    assert_eq!(result.report().status, ExecutionStatus::WallTimeLimitExceeded);
}

#[test]
fn timeout_stops_at_sigterm_when_honored() {
    let fixture = Fixture::new();
    let result = fixture
        .launcher(Script::Hang { honor_sigterm: true }, true)
        .launch(&fixture.spec(100))
        .unwrap();

    assert_eq!(result.outcome, Outcome::TimedOut);
    assert_eq!(fixture.terminations(), vec![false]);
}

#[test]
fn oom_kill_is_reported_regardless_of_signal() {
    let fixture = Fixture::new();
    let result = fixture
        .launcher(Script::OomKill, true)
        .launch(&fixture.spec(1000))
        .unwrap();

    assert!(result.oom_killed);
    assert_eq!(result.outcome, Outcome::Signaled(libc::SIGKILL));
    assert_eq!(result.report().status, ExecutionStatus::MemoryLimitExceeded);
}

#[test]
fn lost_exit_status_keeps_telemetry() {
    let fixture = Fixture::new();
    let result = fixture
        .launcher(Script::LostStatus, true)
        .launch(&fixture.spec(1000))
        .unwrap();

    assert_eq!(result.outcome, Outcome::Unknown);
    assert!(result.oom_killed);
    assert_eq!(result.peak_memory_bytes, Some(10 * 1024 * 1024));
    assert_eq!(result.telemetry_errors.len(), 1);
    assert!(result.telemetry_errors[0].contains("ECHILD"));
    assert_eq!(result.report().status, ExecutionStatus::MemoryLimitExceeded);
    assert!(fixture.terminations().is_empty());
}

#[test]
fn telemetry_failures_accompany_the_outcome() {
    let fixture = Fixture::new();
    let result = fixture
        .launcher(Script::Exit(ExitStatus::Exited(0)), false)
        .launch(&fixture.spec(1000))
        .unwrap();

    assert_eq!(result.outcome, Outcome::Exited(0));
    assert!(!result.oom_killed);
    assert_eq!(result.peak_memory_bytes, None);
    assert_eq!(result.cpu_usage, None);
    assert_eq!(result.telemetry_errors.len(), 3);
}

#[test]
fn start_failure_is_a_setup_error() {
    let fixture = Fixture::new();
    let err = fixture
        .launcher(Script::FailStart, true)
        .launch(&fixture.spec(1000))
        .unwrap_err();
    assert!(matches!(err, SandboxError::Runtime(_)));
    assert!(err.to_string().contains("command not found"));
    assert!(!sandbox_cgroup(&fixture.path("cgroup")).exists());
}

#[test]
fn fd_conflict_stops_before_create() {
    let fixture = Fixture::new();
    let mut spec = fixture.spec(1000);
    spec.fd = Some(FdConfig {
        stdout_to_stderr: true,
        stderr_to_stdout: true,
        ..Default::default()
    });

    let err = fixture
        .launcher(Script::Exit(ExitStatus::Exited(0)), true)
        .launch(&spec)
        .unwrap_err();
    assert!(matches!(err, SandboxError::FdConflict(_)));
    assert_eq!(fixture.created(), 0);
}

#[test]
fn merged_output_reaches_runtime() {
    let fixture = Fixture::new();
    let mut spec = fixture.spec(1000);
    spec.fd = Some(FdConfig {
        stdout: Some(fixture.path("output.txt")),
        stderr_to_stdout: true,
        ..Default::default()
    });

    fixture
        .launcher(Script::Exit(ExitStatus::Exited(0)), true)
        .launch(&spec)
        .unwrap();
    assert_eq!(fixture.calls.lock().unwrap().merged_output, Some(true));
    assert!(fixture.path("output.txt").exists());
}

#[test]
fn command_without_remapping_runs_unprivileged() {
    let fixture = Fixture::new();
    fixture
        .launcher(Script::Exit(ExitStatus::Exited(0)), true)
        .launch(&fixture.spec(1000))
        .unwrap();
    assert_eq!(
        fixture.calls.lock().unwrap().identity,
        Some((DEFAULT_CONTAINER_ID, DEFAULT_CONTAINER_ID))
    );
}

#[test]
fn dirty_work_dir_stops_before_create() {
    let fixture = Fixture::new();
    fs::write(fixture.path("work/index"), "stale").unwrap();

    let err = fixture
        .launcher(Script::Exit(ExitStatus::Exited(0)), true)
        .launch(&fixture.spec(1000))
        .unwrap_err();
    match err {
        SandboxError::Precondition { path, .. } => assert_eq!(path, fixture.path("work")),
        other => panic!("expected precondition error, got {other}"),
    }
    assert_eq!(fixture.created(), 0);
}

#[test]
fn rootless_without_scope_fails_to_resolve() {
    let fixture = Fixture::new();
    let err = fixture
        .launcher(Script::Exit(ExitStatus::Exited(0)), true)
        .rootless(true)
        .launch(&fixture.spec(1000))
        .unwrap_err();
    assert!(matches!(err, SandboxError::Cgroup(_)));
    assert_eq!(fixture.created(), 0);
}
