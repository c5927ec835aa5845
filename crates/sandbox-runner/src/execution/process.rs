//! clone(2) based runtime
//!
//! The child is created in fresh namespaces and blocks on a sync pipe until
//! [`ContainerHandle::start`]. Meanwhile the supervisor installs the ID maps
//! and moves it into its cgroup. Init errors travel back over a
//! close-on-exec pipe: EOF there means `execve` succeeded.

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{clone, unshare, CloneFlags};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{
    access, chdir, dup2, execve, pipe2, pivot_root, setgid, setgroups, setuid, AccessFlags, Gid,
    Pid, Uid,
};
use sandbox_cgroup::{enable_subtree_controllers, Cgroup, RlimitConfig};
use sandbox_core::{Result, SandboxError};
use sandbox_fs::{BindMount, OverlayConfig};
use sandbox_namespace::user_ns::write_id_mappings;
use sandbox_namespace::NamespaceConfig;
use std::convert::Infallible;
use std::ffi::CString;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, ExitStatus};

const STACK_SIZE: usize = 256 * 1024;
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const KEYCTL_JOIN_SESSION_KEYRING: libc::c_long = 1;
/// Exit code of a child whose init phase failed
const INIT_FAILURE: i32 = 127;

/// Resolve a program name to an absolute path using PATH semantics.
fn resolve_program_path(
    program: &str,
    env: &[(String, String)],
) -> std::result::Result<String, String> {
    if program.contains('/') {
        return Ok(program.to_string());
    }

    let path_value = env
        .iter()
        .find(|(key, _)| key == "PATH")
        .map(|(_, value)| value.as_str())
        .unwrap_or(DEFAULT_PATH);

    for entry in path_value.split(':') {
        let dir = if entry.is_empty() { "." } else { entry };
        let candidate = Path::new(dir).join(program);

        if access(&candidate, AccessFlags::X_OK).is_ok() {
            return Ok(candidate.to_string_lossy().into_owned());
        }
    }

    Err(format!("execve failed: command not found: {}", program))
}

fn cstring(field: &str, value: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| SandboxError::invalid_config(field, "contains a NUL byte"))
}

/// Everything the child needs after clone, built in the supervisor
struct ChildInit {
    overlay: String,
    user_namespace: bool,
    unshare_cgroup: bool,
    mounts: Vec<BindMount>,
    cwd: PathBuf,
    rlimit: RlimitConfig,
    no_new_keyring: bool,
    identity: (Uid, Gid),
    stdio: [RawFd; 3],
    program: String,
    argv: Vec<CString>,
    env: Vec<(String, String)>,
    envp: Vec<CString>,
    sync_fd: RawFd,
    error_fd: RawFd,
}

impl ChildInit {
    fn new(
        spec: &ContainerSpec,
        sync_fd: RawFd,
        error_fd: RawFd,
        unshare_cgroup: bool,
    ) -> Result<Self> {
        let path = if spec.paths.is_empty() {
            DEFAULT_PATH.to_string()
        } else {
            spec.paths.join(":")
        };
        let env = vec![("PATH".to_string(), path)];
        let envp = env
            .iter()
            .map(|(k, v)| cstring("paths", &format!("{}={}", k, v)))
            .collect::<Result<Vec<_>>>()?;
        let argv = spec
            .command
            .iter()
            .map(|arg| cstring("command", arg))
            .collect::<Result<Vec<_>>>()?;
        let program = spec
            .command
            .first()
            .cloned()
            .ok_or_else(|| SandboxError::invalid_config("command", "must not be empty"))?;

        Ok(Self {
            overlay: spec.overlay.clone(),
            user_namespace: spec.user_namespace.is_some(),
            unshare_cgroup,
            mounts: spec.mounts.clone(),
            cwd: spec.cwd.clone(),
            rlimit: spec.rlimit.clone(),
            no_new_keyring: spec.no_new_keyring,
            identity: (
                Uid::from_raw(spec.identity.0),
                Gid::from_raw(spec.identity.1),
            ),
            stdio: [
                spec.fds.stdin_fd(),
                spec.fds.stdout_fd(),
                spec.fds.stderr_fd(),
            ],
            program,
            argv,
            env,
            envp,
            sync_fd,
            error_fd,
        })
    }

    /// Entry point of the cloned child
    fn run(&self) -> isize {
        let mut buf = [0u8; 1];
        // SAFETY: reading one byte into a local buffer from an fd inherited at clone
        let n = unsafe { libc::read(self.sync_fd, buf.as_mut_ptr() as *mut libc::c_void, 1) };
        if n != 1 {
            // Supervisor went away before start
            unsafe { libc::_exit(INIT_FAILURE) };
        }

        let err = match self.exec() {
            Ok(never) => match never {},
            Err(e) => e.to_string(),
        };
        // SAFETY: error_fd is the write end of the error pipe; the message is a valid buffer
        unsafe {
            libc::write(
                self.error_fd,
                err.as_ptr() as *const libc::c_void,
                err.len(),
            );
            libc::_exit(INIT_FAILURE)
        }
    }

    /// Order of operations:
    /// 1. Private mount propagation
    /// 2. Overlay root, bind mounts, /proc
    /// 3. Pivot into the merged root, detach the old one and chdir
    /// 4. Rlimits and session keyring
    /// 5. Container identity, no new privileges
    /// 6. Standard streams, then execve
    fn exec(&self) -> Result<Infallible> {
        if self.unshare_cgroup {
            unshare(CloneFlags::CLONE_NEWCGROUP)
                .map_err(|e| SandboxError::Namespace(format!("unshare cgroup: {}", e)))?;
        }

        mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None::<&str>,
        )
        .map_err(|e| SandboxError::Syscall(format!("Failed to make / private: {}", e)))?;

        let overlay = OverlayConfig::from_serialized(&self.overlay)?;
        overlay.mount(self.user_namespace)?;
        let root = overlay.merged_dir.as_path();
        for bind in &self.mounts {
            bind.mount(root)?;
        }
        mount_proc(root)?;

        enter_root(root)?;
        chdir(&self.cwd).map_err(|e| {
            SandboxError::Syscall(format!("chdir to {} failed: {}", self.cwd.display(), e))
        })?;

        self.rlimit.apply()?;
        if !self.no_new_keyring {
            join_session_keyring()?;
        }

        let (uid, gid) = self.identity;
        setgroups(&[]).map_err(|e| SandboxError::Syscall(format!("setgroups failed: {}", e)))?;
        setgid(gid).map_err(|e| SandboxError::Syscall(format!("setgid failed: {}", e)))?;
        setuid(uid).map_err(|e| SandboxError::Syscall(format!("setuid failed: {}", e)))?;
        // SAFETY: prctl with integer arguments only
        if unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } != 0 {
            return Err(SandboxError::Syscall(format!(
                "PR_SET_NO_NEW_PRIVS failed: {}",
                Errno::last()
            )));
        }

        for (target, fd) in self.stdio.iter().enumerate() {
            dup2(*fd, target as RawFd)
                .map_err(|e| SandboxError::Syscall(format!("dup2 to {} failed: {}", target, e)))?;
        }

        let program = resolve_program_path(&self.program, &self.env).map_err(SandboxError::Runtime)?;
        let program = cstring("command", &program)?;
        execve(&program, &self.argv, &self.envp)
            .map_err(|e| SandboxError::Runtime(format!("execve failed: {}", e)))
    }
}

/// Make `root` the filesystem root of the mount namespace.
///
/// The old root is stacked under the new one by `pivot_root(".", ".")` and
/// lazily detached, so nothing of the host tree stays reachable.
fn enter_root(root: &Path) -> Result<()> {
    chdir(root).map_err(|e| {
        SandboxError::Syscall(format!("chdir to {} failed: {}", root.display(), e))
    })?;
    pivot_root(".", ".").map_err(|e| SandboxError::Syscall(format!("pivot_root failed: {}", e)))?;
    umount2(".", MntFlags::MNT_DETACH)
        .map_err(|e| SandboxError::Syscall(format!("Failed to detach old root: {}", e)))?;
    chdir("/").map_err(|e| SandboxError::Syscall(format!("chdir to / failed: {}", e)))?;
    Ok(())
}

fn mount_proc(root: &Path) -> Result<()> {
    let target = root.join("proc");
    fs::create_dir_all(&target)?;
    mount(
        Some("proc"),
        &target,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .map_err(|e| SandboxError::Syscall(format!("Failed to mount /proc: {}", e)))
}

fn join_session_keyring() -> Result<()> {
    // SAFETY: keyctl with a NULL name creates an anonymous session keyring
    let ret = unsafe {
        libc::syscall(
            libc::SYS_keyctl,
            KEYCTL_JOIN_SESSION_KEYRING,
            std::ptr::null::<libc::c_char>(),
        )
    };
    if ret < 0 {
        let errno = Errno::last();
        if errno != Errno::ENOSYS {
            return Err(SandboxError::Syscall(format!(
                "Failed to join a new session keyring: {}",
                errno
            )));
        }
    }
    Ok(())
}

/// Runtime that isolates the command with namespaces, an overlay root and a cgroup
#[derive(Debug, Default)]
pub struct NamespaceRuntime;

impl NamespaceRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl ContainerRuntime for NamespaceRuntime {
    fn create(&self, spec: ContainerSpec) -> Result<Box<dyn ContainerHandle>> {
        if let Some(parent) = spec.cgroup_path.parent() {
            enable_subtree_controllers(parent);
        }
        let cgroup = Cgroup::create(&spec.cgroup_path)?;
        cgroup.apply_config(&spec.cgroup)?;

        let namespaces = NamespaceConfig::isolated(spec.user_namespace.is_some());
        // The cgroup namespace is entered after the move into the sandbox cgroup
        let flags = namespaces.to_clone_flags() - CloneFlags::CLONE_NEWCGROUP;

        let (sync_read, sync_write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| SandboxError::Syscall(format!("pipe: {}", e)))?;
        let (error_read, error_write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| SandboxError::Syscall(format!("pipe: {}", e)))?;

        let init = ChildInit::new(
            &spec,
            sync_read.as_raw_fd(),
            error_write.as_raw_fd(),
            namespaces.cgroup,
        )?;

        let mut stack = vec![0u8; STACK_SIZE];
        // SAFETY: without CLONE_VM the child runs on its own copy of the address space
        let pid = unsafe {
            clone(
                Box::new(move || init.run()),
                &mut stack,
                flags,
                Some(Signal::SIGCHLD as i32),
            )
        }
        .map_err(|e| SandboxError::Syscall(format!("clone failed: {}", e)))?;
        info!("Created sandboxed process {}", pid);

        drop(sync_read);
        drop(error_write);

        let handle = NamespaceHandle {
            pid,
            cgroup,
            sync: Mutex::new(Some(File::from(sync_write))),
            errors: Mutex::new(Some(File::from(error_read))),
            reaped: AtomicBool::new(false),
        };

        if let Some(mappings) = &spec.id_mappings {
            write_id_mappings(pid, mappings)?;
        }
        handle.cgroup.add_process(pid)?;
        debug!(
            "Process {} attached to {}",
            pid,
            handle.cgroup.path().display()
        );

        // Our copies of the standard stream files close here; the child keeps its own
        drop(spec);
        Ok(Box::new(handle))
    }
}

/// A child created by [`NamespaceRuntime`]
pub struct NamespaceHandle {
    pid: Pid,
    cgroup: Cgroup,
    sync: Mutex<Option<File>>,
    errors: Mutex<Option<File>>,
    reaped: AtomicBool,
}

impl NamespaceHandle {
    pub fn pid(&self) -> Pid {
        self.pid
    }
}

impl ContainerHandle for NamespaceHandle {
    fn start(&self) -> Result<()> {
        let sync = self
            .sync
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| SandboxError::Runtime("process already started".to_string()))?;
        (&sync).write_all(&[1]).map_err(|e| {
            SandboxError::Runtime(format!("Failed to release process {}: {}", self.pid, e))
        })?;
        drop(sync);

        let mut message = String::new();
        if let Some(mut errors) = self.errors.lock().unwrap_or_else(|e| e.into_inner()).take() {
            errors.read_to_string(&mut message)?;
        }
        if !message.is_empty() {
            return Err(SandboxError::Runtime(message));
        }
        info!("Process {} started", self.pid);
        Ok(())
    }

    fn wait(&self) -> Result<ExitStatus> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    self.reaped.store(true, Ordering::SeqCst);
                    return Ok(ExitStatus::Exited(code));
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    self.reaped.store(true, Ordering::SeqCst);
                    return Ok(ExitStatus::Signaled(signal as i32));
                }
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(e) => return Err(SandboxError::Syscall(format!("waitpid failed: {}", e))),
            }
        }
    }

    fn terminate(&self, force: bool) -> Result<()> {
        if self.reaped.load(Ordering::SeqCst) {
            return Ok(());
        }
        let signal = if force {
            if let Err(e) = self.cgroup.kill_all() {
                warn!("cgroup.kill unavailable, signalling init only: {}", e);
            }
            Signal::SIGKILL
        } else {
            Signal::SIGTERM
        };
        match kill(self.pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(SandboxError::Syscall(format!(
                "Failed to send {} to {}: {}",
                signal, self.pid, e
            ))),
        }
    }
}

impl Drop for NamespaceHandle {
    fn drop(&mut self) {
        if !self.reaped.load(Ordering::SeqCst) {
            let _ = kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{fork, ForkResult};

    #[test]
    fn resolve_program_path_uses_env_path() {
        let env = vec![("PATH".to_string(), "/bin:/usr/bin".to_string())];
        let resolved = resolve_program_path("ls", &env).unwrap();
        assert!(
            resolved.ends_with("/ls"),
            "expected ls in path, got {}",
            resolved
        );
    }

    #[test]
    fn resolve_program_path_keeps_explicit_paths() {
        let resolved = resolve_program_path("./main", &[]).unwrap();
        assert_eq!(resolved, "./main");
    }

    #[test]
    fn resolve_program_path_reports_missing_binary() {
        let env = vec![("PATH".to_string(), "/nonexistent".to_string())];
        let err = resolve_program_path("definitely_missing_cmd", &env).unwrap_err();
        assert!(err.contains("command not found"));
    }

    fn handle_for(pid: Pid) -> NamespaceHandle {
        let tmp = std::env::temp_dir().join(format!("sandbox-handle-{}", pid));
        NamespaceHandle {
            pid,
            cgroup: Cgroup::open(tmp),
            sync: Mutex::new(None),
            errors: Mutex::new(None),
            reaped: AtomicBool::new(false),
        }
    }

    #[test]
    fn wait_reports_exit_code() {
        match unsafe { fork() } {
            Ok(ForkResult::Child) => unsafe { libc::_exit(42) },
            Ok(ForkResult::Parent { child }) => {
                let handle = handle_for(child);
                assert_eq!(handle.wait().unwrap(), ExitStatus::Exited(42));
                assert!(handle.terminate(true).is_ok());
            }
            Err(e) => panic!("fork failed: {}", e),
        }
    }

    #[test]
    fn terminate_then_wait_reports_signal() {
        match unsafe { fork() } {
            Ok(ForkResult::Child) => loop {
                unsafe { libc::pause() };
            },
            Ok(ForkResult::Parent { child }) => {
                let handle = handle_for(child);
                handle.terminate(false).unwrap();
                assert_eq!(
                    handle.wait().unwrap(),
                    ExitStatus::Signaled(libc::SIGTERM)
                );
            }
            Err(e) => panic!("fork failed: {}", e),
        }
    }

    #[test]
    fn start_reports_init_error_from_pipe() {
        let (error_read, error_write) = pipe2(OFlag::O_CLOEXEC).unwrap();
        let (sync_read, sync_write) = pipe2(OFlag::O_CLOEXEC).unwrap();
        let mut writer = File::from(error_write);
        writer.write_all(b"pivot_root failed: EPERM").unwrap();
        drop(writer);

        let handle = NamespaceHandle {
            pid: Pid::from_raw(i32::MAX),
            cgroup: Cgroup::open("/nonexistent"),
            sync: Mutex::new(Some(File::from(sync_write))),
            errors: Mutex::new(Some(File::from(error_read))),
            reaped: AtomicBool::new(true),
        };
        let err = handle.start().unwrap_err();
        assert!(err.to_string().contains("pivot_root failed"));
        drop(sync_read);
    }
}
