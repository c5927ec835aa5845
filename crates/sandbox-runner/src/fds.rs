//! Standard stream preparation
//!
//! Descriptors are opened by the supervisor and handed to the runtime, which
//! duplicates them onto 0, 1 and 2 in the sandboxed child.

use log::debug;
use nix::sys::stat::{umask, Mode};
use sandbox_core::{Result, SandboxError};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::config::FdConfig;

const DEV_NULL: &str = "/dev/null";
const OUTPUT_MODE: u32 = 0o664;

static UMASK_LOCK: Mutex<()> = Mutex::new(());

/// Clears the process umask until dropped.
///
/// The umask is process-wide, so every toggle goes through one mutex. Not
/// reentrant: acquiring a second guard on the same thread deadlocks.
pub struct UmaskGuard {
    previous: Mode,
    _lock: MutexGuard<'static, ()>,
}

impl UmaskGuard {
    pub fn clear() -> Self {
        let lock = UMASK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let previous = umask(Mode::empty());
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.previous);
    }
}

/// Where stdout and stderr go
#[derive(Debug)]
pub enum OutputFds {
    Independent { stdout: File, stderr: File },
    /// One destination shared by both streams
    Merged(File),
}

/// The three descriptors of the sandboxed process
#[derive(Debug)]
pub struct PreparedFds {
    pub stdin: File,
    pub output: OutputFds,
}

impl PreparedFds {
    pub fn stdin_fd(&self) -> RawFd {
        self.stdin.as_raw_fd()
    }

    pub fn stdout_fd(&self) -> RawFd {
        match &self.output {
            OutputFds::Independent { stdout, .. } => stdout.as_raw_fd(),
            OutputFds::Merged(shared) => shared.as_raw_fd(),
        }
    }

    pub fn stderr_fd(&self) -> RawFd {
        match &self.output {
            OutputFds::Independent { stderr, .. } => stderr.as_raw_fd(),
            OutputFds::Merged(shared) => shared.as_raw_fd(),
        }
    }

    pub fn is_merged(&self) -> bool {
        matches!(self.output, OutputFds::Merged(_))
    }
}

fn open_input(path: Option<&Path>) -> Result<File> {
    let path = path.unwrap_or_else(|| Path::new(DEV_NULL));
    File::open(path).map_err(|e| SandboxError::Open {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Truncate an existing destination, or create it exclusively with 0o664
fn open_output(path: Option<&Path>) -> Result<File> {
    let Some(path) = path else {
        return OpenOptions::new()
            .write(true)
            .mode(OUTPUT_MODE)
            .open(DEV_NULL)
            .map_err(|e| SandboxError::Open {
                path: DEV_NULL.into(),
                source: e,
            });
    };

    let exists = match path.symlink_metadata() {
        Ok(_) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            return Err(SandboxError::Open {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    open_destination(path, exists)
}

/// A destination absent at stat time is only ever created, never adopted
fn open_destination(path: &Path, exists: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    if exists {
        options.truncate(true);
    } else {
        options.create_new(true).mode(OUTPUT_MODE);
    }
    options.open(path).map_err(|e| SandboxError::Open {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Resolve stdin, stdout and stderr for the sandboxed process.
///
/// On error every descriptor opened so far is closed before returning.
pub fn prepare_fds(config: Option<&FdConfig>) -> Result<PreparedFds> {
    let default = FdConfig::default();
    let config = config.unwrap_or(&default);
    config.check_conflicts()?;

    // Creates nothing, and a FIFO may block until its writer shows up
    let stdin = open_input(config.stdin_path())?;

    let _umask = UmaskGuard::clear();
    let output = if config.stdout_to_stderr {
        debug!("stdout merged into stderr");
        OutputFds::Merged(open_output(config.stderr_path())?)
    } else if config.stderr_to_stdout {
        debug!("stderr merged into stdout");
        OutputFds::Merged(open_output(config.stdout_path())?)
    } else {
        let stdout = open_output(config.stdout_path())?;
        let stderr = open_output(config.stderr_path())?;
        OutputFds::Independent { stdout, stderr }
    };

    Ok(PreparedFds { stdin, output })
}
