//! Process helpers for supervised forwarders.
//!
//! Spawning goes through [`tokio_command`] so every child is created the same way on
//! all platforms, and termination by bare process id goes through [`kill_pid`], which
//! is used when only a persisted pid is left (e.g. after a crash).

use std::ffi::OsStr;
use std::io;

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

fn refreshed(pid: Pid) -> System {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
}

/// What the OS reports about a process id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub parent: Option<u32>,
}

/// Look up a live (non-zombie) process by id.
pub fn inspect_process(pid: u32) -> Option<ProcessInfo> {
    if pid == 0 {
        return None;
    }
    let sys_pid = Pid::from_u32(pid);
    let system = refreshed(sys_pid);
    let process = system.process(sys_pid)?;
    if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
        return None;
    }

    Some(ProcessInfo {
        pid,
        name: process.name().to_string_lossy().into_owned(),
        parent: process.parent().map(|p| p.as_u32()),
    })
}

/// Returns `true` if a live (non-zombie) process with this id exists.
pub fn process_exists(pid: u32) -> bool {
    inspect_process(pid).is_some()
}

/// Returns `true` if `pid` is a live child of the current process.
pub fn is_own_child(pid: u32) -> bool {
    inspect_process(pid).is_some_and(|p| p.parent == Some(std::process::id()))
}

/// Forcefully terminate a process by id (SIGKILL on unix, TerminateProcess on Windows).
///
/// Returns `NotFound` if no such process exists, which callers usually tolerate.
pub fn kill_pid(pid: u32) -> io::Result<()> {
    if pid == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "refusing to signal pid 0",
        ));
    }

    let sys_pid = Pid::from_u32(pid);
    let system = refreshed(sys_pid);
    let process = system.process(sys_pid).ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no process with pid {pid}"))
    })?;

    match process.kill_with(Signal::Kill) {
        Some(true) => Ok(()),
        Some(false) => Err(io::Error::other(format!("failed to signal pid {pid}"))),
        None => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("kill signal not supported for pid {pid}"),
        )),
    }
}
