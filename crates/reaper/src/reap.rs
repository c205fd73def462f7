/*
   Copyright The containerd Authors.

   Licensed under the Apache License, Version 2.0 (the "License");
   you may not use this file except in compliance with the License.
   You may obtain a copy of the License at

       http://www.apache.org/licenses/LICENSE-2.0

   Unless required by applicable law or agreed to in writing, software
   distributed under the License is distributed on an "AS IS" BASIS,
   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
   See the License for the specific language governing permissions and
   limitations under the License.
*/

use std::ffi::OsStr;
use std::fs;
use std::os::unix::io::RawFd;
use std::process::Command;

use log::{debug, warn};
use nix::{
    errno::Errno,
    sys::{
        signal::Signal,
        wait::{self, WaitPidFlag, WaitStatus},
    },
    unistd::{self, Pid},
};

use crate::error::{Error, Result};
use crate::signal::{self, RunFlag};

#[cfg(target_os = "linux")]
/// Set current process as subreaper for child processes.
///
/// A subreaper fulfills the role of `init` for its descendant processes.  When a process becomes
/// orphaned (i.e., its immediate parent terminates), then that process will be reparented to the
/// nearest still living ancestor subreaper. Subsequently, calls to `getppid()` in the orphaned
/// process will now return the PID of the subreaper process, and when the orphan terminates,
/// it is the subreaper process that will receive a SIGCHLD signal and will be able to `wait()`
/// on the process to discover its termination status.
pub fn set_subreaper() -> Result<()> {
    let ret = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
    if ret < 0 {
        return Err(other!(
            "linux prctl returned: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_subreaper() -> Result<()> {
    Ok(())
}

/// Ask the kernel to send `sig` to this process when its parent thread exits.
pub fn set_death_signal(sig: Signal) -> Result<()> {
    prctl::set_death_signal(sig as isize)
        .map_err(|errno| other!("set parent death signal: {}", Errno::from_raw(errno)))
}

/// Name the calling thread (and so the process, for the main thread) in `ps` / `top`.
pub fn set_name(name: &str) -> Result<()> {
    prctl::set_name(name).map_err(|errno| other!("set name {}: {}", name, Errno::from_raw(errno)))
}

/// Start a new session with the reaper as leader, detaching from the controlling terminal.
pub fn new_session() -> Result<Pid> {
    Ok(unistd::setsid()?)
}

/// Close every open file descriptor except the ones in `keep`.
pub fn close_fds(keep: &[RawFd]) -> Result<()> {
    let fds: Vec<RawFd> = fs::read_dir("/proc/self/fd")
        .map_err(io_error!(e, "open /proc/self/fd"))?
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().and_then(|s| s.parse().ok()))
        .filter(|fd| !keep.contains(fd))
        .collect();

    // One of the collected fds belonged to the directory stream which is gone by now.
    for fd in fds {
        match unistd::close(fd) {
            Ok(()) | Err(Errno::EBADF) => {}
            Err(e) => warn!("failed to close fd {}: {}", fd, e),
        }
    }
    Ok(())
}

/// Spawn `argv[0]` with the remaining arguments, inheriting stdio and environment.
pub fn spawn<S: AsRef<OsStr>>(argv: &[S]) -> Result<Pid> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::InvalidArgument(String::from("empty command")))?;

    // The `Child` handle is dropped right away, the supervisor waits with `waitpid`.
    let child = Command::new(program)
        .args(args)
        .spawn()
        .map_err(|err| Error::Spawn {
            command: program.as_ref().to_string_lossy().into_owned(),
            err,
        })?;

    Ok(Pid::from_raw(child.id() as i32))
}

/// What ended a [`wait_for_child`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The tracked child exited or was killed.
    Exited(WaitStatus),
    /// Shutdown was requested before the child exited.
    Interrupted,
    /// There is nothing left to wait for.
    NoChildren,
}

/// Block until `child` exits, reaping any other exited descendant along the way.
///
/// Returns early with [`WaitOutcome::Interrupted`] once `flag` is stopped. Expects the
/// handlers from [`signal::install`] to be in place: the sleep between two reaping
/// passes only ends when a shutdown signal or `SIGCHLD` is handled.
pub fn wait_for_child(child: Pid, flag: &RunFlag) -> Result<WaitOutcome> {
    wait_with(child, flag, || {})
}

fn wait_with<F: FnMut()>(
    child: Pid,
    flag: &RunFlag,
    mut before_sleep: F,
) -> Result<WaitOutcome> {
    // Kept blocked outside the sleep, a signal landing after the flag check stays
    // pending and ends the next `suspend` right away.
    let blocked = signal::block()?;
    loop {
        if !flag.is_running() {
            return Ok(WaitOutcome::Interrupted);
        }

        match wait::waitpid(Some(Pid::from_raw(-1)), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                before_sleep();
                blocked.suspend()?;
            }
            Ok(status) if status.pid() == Some(child) => return Ok(WaitOutcome::Exited(status)),
            Ok(status) => debug!("reaped {:?}", status),
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return Ok(WaitOutcome::NoChildren),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Collect every child that already exited without blocking. Returns how many were reaped.
pub fn reap_exited() -> usize {
    let mut reaped = 0;
    loop {
        match wait::waitpid(Some(Pid::from_raw(-1)), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => {
                debug!("reaped {:?}", status);
                reaped += 1;
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(e) => {
                warn!("error occurred while reaping: {}", e);
                break;
            }
        }
    }
    reaped
}

/// Converts a wait status into a shell style exit code.
pub fn exit_code(status: &WaitStatus) -> Option<i32> {
    match *status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, sig, _) => Some(128 + sig as i32),
        _ => None,
    }
}
