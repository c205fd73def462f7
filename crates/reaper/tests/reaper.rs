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

//! End-to-end tests running the `reaper` binary.

#![cfg(target_os = "linux")]

use std::fs;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::{getsid, Pid};
use reaper::proc::{descendants, ProcFs};

const TIMEOUT: Duration = Duration::from_secs(10);

fn reaper() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_reaper"));
    cmd.stdin(Stdio::null()).stdout(Stdio::null());
    cmd
}

fn pid_of(child: &Child) -> Pid {
    Pid::from_raw(child.id() as i32)
}

fn wait_timeout(child: &mut Child) -> ExitStatus {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("reaper {} did not exit in time", child.id());
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn wait_until<F: FnMut() -> bool>(what: &str, mut cond: F) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

fn read_pids(path: &Path) -> Vec<Pid> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|l| l.trim().parse().ok())
        .map(Pid::from_raw)
        .collect()
}

fn line_count(path: &Path) -> usize {
    fs::read_to_string(path).map(|s| s.lines().count()).unwrap_or(0)
}

fn is_alive(pid: Pid) -> bool {
    match ProcFs::default().record(pid) {
        Ok(record) => !record.is_zombie(),
        Err(_) => false,
    }
}

#[test]
fn no_separator_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let marker = tmp.path().join("spawned");
    let script = format!("touch {}", marker.display());

    let status = reaper()
        .args(["--respawn", "sh", "-c", &script])
        .status()
        .unwrap();

    assert_eq!(status.code(), Some(1));
    assert!(!marker.exists());
}

#[test]
fn empty_sub_command_is_an_error() {
    let status = reaper().args(["--label", "empty", "--"]).status().unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn unknown_flag_is_an_error() {
    let status = reaper().args(["--bogus", "--", "true"]).status().unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn spawn_failure() {
    let status = reaper()
        .args(["--", "/nonexistent/reaper-e2e-command"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn exits_cleanly_after_command() {
    let status = reaper()
        .args(["--label", "e2e", "--", "sh", "-c", "exit 7"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(0));
}

#[test]
fn respawns_until_terminated() {
    let tmp = tempfile::tempdir().unwrap();
    let runs = tmp.path().join("runs");
    let script = format!("echo run >> {}", runs.display());

    let mut child = reaper()
        .args(["--respawn", "--", "sh", "-c", &script])
        .spawn()
        .unwrap();

    wait_until("respawn", || line_count(&runs) >= 3);
    kill(pid_of(&child), Signal::SIGTERM).unwrap();

    let status = wait_timeout(&mut child);
    assert_eq!(status.code(), Some(0));
    assert!(line_count(&runs) >= 3);
}

#[test]
fn tree_is_killed_on_terminate() {
    let tmp = tempfile::tempdir().unwrap();
    let pids = tmp.path().join("pids");
    let script = format!("sleep 30 & echo $! > {}; wait", pids.display());

    let mut child = reaper().args(["--", "sh", "-c", &script]).spawn().unwrap();

    wait_until("grandchild", || !read_pids(&pids).is_empty());
    let grandchild = read_pids(&pids)[0];
    assert!(is_alive(grandchild));
    assert!(descendants(&ProcFs::default(), pid_of(&child)).contains(&grandchild));

    kill(pid_of(&child), Signal::SIGINT).unwrap();
    let status = wait_timeout(&mut child);
    assert_eq!(status.code(), Some(0));

    wait_until("grandchild to die", || !is_alive(grandchild));
}

#[test]
fn orphans_are_reparented_to_reaper() {
    let tmp = tempfile::tempdir().unwrap();
    let pids = tmp.path().join("pids");
    let script = format!("sleep 30 & echo $! >> {}; sleep 0.2", pids.display());

    let mut child = reaper()
        .args(["--respawn", "--", "sh", "-c", &script])
        .spawn()
        .unwrap();
    let reaper_pid = pid_of(&child);

    // The second line is written by the respawned shell, so the first one has exited
    // and its `sleep` is an orphan by now.
    wait_until("respawn", || read_pids(&pids).len() >= 2);
    let orphan = read_pids(&pids)[0];

    let record = ProcFs::default().record(orphan).unwrap();
    assert_eq!(record.ppid, reaper_pid);
    assert!(descendants(&ProcFs::default(), reaper_pid).contains(&orphan));

    kill(reaper_pid, Signal::SIGTERM).unwrap();
    let status = wait_timeout(&mut child);
    assert_eq!(status.code(), Some(0));

    for pid in read_pids(&pids) {
        wait_until("orphan to die", || !is_alive(pid));
    }
}

#[test]
fn new_session() {
    let mut child = reaper()
        .args(["--new-session-id", "--", "sleep", "30"])
        .spawn()
        .unwrap();
    let reaper_pid = pid_of(&child);

    // Once the command runs, the handlers are in place and the session exists.
    wait_until("sleep", || {
        !descendants(&ProcFs::default(), reaper_pid).is_empty()
    });
    assert_eq!(getsid(Some(reaper_pid)), Ok(reaper_pid));

    kill(reaper_pid, Signal::SIGHUP).unwrap();
    let status = wait_timeout(&mut child);
    assert_eq!(status.code(), Some(0));
}
