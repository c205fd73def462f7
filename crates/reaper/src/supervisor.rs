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

//! The spawn / wait / respawn loop.
//!
//! ```text
//!  Idle --spawn ok--> Running --child exited, respawn--> Running
//!   |                   |
//!   | spawn failed      | child exited / shutdown requested
//!   v                   v
//!  ShuttingDown(1)    ShuttingDown(0)
//! ```
//!
//! A shutdown requested before the first spawn goes from `Idle` straight to
//! `ShuttingDown(0)`.
//!
//! `ShuttingDown` always ends with a tree kill rooted at the reaper itself.

use std::ffi::OsString;

use log::{debug, error, info, warn};
use nix::{sys::signal::Signal, unistd::Pid};

use crate::{
    error::Result,
    kill,
    reap::{self, WaitOutcome},
    signal::RunFlag,
};

/// Process operations the supervisor needs.
///
/// [`DefaultControl`] talks to the kernel; tests swap in their own.
pub trait ProcessControl {
    /// Start `argv`, returning the child's pid.
    fn spawn(&mut self, argv: &[OsString]) -> Result<Pid>;

    /// Block until `child` exits or `flag` is stopped.
    fn wait(&mut self, child: Pid, flag: &RunFlag) -> Result<WaitOutcome>;

    /// Signal `root` and everything below it, descendants first.
    fn kill_tree(&mut self, root: Pid, sig: Signal);

    /// Reap already exited children without blocking.
    fn reap(&mut self) -> usize;

    /// Pid of the supervising process, root of the tree kill.
    fn pid(&self) -> Pid;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultControl {}

impl DefaultControl {
    pub const fn new() -> Self {
        Self {}
    }
}

impl ProcessControl for DefaultControl {
    fn spawn(&mut self, argv: &[OsString]) -> Result<Pid> {
        reap::spawn(argv)
    }

    fn wait(&mut self, child: Pid, flag: &RunFlag) -> Result<WaitOutcome> {
        reap::wait_for_child(child, flag)
    }

    fn kill_tree(&mut self, root: Pid, sig: Signal) {
        kill::kill_tree(root, sig);
    }

    fn reap(&mut self) -> usize {
        reap::reap_exited()
    }

    fn pid(&self) -> Pid {
        nix::unistd::getpid()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Running(Pid),
    /// Terminal, carries the exit code.
    ShuttingDown(i32),
}

pub struct Supervisor<'a, C> {
    control: C,
    command: Vec<OsString>,
    respawn: bool,
    flag: &'a RunFlag,
    spawned: usize,
}

impl<'a, C: ProcessControl> Supervisor<'a, C> {
    pub fn new(control: C, command: Vec<OsString>, respawn: bool, flag: &'a RunFlag) -> Self {
        Self {
            control,
            command,
            respawn,
            flag,
            spawned: 0,
        }
    }

    /// How many times the command has been started so far.
    pub fn spawned(&self) -> usize {
        self.spawned
    }

    /// Runs the state machine to completion and returns the process exit code.
    pub fn run(&mut self) -> i32 {
        let mut state = State::Idle;
        loop {
            state = match state {
                // The parent may be gone before we ever got to run anything.
                State::Idle if !self.flag.is_running() => State::ShuttingDown(0),
                State::Idle => self.start(),
                State::Running(child) => self.supervise(child),
                State::ShuttingDown(code) => return self.shutdown(code),
            };
        }
    }

    fn name(&self) -> String {
        self.command
            .first()
            .map(|c| c.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn start(&mut self) -> State {
        match self.control.spawn(&self.command) {
            Ok(child) => {
                self.spawned += 1;
                debug!("started \"{}\" as {}", self.name(), child);
                State::Running(child)
            }
            Err(e) => {
                error!("Failed to create child process \"{}\" in reaper: {}", self.name(), e);
                State::ShuttingDown(1)
            }
        }
    }

    fn supervise(&mut self, child: Pid) -> State {
        match self.control.wait(child, self.flag) {
            Ok(WaitOutcome::Exited(status)) => match reap::exit_code(&status) {
                Some(code) => debug!("\"{}\" ({}) exited with {}", self.name(), child, code),
                None => debug!("\"{}\" ({}) finished: {:?}", self.name(), child, status),
            },
            Ok(WaitOutcome::NoChildren) => {
                warn!("no children left while waiting for {}", child)
            }
            Ok(WaitOutcome::Interrupted) if self.flag.is_running() => {
                return State::Running(child);
            }
            Ok(WaitOutcome::Interrupted) => {}
            Err(e) => {
                error!("failed to wait for {}: {}", child, e);
                return State::ShuttingDown(1);
            }
        }

        if !self.flag.is_running() {
            return State::ShuttingDown(0);
        }

        if self.respawn {
            info!("\"{}\" process shut down. Restarting.", self.name());
            return self.start();
        }

        State::ShuttingDown(0)
    }

    fn shutdown(&mut self, code: i32) -> i32 {
        match self.flag.signal() {
            Some(sig) => info!("received {}, killing children", sig),
            None => debug!("shutting down, killing children"),
        }
        // Our own SIGTERM comes back last and must find the flag already down.
        self.flag.stop(0);

        let root = self.control.pid();
        self.control.kill_tree(root, Signal::SIGTERM);

        let reaped = self.control.reap();
        debug!("reaped {} process(es) after tree kill", reaped);

        code
    }
}
