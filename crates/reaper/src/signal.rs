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

//! Shutdown signal handling.
//!
//! The handlers installed here stay in place for the lifetime of the process and
//! must remain async-signal-safe: they only touch atomics. Logging and the tree
//! kill happen later on the supervisor's own stack.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use libc::c_int;
use nix::sys::signal::{
    sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};

use crate::error::Result;

/// Signals that request a shutdown of the reaper and its tree.
pub const SHUTDOWN_SIGNALS: [Signal; 4] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
];

/// Process wide run flag driven by [`install`]ed handlers.
pub static RUN_FLAG: RunFlag = RunFlag::new();

/// Run flag shared between signal handlers and the supervisor loop.
///
/// Starts out running and flips to stopped at most once.
#[derive(Debug)]
pub struct RunFlag {
    running: AtomicBool,
    signal: AtomicI32,
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunFlag {
    pub const fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            signal: AtomicI32::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests shutdown on behalf of `signum` (0 when no signal was involved).
    ///
    /// Returns `true` only for the call that actually stopped the flag.
    /// Async-signal-safe.
    pub fn stop(&self, signum: c_int) -> bool {
        let stopped = self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if stopped {
            self.signal.store(signum, Ordering::SeqCst);
        }
        stopped
    }

    /// The signal that stopped the flag, if any.
    pub fn signal(&self) -> Option<Signal> {
        Signal::try_from(self.signal.load(Ordering::SeqCst)).ok()
    }
}

extern "C" fn handle_signal(signum: c_int) {
    RUN_FLAG.stop(signum);
}

// Only there so that SIGCHLD is delivered at all and ends a `Blocked::suspend`.
extern "C" fn handle_child(_: c_int) {}

/// Installs the shutdown handler for [`SHUTDOWN_SIGNALS`] and a wake-up handler
/// for `SIGCHLD`.
///
/// `SA_RESTART` is left out so interrupted system calls return `EINTR` and the
/// supervisor gets to look at [`RUN_FLAG`].
pub fn install() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in SHUTDOWN_SIGNALS {
        // SAFETY: the handler only performs atomic operations.
        unsafe { sigaction(sig, &action) }?;
    }

    let child = SigAction::new(
        SigHandler::Handler(handle_child),
        SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    // SAFETY: the handler does nothing.
    unsafe { sigaction(Signal::SIGCHLD, &child) }?;
    Ok(())
}

const WAKEUP_SIGNALS: [Signal; 5] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGCHLD,
];

/// Holds [`SHUTDOWN_SIGNALS`] and `SIGCHLD` back on the calling thread until dropped.
///
/// A signal arriving while blocked stays pending instead of running its handler,
/// so a caller can check [`RUN_FLAG`], find nothing to do and then go to sleep in
/// [`Blocked::suspend`] without missing it.
#[derive(Debug)]
pub struct Blocked {
    previous: SigSet,
    waiting: SigSet,
}

/// Blocks the wake-up signals, see [`Blocked`].
pub fn block() -> Result<Blocked> {
    let mut wakeup = SigSet::empty();
    for sig in WAKEUP_SIGNALS {
        wakeup.add(sig);
    }
    let mut previous = SigSet::empty();
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&wakeup), Some(&mut previous))?;

    let mut waiting = previous;
    for sig in WAKEUP_SIGNALS {
        waiting.remove(sig);
    }
    Ok(Blocked { previous, waiting })
}

impl Blocked {
    /// Atomically unblocks the wake-up signals and sleeps until a handler has run.
    /// They are blocked again on return.
    pub fn suspend(&self) -> Result<()> {
        Ok(self.waiting.suspend()?)
    }
}

impl Drop for Blocked {
    fn drop(&mut self) {
        // Whatever became pending in the meantime is delivered here.
        let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
    }
}

/// Resets every catchable signal to its default disposition and clears the
/// signal mask, undoing whatever the parent left behind.
///
/// `SIGPIPE` stays ignored: a reader going away on stderr must not take the
/// reaper down before it has cleaned up its tree.
pub fn reset() -> Result<()> {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());

    for sig in Signal::iterator() {
        let action = match sig {
            Signal::SIGKILL | Signal::SIGSTOP => continue,
            Signal::SIGPIPE => &ignore,
            _ => &default,
        };
        // SAFETY: no user code is involved in SIG_DFL / SIG_IGN.
        unsafe { sigaction(sig, action) }?;
    }

    sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)?;
    Ok(())
}
