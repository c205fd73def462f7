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

//! A subreaper for supervising a command together with everything it forks.
//!
//! The reaper registers itself as child subreaper, runs a command (optionally
//! restarting it whenever it exits) and, on the way out, sends `SIGTERM` to every
//! process still left below it. Orphans of the command reparent to the reaper
//! instead of `init`, so nothing started from the command escapes the final kill.
//!
//! ```text
//! reaper --label game --respawn -- /usr/bin/game --fullscreen
//! ```
//!
//! Shutdown is requested with `SIGHUP`, `SIGINT`, `SIGQUIT` or `SIGTERM`, and also
//! happens when the process that started the reaper dies.

use std::{env, ffi::OsStr, process};

use log::{info, warn};
use nix::{sys::signal::Signal, unistd};

#[macro_use]
pub mod error;

pub mod args;
pub mod kill;
pub mod logger;
pub mod proc;
pub mod reap;
pub mod signal;
pub mod supervisor;

pub use error::{Error, Result};
pub use supervisor::{DefaultControl, ProcessControl, Supervisor};

/// Process name visible in `ps`.
pub const REAPER_NAME: &str = "reaper";

/// Knobs for embedding the reaper or running it under test.
///
/// The defaults are what the `reaper` binary uses.
#[derive(Debug, Default)]
pub struct Config {
    /// Don't register as child subreaper. Orphans then go to `init` and escape the tree kill.
    pub no_sub_reaper: bool,
    /// Don't install the stderr logger, the caller set up its own.
    pub no_setup_logger: bool,
    /// Keep inherited file descriptors open.
    pub no_close_fds: bool,
}

/// Reaper entry point that must be invoked from `main`. Never returns.
pub fn run(opts: Option<Config>) -> ! {
    let os_args: Vec<_> = env::args_os().collect();
    let code = match bootstrap(&os_args[1..], opts.unwrap_or_default()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}: {}", REAPER_NAME, err);
            1
        }
    };
    log::logger().flush();
    process::exit(code);
}

fn bootstrap<S: AsRef<OsStr>>(os_args: &[S], config: Config) -> Result<i32> {
    let flags = args::parse(os_args)?;

    if !config.no_setup_logger {
        logger::init(flags.debug, &flags.label)?;
    }

    if let Err(e) = reap::set_name(REAPER_NAME) {
        warn!("{}", e);
    }

    if let Err(e) = signal::reset() {
        warn!("failed to reset signal dispositions: {}", e);
    }

    if !config.no_close_fds {
        let keep = [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO];
        if let Err(e) = reap::close_fds(&keep) {
            warn!("failed to close inherited fds: {}", e);
        }
    }

    if flags.new_session {
        match reap::new_session() {
            Ok(sid) => info!("started new session {}", sid),
            // EPERM when we already lead a process group, keep going in the current one.
            Err(e) => warn!("failed to create new session: {}", e),
        }
    }

    signal::install()?;

    if !config.no_sub_reaper {
        reap::set_subreaper()?;
    }

    let parent = unistd::getppid();
    reap::set_death_signal(Signal::SIGTERM)?;
    // The parent may have died before the death signal was armed.
    if unistd::getppid() != parent {
        signal::RUN_FLAG.stop(libc::SIGTERM);
    }

    let mut supervisor = Supervisor::new(
        DefaultControl::new(),
        flags.command,
        flags.respawn,
        &signal::RUN_FLAG,
    );
    Ok(supervisor.run())
}
