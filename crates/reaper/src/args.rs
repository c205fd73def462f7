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

use std::ffi::{OsStr, OsString};

use crate::error::{Error, Result};

/// Token separating the reaper's own flags from the supervised command.
pub const SEPARATOR: &str = "--";

/// Flags passed to the reaper binary.
#[derive(Debug, Default)]
pub struct Flags {
    /// Enable debug output in logs.
    pub debug: bool,
    /// Free-form name shown in log lines, no runtime effect otherwise.
    pub label: String,
    /// Call `setsid` before spawning the command.
    pub new_session: bool,
    /// Restart the command each time it exits until shutdown is requested.
    pub respawn: bool,
    /// The sub-command and its arguments, everything after the separator.
    pub command: Vec<OsString>,
}

/// Parses command line arguments passed to the reaper (without the program name).
///
/// Everything after the first `--` is taken verbatim as the command to run, so the
/// command's own flags never reach the reaper's flag set. A missing separator, or
/// one with nothing after it, is an error.
pub fn parse<S: AsRef<OsStr>>(args: &[S]) -> Result<Flags> {
    let split = args
        .iter()
        .position(|arg| arg.as_ref() == SEPARATOR)
        .filter(|i| i + 1 < args.len())
        .ok_or_else(|| Error::InvalidArgument(String::from("No sub-command!")))?;

    let mut flags = Flags::default();

    // Non-flag arguments before the separator stop flag parsing and are otherwise ignored.
    let _: Vec<String> = go_flag::parse_args(&args[..split], |f| {
        f.add_flag("debug", &mut flags.debug);
        f.add_flag("label", &mut flags.label);
        f.add_flag("new-session-id", &mut flags.new_session);
        f.add_flag("respawn", &mut flags.respawn);
    })
    .map_err(|e| Error::InvalidArgument(e.to_string()))?;

    flags.command = args[split + 1..]
        .iter()
        .map(|arg| arg.as_ref().to_os_string())
        .collect();

    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all() {
        let args = [
            "--label",
            "steam",
            "--new-session-id",
            "--respawn",
            "--debug",
            "--",
            "/usr/bin/steam",
            "-silent",
        ];

        let flags = parse(&args).unwrap();

        assert!(flags.debug);
        assert!(flags.new_session);
        assert!(flags.respawn);
        assert_eq!(flags.label, "steam");
        assert_eq!(flags.command, vec!["/usr/bin/steam", "-silent"]);
    }

    #[test]
    fn parse_defaults() {
        let args = ["--", "true"];

        let flags = parse(&args).unwrap();

        assert!(!flags.debug);
        assert!(!flags.new_session);
        assert!(!flags.respawn);
        assert_eq!(flags.label, "");
        assert_eq!(flags.command, vec!["true"]);
    }

    #[test]
    fn command_flags_are_not_parsed() {
        let args = ["--label", "a", "--", "sh", "--respawn", "--", "x"];

        let flags = parse(&args).unwrap();

        assert!(!flags.respawn);
        assert_eq!(flags.command, vec!["sh", "--respawn", "--", "x"]);
    }

    #[test]
    fn single_dash_flags() {
        let args = ["-respawn", "-label=game", "--", "true"];

        let flags = parse(&args).unwrap();

        assert!(flags.respawn);
        assert_eq!(flags.label, "game");
    }

    #[test]
    fn no_separator() {
        let args = ["--respawn", "true"];
        assert!(matches!(parse(&args), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn empty_sub_command() {
        let args = ["--respawn", "--"];
        assert!(matches!(parse(&args), Err(Error::InvalidArgument(_))));

        let empty: [String; 0] = [];
        assert!(parse(&empty).is_err());
    }

    #[test]
    fn unknown_flag() {
        let args = ["--bogus", "--", "true"];
        assert!(matches!(parse(&args), Err(Error::InvalidArgument(_))));
    }
}
