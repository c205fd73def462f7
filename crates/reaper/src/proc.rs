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

//! Process table access and descendant discovery.
//!
//! Nothing here is cached: every call re-reads the live table, so results are
//! best effort. A process forked or reparented while the table is being read
//! may or may not show up.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use log::{debug, error};
use nix::unistd::Pid;

use crate::error::{Error, Result};

pub const PROC_ROOT: &str = "/proc";

/// One entry of the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: Pid,
    pub ppid: Pid,
    /// Single letter state as reported by the kernel (`R`, `S`, `Z`, ...).
    pub state: char,
}

impl ProcessRecord {
    pub fn is_zombie(&self) -> bool {
        self.state == 'Z'
    }
}

/// Source of process records.
pub trait ProcessTable {
    /// Returns every record that could be read. Entries that vanish or can't be
    /// parsed while scanning are skipped; an error means the table itself is unreadable.
    fn records(&self) -> Result<Vec<ProcessRecord>>;
}

impl ProcessTable for [ProcessRecord] {
    fn records(&self) -> Result<Vec<ProcessRecord>> {
        Ok(self.to_vec())
    }
}

impl ProcessTable for Vec<ProcessRecord> {
    fn records(&self) -> Result<Vec<ProcessRecord>> {
        Ok(self.clone())
    }
}

/// Process table backed by a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new(PROC_ROOT)
    }
}

impl ProcFs {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Reads and parses `<root>/<pid>/stat`.
    pub fn record(&self, pid: Pid) -> Result<ProcessRecord> {
        let path = self.root.join(pid.to_string()).join("stat");
        let raw = fs::read(&path).map_err(io_error!(e, "read {}", path.display()))?;
        parse_stat(&raw)
    }
}

impl ProcessTable for ProcFs {
    fn records(&self) -> Result<Vec<ProcessRecord>> {
        let entries = fs::read_dir(&self.root)
            .map_err(io_error!(e, "open {}", self.root.display()))?;

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let pid = match entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) {
                Some(pid) if pid > 0 => Pid::from_raw(pid),
                _ => continue,
            };
            match self.record(pid) {
                Ok(record) => records.push(record),
                // Most likely the process exited between readdir and open.
                Err(e) => debug!("skip process {}: {}", pid, e),
            }
        }

        Ok(records)
    }
}

/// Parses one `/proc/<pid>/stat` line.
///
/// The layout is `pid (comm) state ppid ...`. `comm` is chosen by the process and
/// may contain spaces, parentheses and bytes that aren't UTF-8, so the fields after
/// it are located from the last `)` on the line and only the numeric fields around
/// it are decoded.
pub fn parse_stat<B: AsRef<[u8]>>(line: B) -> Result<ProcessRecord> {
    let line = line.as_ref();
    let malformed =
        || Error::MalformedRecord(String::from_utf8_lossy(line).trim_end().to_string());

    let open = line.iter().position(|&b| b == b'(').ok_or_else(malformed)?;
    let close = line.iter().rposition(|&b| b == b')').ok_or_else(malformed)?;
    if close < open {
        return Err(malformed());
    }

    let head = std::str::from_utf8(&line[..open]).map_err(|_| malformed())?;
    let tail = std::str::from_utf8(&line[close + 1..]).map_err(|_| malformed())?;

    let pid = head.trim().parse::<i32>()?;

    let mut fields = tail.split_whitespace();
    let state = fields
        .next()
        .and_then(|s| s.chars().next())
        .ok_or_else(malformed)?;
    let ppid = fields.next().ok_or_else(malformed)?.parse::<i32>()?;

    Ok(ProcessRecord {
        pid: Pid::from_raw(pid),
        ppid: Pid::from_raw(ppid),
        state,
    })
}

/// Returns every live descendant of `root`, not including `root` itself.
///
/// The table is read once, then walked with a worklist so arbitrarily deep trees
/// don't grow the stack. An unreadable table yields an empty set.
pub fn descendants<T: ProcessTable + ?Sized>(table: &T, root: Pid) -> HashSet<Pid> {
    let records = match table.records() {
        Ok(records) => records,
        Err(e) => {
            error!("failed to enumerate processes: {}", e);
            return HashSet::new();
        }
    };

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for record in records {
        children.entry(record.ppid).or_default().push(record.pid);
    }

    let mut found = HashSet::new();
    let mut pending = vec![root];
    while let Some(parent) = pending.pop() {
        if let Some(kids) = children.get(&parent) {
            for &kid in kids {
                // `insert` doubles as the visited check, a bogus cycle can't spin here.
                if kid != root && found.insert(kid) {
                    pending.push(kid);
                }
            }
        }
    }

    found
}
