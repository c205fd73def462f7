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

use log::{debug, info};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::proc::{descendants, ProcFs, ProcessTable};

/// Sends `sig` to every descendant of `root` found in `/proc`, then to `root`.
///
/// Returns the number of descendants that were signaled. Doesn't wait for
/// anything to exit.
pub fn kill_tree(root: Pid, sig: Signal) -> usize {
    kill_tree_with(&ProcFs::default(), root, sig, |pid, sig| signal::kill(pid, sig))
}

/// Same as [`kill_tree`] with an explicit process table and delivery function.
///
/// Descendants are always signaled before `root`: if the root went first its
/// children could be reparented above it and escape.
pub fn kill_tree_with<T, F>(table: &T, root: Pid, sig: Signal, mut send: F) -> usize
where
    T: ProcessTable + ?Sized,
    F: FnMut(Pid, Signal) -> nix::Result<()>,
{
    let tree = descendants(table, root);
    info!("sending {} to {} and {} descendant(s)", sig, root, tree.len());

    let mut delivered = 0;
    for pid in tree {
        match send(pid, sig) {
            Ok(()) => delivered += 1,
            Err(e) => debug!("failed to send {} to {}: {}", sig, pid, e),
        }
    }

    if let Err(e) = send(root, sig) {
        debug!("failed to send {} to {}: {}", sig, root, e);
    }

    delivered
}
