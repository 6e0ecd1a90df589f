/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::trace;

#[cfg_attr(test, mockall::automock)]
pub trait Liveness {
    fn is_alive(&self, pid: i32) -> bool;
}

/// Probes with the null signal. A process we are not allowed to signal still
/// exists, so EPERM counts as alive.
#[derive(Debug, Default, Copy, Clone)]
pub struct SignalLiveness;

impl Liveness for SignalLiveness {
    fn is_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        match kill(Pid::from_raw(pid), None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(e) => {
                trace!("pid {pid} is gone: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_real_processes() {
        assert!(SignalLiveness.is_alive(std::process::id() as i32));
        assert!(!SignalLiveness.is_alive(0));
        assert!(!SignalLiveness.is_alive(-1));

        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("failed to spawn");
        let pid = child.id() as i32;
        child.wait().expect("failed to reap");
        assert!(!SignalLiveness.is_alive(pid));
    }
}
