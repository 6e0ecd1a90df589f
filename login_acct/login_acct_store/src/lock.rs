/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fs::File;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;

use login_acct_paths::LockSettings;
use login_acct_paths::LockStrategy;
use nix::errno::Errno;
use nix::fcntl::flock;
use nix::fcntl::FlockArg;
use retry::delay::Fixed;
use retry::OperationResult;
use tracing::debug;
use tracing::warn;

use crate::write_failed;
use crate::Error;
use crate::Result;

/// Delays between lock attempts. The first attempt is immediate, so this
/// yields one fewer delay than there are attempts.
fn delays(settings: &LockSettings) -> impl Iterator<Item = std::time::Duration> {
    Fixed::from_millis(settings.interval_ms).take(settings.attempts.saturating_sub(1))
}

/// Exclusive, host-wide lock on one database. Released on drop.
#[derive(Debug)]
pub(crate) enum DatabaseLock {
    Flock { file: File, path: PathBuf },
    Sentinel { path: PathBuf },
}

impl DatabaseLock {
    pub(crate) fn acquire(
        strategy: &LockStrategy,
        flock_path: &Path,
        settings: &LockSettings,
    ) -> Result<Self> {
        match strategy {
            LockStrategy::Flock => Self::flock(flock_path, settings),
            LockStrategy::Sentinel { path } => Self::sentinel(path, settings),
        }
    }

    /// flock(2) `path`, creating it if needed.
    pub(crate) fn flock(path: &Path, settings: &LockSettings) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(path)
            .map_err(write_failed(path))?;
        retry::retry(delays(settings), || {
            match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
                Ok(()) => OperationResult::Ok(()),
                Err(e) if e == Errno::EWOULDBLOCK => OperationResult::Retry(e),
                Err(e) => OperationResult::Err(e),
            }
        })
        .map_err(|e| match e {
            retry::Error::Operation { error, .. } if error == Errno::EWOULDBLOCK => {
                Error::LockTimeout(path.to_owned())
            }
            retry::Error::Operation { error, .. } => write_failed(path)(error.into()),
            retry::Error::Internal(s) => {
                write_failed(path)(std::io::Error::new(ErrorKind::Other, s))
            }
        })?;
        debug!("locked {}", path.display());
        Ok(Self::Flock {
            file,
            path: path.to_owned(),
        })
    }

    /// Exclusively create `path`, retrying while another process holds it.
    pub(crate) fn sentinel(path: &Path, settings: &LockSettings) -> Result<Self> {
        retry::retry(delays(settings), || {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o644)
                .open(path)
            {
                Ok(_) => OperationResult::Ok(()),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => OperationResult::Retry(e),
                Err(e) => OperationResult::Err(e),
            }
        })
        .map_err(|e| match e {
            retry::Error::Operation { error, .. } if error.kind() == ErrorKind::AlreadyExists => {
                Error::LockTimeout(path.to_owned())
            }
            retry::Error::Operation { error, .. } => write_failed(path)(error),
            retry::Error::Internal(s) => {
                write_failed(path)(std::io::Error::new(ErrorKind::Other, s))
            }
        })?;
        debug!("created lock sentinel {}", path.display());
        Ok(Self::Sentinel {
            path: path.to_owned(),
        })
    }
}

impl Drop for DatabaseLock {
    fn drop(&mut self) {
        match self {
            Self::Flock { file, path } => {
                if let Err(e) = flock(file.as_raw_fd(), FlockArg::Unlock) {
                    warn!("failed to unlock {}: {e}", path.display());
                }
                debug!("unlocked {}", path.display());
            }
            Self::Sentinel { path } => match std::fs::remove_file(path.as_path()) {
                Ok(()) => debug!("removed lock sentinel {}", path.display()),
                Err(e) => warn!("failed to remove lock sentinel {}: {e}", path.display()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> LockSettings {
        LockSettings {
            attempts: 2,
            interval_ms: 1,
        }
    }

    #[test]
    fn flock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path = dir.path().join("lock");
        let held = DatabaseLock::flock(&path, &quick()).expect("failed to lock");
        // flock(2) locks belong to the open file description, so a second
        // open in the same process still contends
        assert!(matches!(
            DatabaseLock::flock(&path, &quick()),
            Err(Error::LockTimeout(_))
        ));
        drop(held);
        DatabaseLock::flock(&path, &quick()).expect("failed to relock");
    }

    #[test]
    fn sentinel_is_removed_on_drop() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path = dir.path().join("ptmp.lock");
        let held = DatabaseLock::acquire(
            &LockStrategy::Sentinel { path: path.clone() },
            &dir.path().join("unused"),
            &quick(),
        )
        .expect("failed to lock");
        assert!(path.exists());
        assert!(matches!(
            DatabaseLock::sentinel(&path, &quick()),
            Err(Error::LockTimeout(_))
        ));
        drop(held);
        assert!(!path.exists());
    }
}
