/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Per-user session records: which local resources were materialized on a
//! user's behalf, and which login sessions still reference them.
//!
//! A record is only ever read, changed and written back while its holder has
//! the exclusive lock for that one username. Different usernames never
//! contend with each other. The lock lives in a separate `.<username>.lock`
//! file, so a new record can be renamed over the old one and a crash leaves
//! either the old or the new record, never a partial one.

use std::collections::BTreeSet;
use std::fs::File;
use std::fs::OpenOptions;
use std::fs::Permissions;
use std::io::ErrorKind;
use std::io::Write;
use std::ops::Deref;
use std::ops::DerefMut;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use login_acct_paths::LockSettings;
use login_acct_users::GroupId;
use nix::errno::Errno;
use nix::fcntl::flock;
use nix::fcntl::FlockArg;
use nix::sys::signal::pthread_sigmask;
use nix::sys::signal::SigSet;
use nix::sys::signal::SigmaskHow;
use nix::sys::signal::Signal;
use retry::delay::Fixed;
use retry::OperationResult;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::trace;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0:?} cannot name a session record")]
    InvalidUsername(String),
    #[error("could not access session record {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("timed out waiting for session record {}", .0.display())]
    LockTimeout(PathBuf),
    #[error("out of memory")]
    OutOfMemory,
    #[error("failed to encode session record: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |error| match error.kind() {
        ErrorKind::OutOfMemory => Error::OutOfMemory,
        _ => Error::Io {
            path: path.to_owned(),
            error,
        },
    }
}

/// Everything needed to undo a user's local materialization once the last
/// session referencing it goes away.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionRecord {
    /// Local state exists for this user and has not been rolled back.
    pub exists: bool,
    /// The passwd line was written by us, and must be removed by us.
    pub passwd_added: bool,
    /// The home directory was attached by us.
    pub attached: bool,
    /// Groups we added the user to.
    pub group_added: BTreeSet<GroupId>,
    /// Set when the home directory was repointed at a temporary one: the home
    /// directory it used to be.
    pub temp_homedir: Option<PathBuf>,
    /// One entry per open login session.
    pub session_pids: Vec<i32>,
}

impl SessionRecord {
    /// Forget everything, back to the state of a user we never saw.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Returns false if `pid` was already registered.
    pub fn add_pid(&mut self, pid: i32) -> bool {
        if self.session_pids.contains(&pid) {
            return false;
        }
        self.session_pids.push(pid);
        true
    }

    /// Remove the first occurrence of `pid`, keeping the order of the rest.
    /// Returns false if it was not registered.
    pub fn remove_pid(&mut self, pid: i32) -> bool {
        match self.session_pids.iter().position(|p| *p == pid) {
            Some(idx) => {
                self.session_pids.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Keep only the pids for which `live` is true, in their original order.
    /// Returns the pids that were dropped.
    pub fn retain_pids<F>(&mut self, mut live: F) -> Vec<i32>
    where
        F: FnMut(i32) -> bool,
    {
        let (kept, dropped) = std::mem::take(&mut self.session_pids)
            .into_iter()
            .partition(|p| live(*p));
        self.session_pids = kept;
        dropped
    }
}

/// Exclusive access to one user's [SessionRecord].
pub trait SessionHandle: DerefMut<Target = SessionRecord> {
    /// The persisted record could not be decoded and was reset to empty.
    fn was_reset(&self) -> bool;

    /// Persist the record and give up the lock. Must be called exactly once
    /// per acquired handle, on every path.
    fn release(self) -> Result<()>;
}

pub trait SessionStore {
    type Handle: SessionHandle;

    /// Block (within a bound) until the record for `username` is ours.
    fn acquire(&self, username: &str) -> Result<Self::Handle>;
}

/// Record keys become file names, so they have to be plain names. Names
/// starting with `.` are left for lock and scratch files.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty()
        || username.starts_with('.')
        || username.contains('/')
        || username.contains('\0')
    {
        return Err(Error::InvalidUsername(username.to_owned()));
    }
    Ok(())
}

/// One file per username in a sessions directory, each guarded by flock(2).
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
    locking: LockSettings,
}

impl FileSessionStore {
    pub fn new(dir: PathBuf, locking: LockSettings) -> Self {
        Self { dir, locking }
    }

    pub fn path(&self, username: &str) -> PathBuf {
        self.dir.join(username)
    }

    fn lock_path(&self, username: &str) -> PathBuf {
        self.dir.join(format!(".{username}.lock"))
    }

    fn lock(&self, file: &File, path: &Path) -> Result<()> {
        retry::retry(
            Fixed::from_millis(self.locking.interval_ms)
                .take(self.locking.attempts.saturating_sub(1)),
            || match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
                Ok(()) => OperationResult::Ok(()),
                Err(e) if e == Errno::EWOULDBLOCK => {
                    trace!("waiting for {}", path.display());
                    OperationResult::Retry(e)
                }
                Err(e) => OperationResult::Err(e),
            },
        )
        .map_err(|e| match e {
            retry::Error::Operation { error, .. } if error == Errno::EWOULDBLOCK => {
                Error::LockTimeout(path.to_owned())
            }
            retry::Error::Operation { error, .. } => io_error(path)(error.into()),
            retry::Error::Internal(s) => {
                io_error(path)(std::io::Error::new(ErrorKind::Other, s))
            }
        })
    }
}

/// Signals that would otherwise be able to kill us between changing the
/// host and recording that change.
fn critical_signals() -> SigSet {
    let mut set = SigSet::empty();
    for sig in [
        Signal::SIGHUP,
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTSTP,
        Signal::SIGALRM,
        Signal::SIGCHLD,
    ] {
        set.add(sig);
    }
    set
}

impl SessionStore for FileSessionStore {
    type Handle = FileSessionHandle;

    #[tracing::instrument(skip(self), err)]
    fn acquire(&self, username: &str) -> Result<FileSessionHandle> {
        validate_username(username)?;
        std::fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        let path = self.path(username);
        let lock_path = self.lock_path(username);
        let lock = OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o600)
            .open(&lock_path)
            .map_err(io_error(&lock_path))?;
        self.lock(&lock, &path)?;
        debug!("locked session record {}", path.display());

        let mut old_mask = SigSet::empty();
        pthread_sigmask(
            SigmaskHow::SIG_BLOCK,
            Some(&critical_signals()),
            Some(&mut old_mask),
        )
        .map_err(|e| io_error(&path)(e.into()))?;

        let read = match std::fs::read_to_string(&path) {
            Ok(src) => Ok(src),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(io_error(&path)(e)),
        };
        let mut handle = FileSessionHandle {
            lock: Some(lock),
            path,
            record: SessionRecord::default(),
            was_reset: false,
            old_mask,
        };
        // from here on, dropping the handle unlocks and restores the mask
        let src = read?;
        if !src.trim().is_empty() {
            match serde_json::from_str(&src) {
                Ok(record) => handle.record = record,
                Err(e) => {
                    warn!(
                        "resetting undecodable session record {}: {e}",
                        handle.path.display()
                    );
                    handle.was_reset = true;
                }
            }
        }
        Ok(handle)
    }
}

/// Replace `path` with a file holding `contents`, via a synced scratch file
/// in the same directory.
fn replace(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new().prefix(".record.").tempfile_in(dir)?;
    tmp.as_file().set_permissions(Permissions::from_mode(0o600))?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub struct FileSessionHandle {
    lock: Option<File>,
    path: PathBuf,
    record: SessionRecord,
    was_reset: bool,
    old_mask: SigSet,
}

impl FileSessionHandle {
    /// A record that does not exist is stored as an empty file.
    fn persist(&self) -> Result<()> {
        let contents = if self.record.exists {
            serde_json::to_vec_pretty(&self.record)?
        } else {
            Vec::new()
        };
        replace(&self.path, &contents).map_err(io_error(&self.path))?;
        trace!("wrote session record {}", self.path.display());
        Ok(())
    }

    /// Unlock and restore the signal mask. Closing the lock file would drop
    /// the flock anyway, this just makes it explicit.
    fn unlock(&mut self, lock: File) {
        if let Err(e) = flock(lock.as_raw_fd(), FlockArg::Unlock) {
            warn!("failed to unlock {}: {e}", self.path.display());
        }
        drop(lock);
        if let Err(e) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.old_mask), None) {
            warn!("failed to restore signal mask: {e}");
        }
        debug!("released session record {}", self.path.display());
    }
}

impl Deref for FileSessionHandle {
    type Target = SessionRecord;

    fn deref(&self) -> &SessionRecord {
        &self.record
    }
}

impl DerefMut for FileSessionHandle {
    fn deref_mut(&mut self) -> &mut SessionRecord {
        &mut self.record
    }
}

impl SessionHandle for FileSessionHandle {
    fn was_reset(&self) -> bool {
        self.was_reset
    }

    fn release(mut self) -> Result<()> {
        let lock = match self.lock.take() {
            Some(f) => f,
            None => return Ok(()),
        };
        let res = self.persist();
        self.unlock(lock);
        res
    }
}

impl Drop for FileSessionHandle {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            warn!(
                "session record {} dropped without release, changes discarded",
                self.path.display()
            );
            self.unlock(lock);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn store(dir: &Path) -> FileSessionStore {
        FileSessionStore::new(
            dir.join("sessions"),
            LockSettings {
                attempts: 2,
                interval_ms: 1,
            },
        )
    }

    #[test]
    fn fresh_record_is_empty() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let handle = store(dir.path()).acquire("alice").expect("acquire failed");
        assert_eq!(SessionRecord::default(), *handle);
        assert!(!handle.was_reset());
        handle.release().expect("release failed");
    }

    #[test]
    fn roundtrip_and_truncate() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let store = store(dir.path());
        let mut handle = store.acquire("alice").expect("acquire failed");
        handle.exists = true;
        handle.passwd_added = true;
        handle.group_added.insert(101.into());
        handle.temp_homedir = Some("/mit/alice".into());
        handle.add_pid(100);
        let expected = handle.clone();
        handle.release().expect("release failed");

        let mut handle = store.acquire("alice").expect("acquire failed");
        assert_eq!(expected, *handle);
        handle.reset();
        handle.release().expect("release failed");
        assert_eq!(
            0,
            std::fs::metadata(store.path("alice"))
                .expect("record missing")
                .len()
        );
    }

    #[test]
    fn records_are_replaced_whole() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let store = store(dir.path());
        let mut handle = store.acquire("alice").expect("acquire failed");
        handle.exists = true;
        handle.add_pid(100);
        handle.release().expect("release failed");
        let before = std::fs::metadata(store.path("alice"))
            .expect("record missing")
            .ino();

        let mut handle = store.acquire("alice").expect("acquire failed");
        handle.add_pid(200);
        handle.release().expect("release failed");
        // a fresh inode, the old record was never truncated in place
        assert_ne!(
            before,
            std::fs::metadata(store.path("alice"))
                .expect("record missing")
                .ino()
        );
        let mut names: Vec<String> = std::fs::read_dir(dir.path().join("sessions"))
            .expect("failed to read dir")
            .map(|e| e.expect("bad entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(vec![".alice.lock", "alice"], names);
        let handle = store.acquire("alice").expect("acquire failed");
        assert_eq!(vec![100, 200], handle.session_pids);
        handle.release().expect("release failed");
    }

    #[test]
    fn bad_record_is_reset() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let store = store(dir.path());
        std::fs::create_dir_all(dir.path().join("sessions")).expect("failed to create dir");
        std::fs::write(store.path("alice"), "1\n0\n0\n101:\n100:\n").expect("failed to write");
        let handle = store.acquire("alice").expect("acquire failed");
        assert!(handle.was_reset());
        assert_eq!(SessionRecord::default(), *handle);
        handle.release().expect("release failed");
    }

    #[test]
    fn held_record_times_out_other_usernames_do_not() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let store = store(dir.path());
        let held = store.acquire("alice").expect("acquire failed");
        assert!(matches!(store.acquire("alice"), Err(Error::LockTimeout(_))));
        store
            .acquire("bob")
            .expect("acquire failed")
            .release()
            .expect("release failed");
        held.release().expect("release failed");
        store
            .acquire("alice")
            .expect("acquire failed")
            .release()
            .expect("release failed");
    }

    #[test]
    fn dropped_handle_discards_changes_and_unlocks() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let store = store(dir.path());
        let mut handle = store.acquire("alice").expect("acquire failed");
        handle.exists = true;
        handle.add_pid(7);
        drop(handle);
        let handle = store.acquire("alice").expect("acquire failed");
        assert_eq!(SessionRecord::default(), *handle);
        handle.release().expect("release failed");
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("..")]
    #[case(".alice.lock")]
    #[case("../etc/passwd")]
    #[case("a\0b")]
    fn invalid_usernames(#[case] username: &str) {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        assert!(matches!(
            store(dir.path()).acquire(username),
            Err(Error::InvalidUsername(_))
        ));
    }

    #[test]
    fn pid_bookkeeping() {
        let mut record = SessionRecord::default();
        assert!(record.add_pid(1));
        assert!(record.add_pid(2));
        assert!(!record.add_pid(1));
        assert!(record.add_pid(3));
        assert!(record.add_pid(4));
        assert!(record.remove_pid(2));
        assert!(!record.remove_pid(2));
        assert_eq!(vec![1, 3, 4], record.session_pids);
        assert_eq!(vec![3], record.retain_pids(|p| p != 3));
        assert_eq!(vec![1, 4], record.session_pids);
    }
}
