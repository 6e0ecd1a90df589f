/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Decide whether a user may log in at all, before anything on the host is
//! changed on their behalf.

use std::fmt::Display;
use std::fmt::Formatter;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use login_acct_paths::LoginPaths;
use login_acct_users::passwd;
use login_acct_users::Directory;
use login_acct_users::DirectoryError;
use login_acct_users::Id;
use tracing::debug;

mod access;

pub use access::Access;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown username")]
    UnknownUser,
    #[error("Bad Hesiod entry for user: {reason}")]
    BadDirectoryRecord { reason: String },
    #[error("access file {} does not exist", .0.display())]
    NoAccessFile(PathBuf),
    #[error("could not read {}: {error}", .path.display())]
    Permission {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("Out of memory")]
    OutOfMemory,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn permission(path: &Path, error: std::io::Error) -> Self {
        match error.kind() {
            ErrorKind::OutOfMemory => Self::OutOfMemory,
            _ => Self::Permission {
                path: path.to_owned(),
                error,
            },
        }
    }
}

/// Which policy file turned the user away.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DenyReason {
    NoCreate,
    NoLogin,
    NoRemote,
}

impl DenyReason {
    pub fn code(&self) -> i32 {
        match self {
            Self::NoCreate => 4,
            Self::NoLogin => 5,
            Self::NoRemote => 6,
        }
    }
}

impl Display for DenyReason {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::NoCreate => write!(f, "Logins not allowed for non-local accounts"),
            Self::NoLogin => write!(f, "Logins currently disabled"),
            Self::NoRemote => write!(f, "Remote logins not allowed for non-local accounts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied {
        reason: DenyReason,
        /// Contents of the policy file, if it could be read.
        policy_text: Option<String>,
    },
}

pub struct LoginGate<D> {
    paths: LoginPaths,
    directory: D,
}

impl<D> LoginGate<D>
where
    D: Directory,
{
    pub fn new(paths: LoginPaths, directory: D) -> Self {
        Self { paths, directory }
    }

    fn has_local(&self, username: &str) -> Result<bool> {
        passwd::has_user(&self.paths.passwd, username)
            .map_err(|e| Error::permission(&self.paths.passwd, e))
    }

    fn is_root(&self, username: &str) -> Result<bool> {
        let local = passwd::lookup_by_name(&self.paths.passwd, username)
            .map_err(|e| Error::permission(&self.paths.passwd, e))?;
        Ok(local.map_or(false, |l| l.uid.as_raw() == 0))
    }

    fn deny(&self, reason: DenyReason) -> Verdict {
        let path = match reason {
            DenyReason::NoCreate => &self.paths.nocreate,
            DenyReason::NoLogin => &self.paths.nologin,
            DenyReason::NoRemote => &self.paths.noremote,
        };
        let policy_text = match std::fs::read(path) {
            Ok(text) => Some(String::from_utf8_lossy(&text).into_owned()),
            Err(e) => {
                debug!("could not read {}: {e}", path.display());
                None
            }
        };
        Verdict::Denied {
            reason,
            policy_text,
        }
    }

    /// Side-effect free. Users with a local account only answer to
    /// `nologin` (and root not even to that), everyone else must also get
    /// past `nocreate` and `noremote`, and be known to the directory
    /// without clashing with a local uid.
    #[tracing::instrument(skip(self), ret, err)]
    pub fn is_login_allowed(&self, username: &str, is_remote: bool) -> Result<Verdict> {
        if self.has_local(username)? {
            if self.paths.nologin.exists() && !self.is_root(username)? {
                return Ok(self.deny(DenyReason::NoLogin));
            }
            return Ok(Verdict::Allowed);
        }
        if self.paths.nologin.exists() {
            return Ok(self.deny(DenyReason::NoLogin));
        }
        if self.paths.nocreate.exists() {
            return Ok(self.deny(DenyReason::NoCreate));
        }
        if is_remote && self.paths.noremote.exists() {
            return Ok(self.deny(DenyReason::NoRemote));
        }

        let remote = match self.directory.lookup_by_name(username) {
            Ok(Some(remote)) => remote,
            Ok(None) => return Err(Error::UnknownUser),
            Err(DirectoryError::OutOfMemory) => return Err(Error::OutOfMemory),
            Err(e) => {
                debug!("directory lookup of {username} failed: {e}");
                return Err(Error::UnknownUser);
            }
        };
        if let Some(owner) = passwd::uid_owner(&self.paths.passwd, remote.uid)
            .map_err(|e| Error::permission(&self.paths.passwd, e))?
        {
            return Err(Error::BadDirectoryRecord {
                reason: format!("uid {} already belongs to {owner}", remote.uid),
            });
        }
        Ok(Verdict::Allowed)
    }

    /// The access file entry that applies to `username`.
    pub fn access(&self, username: &str) -> Result<Access> {
        let in_passwd = self.has_local(username)?;
        access::get_access(&self.paths.access, username, in_passwd)
    }

    /// Whether the access file marks `username` as having a native local
    /// account. No access file, or no entry, means no.
    pub fn is_local_account(&self, username: &str) -> Result<bool> {
        match self.access(username) {
            Ok(access) => Ok(access.is_local()),
            Err(Error::NoAccessFile(_) | Error::UnknownUser) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
