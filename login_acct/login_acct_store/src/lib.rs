/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Crash-safe edits of the host's line-oriented account databases.
//!
//! Every edit follows the same protocol: take the database lock, stream the
//! live file into a scratch file in the same directory while transforming it
//! line by line, force the scratch file to disk, then install it with a
//! single atomic step. The live file is never written in place, so a failure
//! at any point before the install leaves it byte-for-byte untouched, and the
//! scratch file and lock are released when their guards go out of scope.

use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use login_acct_users::DirectoryError;

pub mod group;
mod lock;
pub mod passwd;
mod scratch;

pub use group::EtcGroupFile;
pub use group::GroupAdd;
pub use passwd::AddOutcome;
pub use passwd::CredentialStore;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("bad directory record for {user:?}: {reason}")]
    BadDirectoryRecord { user: String, reason: String },
    #[error("failed to update {}: {error}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to read {}: {error}", .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("out of memory")]
    OutOfMemory,
    #[error("timed out waiting for lock {}", .0.display())]
    LockTimeout(PathBuf),
    #[error("{user:?} is already in the maximum of {max} groups")]
    TooManyGroups { user: String, max: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn from_directory(user: &str, e: DirectoryError) -> Self {
        match e {
            DirectoryError::OutOfMemory => Self::OutOfMemory,
            // an unreachable directory cannot vouch for the user
            DirectoryError::Io(_) => Self::UnknownUser(user.to_owned()),
            DirectoryError::Malformed(reason) => Self::BadDirectoryRecord {
                user: user.to_owned(),
                reason,
            },
        }
    }
}

/// Attribute an io error to the database at `path`.
pub(crate) fn write_failed(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |error| match error.kind() {
        ErrorKind::OutOfMemory => Error::OutOfMemory,
        _ => Error::WriteFailed {
            path: path.to_owned(),
            error,
        },
    }
}

pub(crate) fn read_failed(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |error| match error.kind() {
        ErrorKind::OutOfMemory => Error::OutOfMemory,
        _ => Error::ReadFailed {
            path: path.to_owned(),
            error,
        },
    }
}
