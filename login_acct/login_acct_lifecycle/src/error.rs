/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt::Display;
use std::fmt::Formatter;

use crate::HomeError;

/// Hard failures. The call that returns one of these did not complete, but
/// the session record was still written back.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Bad Hesiod entry for user")]
    BadDirectoryRecord { reason: String },
    #[error("Unknown username")]
    UnknownUser,
    #[error("Could not add user to passwd file")]
    Passwd(#[source] login_acct_store::Error),
    #[error("Could not modify user's session record")]
    Session(#[source] login_acct_session::Error),
    #[error("Permission denied while modifying system files")]
    Permission(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("Out of memory")]
    OutOfMemory,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable numeric code, shared with callers that only log numbers.
    pub fn code(&self) -> i32 {
        match self {
            Self::BadDirectoryRecord { .. } => 2,
            Self::UnknownUser => 3,
            Self::Passwd(_) => 7,
            Self::Session(_) => 8,
            Self::Permission(_) => 9,
            Self::OutOfMemory => 10,
        }
    }

    fn permission<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Permission(Box::new(e))
    }

    /// Group file edits made on the user's behalf, as opposed to the
    /// credential store proper.
    pub(crate) fn group(e: login_acct_store::Error) -> Self {
        match e {
            login_acct_store::Error::OutOfMemory => Self::OutOfMemory,
            e => Self::permission(e),
        }
    }
}

impl From<HomeError> for Error {
    fn from(e: HomeError) -> Self {
        match e {
            HomeError::OutOfMemory => Self::OutOfMemory,
            e => Self::permission(e),
        }
    }
}

impl From<login_acct_store::Error> for Error {
    fn from(e: login_acct_store::Error) -> Self {
        use login_acct_store::Error as E;
        if let E::WriteFailed { error, .. } | E::ReadFailed { error, .. } = &e {
            if error.kind() == std::io::ErrorKind::PermissionDenied {
                return Self::permission(e);
            }
        }
        match e {
            E::UnknownUser(_) => Self::UnknownUser,
            E::BadDirectoryRecord { reason, .. } => Self::BadDirectoryRecord { reason },
            E::OutOfMemory => Self::OutOfMemory,
            e => Self::Passwd(e),
        }
    }
}

impl From<login_acct_session::Error> for Error {
    fn from(e: login_acct_session::Error) -> Self {
        if let login_acct_session::Error::Io { error, .. } = &e {
            if error.kind() == std::io::ErrorKind::PermissionDenied {
                return Self::permission(e);
            }
        }
        match e {
            login_acct_session::Error::OutOfMemory => Self::OutOfMemory,
            e => Self::Session(e),
        }
    }
}

/// Degraded success: the call did what it had to, but one optional step
/// did not work out.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Warning {
    /// The persisted session record was unreadable and started over.
    BadSessionRecord,
    /// At least one directory group could not be added.
    GroupAddFailed,
    /// Another session already set up a temporary home directory.
    ExistingTempHome,
    /// Attach failed and a temporary home directory was created instead.
    TempHomeCreated,
    /// Attach failed and there is no home directory at all.
    NoTempHome,
    /// Attaching home directories is disabled on this host.
    AttachDisabled,
}

impl Warning {
    pub fn code(&self) -> i32 {
        match self {
            Self::BadSessionRecord => 11,
            Self::GroupAddFailed => 12,
            Self::ExistingTempHome => 13,
            Self::TempHomeCreated => 14,
            Self::NoTempHome => 15,
            Self::AttachDisabled => 16,
        }
    }
}

impl Display for Warning {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::BadSessionRecord => write!(f, "Bad session record overwritten"),
            Self::GroupAddFailed => write!(f, "Could not add you to group file"),
            Self::ExistingTempHome => write!(
                f,
                "Using a temporary home directory created by a previous login"
            ),
            Self::TempHomeCreated => {
                write!(f, "Attach failed; you have a temporary home directory")
            }
            Self::NoTempHome => write!(f, "Attach failed; you have no home directory"),
            Self::AttachDisabled => write!(f, "Home directory attach is disabled on this machine"),
        }
    }
}

/// Result of a successful create, in the order the warnings were raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub warnings: Vec<Warning>,
}

impl Outcome {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
