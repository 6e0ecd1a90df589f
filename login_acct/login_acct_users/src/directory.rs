/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The directory service holds the canonical account records that a host
//! materializes locally on first login. Only lookups are needed here, the
//! transport is somebody else's problem.

use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use login_acct_paths::LoginPaths;

use crate::group::GroupRecord;
use crate::passwd;
use crate::passwd::UserRecord;
use crate::raw_lines;
use crate::GroupId;
use crate::UserId;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("out of memory while querying the directory service")]
    OutOfMemory,
    #[error("directory service unavailable: {0}")]
    Io(std::io::Error),
    #[error("malformed directory entry: {0}")]
    Malformed(String),
}

impl From<std::io::Error> for DirectoryError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::OutOfMemory => Self::OutOfMemory,
            _ => Self::Io(e),
        }
    }
}

/// One entry of a user's directory group list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupEntry {
    pub name: String,
    pub gid: GroupId,
}

#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait Directory {
    fn lookup_by_name(&self, name: &str) -> Result<Option<UserRecord<'static>>, DirectoryError>;

    fn lookup_by_uid(&self, uid: UserId) -> Result<Option<UserRecord<'static>>, DirectoryError>;

    /// Supplementary groups the directory lists for `name`, in directory
    /// order. An unknown user has no groups.
    fn groups(&self, name: &str) -> Result<Vec<GroupEntry>, DirectoryError>;

    /// Name of the directory group with this gid, if any.
    fn group_name(&self, gid: GroupId) -> Result<Option<String>, DirectoryError>;
}

/// Directory backed by flat-file exports of the directory service: a passwd(5)
/// file, a group(5) file and a grplist file with one
/// `user:group:gid:group:gid...` line per user.
///
/// Files are re-read on every lookup, so an export refreshed underneath a
/// long running process is picked up immediately.
#[derive(Debug, Clone)]
pub struct FileDirectory {
    passwd: PathBuf,
    grplist: PathBuf,
    group: PathBuf,
}

impl FileDirectory {
    pub fn new(passwd: PathBuf, grplist: PathBuf, group: PathBuf) -> Self {
        Self {
            passwd,
            grplist,
            group,
        }
    }

    pub fn from_paths(paths: &LoginPaths) -> Self {
        Self::new(
            paths.directory_passwd.clone(),
            paths.directory_grplist.clone(),
            paths.directory_group.clone(),
        )
    }
}

/// Decodable lines of an export that may not exist. Anything that is not
/// UTF-8 cannot name a user or group we would look up.
fn export_lines(path: &Path) -> std::io::Result<Vec<String>> {
    let lines = match raw_lines(path) {
        Ok(lines) => lines,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut decoded = Vec::new();
    for line in lines {
        if let Ok(line) = String::from_utf8(line?) {
            decoded.push(line);
        }
    }
    Ok(decoded)
}

/// Parse the `group:gid:group:gid...` tail of a grplist line.
fn parse_grplist(list: &str) -> Result<Vec<GroupEntry>, DirectoryError> {
    let fields: Vec<&str> = list.split(':').collect();
    let mut groups = Vec::with_capacity(fields.len() / 2);
    for pair in fields.chunks(2) {
        match pair {
            [name, gid] if !name.is_empty() => {
                let gid: u32 = gid.parse().map_err(|_| {
                    DirectoryError::Malformed(format!("bad gid {gid:?} for group {name:?}"))
                })?;
                groups.push(GroupEntry {
                    name: (*name).to_owned(),
                    gid: gid.into(),
                });
            }
            // a trailing group name without a gid, or an empty tail
            _ => break,
        }
    }
    Ok(groups)
}

impl Directory for FileDirectory {
    fn lookup_by_name(&self, name: &str) -> Result<Option<UserRecord<'static>>, DirectoryError> {
        Ok(passwd::lookup_by_name(&self.passwd, name)?)
    }

    fn lookup_by_uid(&self, uid: UserId) -> Result<Option<UserRecord<'static>>, DirectoryError> {
        Ok(passwd::lookup_by_uid(&self.passwd, uid)?)
    }

    fn groups(&self, name: &str) -> Result<Vec<GroupEntry>, DirectoryError> {
        for line in export_lines(&self.grplist)? {
            if let Some(list) = line
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix(':'))
            {
                return parse_grplist(list);
            }
        }
        Ok(Vec::new())
    }

    fn group_name(&self, gid: GroupId) -> Result<Option<String>, DirectoryError> {
        for line in export_lines(&self.group)? {
            if let Ok(record) = GroupRecord::from_line(&line) {
                if record.gid == gid {
                    return Ok(Some(record.name.into_owned()));
                }
            }
        }
        Ok(None)
    }
}
