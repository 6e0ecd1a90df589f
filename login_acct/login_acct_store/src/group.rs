/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Membership edits of `/etc/group`, serialized by a flock on a dedicated
//! lock file and installed through the same scratch-file protocol as the
//! credential store.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use login_acct_paths::Config;
use login_acct_paths::Install;
use login_acct_paths::LockSettings;
use login_acct_users::group::GroupRecord;
use login_acct_users::raw_lines;
use login_acct_users::GroupEntry;
use login_acct_users::GroupId;
use tracing::debug;
use tracing::info;

use crate::lock::DatabaseLock;
use crate::read_failed;
use crate::scratch::Edit;
use crate::scratch::Scratch;
use crate::write_failed;
use crate::Error;
use crate::Result;

const GROUP_MODE: u32 = 0o644;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GroupAdd {
    Added,
    /// The user was already listed, so the membership is not ours to revert.
    AlreadyMember,
}

#[derive(Debug, Clone)]
pub struct EtcGroupFile {
    group: PathBuf,
    group_local: PathBuf,
    lock: PathBuf,
    locking: LockSettings,
    max_groups: usize,
}

/// Every well-formed line of a group file. Malformed and undecodable lines
/// are skipped.
fn parse_records(path: &Path) -> Result<Vec<GroupRecord<'static>>> {
    let mut records = Vec::new();
    for line in raw_lines(path).map_err(read_failed(path))? {
        let line = line.map_err(read_failed(path))?;
        if let Some(record) = std::str::from_utf8(&line)
            .ok()
            .and_then(|l| GroupRecord::from_line(l).ok())
        {
            records.push(record.into_owned());
        }
    }
    Ok(records)
}

impl EtcGroupFile {
    pub fn new(config: &Config) -> Self {
        Self {
            group: config.paths.group.clone(),
            group_local: config.paths.group_local.clone(),
            lock: config.paths.group_lock.clone(),
            locking: config.locking.clone(),
            max_groups: config.store.max_groups,
        }
    }

    fn lock(&self) -> Result<DatabaseLock> {
        DatabaseLock::flock(&self.lock, &self.locking)
    }

    fn records(&self) -> Result<Vec<GroupRecord<'static>>> {
        parse_records(&self.group)
    }

    /// Gids of groups that must survive losing their last member. `None`
    /// means there is no list, and every group is treated as local.
    fn local_gids(&self) -> Result<Option<BTreeSet<GroupId>>> {
        match parse_records(&self.group_local) {
            Ok(records) => Ok(Some(records.into_iter().map(|r| r.gid).collect())),
            Err(Error::ReadFailed { error, .. }) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Make `user` a member of `group`, creating the group if no line has
    /// its gid. Supplementary memberships are capped, the user's primary
    /// group (`primary_gid`) neither counts against the cap nor is refused
    /// by it.
    #[tracing::instrument(skip(self), err)]
    pub fn add_user_to_group(
        &self,
        user: &str,
        group: &GroupEntry,
        primary_gid: Option<GroupId>,
    ) -> Result<GroupAdd> {
        let _lock = self.lock()?;
        let records = self.records()?;
        if records
            .iter()
            .any(|r| r.gid == group.gid && r.has_member(user))
        {
            debug!("{user} is already in group {}", group.gid);
            return Ok(GroupAdd::AlreadyMember);
        }
        let is_primary = primary_gid == Some(group.gid);
        if !is_primary {
            let memberships = records
                .iter()
                .filter(|r| Some(r.gid) != primary_gid && r.has_member(user))
                .count();
            if memberships >= self.max_groups {
                return Err(Error::TooManyGroups {
                    user: user.to_owned(),
                    max: self.max_groups,
                });
            }
        }

        let mut seen = false;
        let mut scratch = Scratch::transform(&self.group, GROUP_MODE, |line| {
            if seen {
                return Edit::Keep;
            }
            match GroupRecord::from_line(line) {
                Ok(mut record) if record.gid == group.gid => {
                    seen = true;
                    record.add_member(user);
                    Edit::Replace(record.to_string())
                }
                _ => Edit::Keep,
            }
        })
        .map_err(write_failed(&self.group))?;
        if !seen {
            scratch
                .push_line(&GroupRecord::new(group.name.as_str(), group.gid, user).to_string())
                .map_err(write_failed(&self.group))?;
        }
        scratch
            .install(&Install::Rename)
            .map_err(write_failed(&self.group))?;
        info!("added {user} to group {} ({})", group.name, group.gid);
        Ok(GroupAdd::Added)
    }

    /// Drop `user` from the group with `gid`. A group left without members
    /// is deleted, unless `group.local` lists it.
    #[tracing::instrument(skip(self), err)]
    pub fn remove_user_from_group(&self, user: &str, gid: GroupId) -> Result<()> {
        let local = self.local_gids()?;
        let _lock = self.lock()?;
        let scratch = Scratch::transform(&self.group, GROUP_MODE, |line| {
            match GroupRecord::from_line(line) {
                Ok(mut record) if record.gid == gid => {
                    if !record.remove_member(user) {
                        return Edit::Keep;
                    }
                    let keep = !record.users.is_empty()
                        || local.as_ref().map_or(true, |local| local.contains(&gid));
                    if keep {
                        Edit::Replace(record.to_string())
                    } else {
                        debug!("deleting group {gid}, {user} was its last member");
                        Edit::Drop
                    }
                }
                _ => Edit::Keep,
            }
        })
        .map_err(write_failed(&self.group))?;
        scratch
            .install(&Install::Rename)
            .map_err(write_failed(&self.group))?;
        info!("removed {user} from group {gid}");
        Ok(())
    }
}
