/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use login_acct_store::EtcGroupFile;
use login_acct_store::GroupAdd;
use login_acct_users::GroupEntry;
use login_acct_users::GroupId;

/// The group database, as far as account lifecycle is concerned.
#[cfg_attr(test, mockall::automock)]
pub trait Groups {
    fn add_user_to_group(
        &self,
        user: &str,
        group: &GroupEntry,
        primary_gid: Option<GroupId>,
    ) -> login_acct_store::Result<GroupAdd>;

    fn remove_user_from_group(&self, user: &str, gid: GroupId) -> login_acct_store::Result<()>;
}

impl Groups for EtcGroupFile {
    fn add_user_to_group(
        &self,
        user: &str,
        group: &GroupEntry,
        primary_gid: Option<GroupId>,
    ) -> login_acct_store::Result<GroupAdd> {
        EtcGroupFile::add_user_to_group(self, user, group, primary_gid)
    }

    fn remove_user_from_group(&self, user: &str, gid: GroupId) -> login_acct_store::Result<()> {
        EtcGroupFile::remove_user_from_group(self, user, gid)
    }
}
