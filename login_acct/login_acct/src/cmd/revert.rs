/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use clap::Parser;
use login_acct_paths::Config;

use crate::Result;

#[derive(Parser, Debug)]
/// Drop a session's reference, rolling the account back if it was the last
pub(crate) struct Revert {
    username: String,
    #[clap(long)]
    pid: i32,
}

impl Revert {
    #[tracing::instrument(name = "revert", skip(config), err)]
    pub(crate) fn run(self, config: &Config) -> Result<crate::Exit> {
        super::manager(config).revert(&self.username, self.pid)?;
        Ok(crate::Exit::Clean)
    }
}
