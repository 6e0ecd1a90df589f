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
/// Forget sessions whose process has exited, rolling the account back if
/// none are left
pub(crate) struct Cleanup {
    username: String,
}

impl Cleanup {
    #[tracing::instrument(name = "cleanup", skip(config), err)]
    pub(crate) fn run(self, config: &Config) -> Result<crate::Exit> {
        super::manager(config).cleanup(&self.username)?;
        Ok(crate::Exit::Clean)
    }
}
