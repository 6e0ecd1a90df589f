/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use anyhow::Context;
use clap::Parser;
use login_acct_paths::Config;

use crate::Result;

#[derive(Parser, Debug)]
/// Print a user's session record as JSON
pub(crate) struct Status {
    username: String,
}

impl Status {
    #[tracing::instrument(name = "status", skip(config), err)]
    pub(crate) fn run(self, config: &Config) -> Result<crate::Exit> {
        let record = super::manager(config).status(&self.username)?;
        println!(
            "{}",
            serde_json::to_string_pretty(&record).context("while serializing session record")?
        );
        Ok(crate::Exit::Clean)
    }
}
