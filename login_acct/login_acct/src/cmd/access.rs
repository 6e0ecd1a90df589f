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
/// Print the access file entry that applies to a user
pub(crate) struct Access {
    username: String,
}

impl Access {
    #[tracing::instrument(name = "access", skip(config), err)]
    pub(crate) fn run(self, config: &Config) -> Result<crate::Exit> {
        let gate = super::gate(config);
        let access = gate.access(&self.username)?;
        match access.text {
            Some(text) => println!("{}\t{text}", access.bits),
            None => println!("{}", access.bits),
        }
        Ok(crate::Exit::Clean)
    }
}
