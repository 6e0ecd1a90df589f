/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use clap::Parser;
use login_acct_gate::Verdict;
use login_acct_paths::Config;

use crate::Result;

#[derive(Parser, Debug)]
/// Check whether a user may log in, without changing anything
pub(crate) struct Allowed {
    username: String,
    #[clap(long)]
    /// The login is coming in over the network
    remote: bool,
}

impl Allowed {
    #[tracing::instrument(name = "allowed", skip(config), ret, err)]
    pub(crate) fn run(self, config: &Config) -> Result<crate::Exit> {
        match super::gate(config).is_login_allowed(&self.username, self.remote)? {
            Verdict::Allowed => {
                println!("allowed");
                Ok(crate::Exit::Clean)
            }
            Verdict::Denied {
                reason,
                policy_text,
            } => {
                println!("{reason}");
                if let Some(text) = policy_text {
                    print!("{text}");
                }
                Ok(crate::Exit::Degraded)
            }
        }
    }
}
