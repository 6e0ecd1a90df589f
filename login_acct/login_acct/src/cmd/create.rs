/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use clap::Parser;
use login_acct_lifecycle::CreateRequest;
use login_acct_paths::Config;
use tracing::warn;

use crate::Result;

#[derive(Parser, Debug)]
/// Materialize a directory account locally for a new login session
pub(crate) struct Create {
    username: String,
    #[clap(long)]
    /// Process id of the session taking a reference on the account
    pid: i32,
    #[clap(long)]
    /// Password hash from the login that just authenticated
    cryptpw: Option<String>,
    #[clap(long)]
    /// The user holds network credentials for their home directory
    have_cred: bool,
    #[clap(long)]
    /// Fall back to a temporary home directory if attach fails
    tmp_homedir: bool,
}

impl Create {
    #[tracing::instrument(name = "create", skip(config), err)]
    pub(crate) fn run(self, config: &Config) -> Result<crate::Exit> {
        let request = CreateRequest::builder()
            .username(&self.username)
            .pid(self.pid)
            .cryptpw(self.cryptpw.as_deref())
            .has_credentials(self.have_cred)
            .allow_temp_homedir(self.tmp_homedir)
            .build();
        let outcome = super::manager(config).create(&request)?;
        for warning in &outcome.warnings {
            warn!("{warning}");
            eprintln!("warning {}: {warning}", warning.code());
        }
        Ok(match outcome.is_clean() {
            true => crate::Exit::Clean,
            false => crate::Exit::Degraded,
        })
    }
}
