/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use login_acct_gate::LoginGate;
use login_acct_lifecycle::AccountManager;
use login_acct_lifecycle::CommandHomeDirectory;
use login_acct_lifecycle::SignalLiveness;
use login_acct_paths::Config;
use login_acct_session::FileSessionStore;
use login_acct_store::CredentialStore;
use login_acct_store::EtcGroupFile;
use login_acct_users::FileDirectory;

mod access;
mod allowed;
mod cleanup;
mod create;
mod revert;
mod status;

pub(crate) use access::Access;
pub(crate) use allowed::Allowed;
pub(crate) use cleanup::Cleanup;
pub(crate) use create::Create;
pub(crate) use revert::Revert;
pub(crate) use status::Status;

pub(crate) type HostManager = AccountManager<
    FileSessionStore,
    FileDirectory,
    EtcGroupFile,
    CommandHomeDirectory,
    SignalLiveness,
>;

/// The account manager wired up to the real host files and programs.
pub(crate) fn manager(config: &Config) -> HostManager {
    AccountManager::builder()
        .sessions(FileSessionStore::new(
            config.paths.sessions.clone(),
            config.locking.clone(),
        ))
        .store(CredentialStore::new(config))
        .directory(FileDirectory::from_paths(&config.paths))
        .groups(EtcGroupFile::new(config))
        .home(CommandHomeDirectory::new(&config.paths))
        .liveness(SignalLiveness)
        .build()
}

pub(crate) fn gate(config: &Config) -> LoginGate<FileDirectory> {
    LoginGate::new(
        config.paths.clone(),
        FileDirectory::from_paths(&config.paths),
    )
}
