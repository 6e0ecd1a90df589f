/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The local credential store: `passwd` plus, in the shadow layout, its
//! `shadow` companion. Both files are edited under a single lock acquisition
//! and shadow is always installed before passwd, so a reader never finds a
//! passwd line pointing at a shadow line that does not exist yet.

use std::path::Path;
use std::path::PathBuf;

use login_acct_paths::Config;
use login_acct_paths::Install;
use login_acct_paths::Layout;
use login_acct_paths::LockSettings;
use login_acct_paths::StoreSettings;
use login_acct_users::first_field_is;
use login_acct_users::passwd;
use login_acct_users::passwd::UserRecord;
use login_acct_users::shadow;
use login_acct_users::shadow::Days;
use login_acct_users::shadow::ShadowRecord;
use login_acct_users::Directory;
use login_acct_users::Id;
use login_acct_users::Password;
use login_acct_users::UserId;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::lock::DatabaseLock;
use crate::read_failed;
use crate::scratch::Edit;
use crate::scratch::Scratch;
use crate::write_failed;
use crate::Error;
use crate::Result;

const PASSWD_MODE: u32 = 0o644;
const SHADOW_MODE: u32 = 0o640;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new line was written, and must be removed again on rollback.
    Added,
    /// The user already had a local line, nothing was touched.
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    passwd: PathBuf,
    shadow: PathBuf,
    lock: PathBuf,
    nocrack: PathBuf,
    settings: StoreSettings,
    locking: LockSettings,
}

/// Replace field `index` of the line belonging to `username`. Lines with
/// fewer than `fields` fields are passed through unchanged rather than
/// guessed at.
fn set_field(line: &str, username: &str, index: usize, fields: usize, value: &str) -> Edit {
    if !first_field_is(line, username) {
        return Edit::Keep;
    }
    let mut parts: Vec<&str> = line.split(':').collect();
    if parts.len() < fields {
        warn!("leaving malformed line for {username} untouched");
        return Edit::Keep;
    }
    parts[index] = value;
    Edit::Replace(parts.join(":"))
}

impl CredentialStore {
    pub fn new(config: &Config) -> Self {
        Self {
            passwd: config.paths.passwd.clone(),
            shadow: config.paths.shadow.clone(),
            lock: config.paths.passwd_lock.clone(),
            nocrack: config.paths.nocrack.clone(),
            settings: config.store.clone(),
            locking: config.locking.clone(),
        }
    }

    fn lock(&self) -> Result<DatabaseLock> {
        DatabaseLock::acquire(&self.settings.lock, &self.lock, &self.locking)
    }

    /// `nocrack` disables every automatic substitution of a password derived
    /// from what the user typed at login.
    fn nocrack(&self) -> bool {
        self.nocrack.exists()
    }

    pub fn lookup_by_name(&self, name: &str) -> Result<Option<UserRecord<'static>>> {
        passwd::lookup_by_name(&self.passwd, name).map_err(read_failed(&self.passwd))
    }

    pub fn lookup_by_uid(&self, uid: UserId) -> Result<Option<UserRecord<'static>>> {
        passwd::lookup_by_uid(&self.passwd, uid).map_err(read_failed(&self.passwd))
    }

    fn passwd_scratch<F>(&self, edit: F) -> Result<Scratch>
    where
        F: FnMut(&str) -> Edit,
    {
        Scratch::transform(&self.passwd, PASSWD_MODE, edit).map_err(write_failed(&self.passwd))
    }

    fn passwd_copy(&self) -> Result<Scratch> {
        Scratch::copy(&self.passwd, PASSWD_MODE).map_err(write_failed(&self.passwd))
    }

    fn shadow_scratch<F>(&self, edit: F) -> Result<Scratch>
    where
        F: FnMut(&str) -> Edit,
    {
        Scratch::transform(&self.shadow, SHADOW_MODE, edit).map_err(write_failed(&self.shadow))
    }

    fn shadow_copy(&self) -> Result<Scratch> {
        Scratch::copy(&self.shadow, SHADOW_MODE).map_err(write_failed(&self.shadow))
    }

    /// Install shadow, then passwd. Must be called with the lock held.
    fn commit(&self, shadow: Option<Scratch>, passwd: Option<Scratch>) -> Result<()> {
        if let Some(shadow) = shadow {
            shadow
                .install(&Install::Rename)
                .map_err(write_failed(&self.shadow))?;
        }
        if let Some(passwd) = passwd {
            passwd
                .install(&self.settings.install)
                .map_err(write_failed(&self.passwd))?;
        }
        Ok(())
    }

    /// Materialize `username` from the directory service. `cryptpw` is the
    /// hash of the password the user just authenticated with, and replaces
    /// the directory's hash unless `nocrack` is present.
    #[tracing::instrument(skip(self, directory, cryptpw), err)]
    pub fn add<D>(&self, directory: &D, username: &str, cryptpw: Option<&str>) -> Result<AddOutcome>
    where
        D: Directory + ?Sized,
    {
        if passwd::has_user(&self.passwd, username).map_err(read_failed(&self.passwd))? {
            debug!("{username} already has a local passwd line");
            return Ok(AddOutcome::AlreadyPresent);
        }
        let mut record = directory
            .lookup_by_name(username)
            .map_err(|e| Error::from_directory(username, e))?
            .ok_or_else(|| Error::UnknownUser(username.to_owned()))?;
        if let Some(owner) =
            passwd::uid_owner(&self.passwd, record.uid).map_err(read_failed(&self.passwd))?
        {
            return Err(Error::BadDirectoryRecord {
                user: username.to_owned(),
                reason: format!(
                    "uid {} already belongs to local user {owner:?}",
                    record.uid
                ),
            });
        }
        if let Some(reserved) = &self.settings.reserved_gids {
            if reserved.contains(&record.gid.as_raw()) {
                return Err(Error::BadDirectoryRecord {
                    user: username.to_owned(),
                    reason: format!("gid {} is reserved for system groups", record.gid),
                });
            }
        }
        let hash = match cryptpw {
            Some(pw) if !self.nocrack() => pw.to_owned(),
            _ => record.password.to_string(),
        };

        let _lock = self.lock()?;
        match self.settings.layout {
            Layout::Shadow => {
                record.password = Password::Shadow;
                let mut shadow = self.shadow_copy()?;
                shadow
                    .push_line(&ShadowRecord::new(record.name.clone(), &hash, Days::today()).to_string())
                    .map_err(write_failed(&self.shadow))?;
                let mut passwd = self.passwd_copy()?;
                passwd
                    .push_line(&record.to_string())
                    .map_err(write_failed(&self.passwd))?;
                self.commit(Some(shadow), Some(passwd))?;
            }
            Layout::Plain => {
                record.password = Password::from(hash.as_str());
                let mut passwd = self.passwd_copy()?;
                passwd
                    .push_line(&record.to_string())
                    .map_err(write_failed(&self.passwd))?;
                self.commit(None, Some(passwd))?;
            }
        }
        info!("added {username} (uid {}) to {}", record.uid, self.passwd.display());
        Ok(AddOutcome::Added)
    }

    /// Remove the lines for `username`, but only if they were written by
    /// [CredentialStore::add] in the first place.
    #[tracing::instrument(skip(self), err)]
    pub fn remove(&self, username: &str, passwd_added: bool) -> Result<()> {
        if !passwd_added {
            return Ok(());
        }
        let drop_user = |line: &str| {
            if first_field_is(line, username) {
                Edit::Drop
            } else {
                Edit::Keep
            }
        };
        let _lock = self.lock()?;
        let shadow = match self.settings.layout {
            Layout::Shadow => Some(self.shadow_scratch(drop_user)?),
            Layout::Plain => None,
        };
        let passwd = self.passwd_scratch(drop_user)?;
        self.commit(shadow, Some(passwd))?;
        info!("removed {username} from {}", self.passwd.display());
        Ok(())
    }

    /// Swap in a fresher password hash for a line this library added.
    /// Returns false (and touches nothing) when the line is not ours, no hash
    /// was supplied, or `nocrack` is present.
    #[tracing::instrument(skip(self, cryptpw), err)]
    pub fn update_password(
        &self,
        username: &str,
        passwd_added: bool,
        cryptpw: Option<&str>,
    ) -> Result<bool> {
        let cryptpw = match cryptpw {
            Some(pw) if passwd_added && !self.nocrack() => pw,
            _ => return Ok(false),
        };
        let _lock = self.lock()?;
        match self.settings.layout {
            Layout::Shadow => {
                let shadow = self.shadow_scratch(|line| {
                    set_field(
                        line,
                        username,
                        shadow::PASSWORD_FIELD,
                        shadow::FIELDS,
                        cryptpw,
                    )
                })?;
                self.commit(Some(shadow), None)?;
            }
            Layout::Plain => {
                let passwd = self.passwd_scratch(|line| {
                    set_field(
                        line,
                        username,
                        passwd::PASSWORD_FIELD,
                        passwd::FIELDS,
                        cryptpw,
                    )
                })?;
                self.commit(None, Some(passwd))?;
            }
        }
        Ok(true)
    }

    /// Point the home directory field of `username` at `home`.
    #[tracing::instrument(skip(self), err)]
    pub fn set_home_directory(&self, username: &str, home: &Path) -> Result<()> {
        let home = home.to_string_lossy();
        if home.contains(':') || home.contains('\n') {
            return Err(write_failed(&self.passwd)(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{home:?} cannot be stored in a passwd field"),
            )));
        }
        let _lock = self.lock()?;
        let passwd = self.passwd_scratch(|line| {
            set_field(line, username, passwd::HOMEDIR_FIELD, passwd::FIELDS, &home)
        })?;
        self.commit(None, Some(passwd))?;
        info!("home directory of {username} is now {home}");
        Ok(())
    }
}
