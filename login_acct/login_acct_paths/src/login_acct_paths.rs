/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Every on-host path and tunable used by the login account libraries, in one
//! place, so that no library hardcodes `/etc/passwd` or
//! `/var/athena/sessions` on its own.
//!
//! The defaults match a production host. [Config::rooted] moves every host
//! file under a different root directory, which is how tests (and
//! `login-acct --root`) exercise the real code against a scratch tree.

use std::ops::RangeInclusive;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config {}: {error}", .path.display())]
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("failed to parse config {}: {error}", .path.display())]
    Parse {
        path: PathBuf,
        error: toml::de::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: LoginPaths,
    pub store: StoreSettings,
    pub locking: LockSettings,
}

impl Config {
    /// Load a TOML config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path).map_err(|error| Error::Read {
            path: path.to_owned(),
            error,
        })?;
        toml::from_str(&src).map_err(|error| Error::Parse {
            path: path.to_owned(),
            error,
        })
    }

    /// Move every host file under `root`. Programs that get executed
    /// (attach, detach, the index rebuilder) are left alone since they still
    /// run from the host.
    pub fn rooted(self, root: &Path) -> Self {
        let lock = match self.store.lock {
            LockStrategy::Sentinel { path } => LockStrategy::Sentinel {
                path: reroot(root, &path),
            },
            lock => lock,
        };
        Self {
            paths: self.paths.rooted(root),
            store: StoreSettings { lock, ..self.store },
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoginPaths {
    /// One session record per username lives in here.
    pub sessions: PathBuf,
    /// Parent of all fabricated temporary home directories.
    pub tmp_homedirs: PathBuf,
    /// Skeleton copied into a fresh temporary home directory.
    pub tmp_home_prototype: PathBuf,
    pub attach: PathBuf,
    pub detach: PathBuf,
    pub nologin: PathBuf,
    pub noremote: PathBuf,
    pub nocreate: PathBuf,
    pub noattach: PathBuf,
    pub nocrack: PathBuf,
    pub access: PathBuf,
    pub passwd: PathBuf,
    pub passwd_lock: PathBuf,
    pub shadow: PathBuf,
    pub group: PathBuf,
    pub group_local: PathBuf,
    pub group_lock: PathBuf,
    /// passwd(5)-formatted export of the directory service.
    pub directory_passwd: PathBuf,
    /// `username:group:gid:group:gid...` export of the directory service.
    pub directory_grplist: PathBuf,
    /// group(5)-formatted export of the directory service, used to name a
    /// user's primary group.
    pub directory_group: PathBuf,
}

impl Default for LoginPaths {
    fn default() -> Self {
        Self {
            sessions: "/var/athena/sessions".into(),
            tmp_homedirs: "/var/athena/tmphomedir".into(),
            tmp_home_prototype: "/usr/athena/lib/prototype_tmpuser".into(),
            attach: "/bin/athena/attach".into(),
            detach: "/bin/athena/detach".into(),
            nologin: "/etc/nologin".into(),
            noremote: "/etc/noremote".into(),
            nocreate: "/etc/nocreate".into(),
            noattach: "/etc/noattach".into(),
            nocrack: "/etc/nocrack".into(),
            access: "/etc/athena/access".into(),
            passwd: "/etc/passwd".into(),
            passwd_lock: "/etc/.pwd.lock".into(),
            shadow: "/etc/shadow".into(),
            group: "/etc/group".into(),
            group_local: "/etc/group.local".into(),
            group_lock: "/var/athena/group.lock".into(),
            directory_passwd: "/var/athena/directory/passwd".into(),
            directory_grplist: "/var/athena/directory/grplist".into(),
            directory_group: "/var/athena/directory/group".into(),
        }
    }
}

/// Join a (possibly absolute) path with `root`.
fn reroot(root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix("/") {
        Ok(relative) => root.join(relative),
        Err(_) => root.join(path),
    }
}

impl LoginPaths {
    pub fn rooted(self, root: &Path) -> Self {
        let r = |p: PathBuf| reroot(root, &p);
        Self {
            sessions: r(self.sessions),
            tmp_homedirs: r(self.tmp_homedirs),
            tmp_home_prototype: r(self.tmp_home_prototype),
            attach: self.attach,
            detach: self.detach,
            nologin: r(self.nologin),
            noremote: r(self.noremote),
            nocreate: r(self.nocreate),
            noattach: r(self.noattach),
            nocrack: r(self.nocrack),
            access: r(self.access),
            passwd: r(self.passwd),
            passwd_lock: r(self.passwd_lock),
            shadow: r(self.shadow),
            group: r(self.group),
            group_local: r(self.group_local),
            group_lock: r(self.group_lock),
            directory_passwd: r(self.directory_passwd),
            directory_grplist: r(self.directory_grplist),
            directory_group: r(self.directory_group),
        }
    }
}

/// Where encrypted passwords live.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// passwd carries `x`, the hash lives in a shadow companion file
    #[default]
    Shadow,
    /// the hash lives directly in passwd
    Plain,
}

/// How a finished scratch file becomes the live database.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Install {
    /// rename(2) over the target
    #[default]
    Rename,
    /// Hand the scratch file to an index rebuilder (`pwd_mkdb -p <scratch>`)
    /// which compiles and installs it.
    RebuildIndex { program: PathBuf },
}

/// How the credential store is locked against other mutators on the host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategy {
    /// flock(2) on `passwd_lock`, the same file lckpwdf(3) guards
    #[default]
    Flock,
    /// Exclusive-create a sentinel file, removed on unlock
    Sentinel { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    pub layout: Layout,
    pub install: Install,
    pub lock: LockStrategy,
    /// Directory-supplied primary gids in this range are refused.
    pub reserved_gids: Option<RangeInclusive<u32>>,
    /// Maximum number of non-primary groups a user is added to.
    pub max_groups: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            install: Install::default(),
            lock: LockStrategy::default(),
            reserved_gids: None,
            max_groups: 13,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockSettings {
    pub attempts: usize,
    pub interval_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval_ms: 1000,
        }
    }
}

impl LockSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
