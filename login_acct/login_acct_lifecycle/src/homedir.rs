/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Home directories: attaching the remote one, or fabricating a local
//! temporary one from a prototype when that is not possible.

use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::ExitStatus;

use login_acct_paths::LoginPaths;
use login_acct_users::passwd::UserRecord;
use login_acct_users::Id;
use tracing::debug;
use tracing::info;
use tracing::trace;
use walkdir::WalkDir;

/// Exit status of `attach` when the filesystem exists but could not be
/// mapped, which is expected without credentials.
const ATTACH_NOT_MAPPED: i32 = 26;

#[derive(Debug, thiserror::Error)]
pub enum HomeError {
    #[error("home directory attach is disabled")]
    Disabled,
    #[error("{} exited with {status}", .program.display())]
    Failed { program: PathBuf, status: ExitStatus },
    #[error("{} does not exist after attach", .0.display())]
    Missing(PathBuf),
    #[error("{} is not a temporary home directory", .0.display())]
    NotTemporary(PathBuf),
    #[error("{}: {error}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("out of memory")]
    OutOfMemory,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> HomeError + '_ {
    move |error| match error.kind() {
        ErrorKind::OutOfMemory => HomeError::OutOfMemory,
        _ => HomeError::Io {
            path: path.to_owned(),
            error,
        },
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait HomeDirectory {
    /// Attach `user`'s remote home directory, expected to appear at `home`.
    fn attach(&self, user: &str, home: &Path, authenticated: bool) -> Result<(), HomeError>;

    fn detach(&self, user: &str) -> Result<(), HomeError>;

    /// Create (or reuse) a local home directory for `user`, owned by them.
    fn create_temp_home(&self, user: &UserRecord<'static>) -> Result<PathBuf, HomeError>;

    fn remove_temp_home(&self, path: &Path) -> Result<(), HomeError>;
}

/// Runs the host's `attach`/`detach` programs, and keeps temporary home
/// directories under one directory.
#[derive(Debug, Clone)]
pub struct CommandHomeDirectory {
    attach: PathBuf,
    detach: PathBuf,
    noattach: PathBuf,
    tmp_homedirs: PathBuf,
    prototype: PathBuf,
}

impl CommandHomeDirectory {
    pub fn new(paths: &LoginPaths) -> Self {
        Self {
            attach: paths.attach.clone(),
            detach: paths.detach.clone(),
            noattach: paths.noattach.clone(),
            tmp_homedirs: paths.tmp_homedirs.clone(),
            prototype: paths.tmp_home_prototype.clone(),
        }
    }

    fn run(&self, program: &Path, cmd: &mut Command) -> Result<ExitStatus, HomeError> {
        trace!("running {cmd:?}");
        cmd.status().map_err(io_error(program))
    }

    /// Copy the contents of the prototype directory into `home`.
    fn populate(&self, home: &Path, owner: Option<(u32, u32)>) -> Result<(), HomeError> {
        for entry in WalkDir::new(&self.prototype).min_depth(1) {
            let entry = entry
                .map_err(std::io::Error::from)
                .map_err(io_error(&self.prototype))?;
            let Ok(relpath) = entry.path().strip_prefix(&self.prototype) else {
                continue;
            };
            let dst = home.join(relpath);
            let file_type = entry.file_type();
            if file_type.is_dir() {
                match std::fs::create_dir(&dst) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(io_error(&dst)(e)),
                }
            } else if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path()).map_err(io_error(entry.path()))?;
                std::os::unix::fs::symlink(target, &dst).map_err(io_error(&dst))?;
            } else {
                std::fs::copy(entry.path(), &dst).map_err(io_error(&dst))?;
            }
            if let Some((uid, gid)) = owner {
                std::os::unix::fs::lchown(&dst, Some(uid), Some(gid)).map_err(io_error(&dst))?;
            }
        }
        Ok(())
    }
}

impl HomeDirectory for CommandHomeDirectory {
    #[tracing::instrument(skip(self), err)]
    fn attach(&self, user: &str, home: &Path, authenticated: bool) -> Result<(), HomeError> {
        if self.noattach.exists() {
            return Err(HomeError::Disabled);
        }
        let mut cmd = Command::new(&self.attach);
        cmd.args(["-user", user, "-quiet", "-nozephyr"]);
        if !authenticated {
            cmd.arg("-nomap");
        }
        cmd.arg(user);
        let status = self.run(&self.attach, &mut cmd)?;
        match status.code() {
            Some(0) if home.exists() => Ok(()),
            Some(0) => Err(HomeError::Missing(home.to_owned())),
            Some(ATTACH_NOT_MAPPED) if !authenticated => {
                debug!("{user}'s home directory is attached but not mapped");
                Ok(())
            }
            _ => Err(HomeError::Failed {
                program: self.attach.clone(),
                status,
            }),
        }
    }

    #[tracing::instrument(skip(self), err)]
    fn detach(&self, user: &str) -> Result<(), HomeError> {
        let mut cmd = Command::new(&self.detach);
        cmd.args(["-quiet", "-nozephyr", user]);
        let status = self.run(&self.detach, &mut cmd)?;
        if status.success() {
            Ok(())
        } else {
            Err(HomeError::Failed {
                program: self.detach.clone(),
                status,
            })
        }
    }

    #[tracing::instrument(skip_all, fields(user = %user.name), err)]
    fn create_temp_home(&self, user: &UserRecord<'static>) -> Result<PathBuf, HomeError> {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&self.tmp_homedirs)
            .map_err(io_error(&self.tmp_homedirs))?;
        let home = self.tmp_homedirs.join(&*user.name);
        match std::fs::DirBuilder::new().mode(0o700).create(&home) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                info!("reusing temporary home directory {}", home.display());
                return Ok(home);
            }
            Err(e) => return Err(io_error(&home)(e)),
        }
        let owner = nix::unistd::geteuid()
            .is_root()
            .then(|| (user.uid.as_raw(), user.gid.as_raw()));
        let populated = owner
            .map_or(Ok(()), |(uid, gid)| {
                std::os::unix::fs::lchown(&home, Some(uid), Some(gid)).map_err(io_error(&home))
            })
            .and_then(|()| self.populate(&home, owner));
        if let Err(e) = populated {
            if let Err(rm) = std::fs::remove_dir_all(&home) {
                debug!("failed to clean up {}: {rm}", home.display());
            }
            return Err(e);
        }
        info!("created temporary home directory {}", home.display());
        Ok(home)
    }

    #[tracing::instrument(skip(self), err)]
    fn remove_temp_home(&self, path: &Path) -> Result<(), HomeError> {
        if path == self.tmp_homedirs || !path.starts_with(&self.tmp_homedirs) {
            return Err(HomeError::NotTemporary(path.to_owned()));
        }
        match std::fs::remove_dir_all(path) {
            Ok(()) => {
                info!("removed temporary home directory {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(path)(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::os::unix::fs::PermissionsExt;

    use login_acct_users::Password;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    struct Fixture {
        dir: tempfile::TempDir,
        home: CommandHomeDirectory,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("failed to create tempdir");
            let mut paths = LoginPaths::default().rooted(dir.path());
            // programs are not re-rooted
            paths.attach = dir.path().join("bin/attach");
            paths.detach = dir.path().join("bin/detach");
            Self {
                home: CommandHomeDirectory::new(&paths),
                dir,
            }
        }

        /// Install a shell script as the attach or detach program. It logs
        /// its arguments next to itself.
        fn program(&self, path: &Path, exit: i32) {
            std::fs::create_dir_all(path.parent().expect("program has a parent"))
                .expect("failed to create bin dir");
            let log = path.with_extension("args");
            std::fs::write(
                path,
                format!("#!/bin/sh\necho \"$@\" > {}\nexit {exit}\n", log.display()),
            )
            .expect("failed to write program");
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
                .expect("failed to chmod program");
        }

        fn args(&self, path: &Path) -> String {
            std::fs::read_to_string(path.with_extension("args"))
                .expect("program did not run")
                .trim_end()
                .to_owned()
        }
    }

    fn alice() -> UserRecord<'static> {
        UserRecord {
            uid: 5001.into(),
            name: Cow::Borrowed("alice"),
            password: Password::Shadow,
            gid: 100.into(),
            comment: Cow::Borrowed(""),
            homedir: Cow::Borrowed(Path::new("/mit/alice")),
            shell: Cow::Borrowed(Path::new("/bin/sh")),
        }
    }

    #[rstest]
    #[case::authenticated(true, 0, true)]
    #[case::unauthenticated(false, 0, true)]
    #[case::not_mapped(false, 26, true)]
    #[case::not_mapped_with_tokens(true, 26, false)]
    #[case::failed(false, 1, false)]
    fn attach_exit_status(#[case] authenticated: bool, #[case] exit: i32, #[case] ok: bool) {
        let f = Fixture::new();
        f.program(&f.home.attach, exit);
        let res = f.home.attach("alice", f.dir.path(), authenticated);
        assert_eq!(ok, res.is_ok(), "{res:?}");
        let expected = if authenticated {
            "-user alice -quiet -nozephyr alice"
        } else {
            "-user alice -quiet -nozephyr -nomap alice"
        };
        assert_eq!(expected, f.args(&f.home.attach));
    }

    #[test]
    fn attach_needs_the_home_directory_to_appear() {
        let f = Fixture::new();
        f.program(&f.home.attach, 0);
        assert!(matches!(
            f.home
                .attach("alice", &f.dir.path().join("mit/alice"), true),
            Err(HomeError::Missing(_))
        ));
    }

    #[test]
    fn attach_disabled() {
        let f = Fixture::new();
        std::fs::create_dir_all(f.home.noattach.parent().expect("has a parent"))
            .expect("failed to create etc");
        std::fs::write(&f.home.noattach, "").expect("failed to write noattach");
        assert!(matches!(
            f.home.attach("alice", f.dir.path(), true),
            Err(HomeError::Disabled)
        ));
    }

    #[test]
    fn detach() {
        let f = Fixture::new();
        f.program(&f.home.detach, 0);
        f.home.detach("alice").expect("detach failed");
        assert_eq!("-quiet -nozephyr alice", f.args(&f.home.detach));
        f.program(&f.home.detach, 3);
        assert!(matches!(
            f.home.detach("alice"),
            Err(HomeError::Failed { .. })
        ));
    }

    #[test]
    fn temp_home_lifecycle() {
        let f = Fixture::new();
        std::fs::create_dir_all(f.home.prototype.join("Desktop")).expect("failed to mkdir");
        std::fs::write(f.home.prototype.join(".profile"), "PATH=/bin\n")
            .expect("failed to write");
        std::fs::write(f.home.prototype.join("Desktop/readme"), "hi\n").expect("failed to write");
        std::os::unix::fs::symlink(".profile", f.home.prototype.join(".bashrc"))
            .expect("failed to symlink");

        let home = f.home.create_temp_home(&alice()).expect("create failed");
        assert_eq!(f.home.tmp_homedirs.join("alice"), home);
        assert_eq!(
            0o700,
            std::fs::metadata(&home)
                .expect("failed to stat")
                .permissions()
                .mode()
                & 0o777
        );
        assert_eq!(
            "PATH=/bin\n",
            std::fs::read_to_string(home.join(".profile")).expect("failed to read")
        );
        assert_eq!(
            "hi\n",
            std::fs::read_to_string(home.join("Desktop/readme")).expect("failed to read")
        );
        assert_eq!(
            Path::new(".profile"),
            std::fs::read_link(home.join(".bashrc")).expect("failed to readlink")
        );

        // a second session finds it already there
        std::fs::write(home.join("notes"), "keep me").expect("failed to write");
        assert_eq!(
            home,
            f.home.create_temp_home(&alice()).expect("create failed")
        );
        assert!(home.join("notes").exists());

        f.home.remove_temp_home(&home).expect("remove failed");
        assert!(!home.exists());
        f.home.remove_temp_home(&home).expect("remove is idempotent");
    }

    #[test]
    fn temp_home_without_prototype_fails_clean() {
        let f = Fixture::new();
        assert!(f.home.create_temp_home(&alice()).is_err());
        assert!(!f.home.tmp_homedirs.join("alice").exists());
    }

    #[test]
    fn remove_refuses_other_directories() {
        let f = Fixture::new();
        let precious = f.dir.path().join("mit/alice");
        std::fs::create_dir_all(&precious).expect("failed to mkdir");
        assert!(matches!(
            f.home.remove_temp_home(&precious),
            Err(HomeError::NotTemporary(_))
        ));
        assert!(matches!(
            f.home.remove_temp_home(&f.home.tmp_homedirs.clone()),
            Err(HomeError::NotTemporary(_))
        ));
        assert!(precious.exists());
    }
}
