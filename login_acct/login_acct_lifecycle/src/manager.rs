/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use login_acct_session::SessionHandle;
use login_acct_session::SessionRecord;
use login_acct_session::SessionStore;
use login_acct_store::AddOutcome;
use login_acct_store::CredentialStore;
use login_acct_store::GroupAdd;
use login_acct_users::Directory;
use login_acct_users::DirectoryError;
use login_acct_users::GroupEntry;
use tracing::debug;
use tracing::info;
use tracing::warn;
use typed_builder::TypedBuilder;

use crate::Error;
use crate::Groups;
use crate::HomeDirectory;
use crate::HomeError;
use crate::Liveness;
use crate::Outcome;
use crate::Result;
use crate::Warning;

/// One login session asking for the account of `username`.
#[derive(Clone, TypedBuilder)]
pub struct CreateRequest<'a> {
    username: &'a str,
    pid: i32,
    /// Hash of the password the user just authenticated with, if any.
    #[builder(default)]
    cryptpw: Option<&'a str>,
    /// Attach the home directory with the user's credentials.
    #[builder(default)]
    has_credentials: bool,
    #[builder(default)]
    allow_temp_homedir: bool,
}

/// Keeps the local copy of a directory account alive exactly as long as at
/// least one login session references it.
///
/// Every operation holds the user's session record for its whole duration
/// and always writes it back, including when it fails.
#[derive(TypedBuilder)]
pub struct AccountManager<S, D, G, H, L> {
    sessions: S,
    store: CredentialStore,
    directory: D,
    groups: G,
    home: H,
    liveness: L,
}

fn directory_error(e: DirectoryError) -> Option<Error> {
    match e {
        DirectoryError::OutOfMemory => Some(Error::OutOfMemory),
        e => {
            warn!("directory lookup failed: {e}");
            None
        }
    }
}

fn keep_first(first: &mut Option<Error>, res: Result<()>) {
    if let Err(e) = res {
        warn!("rollback step failed: {e:#}");
        first.get_or_insert(e);
    }
}

impl<S, D, G, H, L> AccountManager<S, D, G, H, L>
where
    S: SessionStore,
    D: Directory,
    G: Groups,
    H: HomeDirectory,
    L: Liveness,
{
    #[tracing::instrument(skip_all, fields(user = request.username, pid = request.pid), err)]
    pub fn create(&self, request: &CreateRequest) -> Result<Outcome> {
        let mut handle = self.sessions.acquire(request.username)?;
        let mut outcome = Outcome::default();
        if handle.was_reset() {
            outcome.warnings.push(Warning::BadSessionRecord);
        }
        let res = self.create_locked(request, &mut handle, &mut outcome);
        let released = handle.release();
        res?;
        released?;
        for w in &outcome.warnings {
            info!("{}: {w}", request.username);
        }
        Ok(outcome)
    }

    fn create_locked(
        &self,
        request: &CreateRequest,
        record: &mut SessionRecord,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let user = request.username;
        if !record.exists {
            if self.store.add(&self.directory, user, request.cryptpw)? == AddOutcome::Added {
                record.passwd_added = true;
            }
            // from here on there is something to roll back
            record.exists = true;
            if !self.add_groups(user, record)? {
                outcome.warnings.push(Warning::GroupAddFailed);
            }
            record.session_pids = vec![request.pid];
            info!("first session {} for {user}", request.pid);
        } else {
            if let Err(e) = self
                .store
                .update_password(user, record.passwd_added, request.cryptpw)
            {
                warn!("failed to update password of {user}: {e}");
            }
            if record.add_pid(request.pid) {
                info!("added session {} for {user}", request.pid);
            } else {
                debug!("session {} of {user} is already registered", request.pid);
            }
        }
        if let Some(w) = self.setup_home(request, record)? {
            outcome.warnings.push(w);
        }
        Ok(())
    }

    /// Add the user to their primary group and every directory group they
    /// are not in yet. Returns false if any of that failed.
    fn add_groups(&self, user: &str, record: &mut SessionRecord) -> Result<bool> {
        let listed = match self.directory.groups(user) {
            Ok(groups) => groups,
            Err(e) => return directory_error(e).map_or(Ok(false), Err),
        };
        let primary_gid = match self.directory.lookup_by_name(user) {
            Ok(entry) => entry.map(|e| e.gid),
            Err(e) => return directory_error(e).map_or(Ok(false), Err),
        };
        let mut wanted: Vec<GroupEntry> = Vec::with_capacity(listed.len() + 1);
        if let Some(gid) = primary_gid {
            match self.directory.group_name(gid) {
                Ok(Some(name)) => wanted.push(GroupEntry { name, gid }),
                Ok(None) => debug!("primary group {gid} of {user} has no name"),
                Err(e) => {
                    if let Some(e) = directory_error(e) {
                        return Err(e);
                    }
                }
            }
        }
        for group in listed {
            if !wanted.iter().any(|w| w.gid == group.gid) {
                wanted.push(group);
            }
        }

        let mut ok = true;
        for group in &wanted {
            match self.groups.add_user_to_group(user, group, primary_gid) {
                Ok(GroupAdd::Added) => {
                    record.group_added.insert(group.gid);
                }
                Ok(GroupAdd::AlreadyMember) => {}
                Err(login_acct_store::Error::TooManyGroups { max, .. }) => {
                    debug!("not adding {user} to {}, already in {max} groups", group.name);
                }
                Err(login_acct_store::Error::OutOfMemory) => return Err(Error::OutOfMemory),
                Err(e) => {
                    warn!("failed to add {user} to group {}: {e}", group.name);
                    ok = false;
                }
            }
        }
        Ok(ok)
    }

    /// Attach the user's remote home directory, falling back to a temporary
    /// one if allowed.
    fn setup_home(
        &self,
        request: &CreateRequest,
        record: &mut SessionRecord,
    ) -> Result<Option<Warning>> {
        let user = request.username;
        if record.temp_homedir.is_some() {
            return Ok(Some(Warning::ExistingTempHome));
        }
        let local = match self.store.lookup_by_name(user) {
            Ok(Some(local)) => local,
            Ok(None) => return Ok(Some(Warning::NoTempHome)),
            Err(login_acct_store::Error::OutOfMemory) => return Err(Error::OutOfMemory),
            Err(e) => {
                warn!("failed to look up local account of {user}: {e}");
                return Ok(Some(Warning::NoTempHome));
            }
        };
        match self.directory.lookup_by_name(user) {
            Ok(Some(remote)) if remote.homedir == local.homedir => {}
            Ok(_) => {
                debug!("{user} has a local home directory");
                return Ok(None);
            }
            Err(e) => {
                return directory_error(e).map_or(Ok(Some(Warning::NoTempHome)), Err);
            }
        }

        match self
            .home
            .attach(user, &local.homedir, request.has_credentials)
        {
            Ok(()) => {
                record.attached = true;
                return Ok(None);
            }
            Err(HomeError::Disabled) => return Ok(Some(Warning::AttachDisabled)),
            Err(HomeError::OutOfMemory) => return Err(Error::OutOfMemory),
            Err(e) => warn!("failed to attach home directory of {user}: {e}"),
        }
        if !request.allow_temp_homedir {
            return Ok(Some(Warning::NoTempHome));
        }

        let temp = match self.home.create_temp_home(&local) {
            Ok(temp) => temp,
            Err(HomeError::OutOfMemory) => return Err(Error::OutOfMemory),
            Err(e) => {
                warn!("failed to create temporary home directory for {user}: {e}");
                return Ok(Some(Warning::NoTempHome));
            }
        };
        if let Err(e) = self.store.set_home_directory(user, &temp) {
            warn!("failed to point {user} at {}: {e}", temp.display());
            if let Err(e) = self.home.remove_temp_home(&temp) {
                warn!("failed to remove {}: {e}", temp.display());
            }
            return match e {
                login_acct_store::Error::OutOfMemory => Err(Error::OutOfMemory),
                _ => Ok(Some(Warning::NoTempHome)),
            };
        }
        record.temp_homedir = Some(local.homedir.into_owned());
        Ok(Some(Warning::TempHomeCreated))
    }

    /// Drop one session. The last one out rolls the account back.
    #[tracing::instrument(skip(self), err)]
    pub fn revert(&self, username: &str, pid: i32) -> Result<()> {
        let mut handle = self.sessions.acquire(username)?;
        let res = self.revert_locked(username, pid, &mut handle);
        let released = handle.release();
        res?;
        Ok(released?)
    }

    fn revert_locked(&self, username: &str, pid: i32, record: &mut SessionRecord) -> Result<()> {
        if !record.exists {
            debug!("{username} has no local account to revert");
            return Ok(());
        }
        if record.remove_pid(pid) {
            info!("removed session {pid} of {username}");
        } else {
            debug!("session {pid} of {username} was never registered");
        }
        if record.session_pids.is_empty() {
            self.rollback(username, record)
        } else {
            Ok(())
        }
    }

    /// Drop every session whose process is gone, rolling back if that was
    /// all of them.
    #[tracing::instrument(skip(self), err)]
    pub fn cleanup(&self, username: &str) -> Result<()> {
        let mut handle = self.sessions.acquire(username)?;
        let res = self.cleanup_locked(username, &mut handle);
        let released = handle.release();
        res?;
        Ok(released?)
    }

    fn cleanup_locked(&self, username: &str, record: &mut SessionRecord) -> Result<()> {
        if !record.exists {
            return Ok(());
        }
        let dead = record.retain_pids(|pid| self.liveness.is_alive(pid));
        if !dead.is_empty() {
            info!("dropped dead sessions {dead:?} of {username}");
        }
        if record.session_pids.is_empty() {
            self.rollback(username, record)
        } else {
            Ok(())
        }
    }

    /// A snapshot of the session record of `username`.
    pub fn status(&self, username: &str) -> Result<SessionRecord> {
        let handle = self.sessions.acquire(username)?;
        let record = SessionRecord::clone(&handle);
        handle.release()?;
        Ok(record)
    }

    /// Undo everything `create` did for this user. Every step is attempted
    /// and the record is reset no matter what, the first failure is
    /// reported.
    fn rollback(&self, username: &str, record: &mut SessionRecord) -> Result<()> {
        let mut first = None;
        self.revert_home(username, record, &mut first);
        for gid in &record.group_added {
            keep_first(
                &mut first,
                self.groups
                    .remove_user_from_group(username, *gid)
                    .map_err(Error::group),
            );
        }
        keep_first(
            &mut first,
            self.store
                .remove(username, record.passwd_added)
                .map_err(Error::from),
        );
        record.reset();
        info!("rolled back local account of {username}");
        first.map_or(Ok(()), Err)
    }

    fn revert_home(&self, username: &str, record: &SessionRecord, first: &mut Option<Error>) {
        if let Some(original) = &record.temp_homedir {
            match self.store.lookup_by_name(username) {
                Ok(Some(local)) => {
                    // a line we added is about to go away entirely
                    if !record.passwd_added {
                        keep_first(
                            first,
                            self.store
                                .set_home_directory(username, original)
                                .map_err(Error::from),
                        );
                    }
                    keep_first(
                        first,
                        self.home
                            .remove_temp_home(&local.homedir)
                            .map_err(Error::from),
                    );
                }
                Ok(None) => {
                    warn!("{username} has a temporary home directory but no local account")
                }
                Err(e) => keep_first(first, Err(e.into())),
            }
        }
        if record.attached {
            keep_first(first, self.home.detach(username).map_err(Error::from));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::path::PathBuf;

    use login_acct_paths::Config;
    use login_acct_paths::LockSettings;
    use login_acct_session::FileSessionStore;
    use login_acct_users::passwd::UserRecord;
    use login_acct_users::MockDirectory;
    use login_acct_users::Password;
    use maplit::btreeset;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::groups::MockGroups;
    use crate::homedir::MockHomeDirectory;
    use crate::liveness::MockLiveness;

    const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n";
    const SHADOW: &str = "root:!!:19000::::::\n";

    type Manager =
        AccountManager<FileSessionStore, MockDirectory, MockGroups, MockHomeDirectory, MockLiveness>;

    struct Fixture {
        dir: tempfile::TempDir,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("failed to create tempdir");
            let mut config = Config::default().rooted(dir.path());
            config.locking = LockSettings {
                attempts: 2,
                interval_ms: 1,
            };
            std::fs::create_dir_all(dir.path().join("etc")).expect("failed to create etc");
            std::fs::write(&config.paths.passwd, PASSWD).expect("failed to write passwd");
            std::fs::write(&config.paths.shadow, SHADOW).expect("failed to write shadow");
            Self { dir, config }
        }

        fn manager(&self, groups: MockGroups, home: MockHomeDirectory, liveness: MockLiveness) -> Manager {
            AccountManager::builder()
                .sessions(self.sessions())
                .store(CredentialStore::new(&self.config))
                .directory(directory())
                .groups(groups)
                .home(home)
                .liveness(liveness)
                .build()
        }

        fn sessions(&self) -> FileSessionStore {
            FileSessionStore::new(self.config.paths.sessions.clone(), self.config.locking.clone())
        }

        fn passwd(&self) -> String {
            std::fs::read_to_string(&self.config.paths.passwd).expect("failed to read passwd")
        }

        fn record(&self) -> SessionRecord {
            let handle = self.sessions().acquire("alice").expect("failed to acquire");
            let record = SessionRecord::clone(&handle);
            handle.release().expect("failed to release");
            record
        }

        fn temp_home(&self) -> PathBuf {
            self.dir.path().join("var/athena/tmphomedir/alice")
        }
    }

    fn alice() -> UserRecord<'static> {
        UserRecord {
            uid: 5001.into(),
            name: Cow::Borrowed("alice"),
            password: Password::Encrypted("$1$dir$hash".into()),
            gid: 100.into(),
            comment: Cow::Borrowed("Alice"),
            homedir: Cow::Borrowed(Path::new("/mit/alice")),
            shell: Cow::Borrowed(Path::new("/bin/sh")),
        }
    }

    fn directory() -> MockDirectory {
        let mut d = MockDirectory::new();
        d.expect_lookup_by_name()
            .returning(|name| Ok((name == "alice").then(alice)));
        d.expect_groups().returning(|_| {
            Ok(vec![
                GroupEntry {
                    name: "mit".into(),
                    gid: 101.into(),
                },
                GroupEntry {
                    name: "users".into(),
                    gid: 100.into(),
                },
            ])
        });
        d.expect_group_name()
            .with(eq(login_acct_users::GroupId::from(100)))
            .returning(|_| Ok(Some("users".into())));
        d
    }

    fn groups_adding_everything() -> MockGroups {
        let mut g = MockGroups::new();
        g.expect_add_user_to_group()
            .returning(|_, _, _| Ok(GroupAdd::Added));
        g
    }

    fn attaching_home() -> MockHomeDirectory {
        let mut h = MockHomeDirectory::new();
        h.expect_attach().returning(|_, _, _| Ok(()));
        h
    }

    fn request(pid: i32) -> CreateRequest<'static> {
        CreateRequest::builder()
            .username("alice")
            .pid(pid)
            .has_credentials(true)
            .build()
    }

    #[test]
    fn first_session_materializes_account() {
        let f = Fixture::new();
        let mut groups = MockGroups::new();
        let mut seq = mockall::Sequence::new();
        // primary group first
        groups
            .expect_add_user_to_group()
            .withf(|user, group, primary| {
                user == "alice" && group.gid == 100.into() && *primary == Some(100.into())
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(GroupAdd::Added));
        groups
            .expect_add_user_to_group()
            .withf(|_, group, _| group.gid == 101.into())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(GroupAdd::AlreadyMember));
        let mut home = MockHomeDirectory::new();
        home.expect_attach()
            .withf(|user, path, authenticated| {
                user == "alice" && path == Path::new("/mit/alice") && *authenticated
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let outcome = f
            .manager(groups, home, MockLiveness::new())
            .create(&request(100))
            .expect("create failed");
        assert!(outcome.is_clean(), "{outcome:?}");
        assert_eq!(
            format!("{PASSWD}alice:x:5001:100:Alice:/mit/alice:/bin/sh\n"),
            f.passwd()
        );
        assert_eq!(
            SessionRecord {
                exists: true,
                passwd_added: true,
                attached: true,
                group_added: btreeset! {100.into()},
                temp_homedir: None,
                session_pids: vec![100],
            },
            f.record()
        );
    }

    #[test]
    fn last_session_rolls_back() {
        let f = Fixture::new();
        f.manager(groups_adding_everything(), attaching_home(), MockLiveness::new())
            .create(&request(100))
            .expect("create failed");

        let mut groups = MockGroups::new();
        groups
            .expect_remove_user_from_group()
            .times(2)
            .returning(|_, _| Ok(()));
        let mut home = MockHomeDirectory::new();
        home.expect_detach()
            .with(eq("alice"))
            .times(1)
            .returning(|_| Ok(()));
        f.manager(groups, home, MockLiveness::new())
            .revert("alice", 100)
            .expect("revert failed");
        assert_eq!(PASSWD, f.passwd());
        assert_eq!(SessionRecord::default(), f.record());
        assert_eq!(
            "",
            std::fs::read_to_string(f.sessions().path("alice")).expect("failed to read record")
        );
    }

    #[test]
    fn later_sessions_only_register_pids() {
        let f = Fixture::new();
        for pid in [100, 200, 200] {
            f.manager(groups_adding_everything(), attaching_home(), MockLiveness::new())
                .create(&request(pid))
                .expect("create failed");
        }
        assert_eq!(vec![100, 200], f.record().session_pids);

        // groups untouched while a session remains
        f.manager(MockGroups::new(), MockHomeDirectory::new(), MockLiveness::new())
            .revert("alice", 100)
            .expect("revert failed");
        assert_eq!(vec![200], f.record().session_pids);
        assert!(f.passwd().contains("alice:"));
    }

    #[test]
    fn revert_of_unknown_session_is_noop() {
        let f = Fixture::new();
        let manager = f.manager(MockGroups::new(), MockHomeDirectory::new(), MockLiveness::new());
        manager.revert("alice", 100).expect("revert failed");
        assert_eq!(SessionRecord::default(), f.record());

        f.manager(groups_adding_everything(), attaching_home(), MockLiveness::new())
            .create(&request(100))
            .expect("create failed");
        manager.revert("alice", 999).expect("revert failed");
        assert_eq!(vec![100], f.record().session_pids);
    }

    #[test]
    fn group_failures_are_one_warning() {
        let f = Fixture::new();
        let mut groups = MockGroups::new();
        groups.expect_add_user_to_group().times(2).returning(|_, _, _| {
            Err(login_acct_store::Error::LockTimeout(PathBuf::from(
                "/var/athena/group.lock",
            )))
        });
        let outcome = f
            .manager(groups, attaching_home(), MockLiveness::new())
            .create(&request(100))
            .expect("create failed");
        assert_eq!(vec![Warning::GroupAddFailed], outcome.warnings);
        assert_eq!(BTreeSet::new(), f.record().group_added);
    }

    #[test]
    fn too_many_groups_is_not_a_warning() {
        let f = Fixture::new();
        let mut groups = MockGroups::new();
        groups
            .expect_add_user_to_group()
            .withf(|_, group, _| group.gid == 100.into())
            .returning(|_, _, _| Ok(GroupAdd::Added));
        groups
            .expect_add_user_to_group()
            .withf(|_, group, _| group.gid == 101.into())
            .returning(|user, _, _| {
                Err(login_acct_store::Error::TooManyGroups {
                    user: user.to_owned(),
                    max: 13,
                })
            });
        let outcome = f
            .manager(groups, attaching_home(), MockLiveness::new())
            .create(&request(100))
            .expect("create failed");
        assert!(outcome.is_clean(), "{outcome:?}");
        assert_eq!(btreeset! {100.into()}, f.record().group_added);
    }

    #[test]
    fn unknown_user_leaves_no_trace() {
        let f = Fixture::new();
        let res = f
            .manager(MockGroups::new(), MockHomeDirectory::new(), MockLiveness::new())
            .create(
                &CreateRequest::builder()
                    .username("mallory")
                    .pid(100)
                    .build(),
            );
        assert!(matches!(res, Err(Error::UnknownUser)), "{res:?}");
        assert_eq!(PASSWD, f.passwd());
        assert_eq!(
            "",
            std::fs::read_to_string(f.sessions().path("mallory")).expect("failed to read record")
        );
    }

    #[test]
    fn bad_session_record_is_a_warning() {
        let f = Fixture::new();
        std::fs::create_dir_all(&f.config.paths.sessions).expect("failed to create sessions");
        std::fs::write(f.sessions().path("alice"), "{ not json").expect("failed to write");
        let outcome = f
            .manager(groups_adding_everything(), attaching_home(), MockLiveness::new())
            .create(&request(100))
            .expect("create failed");
        assert_eq!(vec![Warning::BadSessionRecord], outcome.warnings);
        assert_eq!(vec![100], f.record().session_pids);
    }

    #[test]
    fn attach_disabled() {
        let f = Fixture::new();
        let mut home = MockHomeDirectory::new();
        home.expect_attach()
            .returning(|_, _, _| Err(HomeError::Disabled));
        home.expect_create_temp_home().never();
        let outcome = f
            .manager(groups_adding_everything(), home, MockLiveness::new())
            .create(&request(100))
            .expect("create failed");
        assert_eq!(vec![Warning::AttachDisabled], outcome.warnings);
        assert!(!f.record().attached);
    }

    #[test]
    fn attach_failure_without_fallback() {
        let f = Fixture::new();
        let mut home = MockHomeDirectory::new();
        home.expect_attach()
            .returning(|_, path, _| Err(HomeError::Missing(path.to_owned())));
        home.expect_create_temp_home().never();
        let outcome = f
            .manager(groups_adding_everything(), home, MockLiveness::new())
            .create(&request(100))
            .expect("create failed");
        assert_eq!(vec![Warning::NoTempHome], outcome.warnings);
        assert!(f.passwd().contains(":/mit/alice:"));
    }

    #[test]
    fn temp_home_fallback_and_restore() {
        let f = Fixture::new();
        let temp = f.temp_home();
        let allow = |pid| {
            CreateRequest::builder()
                .username("alice")
                .pid(pid)
                .allow_temp_homedir(true)
                .build()
        };

        let mut home = MockHomeDirectory::new();
        home.expect_attach()
            .withf(|_, _, authenticated| !*authenticated)
            .times(1)
            .returning(|_, path, _| Err(HomeError::Missing(path.to_owned())));
        let created = temp.clone();
        home.expect_create_temp_home()
            .withf(|user| user.name == "alice")
            .times(1)
            .returning(move |_| Ok(created.clone()));
        let outcome = f
            .manager(groups_adding_everything(), home, MockLiveness::new())
            .create(&allow(100))
            .expect("create failed");
        assert_eq!(vec![Warning::TempHomeCreated], outcome.warnings);
        assert!(
            f.passwd()
                .contains(&format!("alice:x:5001:100:Alice:{}:/bin/sh\n", temp.display()))
        );
        assert_eq!(Some(PathBuf::from("/mit/alice")), f.record().temp_homedir);

        // later sessions reuse it without trying to attach again
        let outcome = f
            .manager(groups_adding_everything(), MockHomeDirectory::new(), MockLiveness::new())
            .create(&allow(200))
            .expect("create failed");
        assert_eq!(vec![Warning::ExistingTempHome], outcome.warnings);

        f.manager(MockGroups::new(), MockHomeDirectory::new(), MockLiveness::new())
            .revert("alice", 100)
            .expect("revert failed");
        let mut groups = MockGroups::new();
        groups
            .expect_remove_user_from_group()
            .returning(|_, _| Ok(()));
        let mut home = MockHomeDirectory::new();
        let removed = temp.clone();
        home.expect_remove_temp_home()
            .withf(move |path| path == removed)
            .times(1)
            .returning(|_| Ok(()));
        home.expect_detach().never();
        f.manager(groups, home, MockLiveness::new())
            .revert("alice", 200)
            .expect("revert failed");
        assert_eq!(PASSWD, f.passwd());
    }

    #[test]
    fn temp_home_of_native_account_is_restored() {
        let f = Fixture::new();
        std::fs::write(
            &f.config.paths.passwd,
            format!("{PASSWD}alice:x:5001:100:Alice:/mit/alice:/bin/sh\n"),
        )
        .expect("failed to write passwd");
        let temp = f.temp_home();

        let mut home = MockHomeDirectory::new();
        home.expect_attach()
            .returning(|_, path, _| Err(HomeError::Missing(path.to_owned())));
        let created = temp.clone();
        home.expect_create_temp_home()
            .returning(move |_| Ok(created.clone()));
        let outcome = f
            .manager(groups_adding_everything(), home, MockLiveness::new())
            .create(
                &CreateRequest::builder()
                    .username("alice")
                    .pid(100)
                    .allow_temp_homedir(true)
                    .build(),
            )
            .expect("create failed");
        assert_eq!(vec![Warning::TempHomeCreated], outcome.warnings);
        assert!(!f.record().passwd_added);

        let mut groups = MockGroups::new();
        groups
            .expect_remove_user_from_group()
            .returning(|_, _| Ok(()));
        let mut home = MockHomeDirectory::new();
        home.expect_remove_temp_home().times(1).returning(|_| Ok(()));
        f.manager(groups, home, MockLiveness::new())
            .revert("alice", 100)
            .expect("revert failed");
        // the native line survives, pointing home again
        assert_eq!(
            format!("{PASSWD}alice:x:5001:100:Alice:/mit/alice:/bin/sh\n"),
            f.passwd()
        );
    }

    #[test]
    fn cleanup_drops_dead_sessions_in_order() {
        let f = Fixture::new();
        for pid in [1, 2, 3] {
            f.manager(groups_adding_everything(), attaching_home(), MockLiveness::new())
                .create(&request(pid))
                .expect("create failed");
        }
        let mut liveness = MockLiveness::new();
        liveness.expect_is_alive().returning(|pid| pid != 2);
        f.manager(MockGroups::new(), MockHomeDirectory::new(), liveness)
            .cleanup("alice")
            .expect("cleanup failed");
        assert_eq!(vec![1, 3], f.record().session_pids);

        let mut liveness = MockLiveness::new();
        liveness.expect_is_alive().returning(|_| false);
        let mut groups = MockGroups::new();
        groups
            .expect_remove_user_from_group()
            .times(2)
            .returning(|_, _| Ok(()));
        let mut home = MockHomeDirectory::new();
        home.expect_detach().times(1).returning(|_| Ok(()));
        f.manager(groups, home, liveness)
            .cleanup("alice")
            .expect("cleanup failed");
        assert_eq!(SessionRecord::default(), f.record());
        assert_eq!(PASSWD, f.passwd());
    }

    #[test]
    fn cleanup_without_record_is_noop() {
        let f = Fixture::new();
        let mut liveness = MockLiveness::new();
        liveness.expect_is_alive().never();
        f.manager(MockGroups::new(), MockHomeDirectory::new(), liveness)
            .cleanup("alice")
            .expect("cleanup failed");
        assert_eq!(SessionRecord::default(), f.record());
    }

    #[test]
    fn rollback_attempts_every_step() {
        let f = Fixture::new();
        f.manager(groups_adding_everything(), attaching_home(), MockLiveness::new())
            .create(&request(100))
            .expect("create failed");

        let mut groups = MockGroups::new();
        groups.expect_remove_user_from_group().times(2).returning(|_, gid| {
            Err(login_acct_store::Error::LockTimeout(PathBuf::from(format!(
                "/var/athena/group.lock.{gid}"
            ))))
        });
        let mut home = MockHomeDirectory::new();
        home.expect_detach()
            .times(1)
            .returning(|_| Err(HomeError::Missing(PathBuf::from("/mit/alice"))));
        let res = f
            .manager(groups, home, MockLiveness::new())
            .revert("alice", 100);
        // the detach failure came first
        match res {
            Err(Error::Permission(e)) => {
                assert!(e.to_string().contains("does not exist"), "{e}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(PASSWD, f.passwd());
        assert_eq!(SessionRecord::default(), f.record());
    }

    #[test]
    fn second_login_refreshes_password() {
        let f = Fixture::new();
        f.manager(groups_adding_everything(), attaching_home(), MockLiveness::new())
            .create(&request(100))
            .expect("create failed");
        f.manager(groups_adding_everything(), attaching_home(), MockLiveness::new())
            .create(
                &CreateRequest::builder()
                    .username("alice")
                    .pid(200)
                    .cryptpw(Some("$1$new$hash"))
                    .build(),
            )
            .expect("create failed");
        let shadow =
            std::fs::read_to_string(&f.config.paths.shadow).expect("failed to read shadow");
        assert!(shadow.contains("alice:$1$new$hash:"), "{shadow}");
    }
}
