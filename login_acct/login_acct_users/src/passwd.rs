/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Parse single `/etc/passwd` lines, and look users up in a live passwd file
//! without choking on lines that do not parse.

use std::borrow::Cow;
use std::fmt::Display;
use std::fmt::Formatter;
use std::io::ErrorKind;
use std::path::Path;

use nom::bytes::complete::take_till;
use nom::bytes::complete::take_until;
use nom::bytes::complete::take_until1;
use nom::character::complete::char;
use nom::combinator::all_consuming;
use nom::error::context;
use nom::error::convert_error;
use nom::error::ContextError;
use nom::error::ParseError;
use nom::error::VerboseError;
use nom::sequence::tuple;
use nom::Finish;
use nom::IResult;

use crate::first_field_is;
use crate::raw_lines;
use crate::Error;
use crate::GroupId;
use crate::Id;
use crate::Password;
use crate::Result;
use crate::UserId;

/// Index of the password field in a passwd line.
pub const PASSWORD_FIELD: usize = 1;
/// Index of the home directory field in a passwd line.
pub const HOMEDIR_FIELD: usize = 5;
/// Number of `:`-separated fields in a well-formed passwd line.
pub const FIELDS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct UserRecord<'a> {
    // Keep as the first field so we sort by it.
    pub uid: UserId,
    pub name: Cow<'a, str>,
    pub password: Password,
    pub gid: GroupId,
    pub comment: Cow<'a, str>,
    pub homedir: Cow<'a, Path>,
    pub shell: Cow<'a, Path>,
}

impl<'a> UserRecord<'a> {
    fn parse<E>(input: &'a str) -> IResult<&'a str, Self, E>
    where
        E: ParseError<&'a str> + ContextError<&'a str>,
    {
        let colon = char(':');
        let (input, (name, _, password, _, uid, _, gid, _, comment, _, homedir, _, shell)) =
            tuple((
                context("username", take_until1(":")),
                &colon,
                Password::parse,
                &colon,
                context("uid", nom::character::complete::u32),
                &colon,
                context("gid", nom::character::complete::u32),
                &colon,
                context("comment", take_until(":")),
                &colon,
                context("homedir", take_until(":")),
                &colon,
                context("shell", take_till(|c| c == '\n')),
            ))(input)?;
        Ok((
            input,
            Self {
                name: Cow::Borrowed(name),
                password,
                uid: uid.into(),
                gid: gid.into(),
                comment: Cow::Borrowed(comment),
                homedir: Cow::Borrowed(Path::new(homedir)),
                shell: Cow::Borrowed(Path::new(shell)),
            },
        ))
    }

    /// Parse exactly one passwd line (without its trailing newline).
    pub fn from_line(line: &'a str) -> Result<Self> {
        all_consuming(Self::parse::<VerboseError<&str>>)(line)
            .finish()
            .map(|(_input, r)| r)
            .map_err(|e| Error::Parse(convert_error(line, e)))
    }

    pub fn into_owned(self) -> UserRecord<'static> {
        UserRecord {
            name: Cow::Owned(self.name.into_owned()),
            password: self.password,
            uid: self.uid,
            gid: self.gid,
            comment: Cow::Owned(self.comment.into_owned()),
            homedir: Cow::Owned(self.homedir.into_owned()),
            shell: Cow::Owned(self.shell.into_owned()),
        }
    }
}

impl<'a> Display for UserRecord<'a> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}",
            self.name,
            self.password,
            self.uid.as_raw(),
            self.gid.as_raw(),
            self.comment,
            self.homedir.display(),
            self.shell.display()
        )
    }
}

/// First `Some` that `f` returns for a raw line of the passwd file at
/// `path`. A missing file has no lines.
fn scan<T, F>(path: &Path, mut f: F) -> std::io::Result<Option<T>>
where
    F: FnMut(&[u8]) -> Option<T>,
{
    let lines = match raw_lines(path) {
        Ok(lines) => lines,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    for line in lines {
        if let Some(found) = f(&line?) {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// First well-formed line accepted by `pred`. Lines that do not parse are
/// skipped.
fn find_user<F>(path: &Path, pred: F) -> std::io::Result<Option<UserRecord<'static>>>
where
    F: Fn(&UserRecord) -> bool,
{
    scan(path, |raw| {
        let line = std::str::from_utf8(raw).ok()?;
        match UserRecord::from_line(line) {
            Ok(record) if pred(&record) => Some(record.into_owned()),
            Ok(_) => None,
            Err(_) => {
                tracing::trace!("skipping unparseable passwd line {line:?}");
                None
            }
        }
    })
}

pub fn lookup_by_name(path: &Path, name: &str) -> std::io::Result<Option<UserRecord<'static>>> {
    find_user(path, |r| r.name == name)
}

pub fn lookup_by_uid(path: &Path, uid: UserId) -> std::io::Result<Option<UserRecord<'static>>> {
    find_user(path, |r| r.uid == uid)
}

/// Whether any line, well-formed or not, belongs to `name`.
pub fn has_user(path: &Path, name: &str) -> std::io::Result<bool> {
    Ok(scan(path, |raw| first_field_is(raw, name).then_some(()))?.is_some())
}

/// Name on the first line, well-formed or not, whose uid field is `uid`.
pub fn uid_owner(path: &Path, uid: UserId) -> std::io::Result<Option<String>> {
    scan(path, |raw| {
        let mut fields = raw.split(|b| *b == b':');
        let name = fields.next()?;
        let field = fields.nth(1)?;
        let found: u32 = std::str::from_utf8(field).ok()?.parse().ok()?;
        (found == uid.as_raw()).then(|| String::from_utf8_lossy(name).into_owned())
    })
}
