/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Parse single `/etc/group` lines and edit their member lists.

use std::borrow::Cow;
use std::fmt::Display;
use std::fmt::Formatter;

use nom::bytes::complete::take_till;
use nom::bytes::complete::take_until;
use nom::bytes::complete::take_until1;
use nom::character::complete::char;
use nom::character::complete::none_of;
use nom::combinator::all_consuming;
use nom::combinator::recognize;
use nom::error::context;
use nom::error::convert_error;
use nom::error::ContextError;
use nom::error::ParseError;
use nom::error::VerboseError;
use nom::multi::many1;
use nom::multi::separated_list0;
use nom::sequence::tuple;
use nom::Finish;
use nom::IResult;

use crate::Error;
use crate::GroupId;
use crate::Id;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupRecord<'a> {
    // Keep as the first field so we sort by it.
    pub gid: GroupId,
    pub name: Cow<'a, str>,
    pub password: Cow<'a, str>,
    pub users: Vec<Cow<'a, str>>,
}

impl<'a> GroupRecord<'a> {
    /// A brand new group that only `user` belongs to. Groups created on a
    /// user's behalf carry a `*` password.
    pub fn new(name: impl Into<Cow<'a, str>>, gid: GroupId, user: impl Into<Cow<'a, str>>) -> Self {
        Self {
            gid,
            name: name.into(),
            password: Cow::Borrowed("*"),
            users: vec![user.into()],
        }
    }

    fn parse<E>(input: &'a str) -> IResult<&'a str, Self, E>
    where
        E: ParseError<&'a str> + ContextError<&'a str>,
    {
        let colon = char(':');
        let (input, (name, _, password, _, gid, _)) = tuple((
            context("groupname", take_until1(":")),
            &colon,
            context("password", take_until(":")),
            &colon,
            context("gid", nom::character::complete::u32),
            &colon,
        ))(input)?;
        let (input, users) = take_till(|c| c == '\n')(input)?;
        let (_, users) = context(
            "users",
            all_consuming(separated_list0(char(','), recognize(many1(none_of(","))))),
        )(users)?;
        Ok((
            input,
            Self {
                name: Cow::Borrowed(name),
                password: Cow::Borrowed(password),
                gid: gid.into(),
                users: users.into_iter().map(Cow::Borrowed).collect(),
            },
        ))
    }

    /// Parse exactly one group line (without its trailing newline).
    pub fn from_line(line: &'a str) -> Result<Self> {
        all_consuming(Self::parse::<VerboseError<&str>>)(line)
            .finish()
            .map(|(_input, r)| r)
            .map_err(|e| Error::Parse(convert_error(line, e)))
    }

    pub fn has_member(&self, user: &str) -> bool {
        self.users.iter().any(|u| u == user)
    }

    /// Append `user` to the member list. Returns false if it was already
    /// listed.
    pub fn add_member(&mut self, user: &'a str) -> bool {
        if self.has_member(user) {
            return false;
        }
        self.users.push(Cow::Borrowed(user));
        true
    }

    /// Drop every occurrence of `user` from the member list. Returns true if
    /// anything was removed.
    pub fn remove_member(&mut self, user: &str) -> bool {
        let before = self.users.len();
        self.users.retain(|u| u != user);
        self.users.len() != before
    }

    pub fn into_owned(self) -> GroupRecord<'static> {
        GroupRecord {
            name: Cow::Owned(self.name.into_owned()),
            password: Cow::Owned(self.password.into_owned()),
            gid: self.gid,
            users: self
                .users
                .into_iter()
                .map(Cow::into_owned)
                .map(Cow::Owned)
                .collect(),
        }
    }
}

impl<'a> Display for GroupRecord<'a> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}:{}:{}:", self.name, self.password, self.gid.as_raw())?;
        for (i, u) in self.users.iter().enumerate() {
            write!(f, "{u}")?;
            if i < self.users.len() - 1 {
                write!(f, ",")?;
            }
        }
        Ok(())
    }
}
