/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Parse and produce single `/etc/shadow` lines.

use std::borrow::Cow;
use std::fmt::Display;
use std::fmt::Formatter;
use std::time::SystemTime;

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

use crate::Error;
use crate::Result;

/// Index of the encrypted password field in a shadow line.
pub const PASSWORD_FIELD: usize = 1;
/// Number of `:`-separated fields in a well-formed shadow line.
pub const FIELDS: usize = 9;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Days(pub u32);

impl Days {
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Days since the epoch, the unit of every date in shadow(5).
    pub fn today() -> Self {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self((secs / 86400) as u32)
    }

    fn parse<'a, E>(input: &'a str) -> IResult<&'a str, Self, E>
    where
        E: ParseError<&'a str> + ContextError<&'a str>,
    {
        let (input, days) = nom::character::complete::u32(input)?;
        Ok((input, Self(days)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowRecordPassword {
    /// Login by password is disabled (!, !!, !*).
    NoLogin,
    /// Login by password is disabled (*).
    NoLoginButPermitSSH,
    /// Login is enabled, and no password is required.
    OpenLogin,
    /// Login is enabled, and a password is required.
    /// The shadow record contains the hash of the password.
    EncryptedPassword(String),
}

impl From<&str> for ShadowRecordPassword {
    fn from(s: &str) -> Self {
        match s {
            "!" | "!*" | "!!" => Self::NoLogin,
            "*" => Self::NoLoginButPermitSSH,
            "" => Self::OpenLogin,
            _ => Self::EncryptedPassword(s.to_string()),
        }
    }
}

impl Display for ShadowRecordPassword {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::NoLogin => "!!".fmt(f),
            Self::NoLoginButPermitSSH => "*".fmt(f),
            Self::OpenLogin => "".fmt(f),
            Self::EncryptedPassword(s) => s.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowRecord<'a> {
    pub name: Cow<'a, str>,
    pub encrypted_password: ShadowRecordPassword,
    pub last_password_change: Option<Days>,
    pub minimum_password_age: Option<Days>,
    pub maximum_password_age: Option<Days>,
    pub password_warning_period: Option<Days>,
    pub password_inactivity_period: Option<Days>,
    pub account_expiration_date: Option<Days>,
    pub reserved: Cow<'a, str>,
}

impl<'a> ShadowRecord<'a> {
    /// A shadow line for a freshly materialized account: only the hash and
    /// the last-change date are set, every aging field is left empty.
    pub fn new(name: impl Into<Cow<'a, str>>, encrypted_password: &str, today: Days) -> Self {
        Self {
            name: name.into(),
            encrypted_password: encrypted_password.into(),
            last_password_change: Some(today),
            minimum_password_age: None,
            maximum_password_age: None,
            password_warning_period: None,
            password_inactivity_period: None,
            account_expiration_date: None,
            reserved: Cow::Borrowed(""),
        }
    }

    fn parse<E>(input: &'a str) -> IResult<&'a str, Self, E>
    where
        E: ParseError<&'a str> + ContextError<&'a str>,
    {
        let colon = char(':');
        let (
            input,
            (
                name,
                _,
                encrypted_password,
                _,
                last_password_change,
                _,
                minimum_password_age,
                _,
                maximum_password_age,
                _,
                password_warning_period,
                _,
                password_inactivity_period,
                _,
                account_expiration_date,
                _,
                reserved,
            ),
        ) = tuple((
            context("username", take_until1(":")),
            &colon,
            context("encrypted_password", take_until(":")),
            &colon,
            context("last_password_change", nom::combinator::opt(Days::parse)),
            &colon,
            context("minimum_password_age", nom::combinator::opt(Days::parse)),
            &colon,
            context("maximum_password_age", nom::combinator::opt(Days::parse)),
            &colon,
            context("password_warning_period", nom::combinator::opt(Days::parse)),
            &colon,
            context(
                "password_inactivity_period",
                nom::combinator::opt(Days::parse),
            ),
            &colon,
            context("account_expiration_date", nom::combinator::opt(Days::parse)),
            &colon,
            context("reserved", take_till(|c| c == '\n')),
        ))(input)?;
        Ok((
            input,
            Self {
                name: Cow::Borrowed(name),
                encrypted_password: encrypted_password.into(),
                last_password_change,
                minimum_password_age,
                maximum_password_age,
                password_warning_period,
                password_inactivity_period,
                account_expiration_date,
                reserved: Cow::Borrowed(reserved),
            },
        ))
    }

    /// Parse exactly one shadow line (without its trailing newline).
    pub fn from_line(line: &'a str) -> Result<Self> {
        all_consuming(Self::parse::<VerboseError<&str>>)(line)
            .finish()
            .map(|(_input, r)| r)
            .map_err(|e| Error::Parse(convert_error(line, e)))
    }

    pub fn into_owned(self) -> ShadowRecord<'static> {
        ShadowRecord {
            name: Cow::Owned(self.name.into_owned()),
            encrypted_password: self.encrypted_password,
            last_password_change: self.last_password_change,
            minimum_password_age: self.minimum_password_age,
            maximum_password_age: self.maximum_password_age,
            password_warning_period: self.password_warning_period,
            password_inactivity_period: self.password_inactivity_period,
            account_expiration_date: self.account_expiration_date,
            reserved: Cow::Owned(self.reserved.into_owned()),
        }
    }
}

struct OptionalDays<'a>(&'a Option<Days>);

impl<'a> Display for OptionalDays<'a> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.0 {
            Some(days) => write!(f, "{}", days.0),
            None => Ok(()),
        }
    }
}

impl<'a> Display for ShadowRecord<'a> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let Self {
            name,
            encrypted_password,
            last_password_change,
            minimum_password_age,
            maximum_password_age,
            password_warning_period,
            password_inactivity_period,
            account_expiration_date,
            reserved,
        } = self;
        write!(
            f,
            "{name}:{encrypted_password}:{last_password_change}:{minimum_password_age}:{maximum_password_age}:{password_warning_period}:{password_inactivity_period}:{account_expiration_date}:{reserved}",
            last_password_change = OptionalDays(last_password_change),
            minimum_password_age = OptionalDays(minimum_password_age),
            maximum_password_age = OptionalDays(maximum_password_age),
            password_warning_period = OptionalDays(password_warning_period),
            password_inactivity_period = OptionalDays(password_inactivity_period),
            account_expiration_date = OptionalDays(account_expiration_date),
        )
    }
}
