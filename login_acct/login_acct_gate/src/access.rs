/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The access file: one `username access-bits [text]` line per user, where
//! `*` matches anyone and `*inpasswd` anyone with a local passwd line.

use std::io::ErrorKind;
use std::path::Path;

use nom::bytes::complete::take_till;
use nom::bytes::complete::take_till1;
use nom::character::complete::multispace0;
use nom::character::complete::multispace1;
use nom::combinator::opt;
use nom::combinator::rest;
use nom::sequence::preceded;
use nom::sequence::tuple;
use nom::IResult;

use crate::Error;
use crate::Result;

const ANYONE: &str = "*";
const ANYONE_IN_PASSWD: &str = "*inpasswd";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub bits: String,
    /// Explanation shown to users who are denied.
    pub text: Option<String>,
}

impl Access {
    /// Users marked `L` are meant to have a native local account.
    pub fn is_local(&self) -> bool {
        self.bits.contains('L')
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AccessLine<'a> {
    name: &'a str,
    bits: &'a str,
    text: &'a str,
}

impl<'a> AccessLine<'a> {
    fn parse(input: &'a str) -> IResult<&'a str, Self> {
        let (input, (name, bits, text)) = tuple((
            take_till1(char::is_whitespace),
            opt(preceded(multispace1, take_till(char::is_whitespace))),
            preceded(multispace0, rest),
        ))(input)?;
        Ok((
            input,
            Self {
                name,
                bits: bits.unwrap_or_default(),
                text,
            },
        ))
    }
}

/// Look `username` up in the access file at `path`. `in_passwd` says
/// whether the user has a local passwd line.
pub(crate) fn get_access(path: &Path, username: &str, in_passwd: bool) -> Result<Access> {
    let src = std::fs::read_to_string(path).map_err(|error| match error.kind() {
        ErrorKind::NotFound => Error::NoAccessFile(path.to_owned()),
        _ => Error::permission(path, error),
    })?;
    let lines: Vec<AccessLine> = src
        .lines()
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| AccessLine::parse(l).ok().map(|(_, line)| line))
        .collect();
    let first = |name: &str| lines.iter().find(|l| l.name == name);
    let line = first(username)
        .or_else(|| if in_passwd { first(ANYONE_IN_PASSWD) } else { None })
        .or_else(|| first(ANYONE))
        .ok_or(Error::UnknownUser)?;
    Ok(Access {
        bits: line.bits.to_owned(),
        text: (!line.text.is_empty()).then(|| line.text.to_owned()),
    })
}
