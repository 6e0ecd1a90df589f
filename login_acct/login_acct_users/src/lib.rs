/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Typed views of the line-oriented account databases (`passwd`, `shadow`,
//! `group`) and of the directory service that supplies canonical accounts.
//!
//! Parsing here is strictly per-line: the credential store mutator must pass
//! through lines it does not understand untouched, so nothing in this crate
//! parses a whole file and fails on the first odd line.

use std::fmt::Display;
use std::fmt::Formatter;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

pub mod directory;
pub mod group;
pub mod passwd;
pub mod shadow;

pub use directory::Directory;
pub use directory::DirectoryError;
pub use directory::FileDirectory;
pub use directory::GroupEntry;
#[cfg(any(test, feature = "mock"))]
pub use directory::MockDirectory;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait Id: Copy + std::fmt::Debug {
    fn from_raw(id: u32) -> Self
    where
        Self: Sized;

    fn as_raw(&self) -> u32;
    fn into_raw(self) -> u32;
}

macro_rules! id_type {
    ($i:ident, $n:ty) => {
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            derive_more::From,
            derive_more::Into,
            serde::Serialize,
            serde::Deserialize
        )]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $i(u32);

        impl crate::Id for $i {
            #[inline]
            fn from_raw(id: u32) -> Self {
                Self(id)
            }

            #[inline]
            fn as_raw(&self) -> u32 {
                self.0
            }

            #[inline]
            fn into_raw(self) -> u32 {
                self.0
            }
        }

        impl From<$i> for $n {
            fn from(i: $i) -> $n {
                <$n>::from_raw(i.as_raw())
            }
        }

        impl std::fmt::Display for $i {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(UserId, nix::unistd::Uid);
id_type!(GroupId, nix::unistd::Gid);

/// The password field of a passwd line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Password {
    /// `x`, the real hash is in the shadow companion
    Shadow,
    Locked,
    /// Empty string, login is allowed without a password at all
    Empty,
    /// Encrypted password stored inline (no shadow file)
    Encrypted(String),
}

impl Password {
    pub(crate) fn parse<'a, E>(input: &'a str) -> nom::IResult<&'a str, Self, E>
    where
        E: nom::error::ParseError<&'a str> + nom::error::ContextError<&'a str>,
    {
        let (input, txt) =
            nom::error::context("password", nom::bytes::complete::take_until(":"))(input)?;
        Ok((input, Self::from(txt)))
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        match s {
            "x" => Self::Shadow,
            "!" => Self::Locked,
            "" => Self::Empty,
            _ => Self::Encrypted(s.to_owned()),
        }
    }
}

impl Display for Password {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Shadow => write!(f, "x"),
            Self::Locked => write!(f, "!"),
            Self::Empty => write!(f, ""),
            Self::Encrypted(s) => write!(f, "{s}"),
        }
    }
}

/// True if the first `:`-delimited field of `line` is exactly `name`.
///
/// This is the only way any of the databases match a line to a username, a
/// plain prefix check would let `al` match `alice`. The rest of the line
/// does not have to parse, or even be UTF-8.
pub fn first_field_is(line: impl AsRef<[u8]>, name: &str) -> bool {
    line.as_ref()
        .strip_prefix(name.as_bytes())
        .map_or(false, |rest| rest.first() == Some(&b':'))
}

/// The lines of a database file as raw bytes, without their newlines.
/// These are byte formats, a line in some legacy encoding is still a line.
pub fn raw_lines(path: &Path) -> std::io::Result<impl Iterator<Item = std::io::Result<Vec<u8>>>> {
    Ok(BufReader::new(File::open(path)?).split(b'\n'))
}
