/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fs::Permissions;
use std::io::BufWriter;
use std::io::ErrorKind;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use login_acct_paths::Install;
use login_acct_users::raw_lines;
use tempfile::NamedTempFile;
use tracing::debug;
use tracing::trace;

/// What happens to one line of the live database on its way to the scratch
/// file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Edit {
    Keep,
    Drop,
    Replace(String),
}

/// The next version of a database, written next to it and invisible to
/// readers until [Scratch::install]. Dropping an uninstalled scratch file
/// deletes it.
pub(crate) struct Scratch {
    target: PathBuf,
    out: BufWriter<NamedTempFile>,
}

impl Scratch {
    /// An empty scratch file in the same directory (and so the same
    /// filesystem) as `target`.
    pub(crate) fn create(target: &Path, mode: u32) -> std::io::Result<Self> {
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let tmp = tempfile::Builder::new()
            .prefix(".login_acct.")
            .tempfile_in(dir)?;
        tmp.as_file()
            .set_permissions(Permissions::from_mode(mode))?;
        trace!(
            "scratch {} for {}",
            tmp.path().display(),
            target.display()
        );
        Ok(Self {
            target: target.to_owned(),
            out: BufWriter::new(tmp),
        })
    }

    /// Stream every line of `target` through `edit` into a new scratch file.
    /// Lines that are not UTF-8 never reach `edit` and are kept byte for
    /// byte.
    pub(crate) fn transform<F>(target: &Path, mode: u32, mut edit: F) -> std::io::Result<Self>
    where
        F: FnMut(&str) -> Edit,
    {
        let lines = raw_lines(target)?;
        let mut scratch = Self::create(target, mode)?;
        for line in lines {
            let line = line?;
            let action = match std::str::from_utf8(&line) {
                Ok(text) => edit(text),
                Err(_) => {
                    trace!("passing undecodable line of {} through", target.display());
                    Edit::Keep
                }
            };
            match action {
                Edit::Keep => scratch.push_raw(&line)?,
                Edit::Drop => trace!("dropping line from {}", target.display()),
                Edit::Replace(new) => scratch.push_line(&new)?,
            }
        }
        Ok(scratch)
    }

    /// Copy `target` unchanged.
    pub(crate) fn copy(target: &Path, mode: u32) -> std::io::Result<Self> {
        Self::transform(target, mode, |_| Edit::Keep)
    }

    pub(crate) fn push_line(&mut self, line: &str) -> std::io::Result<()> {
        self.push_raw(line.as_bytes())
    }

    fn push_raw(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.out.write_all(line)?;
        self.out.write_all(b"\n")
    }

    /// Force the scratch file to stable storage, then make it the live
    /// database. Nothing observable changes unless this returns Ok.
    pub(crate) fn install(self, install: &Install) -> std::io::Result<()> {
        let tmp = self.out.into_inner().map_err(|e| e.into_error())?;
        tmp.as_file().sync_all()?;
        match install {
            Install::Rename => {
                tmp.persist(&self.target).map_err(|e| e.error)?;
            }
            Install::RebuildIndex { program } => {
                let status = Command::new(program).arg("-p").arg(tmp.path()).status()?;
                if !status.success() {
                    return Err(std::io::Error::new(
                        ErrorKind::Other,
                        format!("{} -p failed: {status}", program.display()),
                    ));
                }
                // the rebuilder consumes the scratch file, dropping `tmp`
                // cleans up if it left one behind
            }
        }
        debug!("installed new {}", self.target.display());
        Ok(())
    }
}
