/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fs::File;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use login_acct_paths::Config;
use thiserror::Error;
use tracing::error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] login_acct_paths::Error),
    #[error(transparent)]
    Lifecycle(#[from] login_acct_lifecycle::Error),
    #[error(transparent)]
    Gate(#[from] login_acct_gate::Error),
    #[error("{0:#?}")]
    Uncategorized(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// What a successful command has to say about how it went.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Exit {
    Clean,
    /// Succeeded with warnings, or the answer was no.
    Degraded,
}

#[derive(Parser, Debug)]
/// Manage local accounts materialized from the directory service for the
/// duration of their login sessions
struct Args {
    #[clap(long, env = "LOGIN_ACCT_CONFIG")]
    /// TOML file overriding paths and tunables
    config: Option<PathBuf>,
    #[clap(long)]
    /// Operate on a host image rooted here instead of /
    root: Option<PathBuf>,
    #[command(flatten)]
    log: LogArgs,
    #[clap(subcommand)]
    subcommand: Subcommand,
}

impl Args {
    fn config(&self) -> Result<Config> {
        let config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        Ok(match &self.root {
            Some(root) => config.rooted(root),
            None => config,
        })
    }
}

#[derive(clap::Args, Debug)]
struct LogArgs {
    #[clap(long)]
    /// File to write logs to in addition to stderr
    logs: Option<PathBuf>,
}

impl LogArgs {
    fn file(&self) -> anyhow::Result<Option<File>> {
        match &self.logs {
            Some(path) => Ok(Some(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("while opening logs file {}", path.display()))?,
            )),
            None => Ok(None),
        }
    }
}

#[derive(Parser, Debug)]
enum Subcommand {
    Allowed(cmd::Allowed),
    Create(cmd::Create),
    Revert(cmd::Revert),
    Cleanup(cmd::Cleanup),
    Access(cmd::Access),
    Status(cmd::Status),
}

impl Error {
    fn code(&self) -> Option<i32> {
        match self {
            Error::Lifecycle(e) => Some(e.code()),
            Error::Gate(login_acct_gate::Error::UnknownUser) => Some(3),
            Error::Gate(login_acct_gate::Error::BadDirectoryRecord { .. }) => Some(2),
            Error::Gate(login_acct_gate::Error::Permission { .. }) => Some(9),
            Error::Gate(login_acct_gate::Error::OutOfMemory) => Some(10),
            _ => None,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::Layer::default()
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(args.log.file()?.map(|file| {
            tracing_subscriber::fmt::Layer::default()
                .with_ansi(false)
                .with_writer(file)
        }))
        .init();

    let result = args.config().and_then(|config| match args.subcommand {
        Subcommand::Allowed(x) => x.run(&config),
        Subcommand::Create(x) => x.run(&config),
        Subcommand::Revert(x) => x.run(&config),
        Subcommand::Cleanup(x) => x.run(&config),
        Subcommand::Access(x) => x.run(&config),
        Subcommand::Status(x) => x.run(&config),
    });
    match result {
        Ok(Exit::Clean) => Ok(()),
        Ok(Exit::Degraded) => std::process::exit(1),
        Err(e) => {
            error!("{e:#?}");
            match e.code() {
                Some(code) => eprintln!("{}", format!("error {code}: {e}").red()),
                None => eprintln!("{}", e.to_string().red()),
            }
            std::process::exit(2);
        }
    }
}
