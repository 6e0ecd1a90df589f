/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Create, revert and clean up the local materialization of a directory
//! account, reference counted by the login sessions that need it.

mod error;
pub mod groups;
pub mod homedir;
pub mod liveness;
mod manager;

pub use error::Error;
pub use error::Outcome;
pub use error::Result;
pub use error::Warning;
pub use groups::Groups;
pub use homedir::CommandHomeDirectory;
pub use homedir::HomeDirectory;
pub use homedir::HomeError;
pub use liveness::Liveness;
pub use liveness::SignalLiveness;
pub use manager::AccountManager;
pub use manager::CreateRequest;
