// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The state that guest-side scripts report through their state file.

use std::str::FromStr;

use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// The file, relative to the login user's home directory, that every
/// guest-side script writes its result to.
pub const STATE_FILE: &str = "state.txt";

/// A state reported by a guest-side script.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr,
)]
pub enum GuestState {
    TestCompleted,
    TestRunning,
    TestAborted,
    TestFailed,
    TestSkipped,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuestStateError {
    #[error("guest state file is missing or empty")]
    Missing,

    #[error("guest reported unrecognized state {0:?}")]
    Unrecognized(String),
}

impl GuestState {
    /// Parses the output of `cat` on the state file. Scripts sometimes leave
    /// blank lines behind, so the last non-empty line is taken as the report.
    pub fn from_report(report: &str) -> Result<Self, GuestStateError> {
        let line = report
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .ok_or(GuestStateError::Missing)?;

        Self::from_str(line)
            .map_err(|_| GuestStateError::Unrecognized(line.to_owned()))
    }
}

/// Specifies what to do when the state file can't be read or holds a value
/// outside [`GuestState`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StateFilePolicy {
    /// Log the problem and carry on as though the guest reported no failure.
    #[default]
    Lenient,

    /// Abort the run.
    Strict,
}

impl FromStr for StateFilePolicy {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Unrecognized state file policy {}", s),
            )),
        }
    }
}
