// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub use kdump_framework;

use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// The final result of a kdump run.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum TestVerdict {
    /// A dump was produced and the guest reported no failure.
    Pass,

    /// The harness couldn't run the test as requested, or the guest failed
    /// verification.
    Fail,

    /// A guest-side script reported that it aborted or failed, or the guest
    /// couldn't be talked to.
    Aborted,

    /// The test doesn't apply to this guest.
    Skipped,
}

impl TestVerdict {
    /// The process exit code the runner reports for this verdict.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Pass => 0,
            Self::Fail => 1,
            Self::Aborted => 2,
            Self::Skipped => 3,
        }
    }
}

/// The outcome from executing a kdump run: a verdict plus an optional
/// explanation for anything other than a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestOutcome {
    pub verdict: TestVerdict,
    pub message: Option<String>,
}

impl TestOutcome {
    pub fn passed() -> Self {
        Self { verdict: TestVerdict::Pass, message: None }
    }
}

impl From<PhaseExit> for TestOutcome {
    fn from(exit: PhaseExit) -> Self {
        Self { verdict: exit.verdict, message: Some(exit.reason) }
    }
}

/// Ends a run early from inside one of its phases. Phases return these
/// through [`PhaseResult`] so that `?` carries the verdict out to the
/// orchestrator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{verdict}: {reason}")]
pub struct PhaseExit {
    pub verdict: TestVerdict,
    pub reason: String,
}

impl PhaseExit {
    pub fn fail(reason: impl Into<String>) -> Self {
        Self { verdict: TestVerdict::Fail, reason: reason.into() }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self { verdict: TestVerdict::Aborted, reason: reason.into() }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self { verdict: TestVerdict::Skipped, reason: reason.into() }
    }
}

pub type PhaseResult<T> = Result<T, PhaseExit>;
