// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Detecting that a guest has come back after a panic.
//!
//! A crash kernel brings the SSH port up while it is still writing the dump,
//! so an open port says nothing about whether the guest is done. Instead the
//! prober logs in, escalates, and asks for the OS name; only the exact
//! canonical answer counts.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::guest::{GuestCommand, RemoteExecutor, VmEndpoint};

/// The command the prober runs in the guest.
pub const PROBE_COMMAND: &str = "uname -o";

/// The answer [`PROBE_COMMAND`] gives on a booted Linux guest.
pub const EXPECTED_OS_IDENTIFIER: &str = "GNU/Linux";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady,
}

/// Classifies the stdout of one probe attempt.
///
/// Shells that are mid-reconnect can print banners and diagnostics around the
/// command's output, so only the last non-empty line is examined, and it must
/// equal [`EXPECTED_OS_IDENTIFIER`] exactly.
pub fn classify_probe_output(stdout: &str) -> Readiness {
    let last = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last();

    match last {
        Some(EXPECTED_OS_IDENTIFIER) => Readiness::Ready,
        _ => Readiness::NotReady,
    }
}

/// Runs single liveness probes with a hard deadline.
pub struct LivenessProber {
    executor: Arc<dyn RemoteExecutor>,
    deadline: Duration,
}

impl LivenessProber {
    pub fn new(executor: Arc<dyn RemoteExecutor>, deadline: Duration) -> Self {
        Self { executor, deadline }
    }

    /// Makes one probe attempt against `endpoint`.
    ///
    /// The attempt runs in its own task. If it has not finished when the
    /// deadline passes, the task is aborted, which drops (and kills) any shell
    /// client process it started. Every failure mode is reported as
    /// [`Readiness::NotReady`].
    pub async fn probe(&self, endpoint: &VmEndpoint) -> Readiness {
        let executor = Arc::clone(&self.executor);
        let target = endpoint.clone();
        let mut attempt = tokio::spawn(async move {
            executor
                .run(&target, &GuestCommand::privileged(PROBE_COMMAND))
                .await
        });

        match tokio::time::timeout(self.deadline, &mut attempt).await {
            Ok(Ok(Ok(output))) => {
                let readiness = classify_probe_output(&output.stdout);
                debug!(
                    guest = %endpoint.socket_addr(),
                    ?readiness,
                    exit_code = ?output.exit_code,
                    stdout = output.stdout.trim(),
                    "liveness probe finished"
                );
                readiness
            }
            Ok(Ok(Err(e))) => {
                debug!(
                    guest = %endpoint.socket_addr(),
                    error = %e,
                    "liveness probe could not reach guest"
                );
                Readiness::NotReady
            }
            Ok(Err(e)) => {
                warn!(error = %e, "liveness probe task failed");
                Readiness::NotReady
            }
            Err(_) => {
                attempt.abort();
                debug!(
                    guest = %endpoint.socket_addr(),
                    deadline = ?self.deadline,
                    "liveness probe abandoned at its deadline"
                );
                Readiness::NotReady
            }
        }
    }
}
