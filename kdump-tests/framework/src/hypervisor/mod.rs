// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces to the hypervisor hosting the guest under test.

use std::{future::Future, net::Ipv4Addr, str::FromStr, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

mod hyperv;

pub use hyperv::HyperVController;

/// The first Hyper-V host build (Windows Server 2012 R2) that can inject an
/// NMI into a guest.
pub const NMI_MIN_BUILD: u32 = 9600;

/// The newest Hyper-V host build on which a guest that panics during kdump
/// can stay wedged instead of resuming after the dump is written.
pub const LEGACY_DUMP_RESUME_MAX_BUILD: u32 = 9600;

/// A Hyper-V host's OS build number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HostBuild(pub u32);

impl HostBuild {
    pub fn supports_nmi(self) -> bool {
        self.0 >= NMI_MIN_BUILD
    }

    /// Indicates whether guests on this host need a forced power cycle to
    /// recover after a crash dump.
    pub fn needs_power_cycle_after_dump(self) -> bool {
        self.0 <= LEGACY_DUMP_RESUME_MAX_BUILD
    }
}

/// The coarse power state of a VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmPowerState {
    Running,
    Off,
    Saved,
    Paused,
    Other,
}

impl FromStr for VmPowerState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "Running" => Self::Running,
            "Off" => Self::Off,
            "Saved" => Self::Saved,
            "Paused" => Self::Paused,
            _ => Self::Other,
        })
    }
}

#[derive(Debug, Error)]
pub enum HypervisorError {
    #[error("failed to launch `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("hypervisor command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("unexpected output from hypervisor command `{command}`: {output:?}")]
    UnexpectedOutput { command: String, output: String },

    #[error("hypervisor call `{operation}` did not finish within {waited:?}")]
    Timeout { operation: String, waited: Duration },

    #[error("VM {vm} did not reach {target:?} within {waited:?}")]
    StateTimeout { vm: String, target: VmPowerState, waited: Duration },
}

/// The hypervisor operations the kdump test consumes.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Queries the host's OS build number.
    async fn host_build(&self) -> Result<HostBuild, HypervisorError>;

    async fn vm_state(&self, vm: &str) -> Result<VmPowerState, HypervisorError>;

    async fn start_vm(&self, vm: &str) -> Result<(), HypervisorError>;

    /// Turns the VM off without asking the guest to shut down.
    async fn stop_vm(&self, vm: &str) -> Result<(), HypervisorError>;

    async fn inject_nmi(&self, vm: &str) -> Result<(), HypervisorError>;

    /// Returns the first IPv4 address the VM's network adapters report, if
    /// any.
    async fn vm_ipv4(
        &self,
        vm: &str,
    ) -> Result<Option<Ipv4Addr>, HypervisorError>;
}

/// Runs one hypervisor call, abandoning it if it hasn't finished by
/// `deadline`.
pub async fn call_with_deadline<T>(
    deadline: Instant,
    operation: &str,
    call: impl Future<Output = Result<T, HypervisorError>>,
) -> Result<T, HypervisorError> {
    let started = Instant::now();
    match tokio::time::timeout_at(deadline, call).await {
        Ok(res) => res,
        Err(_) => Err(HypervisorError::Timeout {
            operation: operation.to_owned(),
            waited: started.elapsed(),
        }),
    }
}

/// Waits up to `timeout_duration` for `vm` to reach the `target` power state.
/// A state query still outstanding at the end of the wait is abandoned.
pub async fn wait_for_vm_state(
    hypervisor: &dyn Hypervisor,
    vm: &str,
    target: VmPowerState,
    timeout_duration: Duration,
) -> Result<(), HypervisorError> {
    info!(vm, ?target, ?timeout_duration, "Waiting for VM power state");

    let deadline = Instant::now() + timeout_duration;

    // A transient `None` means "not there yet"; query failures are permanent.
    let wait_fn = || async {
        match tokio::time::timeout_at(deadline, hypervisor.vm_state(vm)).await {
            Ok(Ok(current)) if current == target => Ok(()),
            Ok(Ok(current)) => {
                debug!(vm, ?current, "VM not in target state yet");
                Err(backoff::Error::transient(None))
            }
            Ok(Err(e)) => Err(backoff::Error::permanent(Some(e))),
            Err(_) => {
                debug!(vm, "VM state query outlived the wait");
                Err(backoff::Error::permanent(None))
            }
        }
    };

    let backoff = backoff::ExponentialBackoff {
        max_elapsed_time: Some(timeout_duration),
        ..Default::default()
    };

    backoff::future::retry(backoff, wait_fn).await.map_err(|e| {
        e.unwrap_or(HypervisorError::StateTimeout {
            vm: vm.to_owned(),
            target,
            waited: timeout_duration,
        })
    })
}
