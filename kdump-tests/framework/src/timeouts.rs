// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The fixed intervals and bounded budgets that pace a kdump run.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read timing config {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse timing config {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Timing for every phase of a kdump run, in seconds.
///
/// A timing TOML may set any subset of these fields; the rest keep their
/// defaults.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PhaseTimeouts {
    /// How long to wait after issuing a reboot before checking whether the
    /// guest is reachable, so the check doesn't see services that haven't
    /// gone down yet.
    pub reboot_settle_secs: u64,

    /// The budget for a guest to become reachable again, both after the
    /// configuration reboot and after the panic.
    pub reachability_budget_secs: u64,

    /// The interval between SSH port checks.
    pub reachability_poll_secs: u64,

    /// How long to let the trigger preparation script's background work
    /// finish before injecting an NMI.
    pub nmi_grace_secs: u64,

    /// How long to leave the guest alone after triggering the panic.
    pub post_trigger_settle_secs: u64,

    /// The extra wait before power-cycling a guest on a legacy host.
    pub legacy_power_cycle_grace_secs: u64,

    /// The interval between liveness probes.
    pub probe_interval_secs: u64,

    /// The hard deadline for a single liveness probe.
    pub probe_deadline_secs: u64,

    /// The budget for the companion VM to report that it is running.
    pub companion_start_budget_secs: u64,

    /// The budget for the companion VM's SSH port to open.
    pub companion_ssh_budget_secs: u64,

    /// The time after which a fire-and-forget command is abandoned.
    pub background_command_limit_secs: u64,

    /// The SSH client's own connection timeout.
    pub ssh_connect_timeout_secs: u64,

    /// The time after which a single hypervisor call is abandoned.
    pub hypervisor_command_secs: u64,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            reboot_settle_secs: 60,
            reachability_budget_secs: 900,
            reachability_poll_secs: 10,
            nmi_grace_secs: 20,
            post_trigger_settle_secs: 300,
            legacy_power_cycle_grace_secs: 30,
            probe_interval_secs: 30,
            probe_deadline_secs: 90,
            companion_start_budget_secs: 120,
            companion_ssh_budget_secs: 300,
            background_command_limit_secs: 60,
            ssh_connect_timeout_secs: 15,
            hypervisor_command_secs: 60,
        }
    }
}

impl PhaseTimeouts {
    pub fn from_toml_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::Read { path: path.to_owned(), source }
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn reboot_settle(&self) -> Duration {
        Duration::from_secs(self.reboot_settle_secs)
    }

    pub fn reachability_budget(&self) -> Duration {
        Duration::from_secs(self.reachability_budget_secs)
    }

    pub fn reachability_poll(&self) -> Duration {
        Duration::from_secs(self.reachability_poll_secs)
    }

    pub fn nmi_grace(&self) -> Duration {
        Duration::from_secs(self.nmi_grace_secs)
    }

    pub fn post_trigger_settle(&self) -> Duration {
        Duration::from_secs(self.post_trigger_settle_secs)
    }

    pub fn legacy_power_cycle_grace(&self) -> Duration {
        Duration::from_secs(self.legacy_power_cycle_grace_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_deadline(&self) -> Duration {
        Duration::from_secs(self.probe_deadline_secs)
    }

    pub fn companion_start_budget(&self) -> Duration {
        Duration::from_secs(self.companion_start_budget_secs)
    }

    pub fn companion_ssh_budget(&self) -> Duration {
        Duration::from_secs(self.companion_ssh_budget_secs)
    }

    pub fn background_command_limit(&self) -> Duration {
        Duration::from_secs(self.background_command_limit_secs)
    }

    pub fn ssh_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_connect_timeout_secs)
    }

    pub fn hypervisor_command(&self) -> Duration {
        Duration::from_secs(self.hypervisor_command_secs)
    }
}
