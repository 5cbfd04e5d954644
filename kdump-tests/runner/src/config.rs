// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::IpAddr;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use kdump_framework::{guest_state::StateFilePolicy, Credential, PhaseTimeouts};

#[derive(Debug, Subcommand)]
pub enum Command {
    Run(RunOptions),
}

/// Runtime configuration options for the runner.
#[derive(Debug, Parser)]
#[clap(verbatim_doc_comment)]
pub struct ProcessArgs {
    #[clap(subcommand)]
    pub command: Command,

    /// Suppress emission of terminal control codes in the runner's log output.
    #[clap(long, conflicts_with = "emit_bunyan")]
    pub disable_ansi: bool,

    /// Emit Bunyan-formatted logs.
    #[clap(long)]
    pub emit_bunyan: bool,
}

/// The kind of host the guest under test runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PlatformKind {
    /// A Hyper-V host, driven through PowerShell.
    Hyperv,

    /// Any other host. NMI triggering is unavailable.
    Other,
}

#[derive(Args, Debug)]
#[clap(verbatim_doc_comment)]
pub struct RunOptions {
    /// The hypervisor's name for the guest under test.
    #[clap(long)]
    pub vm_name: String,

    /// The kind of host the guest runs on.
    #[clap(long, value_enum, default_value_t = PlatformKind::Hyperv)]
    pub platform: PlatformKind,

    /// The Hyper-V host to pass to PowerShell cmdlets as `-ComputerName`.
    #[clap(long, default_value = "localhost")]
    pub hyperv_server: String,

    /// The PowerShell executable used to drive Hyper-V.
    #[clap(long, default_value = "powershell.exe")]
    pub powershell: String,

    /// The guest's address when the run starts. On Hyper-V the address is
    /// refreshed from the host after the guest reboots.
    #[clap(long)]
    pub guest_address: IpAddr,

    #[clap(long, default_value_t = 22)]
    pub guest_port: u16,

    /// The guest login user. Privileged commands are run through `sudo`.
    #[clap(long, default_value = "root")]
    pub guest_user: String,

    /// The guest login password, also fed to `sudo`.
    #[clap(long, env = "KDUMP_GUEST_PASSWORD", hide_env_values = true)]
    pub(crate) password: Option<String>,

    /// A private key to log in with instead of a password. The guest must
    /// allow passwordless `sudo`. Takes precedence over a password.
    #[clap(long, value_parser)]
    pub(crate) ssh_key: Option<Utf8PathBuf>,

    /// The test parameters, in the form
    /// `crashkernel=256M;NMI=1;VM2NAME=nfsVM;use_nfs=yes;VCPU=4`.
    #[clap(long, allow_hyphen_values = true)]
    pub params: Option<String>,

    /// The companion VM's address on hosts other than Hyper-V, where it
    /// can't be looked up.
    #[clap(long)]
    pub companion_address: Option<IpAddr>,

    /// The directory that receives the runner's log and the guest's dump
    /// summary. Created if it doesn't exist.
    #[clap(long, value_parser)]
    pub work_dir: Utf8PathBuf,

    /// A TOML file overriding some or all of the run's timing, e.g.
    ///
    ///     probe_interval_secs = 15
    ///     reachability_budget_secs = 1800
    #[clap(long, value_parser)]
    timeouts_toml: Option<Utf8PathBuf>,

    /// What to do when a guest script leaves its state file empty or
    /// unrecognizable: `lenient` carries on, `strict` aborts the run.
    #[clap(long, default_value = "lenient")]
    pub state_file_policy: StateFilePolicy,
}

impl RunOptions {
    pub fn credential(&self) -> anyhow::Result<Credential> {
        match (&self.ssh_key, &self.password) {
            (Some(key), _) => Ok(Credential::KeyFile(key.clone())),
            (None, Some(password)) => {
                Ok(Credential::Password(password.clone()))
            }
            (None, None) => Err(anyhow::anyhow!(
                "either --ssh-key or --password (or KDUMP_GUEST_PASSWORD) \
                 is required"
            )),
        }
    }

    pub fn timeouts(&self) -> anyhow::Result<PhaseTimeouts> {
        match &self.timeouts_toml {
            Some(path) => PhaseTimeouts::from_toml_file(path).with_context(
                || format!("loading timing overrides from {path}"),
            ),
            None => Ok(PhaseTimeouts::default()),
        }
    }
}
