// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A [`Hypervisor`] backed by the Hyper-V PowerShell module.

use std::{net::Ipv4Addr, process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{HostBuild, Hypervisor, HypervisorError, VmPowerState};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Drives a (possibly remote) Hyper-V host by running PowerShell cmdlets with
/// `-ComputerName`.
///
/// Each cmdlet runs in its own PowerShell process, which is killed if it
/// hasn't exited within the command timeout.
#[derive(Clone, Debug)]
pub struct HyperVController {
    server: String,
    powershell: String,
    command_timeout: Duration,
}

impl HyperVController {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            powershell: "powershell.exe".to_owned(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Uses `program` (e.g. `pwsh`) instead of `powershell.exe`.
    pub fn with_powershell(mut self, program: impl Into<String>) -> Self {
        self.powershell = program.into();
        self
    }

    fn computer(&self) -> String {
        ps_quote(&self.server)
    }

    async fn invoke(&self, script: String) -> Result<String, HypervisorError> {
        debug!(server = %self.server, %script, "invoking PowerShell");
        let mut cmd = Command::new(&self.powershell);
        cmd.args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| HypervisorError::Timeout {
                operation: script.clone(),
                waited: self.command_timeout,
            })?
            .map_err(|source| HypervisorError::Spawn {
                program: self.powershell.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(HypervisorError::CommandFailed {
                command: script,
                stderr: String::from_utf8_lossy(&output.stderr)
                    .trim()
                    .to_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

/// Quotes `s` as a PowerShell single-quoted string literal.
fn ps_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn parse_build(
    command: &str,
    output: &str,
) -> Result<HostBuild, HypervisorError> {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse().ok())
        .map(HostBuild)
        .ok_or_else(|| HypervisorError::UnexpectedOutput {
            command: command.to_owned(),
            output: output.to_owned(),
        })
}

fn first_ipv4(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|l| l.trim().parse().ok())
}

#[async_trait]
impl Hypervisor for HyperVController {
    async fn host_build(&self) -> Result<HostBuild, HypervisorError> {
        let script = format!(
            "(Get-CimInstance -ComputerName {} -ClassName \
             Win32_OperatingSystem).BuildNumber",
            self.computer()
        );
        let output = self.invoke(script.clone()).await?;
        let build = parse_build(&script, &output)?;
        info!(server = %self.server, build = build.0, "queried host build");
        Ok(build)
    }

    async fn vm_state(
        &self,
        vm: &str,
    ) -> Result<VmPowerState, HypervisorError> {
        let script = format!(
            "(Get-VM -Name {} -ComputerName {}).State",
            ps_quote(vm),
            self.computer()
        );
        let output = self.invoke(script).await?;
        Ok(output.parse().unwrap_or(VmPowerState::Other))
    }

    async fn start_vm(&self, vm: &str) -> Result<(), HypervisorError> {
        info!(vm, "starting VM");
        let script = format!(
            "Start-VM -Name {} -ComputerName {}",
            ps_quote(vm),
            self.computer()
        );
        self.invoke(script).await.map(|_| ())
    }

    async fn stop_vm(&self, vm: &str) -> Result<(), HypervisorError> {
        info!(vm, "turning VM off");
        let script = format!(
            "Stop-VM -Name {} -ComputerName {} -TurnOff -Force",
            ps_quote(vm),
            self.computer()
        );
        self.invoke(script).await.map(|_| ())
    }

    async fn inject_nmi(&self, vm: &str) -> Result<(), HypervisorError> {
        info!(vm, "injecting NMI");
        let script = format!(
            "Debug-VM -Name {} -ComputerName {} \
             -InjectNonMaskableInterrupt -Confirm:$false -Force",
            ps_quote(vm),
            self.computer()
        );
        self.invoke(script).await.map(|_| ())
    }

    async fn vm_ipv4(
        &self,
        vm: &str,
    ) -> Result<Option<Ipv4Addr>, HypervisorError> {
        let script = format!(
            "Get-VMNetworkAdapter -VMName {} -ComputerName {} | \
             Select-Object -ExpandProperty IPAddresses",
            ps_quote(vm),
            self.computer()
        );
        let output = self.invoke(script).await?;
        Ok(first_ipv4(&output))
    }
}
