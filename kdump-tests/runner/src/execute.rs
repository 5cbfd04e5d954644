// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use kdump_framework::{
    guest::{SshExecutor, TcpPortProbe},
    hypervisor::HyperVController,
    VmEndpoint,
};
use kdump_tests::kdump_crash::{
    run_kdump_test, Collaborators, KdumpTestContext, Platform,
};
use kdump_tests::kdump_testcase::{PhaseExit, TestOutcome};
use tracing::{error, info};

use crate::config::{PlatformKind, RunOptions};

/// Wires the real SSH client and hypervisor adapters to a kdump run and
/// executes it. A configuration that can't be wired up aborts the run.
pub async fn run_test(run_opts: &RunOptions) -> TestOutcome {
    let (ctx, collaborators) = match prepare(run_opts) {
        Ok(prepared) => prepared,
        Err(e) => {
            error!(error = ?e, "invalid run configuration");
            return PhaseExit::aborted(format!("{e:#}")).into();
        }
    };

    let start_time = Instant::now();
    let outcome = run_kdump_test(ctx, collaborators).await;
    info!(
        verdict = %outcome.verdict,
        message = outcome.message.as_deref().unwrap_or("[no message]"),
        "test result: {}, finished in {:.2}s",
        outcome.verdict,
        start_time.elapsed().as_secs_f64()
    );

    outcome
}

fn prepare(
    run_opts: &RunOptions,
) -> anyhow::Result<(KdumpTestContext, Collaborators)> {
    let timeouts = run_opts.timeouts()?;
    let endpoint = VmEndpoint::new(
        run_opts.guest_address,
        run_opts.guest_port,
        run_opts.guest_user.clone(),
        run_opts.credential()?,
    );

    let platform = match run_opts.platform {
        PlatformKind::Hyperv => Platform::HyperV(Arc::new(
            HyperVController::new(run_opts.hyperv_server.clone())
                .with_powershell(run_opts.powershell.clone())
                .with_command_timeout(timeouts.hypervisor_command()),
        )),
        PlatformKind::Other => Platform::Other {
            companion_address: run_opts.companion_address,
        },
    };

    let collaborators = Collaborators {
        platform,
        executor: Arc::new(SshExecutor::new(timeouts.ssh_connect_timeout())),
        port_probe: Arc::new(TcpPortProbe::new(timeouts.ssh_connect_timeout())),
    };

    info!(
        vm = %run_opts.vm_name,
        guest = %SocketAddr::new(run_opts.guest_address, run_opts.guest_port),
        platform = ?run_opts.platform,
        ?timeouts,
        "running kdump test"
    );

    let ctx = KdumpTestContext {
        vm_name: run_opts.vm_name.clone(),
        endpoint,
        raw_params: run_opts.params.clone(),
        work_dir: run_opts.work_dir.clone(),
        timeouts,
        state_policy: run_opts.state_file_policy,
    };

    Ok((ctx, collaborators))
}
