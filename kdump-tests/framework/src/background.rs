// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fire-and-forget guest commands.
//!
//! Reboot and panic-trigger commands sever their own SSH session, so their
//! results are never interesting and waiting for them would block the caller
//! for as long as the client takes to notice the connection is gone. They run
//! in tracked tasks instead, each bounded by a time limit and by a shared
//! cancellation token that [`BackgroundCommands::shutdown`] trips.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::guest::{GuestCommand, RemoteExecutor, VmEndpoint};

pub struct BackgroundCommands {
    executor: Arc<dyn RemoteExecutor>,
    limit: Duration,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl BackgroundCommands {
    /// Creates a launcher whose commands are abandoned after `limit`.
    pub fn new(executor: Arc<dyn RemoteExecutor>, limit: Duration) -> Self {
        Self {
            executor,
            limit,
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Starts `command` on `endpoint` and returns without waiting for it.
    pub fn launch(&mut self, endpoint: &VmEndpoint, command: GuestCommand) {
        let executor = Arc::clone(&self.executor);
        let endpoint = endpoint.clone();
        let cancel = self.cancel.child_token();
        let limit = self.limit;
        let span = info_span!(
            "background_command",
            guest = %endpoint.socket_addr(),
            command = command.command()
        );

        info!(parent: &span, "launching background guest command");
        self.tasks.spawn(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("background command cancelled");
                    }
                    res = tokio::time::timeout(
                        limit,
                        executor.run(&endpoint, &command),
                    ) => match res {
                        Ok(Ok(output)) => debug!(
                            exit_code = ?output.exit_code,
                            "background command exited"
                        ),
                        Ok(Err(e)) => debug!(
                            error = %e,
                            "background command lost its session"
                        ),
                        Err(_) => debug!(
                            ?limit,
                            "background command abandoned at its time limit"
                        ),
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Returns the number of launched commands that have not been reaped.
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    /// Cancels every outstanding command and waits for their tasks to exit.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                debug!(error = %e, "background command task ended abnormally");
            }
        }
    }
}

impl Drop for BackgroundCommands {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
