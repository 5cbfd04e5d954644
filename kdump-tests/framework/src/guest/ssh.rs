// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A [`RemoteExecutor`] that shells out to the OpenSSH client.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, info_span, Instrument};

use super::{
    shell_quote, CommandOutput, Credential, GuestCommand, RemoteError,
    RemoteExecutor, VmEndpoint,
};

/// The exit status `ssh` reserves for its own failures.
const SSH_ERROR_STATUS: i32 = 255;

/// Fragments of the messages `ssh` prints when it gives up on a session.
const SSH_DIAGNOSTICS: &[&str] = &[
    "ssh:",
    "client_loop:",
    "kex_exchange_identification:",
    "Connection closed",
    "Connection reset",
    "Connection timed out",
    "closed by remote host",
    "Host key verification failed",
    "Permission denied (",
    "Broken pipe",
];

/// Runs guest commands by spawning one `ssh` process per command.
///
/// Password credentials are supplied through `sshpass -e`, which reads the
/// password from its environment rather than its command line. Privileged
/// commands get the password for `sudo -S` on their standard input, so it
/// never appears in an argument list on either end. Child processes are
/// killed when their future is dropped, so callers can bound a command with
/// a timeout and abandon it.
///
/// `ssh` exits with status 255 both when the session fails and when the
/// remote command itself exits 255. The two are told apart by `ssh`'s own
/// diagnostics on stderr; a 255 exit with an empty stderr is treated as a
/// lost session, since a connection severed by a rebooting guest is only
/// reported below the `ERROR` log level.
#[derive(Clone, Debug)]
pub struct SshExecutor {
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn build_command(
        &self,
        endpoint: &VmEndpoint,
        command: &GuestCommand,
    ) -> Command {
        let mut cmd = match endpoint.credential() {
            Credential::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.env("SSHPASS", password).args(["-e", "ssh"]);
                cmd
            }
            Credential::KeyFile(_) => Command::new("ssh"),
        };

        cmd.args([
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "LogLevel=ERROR",
            "-o",
        ])
        .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
        .arg("-p")
        .arg(endpoint.port().to_string());

        if let Credential::KeyFile(key) = endpoint.credential() {
            cmd.args(["-o", "BatchMode=yes", "-i", key.as_str()]);
        }

        cmd.arg(format!("{}@{}", endpoint.user(), endpoint.address()))
            .arg(remote_command_line(command, endpoint.credential()));

        let stdin = match sudo_password(command, endpoint.credential()) {
            Some(_) => Stdio::piped(),
            None => Stdio::null(),
        };
        cmd.stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Returns the password `sudo` should read from the session's stdin, if
/// `command` needs one.
fn sudo_password<'a>(
    command: &GuestCommand,
    credential: &'a Credential,
) -> Option<&'a str> {
    match credential {
        Credential::Password(password) if command.is_privileged() => {
            Some(password.as_str())
        }
        _ => None,
    }
}

/// Produces the command line the guest's login shell should run for
/// `command`.
fn remote_command_line(
    command: &GuestCommand,
    credential: &Credential,
) -> String {
    if !command.is_privileged() {
        return command.command().to_owned();
    }

    let body = shell_quote(command.command());
    match credential {
        Credential::Password(_) => format!("sudo -S -p '' bash -c {body}"),
        Credential::KeyFile(_) => format!("sudo -n bash -c {body}"),
    }
}

/// Decides whether a finished `ssh` process ran the command or lost its
/// session.
fn classify(
    endpoint: &VmEndpoint,
    output: CommandOutput,
) -> Result<CommandOutput, RemoteError> {
    let stderr = output.stderr.trim();
    let session_lost = output.exit_code == Some(SSH_ERROR_STATUS)
        && (stderr.is_empty()
            || SSH_DIAGNOSTICS.iter().any(|d| stderr.contains(d)));

    if session_lost {
        return Err(RemoteError::Session {
            address: endpoint.socket_addr(),
            message: stderr.to_owned(),
        });
    }

    Ok(output)
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        endpoint: &VmEndpoint,
        command: &GuestCommand,
    ) -> Result<CommandOutput, RemoteError> {
        let mut cmd = self.build_command(endpoint, command);
        let program = cmd.as_std().get_program().to_string_lossy().into_owned();
        let span = info_span!(
            "ssh",
            guest = %endpoint.socket_addr(),
            privileged = command.is_privileged()
        );

        async move {
            debug!(command = command.command(), "running guest command");
            let mut child = cmd.spawn().map_err(|source| RemoteError::Spawn {
                program: program.clone(),
                source,
            })?;

            if let (Some(mut stdin), Some(password)) = (
                child.stdin.take(),
                sudo_password(command, endpoint.credential()),
            ) {
                // A guest that has already hung up makes this fail; the
                // session's own exit status reports that.
                if let Err(e) =
                    stdin.write_all(format!("{password}\n").as_bytes()).await
                {
                    debug!(error = %e, "failed to pass password to sudo");
                }
            }

            let output = child
                .wait_with_output()
                .await
                .map_err(|source| RemoteError::Spawn { program, source })?;

            let output = CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code(),
            };
            debug!(exit_code = ?output.exit_code, "guest command exited");
            classify(endpoint, output)
        }
        .instrument(span)
        .await
    }
}
