// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Routines for addressing guests and running shell commands in them.

use std::{
    fmt::Debug,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{debug, trace};

mod ssh;

pub use ssh::SshExecutor;

/// The secret used to authenticate to a guest.
#[derive(Clone)]
pub enum Credential {
    /// Log in with a password. The same password is fed to `sudo` for
    /// privileged commands.
    Password(String),

    /// Log in with the private key at this path. Privileged commands expect
    /// passwordless `sudo`.
    KeyFile(Utf8PathBuf),
}

impl Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

/// Everything needed to open a shell session on a guest.
///
/// The address is the only field that changes after construction: guests
/// can come back from a reboot with a new lease, so callers rebind it once
/// they have reconfirmed reachability.
#[derive(Clone, Debug)]
pub struct VmEndpoint {
    address: IpAddr,
    port: u16,
    user: String,
    credential: Credential,
}

impl VmEndpoint {
    pub fn new(
        address: IpAddr,
        port: u16,
        user: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self { address, port, user: user.into(), credential }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Points this endpoint at a new guest address.
    pub fn rebind(&mut self, address: IpAddr) {
        if address != self.address {
            debug!(old = %self.address, new = %address, "rebinding guest address");
            self.address = address;
        }
    }
}

/// A shell command to run in a guest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestCommand {
    command: String,
    privileged: bool,
}

impl GuestCommand {
    /// A command run as the login user.
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), privileged: false }
    }

    /// A command run as root through `sudo`.
    pub fn privileged(command: impl Into<String>) -> Self {
        Self { command: command.into(), privileged: true }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }
}

/// The result of a command that ran to completion in the guest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,

    /// The command's exit status, or `None` if it was killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to launch remote shell client `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote shell session to {address} failed: {message}")]
    Session { address: SocketAddr, message: String },
}

/// Runs shell commands in a guest.
///
/// Every call establishes and tears down its own session; implementations
/// must not reuse connections across calls, since a guest may reboot (and
/// change address) between any two commands.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Runs `command` on the guest at `endpoint` and waits for it to exit.
    ///
    /// A command that runs and exits with a non-zero status is not an error;
    /// errors are reserved for failures to establish or keep the session.
    async fn run(
        &self,
        endpoint: &VmEndpoint,
        command: &GuestCommand,
    ) -> Result<CommandOutput, RemoteError>;
}

/// Checks whether a guest's SSH port accepts connections.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_open(&self, addr: SocketAddr) -> bool;
}

/// A [`PortProbe`] that opens (and immediately drops) a TCP connection.
#[derive(Clone, Copy, Debug)]
pub struct TcpPortProbe {
    connect_timeout: Duration,
}

impl TcpPortProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_open(&self, addr: SocketAddr) -> bool {
        match tokio::time::timeout(
            self.connect_timeout,
            tokio::net::TcpStream::connect(addr),
        )
        .await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                trace!(%addr, error = %e, "port probe refused");
                false
            }
            Err(_) => {
                trace!(%addr, "port probe timed out");
                false
            }
        }
    }
}

/// Quotes `s` so that a POSIX shell passes it through as a single word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
