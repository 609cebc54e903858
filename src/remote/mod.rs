//! Remote repository host access.
//!
//! The sync engine only ever talks to a [`RemoteSession`]: one connected,
//! authenticated session that can stat, upload, chmod and run commands.
//! Handshake and authentication live behind a [`Connector`].
//!
//! # Architecture
//!
//! - **ssh**: production session over SSH (SFTP + exec channel) via `ssh2`
//! - **memory**: in-memory remote filesystem for tests (`test-support` feature)

#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod ssh;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ssh::{SshConnector, SshSession};

/// SFTP status code for "no such file" (`LIBSSH2_FX_NO_SUCH_FILE`).
pub const SFTP_NO_SUCH_FILE: i32 = 2;

/// Permission bits applied to every uploaded artifact (rw-r--r--).
pub const ARTIFACT_MODE: u32 = 0o644;

/// Errors reported by a remote session.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("SSH connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    #[error("Authentication as {user} was rejected")]
    AuthRejected { user: String },

    #[error("SFTP status {code}: {message}")]
    Sftp { code: i32, message: String },

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ssh2::Error> for RemoteError {
    fn from(e: ssh2::Error) -> Self {
        match e.code() {
            ssh2::ErrorCode::SFTP(code) => Self::Sftp {
                code,
                message: e.message().to_string(),
            },
            ssh2::ErrorCode::Session(_) => Self::Ssh(e.message().to_string()),
        }
    }
}

/// Connection details for one run. Validated for presence only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    /// Base path of the repository on the remote host.
    pub remote_path: String,
    /// Private key to authenticate with; ssh-agent is used when unset.
    #[serde(default)]
    pub identity_file: Option<std::path::PathBuf>,
}

fn default_port() -> u16 {
    22
}

impl fmt::Display for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.remote_path)
    }
}

/// Snapshot of a remote file taken by a stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteArtifactDescriptor {
    /// Modification time in whole seconds since the epoch.
    pub mtime: u64,
    pub size: u64,
}

/// Outcome of a remote stat. Faults travel separately as [`RemoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStat {
    /// Nothing exists at the path.
    Absent,
    /// Something exists at the path (file or directory).
    Present(RemoteArtifactDescriptor),
}

impl RemoteStat {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Result of a remote command.
///
/// Sessions that merge the command's stderr into `stdout` leave `stderr`
/// for what the transport itself observed (a terminating signal).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Text worth reporting when the command failed.
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (false, false) => format!("{stderr}; {stdout}"),
            (false, true) => stderr.to_string(),
            _ => stdout.to_string(),
        }
    }
}

/// A connected, authenticated session on the repository host.
///
/// Every call blocks until the remote side answers. The session is used by
/// one caller at a time.
pub trait RemoteSession {
    /// Stat `path`. A missing entry is `Ok(RemoteStat::Absent)`.
    fn stat(&mut self, path: &str) -> Result<RemoteStat, RemoteError>;

    /// Copy a local file to `remote`, replacing it. Returns bytes written.
    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, RemoteError>;

    /// Set permission bits on `path`.
    fn set_permissions(&mut self, path: &str, mode: u32) -> Result<(), RemoteError>;

    /// Run a command given as an argument vector.
    fn exec(&mut self, argv: &[&str]) -> Result<CommandOutput, RemoteError>;

    /// Release the session.
    fn close(&mut self) -> Result<(), RemoteError>;
}

/// Opens sessions from connection details.
pub trait Connector {
    type Session: RemoteSession;

    fn connect(&self, ctx: &ConnectionContext) -> Result<Self::Session, RemoteError>;
}

/// Render an argument vector as a single shell-safe command line.
pub fn command_line(argv: &[&str]) -> String {
    shell_words::join(argv)
}
