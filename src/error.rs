//! Error taxonomy shared by the sync engine.
//!
//! "Absent" remote entries are not errors and never show up here; they are
//! modelled by [`crate::remote::RemoteStat::Absent`]. Everything in
//! [`SyncError`] terminates the current run.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::layout::LayoutError;
use crate::remote::RemoteError;

/// Remote operation that was in flight when a fault happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Connect,
    Stat,
    Upload,
    SetPermissions,
    Exec,
    Disconnect,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Stat => write!(f, "stat"),
            Self::Upload => write!(f, "upload"),
            Self::SetPermissions => write!(f, "setstat"),
            Self::Exec => write!(f, "exec"),
            Self::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Fatal errors raised while synchronizing the repository.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    #[error("Remote {operation} failed for {path}: {source}")]
    InfrastructureFault {
        operation: RemoteOp,
        path: String,
        #[source]
        source: RemoteError,
    },

    #[error("Remote command `{command}` exited with status {status}: {stderr}")]
    RemoteCommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Local artifact {} is missing or unreadable: {source}", path.display())]
    PreconditionViolation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub(crate) fn fault(operation: RemoteOp, path: impl Into<String>, source: RemoteError) -> Self {
        Self::InfrastructureFault {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether the error came from the remote side rather than local state or configuration.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::InfrastructureFault { .. } | Self::RemoteCommandFailed { .. }
        )
    }
}

impl From<LayoutError> for SyncError {
    fn from(e: LayoutError) -> Self {
        let (path, source) = e.into_parts();
        Self::PreconditionViolation { path, source }
    }
}
