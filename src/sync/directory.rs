//! Idempotent remote directory creation.
//!
//! SFTP has no "create if missing", so this probes with a stat and only then
//! runs `mkdir -p`. Any existing entry counts, even a plain file; a file in
//! the way surfaces later when an upload into it fails.

use crate::error::{RemoteOp, SyncError};
use crate::remote::{RemoteSession, RemoteStat, command_line};

/// What [`ensure_directory`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryStatus {
    Existing,
    Created,
}

/// Make sure `path` exists on the remote, creating intermediate segments.
pub fn ensure_directory<S: RemoteSession + ?Sized>(
    session: &mut S,
    path: &str,
) -> Result<DirectoryStatus, SyncError> {
    match session
        .stat(path)
        .map_err(|e| SyncError::fault(RemoteOp::Stat, path, e))?
    {
        RemoteStat::Present(_) => {
            tracing::debug!(path, "remote directory exists");
            Ok(DirectoryStatus::Existing)
        }
        RemoteStat::Absent => {
            let argv = ["mkdir", "-p", path];
            let output = session
                .exec(&argv)
                .map_err(|e| SyncError::fault(RemoteOp::Exec, path, e))?;
            if !output.success() {
                return Err(SyncError::RemoteCommandFailed {
                    command: command_line(&argv),
                    status: output.exit_status,
                    stderr: output.diagnostics(),
                });
            }
            tracing::info!(path, "created remote directory");
            Ok(DirectoryStatus::Created)
        }
    }
}
