//! Differential upload of single artifacts.
//!
//! The staleness rule is a size + mtime heuristic, not a content hash:
//!
//! ```text
//! transfer  iff  remote absent
//!            or  local.mtime > remote.mtime
//!            or  local.size != remote.size
//! ```
//!
//! Two different files with the same size where the remote copy is not
//! older than the local one are treated as identical.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::error::{RemoteOp, SyncError};
use crate::remote::{ARTIFACT_MODE, RemoteArtifactDescriptor, RemoteSession, RemoteStat};

/// Local file snapshot taken right before the upload decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    pub path: PathBuf,
    /// Modification time in whole seconds since the epoch.
    pub mtime: u64,
    pub size: u64,
}

impl LocalArtifact {
    /// Stat a local file. A missing file means the build output does not
    /// match the layout.
    pub fn probe(path: &Path) -> Result<Self, SyncError> {
        let precondition = |source| SyncError::PreconditionViolation {
            path: path.to_path_buf(),
            source,
        };
        let meta = std::fs::metadata(path).map_err(precondition)?;
        if !meta.is_file() {
            return Err(precondition(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        let mtime = meta
            .modified()
            .map_err(precondition)?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(Self {
            path: path.to_path_buf(),
            mtime,
            size: meta.len(),
        })
    }

    /// Whether `remote` should be replaced by this file.
    pub fn is_newer_than(&self, remote: &RemoteArtifactDescriptor) -> bool {
        self.mtime > remote.mtime || self.size != remote.size
    }
}

/// Why a file was or was not transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadReason {
    /// Nothing existed at the remote path.
    Absent,
    /// Remote copy was older or a different size.
    Stale,
    /// Remote copy looks current.
    UpToDate,
}

/// Result of [`sync_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDecision {
    pub transferred: bool,
    pub reason: UploadReason,
    pub bytes: u64,
    /// Remote state after the decision, when known.
    pub remote: Option<RemoteArtifactDescriptor>,
}

/// Bring one remote file up to date with its local counterpart.
pub fn sync_file<S: RemoteSession + ?Sized>(
    session: &mut S,
    local_path: &Path,
    remote_path: &str,
) -> Result<UploadDecision, SyncError> {
    let local = LocalArtifact::probe(local_path)?;

    let stat = session
        .stat(remote_path)
        .map_err(|e| SyncError::fault(RemoteOp::Stat, remote_path, e))?;

    match stat {
        RemoteStat::Absent => {
            let bytes = upload(session, &local, remote_path)?;
            let after = match session
                .stat(remote_path)
                .map_err(|e| SyncError::fault(RemoteOp::Stat, remote_path, e))?
            {
                RemoteStat::Present(d) => Some(d),
                RemoteStat::Absent => None,
            };
            tracing::debug!(remote = remote_path, after = ?after, "new remote artifact");
            Ok(UploadDecision {
                transferred: true,
                reason: UploadReason::Absent,
                bytes,
                remote: after,
            })
        }
        RemoteStat::Present(remote) if local.is_newer_than(&remote) => {
            let bytes = upload(session, &local, remote_path)?;
            Ok(UploadDecision {
                transferred: true,
                reason: UploadReason::Stale,
                bytes,
                remote: None,
            })
        }
        RemoteStat::Present(remote) => {
            tracing::debug!(
                file = %display_name(&local.path),
                "file exists and is same as local, skipping"
            );
            Ok(UploadDecision {
                transferred: false,
                reason: UploadReason::UpToDate,
                bytes: 0,
                remote: Some(remote),
            })
        }
    }
}

fn upload<S: RemoteSession + ?Sized>(
    session: &mut S,
    local: &LocalArtifact,
    remote_path: &str,
) -> Result<u64, SyncError> {
    tracing::info!(
        file = %display_name(&local.path),
        size_kb = local.size / 1024,
        remote = remote_path,
        "uploading"
    );
    let bytes = session
        .upload(&local.path, remote_path)
        .map_err(|e| SyncError::fault(RemoteOp::Upload, remote_path, e))?;
    session
        .set_permissions(remote_path, ARTIFACT_MODE)
        .map_err(|e| SyncError::fault(RemoteOp::SetPermissions, remote_path, e))?;
    Ok(bytes)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
