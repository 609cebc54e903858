//! Drives one full repository sync over a single remote session.
//!
//! ```text
//! Connecting → EnsuringRemoteRoot → PerArchSync(os, version, arch)* → SrpmSync
//!            → Disconnecting → Done
//! ```
//!
//! Any fault moves the run to `Faulted`. The session is closed on both paths.

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::error::SyncError;
use crate::layout::{ArtifactLayout, LeafDir};
use crate::remote::{ConnectionContext, Connector, RemoteSession};

use super::directory::{DirectoryStatus, ensure_directory};
use super::metadata::refresh_metadata;
use super::upload::sync_file;

/// Where the run is, or was when it stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SyncPhase {
    Connecting,
    EnsuringRemoteRoot,
    PerArchSync {
        os: String,
        version: String,
        arch: String,
    },
    SrpmSync,
    Disconnecting,
    Done,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::EnsuringRemoteRoot => write!(f, "ensuring remote root"),
            Self::PerArchSync { os, version, arch } => write!(f, "syncing {os}/{version}/{arch}"),
            Self::SrpmSync => write!(f, "syncing SRPMS"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub directories_created: u64,
    pub files_uploaded: u64,
    pub files_skipped: u64,
    pub bytes_uploaded: u64,
    pub metadata_refreshes: u64,
    pub duration_ms: u64,
}

/// Terminal fault of a run, with what had been done up to that point.
#[derive(Error, Debug)]
#[error("Sync failed while {phase}: {error}")]
pub struct SyncFault {
    pub phase: SyncPhase,
    #[source]
    pub error: SyncError,
    pub partial: SyncOutcome,
}

/// Mirrors the local build tree into the remote repository.
pub struct SyncOrchestrator<'a, C: Connector> {
    layout: &'a ArtifactLayout,
    connector: C,
    phase: SyncPhase,
    outcome: SyncOutcome,
}

impl<'a, C: Connector> SyncOrchestrator<'a, C> {
    pub fn new(layout: &'a ArtifactLayout, connector: C) -> Self {
        Self {
            layout,
            connector,
            phase: SyncPhase::Connecting,
            outcome: SyncOutcome::default(),
        }
    }

    /// Run the whole sync.
    ///
    /// Without connection details nothing is attempted on the network.
    pub fn run(mut self, ctx: Option<&ConnectionContext>) -> Result<SyncOutcome, SyncFault> {
        let start = Instant::now();

        let Some(ctx) = ctx else {
            return Err(self.fault(SyncError::MissingConfiguration(
                "connection details (host, username, remote_path)".into(),
            )));
        };

        tracing::info!(target_repo = %ctx, "connecting to remote server");
        let mut session = match self.connector.connect(ctx) {
            Ok(s) => s,
            Err(e) => {
                return Err(self.fault(SyncError::fault(
                    crate::error::RemoteOp::Connect,
                    ctx.host.as_str(),
                    e,
                )));
            }
        };

        let result = self.sync_all(&mut session, &ctx.remote_path);

        let failed_phase = self.phase.clone();
        self.phase = SyncPhase::Disconnecting;
        tracing::info!("disconnecting from remote server");
        if let Err(e) = session.close() {
            tracing::warn!(error = %e, "failed to close remote session cleanly");
        }

        self.outcome.duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                self.phase = SyncPhase::Done;
                Ok(self.outcome)
            }
            Err(error) => {
                self.phase = failed_phase;
                Err(self.fault(error))
            }
        }
    }

    fn sync_all(&mut self, session: &mut C::Session, remote_root: &str) -> Result<(), SyncError> {
        self.phase = SyncPhase::EnsuringRemoteRoot;
        self.ensure(session, remote_root)?;

        for leaf in self.layout.rpm_leaves(remote_root) {
            self.phase = SyncPhase::PerArchSync {
                os: leaf.os.clone(),
                version: leaf.version.clone(),
                arch: leaf.arch.clone(),
            };
            self.sync_leaf(session, &leaf)?;
        }

        self.phase = SyncPhase::SrpmSync;
        let srpms = self.layout.srpm_leaf(remote_root);
        self.sync_leaf(session, &srpms)
    }

    /// ensure → upload every artifact → refresh, for one leaf directory.
    fn sync_leaf(&mut self, session: &mut C::Session, leaf: &LeafDir) -> Result<(), SyncError> {
        self.ensure(session, &leaf.remote_dir)?;

        let artifacts = leaf.local_artifacts()?;

        for local in &artifacts {
            let remote = leaf.remote_file(local)?;
            let decision = sync_file(session, local, &remote)?;
            if decision.transferred {
                self.outcome.files_uploaded += 1;
                self.outcome.bytes_uploaded += decision.bytes;
            } else {
                self.outcome.files_skipped += 1;
            }
        }

        refresh_metadata(session, &leaf.remote_dir)?;
        self.outcome.metadata_refreshes += 1;
        Ok(())
    }

    fn ensure(&mut self, session: &mut C::Session, path: &str) -> Result<(), SyncError> {
        if ensure_directory(session, path)? == DirectoryStatus::Created {
            self.outcome.directories_created += 1;
        }
        Ok(())
    }

    fn fault(&self, error: SyncError) -> SyncFault {
        tracing::error!(phase = %self.phase, error = %error, "sync faulted");
        SyncFault {
            phase: self.phase.clone(),
            error,
            partial: self.outcome.clone(),
        }
    }
}
