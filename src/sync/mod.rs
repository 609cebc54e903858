//! Repository synchronization engine.
//!
//! - **directory**: idempotent remote `mkdir -p` behind a stat probe
//! - **upload**: per-file staleness check and conditional transfer
//! - **metadata**: `createrepo` once a leaf directory is complete
//! - **orchestrator**: OS × version × arch traversal, then the SRPMS pass
//!
//! Everything runs sequentially over one session; a fault aborts the run and
//! a re-run from scratch is the recovery path.
//!
//! # Example
//!
//! ```rust,ignore
//! use rpm_mirror::remote::SshConnector;
//! use rpm_mirror::sync::SyncOrchestrator;
//!
//! let outcome = SyncOrchestrator::new(&layout, SshConnector).run(config.connection.as_ref())?;
//! println!("uploaded {} files", outcome.files_uploaded);
//! ```

pub mod directory;
pub mod metadata;
pub mod orchestrator;
pub mod upload;

pub use directory::{DirectoryStatus, ensure_directory};
pub use metadata::refresh_metadata;
pub use orchestrator::{SyncFault, SyncOrchestrator, SyncOutcome, SyncPhase};
pub use upload::{LocalArtifact, UploadDecision, UploadReason, sync_file};
