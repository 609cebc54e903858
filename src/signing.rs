//! Package signing.
//!
//! Each artifact class is signed in one batch by an external signer program:
//!
//! ```text
//! <signer> <passphrase> <file>...
//! ```
//!
//! Only the exit status is observed. A non-zero exit means *some* files in
//! the batch may be unsigned; which ones cannot be told from here, so the
//! result is reported rather than raised.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::layout::{ArtifactClass, ArtifactLayout, LayoutError};

/// Default signer program, looked up on `PATH`.
pub const DEFAULT_SIGNER: &str = "sign-rpms";

/// GPG passphrase handed to the signer. Wiped from memory on drop.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SigningSecret(String);

impl SigningSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(***)")
    }
}

#[derive(Error, Debug)]
pub enum SignError {
    #[error("No GPG passphrase configured; set signing.passphrase in the config file")]
    MissingCredential,

    #[error("Failed to run signer {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot collect {label} to sign: {source}", label = .class.label())]
    Collect {
        class: ArtifactClass,
        #[source]
        source: LayoutError,
    },
}

/// Which batches to sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SignTarget {
    Rpms,
    Srpms,
    All,
}

impl SignTarget {
    /// Batches in the order they are signed.
    pub fn classes(self) -> &'static [ArtifactClass] {
        match self {
            Self::Rpms => &[ArtifactClass::Rpms],
            Self::Srpms => &[ArtifactClass::Srpms],
            Self::All => &[ArtifactClass::Rpms, ArtifactClass::Srpms],
        }
    }
}

/// Aggregate outcome of one signing batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignResult {
    pub class: ArtifactClass,
    pub success: bool,
    /// Number of files handed to the signer.
    pub files: usize,
}

impl SignResult {
    pub fn message(&self) -> String {
        let label = self.class.label();
        if self.success {
            format!("All {label} successfully signed!")
        } else {
            format!("An error occurred, some {label} may not be signed, check your passphrase")
        }
    }
}

/// Runs the signer over one batch and reports whether it exited zero.
pub trait SignerProcess {
    fn run(&self, secret: &SigningSecret, artifacts: &[PathBuf]) -> Result<bool, SignError>;
}

/// Signer executed as a child process with an argument vector.
#[derive(Debug, Clone)]
pub struct ExternalSigner {
    program: PathBuf,
}

impl ExternalSigner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for ExternalSigner {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNER)
    }
}

impl SignerProcess for ExternalSigner {
    fn run(&self, secret: &SigningSecret, artifacts: &[PathBuf]) -> Result<bool, SignError> {
        let output = Command::new(&self.program)
            .arg(secret.expose())
            .args(artifacts)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| SignError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        tracing::debug!(
            program = %self.program.display(),
            status = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "signer finished"
        );
        Ok(output.status.success())
    }
}

/// Signs artifact batches found under a layout.
pub struct SigningPipeline<'a, S: SignerProcess> {
    layout: &'a ArtifactLayout,
    signer: S,
}

impl<'a, S: SignerProcess> SigningPipeline<'a, S> {
    pub fn new(layout: &'a ArtifactLayout, signer: S) -> Self {
        Self { layout, signer }
    }

    /// Sign one artifact class.
    ///
    /// An empty secret fails before anything is spawned. A batch with no
    /// matching files succeeds without invoking the signer.
    pub fn sign(
        &self,
        secret: Option<&SigningSecret>,
        class: ArtifactClass,
    ) -> Result<SignResult, SignError> {
        let secret = match secret {
            Some(s) if !s.is_empty() => s,
            _ => return Err(SignError::MissingCredential),
        };

        let artifacts = self
            .layout
            .local_artifacts(class)
            .map_err(|source| SignError::Collect { class, source })?;
        if artifacts.is_empty() {
            tracing::info!(class = class.label(), "no artifacts to sign");
            return Ok(SignResult {
                class,
                success: true,
                files: 0,
            });
        }

        tracing::info!(class = class.label(), files = artifacts.len(), "signing batch");
        let success = self.signer.run(secret, &artifacts)?;
        let result = SignResult {
            class,
            success,
            files: artifacts.len(),
        };
        if success {
            tracing::info!(class = class.label(), "{}", result.message());
        } else {
            tracing::warn!(class = class.label(), "{}", result.message());
        }
        Ok(result)
    }

    /// Sign every batch of `target` in order.
    ///
    /// The credential is checked once up front so no batch runs when it is missing.
    pub fn sign_all(
        &self,
        secret: Option<&SigningSecret>,
        target: SignTarget,
    ) -> Result<Vec<SignResult>, SignError> {
        if secret.is_none_or(SigningSecret::is_empty) {
            return Err(SignError::MissingCredential);
        }
        target
            .classes()
            .iter()
            .map(|&class| self.sign(secret, class))
            .collect()
    }
}
