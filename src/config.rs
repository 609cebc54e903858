//! Configuration file for rpm-mirror.
//!
//! Lives at `~/.config/rpm-mirror/config.toml` by default (platform config
//! dir), or wherever `--config` / `RPM_MIRROR_CONFIG` point.
//!
//! # Example
//!
//! ```toml
//! [connection]
//! host = "repo.example.org"
//! username = "builder"
//! remote_path = "/srv/repo"
//!
//! [signing]
//! passphrase = "env:RPM_GPG_PASSPHRASE"
//!
//! [layout]
//! top_dir = "build/topdir"
//! arches = ["i386", "x86_64"]
//! default_os = { name = "fedora", version = "11" }
//!
//! [[layout.os]]
//! name = "fedora"
//! versions = ["11", "rawhide"]
//! ```
//!
//! The file holds a passphrase, so on Unix it must be mode `0600`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::{ArtifactLayout, OsRelease, OsVersion};
use crate::remote::ConnectionContext;
use crate::signing::{DEFAULT_SIGNER, SigningSecret};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "RPM_MIRROR_CONFIG";

/// Required permission bits for the config file.
pub const SECURE_MODE: u32 = 0o600;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(
        "Configuration file ({}) has wrong permissions ({mode:o}), please correct it, run: 'chmod 600 {}'",
        path.display(),
        path.display()
    )]
    InsecurePermissions { path: PathBuf, mode: u32 },

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MirrorConfig {
    /// Remote repository host. Absent means uploads are impossible.
    #[serde(default)]
    pub connection: Option<ConnectionContext>,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// GPG passphrase; `env:VAR` reads it from the environment.
    pub passphrase: Option<SigningSecret>,
    pub signer: PathBuf,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            passphrase: None,
            signer: PathBuf::from(DEFAULT_SIGNER),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Root of the local build tree (`{top_dir}/{os}/{version}/RPMS/...`).
    pub top_dir: PathBuf,
    /// Built architectures; `noarch` is always added.
    pub arches: Vec<String>,
    /// Release whose SRPMS directory is mirrored.
    pub default_os: OsVersion,
    pub os: Vec<OsRelease>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            top_dir: PathBuf::from("build/topdir"),
            arches: vec!["i386".into(), "x86_64".into()],
            default_os: OsVersion {
                name: "fedora".into(),
                version: "11".into(),
            },
            os: vec![OsRelease {
                name: "fedora".into(),
                versions: vec!["11".into()],
            }],
        }
    }
}

/// Outcome of [`MirrorConfig::validate`].
#[derive(Debug, Default, Serialize)]
pub struct ConfigValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Default config path under the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "rpm-mirror", "rpm-mirror")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Pick the config file: explicit flag, then `RPM_MIRROR_CONFIG`, then the default.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit
        .or_else(|| dotenvy::var(CONFIG_ENV).ok().map(PathBuf::from))
        .or_else(default_config_path)
}

impl MirrorConfig {
    /// Load and validate a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        check_permissions(path)?;

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.resolve_env_vars()?;

        let validation = config.validate();
        for warning in &validation.warnings {
            tracing::warn!(path = %path.display(), "{warning}");
        }
        if !validation.is_valid() {
            return Err(ConfigError::Validation(validation.errors));
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Replace `env:VAR` references with the variable's value.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(secret) = &self.signing.passphrase
            && let Some(var) = secret.expose().strip_prefix("env:")
        {
            let value =
                dotenvy::var(var).map_err(|_| ConfigError::EnvVarNotFound(var.to_string()))?;
            self.signing.passphrase = Some(SigningSecret::new(value));
        }
        if let Some(conn) = &mut self.connection
            && let Some(key) = &conn.identity_file
        {
            conn.identity_file = Some(expand_tilde(key));
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigValidation {
        let mut result = ConfigValidation::default();
        let layout = &self.layout;

        if layout.os.is_empty() || layout.os.iter().all(|os| os.versions.is_empty()) {
            result
                .errors
                .push("layout.os must declare at least one OS with one version".into());
        }
        if layout.arches.is_empty() {
            result.errors.push("layout.arches must not be empty".into());
        }
        let default_declared = layout.os.iter().any(|os| {
            os.name == layout.default_os.name && os.versions.contains(&layout.default_os.version)
        });
        if !default_declared {
            result.errors.push(format!(
                "layout.default_os {} is not a declared os/version",
                layout.default_os
            ));
        }

        match &self.connection {
            Some(conn) => {
                for (field, value) in [
                    ("host", &conn.host),
                    ("username", &conn.username),
                    ("remote_path", &conn.remote_path),
                ] {
                    if value.trim().is_empty() {
                        result
                            .errors
                            .push(format!("connection.{field} must not be empty"));
                    }
                }
            }
            None => result
                .warnings
                .push("no [connection] section; uploads are disabled".into()),
        }

        if self.signing_secret().is_none() {
            result
                .warnings
                .push("no signing.passphrase; packages cannot be signed".into());
        }
        result
    }

    /// The signing passphrase, if one is configured and non-empty.
    pub fn signing_secret(&self) -> Option<&SigningSecret> {
        self.signing.passphrase.as_ref().filter(|s| !s.is_empty())
    }

    pub fn artifact_layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(
            self.layout.top_dir.clone(),
            self.layout.os.clone(),
            self.layout.arches.clone(),
            self.layout.default_os.clone(),
        )
    }
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let mode = meta.permissions().mode() & 0o777;
    if mode != SECURE_MODE {
        return Err(ConfigError::InsecurePermissions {
            path: path.to_path_buf(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
