//! Repository layout: the OS × version × architecture matrix and the fixed
//! path conventions shared by the local build tree and the remote repository.
//!
//! ```text
//! local:  {top_dir}/{os}/{version}/RPMS/{arch}/*.rpm
//! remote: {remote_path}/{os}/{version}/RPMS/{arch}/
//!
//! local:  {top_dir}/{default_os}/{default_version}/SRPMS/*.src.rpm
//! remote: {remote_path}/SRPMS/
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Synthetic architecture appended to every configured arch list.
pub const NOARCH: &str = "noarch";

/// Directory holding binary packages, one subdirectory per architecture.
pub const RPMS_DIR: &str = "RPMS";

/// Single shared directory holding source packages.
pub const SRPMS_DIR: &str = "SRPMS";

/// Local build tree problems found while enumerating artifacts.
///
/// A directory that does not exist is not an error; it simply holds nothing.
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Artifact name {} is not valid UTF-8", path.display())]
    NonUtf8 { path: PathBuf },

    #[error("Invalid artifact pattern for {}: {source}", path.display())]
    Pattern {
        path: PathBuf,
        #[source]
        source: glob::PatternError,
    },
}

impl LayoutError {
    /// The local path the error is about.
    pub fn path(&self) -> &Path {
        match self {
            Self::Unreadable { path, .. } | Self::NonUtf8 { path } | Self::Pattern { path, .. } => {
                path
            }
        }
    }

    /// Split into the offending path and an I/O error describing the problem.
    pub fn into_parts(self) -> (PathBuf, io::Error) {
        match self {
            Self::Unreadable { path, source } => (path, source),
            Self::NonUtf8 { path } => (
                path,
                io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8"),
            ),
            Self::Pattern { path, source } => {
                (path, io::Error::new(io::ErrorKind::InvalidInput, source))
            }
        }
    }
}

/// An operating system and the versions built for it, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRelease {
    pub name: String,
    pub versions: Vec<String>,
}

/// One (os, version) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsVersion {
    pub name: String,
    pub version: String,
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// Which class of artifact a directory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactClass {
    Rpms,
    Srpms,
}

impl ArtifactClass {
    /// File name pattern for artifacts of this class.
    pub fn pattern(self) -> &'static str {
        match self {
            Self::Rpms => "*.rpm",
            Self::Srpms => "*.src.rpm",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Rpms => "RPMs",
            Self::Srpms => "SRPMs",
        }
    }
}

/// A local directory paired with the remote directory it mirrors into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeafDir {
    pub os: String,
    pub version: String,
    pub arch: String,
    pub class: ArtifactClass,
    pub local_dir: PathBuf,
    pub remote_dir: String,
}

impl LeafDir {
    /// Local artifacts in this leaf, sorted by path.
    ///
    /// A missing local directory yields an empty list; the build may simply
    /// not have produced anything for this triple. A directory that exists
    /// but cannot be listed is an error.
    pub fn local_artifacts(&self) -> Result<Vec<PathBuf>, LayoutError> {
        artifacts_in(&self.local_dir, self.class)
    }

    /// Remote path for a local artifact placed in this leaf.
    pub fn remote_file(&self, local: &Path) -> Result<String, LayoutError> {
        let name = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| LayoutError::NonUtf8 {
                path: local.to_path_buf(),
            })?;
        Ok(remote_join(&self.remote_dir, &[name]))
    }
}

/// Immutable description of the artifact matrix for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    top_dir: PathBuf,
    oses: Vec<OsRelease>,
    arches: Vec<String>,
    default_os: OsVersion,
}

impl ArtifactLayout {
    /// Build a layout. `noarch` is appended to `arches` unless already present.
    pub fn new(
        top_dir: impl Into<PathBuf>,
        oses: Vec<OsRelease>,
        arches: Vec<String>,
        default_os: OsVersion,
    ) -> Self {
        let mut arches = arches;
        if !arches.iter().any(|a| a == NOARCH) {
            arches.push(NOARCH.to_string());
        }
        Self {
            top_dir: top_dir.into(),
            oses,
            arches,
            default_os,
        }
    }

    pub fn top_dir(&self) -> &Path {
        &self.top_dir
    }

    pub fn oses(&self) -> &[OsRelease] {
        &self.oses
    }

    /// Architectures including `noarch`.
    pub fn arches(&self) -> &[String] {
        &self.arches
    }

    pub fn default_os(&self) -> &OsVersion {
        &self.default_os
    }

    /// Every (os, version) pair in declaration order.
    pub fn os_versions(&self) -> impl Iterator<Item = OsVersion> + '_ {
        self.oses.iter().flat_map(|os| {
            os.versions.iter().map(move |v| OsVersion {
                name: os.name.clone(),
                version: v.clone(),
            })
        })
    }

    /// Local directory for one (os, version, arch) triple.
    pub fn local_rpm_dir(&self, os: &str, version: &str, arch: &str) -> PathBuf {
        self.top_dir.join(os).join(version).join(RPMS_DIR).join(arch)
    }

    /// Remote directory for one (os, version, arch) triple.
    pub fn remote_rpm_dir(&self, remote_root: &str, os: &str, version: &str, arch: &str) -> String {
        remote_join(remote_root, &[os, version, RPMS_DIR, arch])
    }

    /// Local SRPMS directory, scoped by the default os/version.
    pub fn local_srpm_dir(&self) -> PathBuf {
        self.top_dir
            .join(&self.default_os.name)
            .join(&self.default_os.version)
            .join(SRPMS_DIR)
    }

    pub fn remote_srpm_dir(&self, remote_root: &str) -> String {
        remote_join(remote_root, &[SRPMS_DIR])
    }

    /// Binary package leaves: for each (os, version) in order, every arch in order.
    pub fn rpm_leaves(&self, remote_root: &str) -> Vec<LeafDir> {
        self.os_versions()
            .flat_map(|ov| {
                self.arches
                    .iter()
                    .map(|arch| LeafDir {
                        local_dir: self.local_rpm_dir(&ov.name, &ov.version, arch),
                        remote_dir: self.remote_rpm_dir(remote_root, &ov.name, &ov.version, arch),
                        os: ov.name.clone(),
                        version: ov.version.clone(),
                        arch: arch.clone(),
                        class: ArtifactClass::Rpms,
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// The single shared SRPMS leaf.
    pub fn srpm_leaf(&self, remote_root: &str) -> LeafDir {
        LeafDir {
            os: self.default_os.name.clone(),
            version: self.default_os.version.clone(),
            arch: SRPMS_DIR.to_string(),
            class: ArtifactClass::Srpms,
            local_dir: self.local_srpm_dir(),
            remote_dir: self.remote_srpm_dir(remote_root),
        }
    }

    /// All local artifacts of a class, as handed to the signer.
    ///
    /// Binary packages are collected across every leaf of the matrix; source
    /// packages come from the shared SRPMS directory.
    pub fn local_artifacts(&self, class: ArtifactClass) -> Result<Vec<PathBuf>, LayoutError> {
        match class {
            ArtifactClass::Srpms => artifacts_in(&self.local_srpm_dir(), class),
            ArtifactClass::Rpms => {
                let mut all = Vec::new();
                for leaf in self.rpm_leaves("") {
                    all.extend(leaf.local_artifacts()?);
                }
                Ok(all)
            }
        }
    }
}

/// Join remote path segments with `/`, tolerating trailing slashes on the root.
pub fn remote_join(root: &str, segments: &[&str]) -> String {
    let mut out = root.trim_end_matches('/').to_string();
    for seg in segments {
        let seg = seg.trim_matches('/');
        if seg.is_empty() {
            continue;
        }
        out.push('/');
        out.push_str(seg);
    }
    if out.is_empty() { "/".to_string() } else { out }
}

fn artifacts_in(dir: &Path, class: ArtifactClass) -> Result<Vec<PathBuf>, LayoutError> {
    let pattern = glob::Pattern::new(class.pattern()).map_err(|source| LayoutError::Pattern {
        path: dir.to_path_buf(),
        source,
    })?;
    let unreadable = |path: &Path, source: io::Error| LayoutError::Unreadable {
        path: path.to_path_buf(),
        source,
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(unreadable(dir, e)),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| unreadable(dir, e))?;
        let path = entry.path();
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            if pattern.matches(&name.to_string_lossy()) {
                return Err(LayoutError::NonUtf8 { path });
            }
            continue;
        };
        if !pattern.matches(name) {
            continue;
        }
        let meta = fs::metadata(&path).map_err(|e| unreadable(&path, e))?;
        if meta.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
