//! Shared fixtures for the integration tests: a local build tree on disk and
//! connection details pointing at the in-memory remote.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use rpm_mirror::layout::{ArtifactLayout, OsRelease, OsVersion};
use rpm_mirror::remote::ConnectionContext;
use tempfile::TempDir;

pub const REMOTE_ROOT: &str = "/srv/repo";

/// Fixed point in time used as "T" by the scenario tests.
pub const T: u64 = 1_700_000_000;

#[allow(dead_code)]
pub fn connection() -> ConnectionContext {
    ConnectionContext {
        host: "repo.example.org".into(),
        port: 22,
        username: "builder".into(),
        remote_path: REMOTE_ROOT.into(),
        identity_file: None,
    }
}

/// Local build tree for fedora 11 + 12, arches i386 and x86_64 (+ noarch).
pub struct BuildTree {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl BuildTree {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn top(&self) -> &Path {
        self.dir.path()
    }

    pub fn layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(
            self.top(),
            vec![OsRelease {
                name: "fedora".into(),
                versions: vec!["11".into(), "12".into()],
            }],
            vec!["i386".into(), "x86_64".into()],
            OsVersion {
                name: "fedora".into(),
                version: "11".into(),
            },
        )
    }

    /// Write a binary package of `size` bytes with modification time `mtime`.
    pub fn rpm(&self, version: &str, arch: &str, name: &str, size: usize, mtime: u64) -> PathBuf {
        let dir = self.top().join("fedora").join(version).join("RPMS").join(arch);
        write_artifact(&dir, name, size, mtime)
    }

    pub fn srpm(&self, name: &str, size: usize, mtime: u64) -> PathBuf {
        let dir = self.top().join("fedora/11/SRPMS");
        write_artifact(&dir, name, size, mtime)
    }
}

fn write_artifact(dir: &Path, name: &str, size: usize, mtime: u64) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, vec![0x42u8; size]).unwrap();
    set_mtime(&path, mtime);
    path
}

pub fn set_mtime(path: &Path, mtime: u64) {
    let file = fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(mtime))
        .unwrap();
}
