//! In-memory remote host for tests.
//!
//! [`MemoryRemote`] is both the [`Connector`] and a handle onto the shared
//! remote state, so a test can seed the remote tree, hand the connector to
//! the orchestrator and inspect the journal afterwards.
//!
//! Understands two commands: `mkdir -p <path>` and `createrepo <path>`.
//! Anything else exits 127.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    CommandOutput, ConnectionContext, Connector, RemoteArtifactDescriptor, RemoteError,
    RemoteSession, RemoteStat, SFTP_NO_SUCH_FILE,
};

/// Mode given to freshly uploaded files before any setstat, like a 077 umask.
pub const UPLOAD_MODE: u32 = 0o600;

/// A node in the remote tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Dir,
    File { size: u64, mtime: u64, mode: u32 },
}

/// One call made against the remote, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Connect,
    Stat(String),
    Upload { local: PathBuf, remote: String },
    SetPermissions(String, u32),
    Exec(Vec<String>),
    Close,
}

#[derive(Debug, Default)]
struct RemoteState {
    entries: BTreeMap<String, Entry>,
    clock: u64,
    journal: Vec<RemoteCall>,
    stat_faults: HashMap<String, i32>,
    failing_commands: HashMap<String, i32>,
    refuse_connect: bool,
}

/// Shared in-memory remote filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seconds-since-epoch stamped on uploaded files.
    pub fn set_clock(&self, now: u64) {
        self.lock().clock = now;
    }

    pub fn insert_dir(&self, path: &str) {
        self.lock().entries.insert(normalize(path), Entry::Dir);
    }

    pub fn insert_file(&self, path: &str, size: u64, mtime: u64) {
        self.lock().entries.insert(
            normalize(path),
            Entry::File {
                size,
                mtime,
                mode: 0o644,
            },
        );
    }

    pub fn entry(&self, path: &str) -> Option<Entry> {
        self.lock().entries.get(&normalize(path)).copied()
    }

    /// Make stats of `path` fail with the given SFTP status code.
    pub fn fail_stat(&self, path: &str, code: i32) {
        self.lock().stat_faults.insert(normalize(path), code);
    }

    /// Make every invocation of `program` exit with `status`.
    pub fn fail_command(&self, program: &str, status: i32) {
        self.lock()
            .failing_commands
            .insert(program.to_string(), status);
    }

    pub fn refuse_connections(&self) {
        self.lock().refuse_connect = true;
    }

    pub fn journal(&self) -> Vec<RemoteCall> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Remote paths uploaded to, in order.
    pub fn uploads(&self) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter_map(|c| match c {
                RemoteCall::Upload { remote, .. } => Some(remote.clone()),
                _ => None,
            })
            .collect()
    }

    /// Commands executed, in order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.lock()
            .journal
            .iter()
            .filter_map(|c| match c {
                RemoteCall::Exec(argv) => Some(argv.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&RemoteCall) -> bool) -> usize {
        self.lock().journal.iter().filter(|c| pred(c)).count()
    }
}

impl Connector for MemoryRemote {
    type Session = MemorySession;

    fn connect(&self, ctx: &ConnectionContext) -> Result<MemorySession, RemoteError> {
        let mut state = self.lock();
        state.journal.push(RemoteCall::Connect);
        if state.refuse_connect {
            return Err(RemoteError::Connect {
                host: ctx.host.clone(),
                reason: "connection refused".into(),
            });
        }
        Ok(MemorySession {
            remote: self.clone(),
        })
    }
}

/// Session onto a [`MemoryRemote`].
#[derive(Debug)]
pub struct MemorySession {
    remote: MemoryRemote,
}

impl RemoteSession for MemorySession {
    fn stat(&mut self, path: &str) -> Result<RemoteStat, RemoteError> {
        let path = normalize(path);
        let mut state = self.remote.lock();
        state.journal.push(RemoteCall::Stat(path.clone()));

        if let Some(&code) = state.stat_faults.get(&path) {
            return Err(RemoteError::Sftp {
                code,
                message: "injected stat failure".into(),
            });
        }
        Ok(match state.entries.get(&path) {
            None => RemoteStat::Absent,
            Some(Entry::Dir) => RemoteStat::Present(RemoteArtifactDescriptor {
                mtime: 0,
                size: 4096,
            }),
            Some(Entry::File { size, mtime, .. }) => {
                RemoteStat::Present(RemoteArtifactDescriptor {
                    mtime: *mtime,
                    size: *size,
                })
            }
        })
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, RemoteError> {
        let remote = normalize(remote);
        let size = std::fs::metadata(local)?.len();
        let mut state = self.remote.lock();
        state.journal.push(RemoteCall::Upload {
            local: local.to_path_buf(),
            remote: remote.clone(),
        });

        if state.entries.get(parent(&remote)) != Some(&Entry::Dir) {
            return Err(RemoteError::Sftp {
                code: SFTP_NO_SUCH_FILE,
                message: format!("no such directory for {remote}"),
            });
        }
        let mtime = state.clock;
        state.entries.insert(
            remote,
            Entry::File {
                size,
                mtime,
                mode: UPLOAD_MODE,
            },
        );
        Ok(size)
    }

    fn set_permissions(&mut self, path: &str, mode: u32) -> Result<(), RemoteError> {
        let path = normalize(path);
        let mut state = self.remote.lock();
        state
            .journal
            .push(RemoteCall::SetPermissions(path.clone(), mode));
        match state.entries.get_mut(&path) {
            Some(Entry::File { mode: m, .. }) => {
                *m = mode;
                Ok(())
            }
            Some(Entry::Dir) => Ok(()),
            None => Err(RemoteError::Sftp {
                code: SFTP_NO_SUCH_FILE,
                message: format!("no such file {path}"),
            }),
        }
    }

    fn exec(&mut self, argv: &[&str]) -> Result<CommandOutput, RemoteError> {
        let mut state = self.remote.lock();
        state
            .journal
            .push(RemoteCall::Exec(argv.iter().map(|s| s.to_string()).collect()));

        let program = argv.first().copied().unwrap_or_default();
        if let Some(&status) = state.failing_commands.get(program) {
            return Ok(CommandOutput {
                exit_status: status,
                stderr: format!("{program}: injected failure"),
                ..Default::default()
            });
        }

        match argv {
            ["mkdir", "-p", path] => Ok(mkdir_p(&mut state.entries, path)),
            ["createrepo", path] => {
                let dir = normalize(path);
                if state.entries.get(&dir) != Some(&Entry::Dir) {
                    return Ok(failed(1, format!("Directory {dir} must exist")));
                }
                state.entries.insert(format!("{dir}/repodata"), Entry::Dir);
                Ok(CommandOutput::default())
            }
            _ => Ok(failed(127, format!("{program}: command not found"))),
        }
    }

    fn close(&mut self) -> Result<(), RemoteError> {
        self.remote.lock().journal.push(RemoteCall::Close);
        Ok(())
    }
}

fn mkdir_p(entries: &mut BTreeMap<String, Entry>, path: &str) -> CommandOutput {
    let path = normalize(path);
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        match entries.get(&current) {
            Some(Entry::Dir) => {}
            Some(Entry::File { .. }) => {
                return failed(1, format!("mkdir: cannot create directory '{current}': File exists"));
            }
            None => {
                entries.insert(current.clone(), Entry::Dir);
            }
        }
    }
    CommandOutput::default()
}

fn failed(exit_status: i32, stderr: String) -> CommandOutput {
    CommandOutput {
        exit_status,
        stdout: String::new(),
        stderr,
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => "/",
    }
}
