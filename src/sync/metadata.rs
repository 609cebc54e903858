//! Repository metadata regeneration (`createrepo`).

use crate::error::{RemoteOp, SyncError};
use crate::remote::{RemoteSession, command_line};

/// Program run on the remote host to rebuild a directory's `repodata/`.
pub const CREATEREPO: &str = "createrepo";

/// Regenerate the package index rooted at `dir`.
///
/// Call once per leaf directory, after its last upload of the run.
pub fn refresh_metadata<S: RemoteSession + ?Sized>(
    session: &mut S,
    dir: &str,
) -> Result<(), SyncError> {
    tracing::info!(dir, "refreshing repository metadata");
    let argv = [CREATEREPO, dir];
    let output = session
        .exec(&argv)
        .map_err(|e| SyncError::fault(RemoteOp::Exec, dir, e))?;

    if !output.success() {
        return Err(SyncError::RemoteCommandFailed {
            command: command_line(&argv),
            status: output.exit_status,
            stderr: output.diagnostics(),
        });
    }
    if !output.stdout.trim().is_empty() {
        tracing::debug!(dir, output = %output.stdout.trim(), "createrepo output");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{Entry, MemoryRemote};
    use crate::remote::{ConnectionContext, Connector};

    fn ctx() -> ConnectionContext {
        ConnectionContext {
            host: "repo".into(),
            port: 22,
            username: "u".into(),
            remote_path: "/srv/repo".into(),
            identity_file: None,
        }
    }

    #[test]
    fn test_refresh_runs_createrepo_on_dir() {
        let remote = MemoryRemote::new();
        remote.insert_dir("/srv");
        let mut s = remote.connect(&ctx()).unwrap();
        refresh_metadata(&mut s, "/srv").unwrap();
        assert_eq!(
            remote.commands(),
            vec![vec!["createrepo".to_string(), "/srv".to_string()]]
        );
        assert_eq!(remote.entry("/srv/repodata"), Some(Entry::Dir));
    }

    #[test]
    fn test_refresh_failure_propagates() {
        let remote = MemoryRemote::new();
        remote.insert_dir("/srv");
        remote.fail_command(CREATEREPO, 2);
        let mut s = remote.connect(&ctx()).unwrap();
        let err = refresh_metadata(&mut s, "/srv").unwrap_err();
        match err {
            SyncError::RemoteCommandFailed { command, status, .. } => {
                assert_eq!(command, "createrepo /srv");
                assert_eq!(status, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
