//! Sync engine tests against the in-memory remote.
//!
//! Covers the per-file staleness decisions, directory creation, metadata
//! refresh ordering and fault handling of a full run.

mod util;

use rpm_mirror::error::{RemoteOp, SyncError};
use rpm_mirror::layout::ArtifactClass;
use rpm_mirror::remote::memory::{Entry, MemoryRemote, RemoteCall};
use rpm_mirror::remote::{ARTIFACT_MODE, Connector};
use rpm_mirror::signing::{ExternalSigner, SignError, SigningPipeline, SigningSecret};
use rpm_mirror::sync::{SyncOrchestrator, SyncPhase, UploadReason, sync_file};
use util::{BuildTree, REMOTE_ROOT, T, connection};

const LEAF: &str = "/srv/repo/fedora/11/RPMS/x86_64";
const REMOTE_PKG: &str = "/srv/repo/fedora/11/RPMS/x86_64/pkg-1.0.rpm";

fn remote_with_leaf() -> MemoryRemote {
    let remote = MemoryRemote::new();
    remote.insert_dir("/srv");
    remote.insert_dir(REMOTE_ROOT);
    remote.insert_dir("/srv/repo/fedora");
    remote.insert_dir("/srv/repo/fedora/11");
    remote.insert_dir("/srv/repo/fedora/11/RPMS");
    remote.insert_dir(LEAF);
    remote
}

// =============================================================================
// Single-file decisions
// =============================================================================

#[test]
fn absent_remote_is_uploaded_with_matching_size() {
    let tree = BuildTree::new();
    let local = tree.rpm("11", "x86_64", "pkg-1.0.rpm", 1000, T);
    let remote = remote_with_leaf();
    remote.set_clock(T + 5);
    let mut session = remote.connect(&connection()).unwrap();

    let decision = sync_file(&mut session, &local, REMOTE_PKG).unwrap();

    assert!(decision.transferred);
    assert_eq!(decision.reason, UploadReason::Absent);
    assert_eq!(decision.bytes, 1000);
    assert_eq!(decision.remote.map(|d| d.size), Some(1000));
    assert_eq!(
        remote.entry(REMOTE_PKG),
        Some(Entry::File {
            size: 1000,
            mtime: T + 5,
            mode: ARTIFACT_MODE
        })
    );
    assert_eq!(remote.uploads().len(), 1, "absent file uploaded exactly once");
}

#[test]
fn equal_size_and_newer_remote_is_skipped() {
    let tree = BuildTree::new();
    let local = tree.rpm("11", "x86_64", "pkg-1.0.rpm", 1000, T);
    let remote = remote_with_leaf();
    remote.insert_file(REMOTE_PKG, 1000, T + 1);
    let mut session = remote.connect(&connection()).unwrap();

    let decision = sync_file(&mut session, &local, REMOTE_PKG).unwrap();

    assert!(!decision.transferred);
    assert_eq!(decision.reason, UploadReason::UpToDate);
    assert!(remote.uploads().is_empty());
}

#[test]
fn equal_size_and_equal_mtime_is_skipped() {
    let tree = BuildTree::new();
    let local = tree.rpm("11", "x86_64", "pkg-1.0.rpm", 1000, T);
    let remote = remote_with_leaf();
    remote.insert_file(REMOTE_PKG, 1000, T);
    let mut session = remote.connect(&connection()).unwrap();

    assert!(!sync_file(&mut session, &local, REMOTE_PKG).unwrap().transferred);
}

#[test]
fn size_mismatch_uploads_even_when_local_is_older() {
    let tree = BuildTree::new();
    let local = tree.rpm("11", "x86_64", "pkg-1.0.rpm", 1000, T);
    let remote = remote_with_leaf();
    remote.insert_file(REMOTE_PKG, 900, T + 1);
    let mut session = remote.connect(&connection()).unwrap();

    let decision = sync_file(&mut session, &local, REMOTE_PKG).unwrap();

    assert!(decision.transferred);
    assert_eq!(decision.reason, UploadReason::Stale);
    assert!(matches!(
        remote.entry(REMOTE_PKG),
        Some(Entry::File { size: 1000, .. })
    ));
}

#[test]
fn newer_local_with_same_size_uploads() {
    let tree = BuildTree::new();
    let local = tree.rpm("11", "x86_64", "pkg-1.0.rpm", 1000, T + 10);
    let remote = remote_with_leaf();
    remote.insert_file(REMOTE_PKG, 1000, T);
    let mut session = remote.connect(&connection()).unwrap();

    assert!(sync_file(&mut session, &local, REMOTE_PKG).unwrap().transferred);
}

#[test]
fn uploaded_file_gets_fixed_permissions() {
    let tree = BuildTree::new();
    let local = tree.rpm("11", "x86_64", "pkg-1.0.rpm", 10, T);
    let remote = remote_with_leaf();
    let mut session = remote.connect(&connection()).unwrap();

    sync_file(&mut session, &local, REMOTE_PKG).unwrap();

    let journal = remote.journal();
    let upload_at = journal
        .iter()
        .position(|c| matches!(c, RemoteCall::Upload { .. }))
        .unwrap();
    assert_eq!(
        journal[upload_at + 1],
        RemoteCall::SetPermissions(REMOTE_PKG.into(), 0o644)
    );
}

#[test]
fn missing_local_file_is_precondition_violation() {
    let tree = BuildTree::new();
    let remote = remote_with_leaf();
    let mut session = remote.connect(&connection()).unwrap();

    let err = sync_file(&mut session, &tree.top().join("gone.rpm"), REMOTE_PKG).unwrap_err();
    assert!(matches!(err, SyncError::PreconditionViolation { .. }));
    assert!(remote.journal().iter().all(|c| matches!(c, RemoteCall::Connect)));
}

#[test]
fn non_absent_stat_error_is_infrastructure_fault() {
    let tree = BuildTree::new();
    let local = tree.rpm("11", "x86_64", "pkg-1.0.rpm", 10, T);
    let remote = remote_with_leaf();
    remote.fail_stat(REMOTE_PKG, 3);
    let mut session = remote.connect(&connection()).unwrap();

    let err = sync_file(&mut session, &local, REMOTE_PKG).unwrap_err();
    match err {
        SyncError::InfrastructureFault { operation, path, .. } => {
            assert_eq!(operation, RemoteOp::Stat);
            assert_eq!(path, REMOTE_PKG);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(remote.uploads().is_empty());
}

// =============================================================================
// Full runs
// =============================================================================

fn populated_tree() -> BuildTree {
    let tree = BuildTree::new();
    tree.rpm("11", "i386", "pkg-1.0-1.i386.rpm", 1200, T);
    tree.rpm("11", "x86_64", "pkg-1.0-1.x86_64.rpm", 1300, T);
    tree.rpm("11", "x86_64", "lib-2.0-1.x86_64.rpm", 800, T);
    tree.rpm("11", "noarch", "docs-1.0-1.noarch.rpm", 500, T);
    tree.rpm("12", "x86_64", "pkg-1.0-1.fc12.x86_64.rpm", 1310, T);
    tree.srpm("pkg-1.0-1.src.rpm", 3000, T);
    tree
}

#[test]
fn full_run_mirrors_every_leaf_and_counts() {
    let tree = populated_tree();
    let layout = tree.layout();
    let remote = MemoryRemote::new();
    remote.set_clock(T + 60);

    let outcome = SyncOrchestrator::new(&layout, remote.clone())
        .run(Some(&connection()))
        .unwrap();

    assert_eq!(outcome.files_uploaded, 6);
    assert_eq!(outcome.files_skipped, 0);
    assert_eq!(outcome.bytes_uploaded, 1200 + 1300 + 800 + 500 + 1310 + 3000);
    // root + 2 versions × 3 arches + SRPMS
    assert_eq!(outcome.directories_created, 8);
    assert_eq!(outcome.metadata_refreshes, 7);

    assert!(
        remote
            .entry("/srv/repo/fedora/11/RPMS/noarch/docs-1.0-1.noarch.rpm")
            .is_some()
    );
    assert!(remote.entry("/srv/repo/SRPMS/pkg-1.0-1.src.rpm").is_some());
    assert_eq!(remote.entry("/srv/repo/fedora/12/RPMS/i386"), Some(Entry::Dir));
}

#[test]
fn second_run_against_unchanged_tree_transfers_nothing() {
    let tree = populated_tree();
    let layout = tree.layout();
    let remote = MemoryRemote::new();
    remote.set_clock(T + 60);

    SyncOrchestrator::new(&layout, remote.clone())
        .run(Some(&connection()))
        .unwrap();
    remote.clear_journal();

    let again = SyncOrchestrator::new(&layout, remote.clone())
        .run(Some(&connection()))
        .unwrap();

    assert_eq!(again.files_uploaded, 0);
    assert_eq!(again.files_skipped, 6);
    assert_eq!(again.directories_created, 0);
    assert!(remote.uploads().is_empty());
    assert!(
        remote
            .commands()
            .iter()
            .all(|argv| argv[0] == "createrepo"),
        "no mkdir on second run"
    );
}

#[test]
fn metadata_refreshed_once_per_leaf_after_its_last_upload() {
    let tree = populated_tree();
    let layout = tree.layout();
    let remote = MemoryRemote::new();

    SyncOrchestrator::new(&layout, remote.clone())
        .run(Some(&connection()))
        .unwrap();

    let journal = remote.journal();
    let mut refreshed = Vec::new();
    for (i, call) in journal.iter().enumerate() {
        let RemoteCall::Exec(argv) = call else { continue };
        if argv[0] != "createrepo" {
            continue;
        }
        let dir = argv[1].clone();
        assert!(!refreshed.contains(&dir), "{dir} refreshed twice");

        let later_upload = journal[i + 1..].iter().any(|c| match c {
            RemoteCall::Upload { remote, .. } => remote.starts_with(&format!("{dir}/")),
            _ => false,
        });
        assert!(!later_upload, "upload into {dir} after its refresh");
        refreshed.push(dir);
    }

    let leaves = layout.rpm_leaves(util::REMOTE_ROOT).len() + 1;
    assert_eq!(refreshed.len(), leaves);
    assert_eq!(refreshed.last().map(String::as_str), Some("/srv/repo/SRPMS"));
}

#[test]
fn remote_root_is_ensured_first_and_session_closed_last() {
    let tree = populated_tree();
    let layout = tree.layout();
    let remote = MemoryRemote::new();

    SyncOrchestrator::new(&layout, remote.clone())
        .run(Some(&connection()))
        .unwrap();

    let journal = remote.journal();
    assert_eq!(journal[0], RemoteCall::Connect);
    assert_eq!(journal[1], RemoteCall::Stat(REMOTE_ROOT.into()));
    assert_eq!(journal.last(), Some(&RemoteCall::Close));
    assert_eq!(remote.count(|c| matches!(c, RemoteCall::Connect)), 1);
}

#[test]
fn srpm_pass_runs_after_all_arch_passes() {
    let tree = populated_tree();
    let layout = tree.layout();
    let remote = MemoryRemote::new();

    SyncOrchestrator::new(&layout, remote.clone())
        .run(Some(&connection()))
        .unwrap();

    let uploads = remote.uploads();
    let first_srpm = uploads
        .iter()
        .position(|p| p.starts_with("/srv/repo/SRPMS/"))
        .unwrap();
    assert_eq!(first_srpm, uploads.len() - 1);
}

#[test]
fn missing_connection_aborts_before_any_remote_call() {
    let tree = populated_tree();
    let layout = tree.layout();
    let remote = MemoryRemote::new();

    let fault = SyncOrchestrator::new(&layout, remote.clone())
        .run(None)
        .unwrap_err();

    assert!(matches!(fault.error, SyncError::MissingConfiguration(_)));
    assert!(remote.journal().is_empty());
}

#[test]
fn leaf_stat_permission_denied_faults_and_still_closes() {
    let tree = populated_tree();
    let layout = tree.layout();
    let remote = MemoryRemote::new();
    remote.fail_stat("/srv/repo/fedora/11/RPMS/x86_64", 3);

    let fault = SyncOrchestrator::new(&layout, remote.clone())
        .run(Some(&connection()))
        .unwrap_err();

    assert!(matches!(
        fault.error,
        SyncError::InfrastructureFault {
            operation: RemoteOp::Stat,
            ..
        }
    ));
    assert_eq!(
        fault.phase,
        SyncPhase::PerArchSync {
            os: "fedora".into(),
            version: "11".into(),
            arch: "x86_64".into(),
        }
    );
    assert!(fault.to_string().contains("/srv/repo/fedora/11/RPMS/x86_64"));
    // i386 finished before the fault; nothing after it ran
    assert_eq!(fault.partial.files_uploaded, 1);
    assert_eq!(remote.journal().last(), Some(&RemoteCall::Close));
    assert!(remote.entry("/srv/repo/SRPMS").is_none());
}

#[test]
fn failed_createrepo_faults_the_run() {
    let tree = populated_tree();
    let layout = tree.layout();
    let remote = MemoryRemote::new();
    remote.fail_command("createrepo", 1);

    let fault = SyncOrchestrator::new(&layout, remote.clone())
        .run(Some(&connection()))
        .unwrap_err();

    assert!(matches!(fault.error, SyncError::RemoteCommandFailed { .. }));
    assert_eq!(fault.partial.metadata_refreshes, 0);
    assert_eq!(remote.journal().last(), Some(&RemoteCall::Close));
}

#[test]
fn file_in_place_of_leaf_directory_fails_on_upload() {
    let tree = populated_tree();
    let layout = tree.layout();
    let remote = remote_with_leaf();
    remote.insert_file("/srv/repo/fedora/11/RPMS/i386", 1, T);

    let fault = SyncOrchestrator::new(&layout, remote.clone())
        .run(Some(&connection()))
        .unwrap_err();

    assert!(matches!(
        fault.error,
        SyncError::InfrastructureFault {
            operation: RemoteOp::Upload,
            ..
        }
    ));
}

#[test]
fn empty_leaves_are_still_created_and_refreshed() {
    let tree = BuildTree::new();
    let layout = tree.layout();
    let remote = MemoryRemote::new();

    let outcome = SyncOrchestrator::new(&layout, remote.clone())
        .run(Some(&connection()))
        .unwrap();

    assert_eq!(outcome.files_uploaded, 0);
    assert_eq!(outcome.metadata_refreshes, 7);
    assert_eq!(remote.entry("/srv/repo/SRPMS/repodata"), Some(Entry::Dir));
}

#[cfg(unix)]
#[test]
fn unreadable_local_leaf_faults_instead_of_mirroring_nothing() {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    let tree = populated_tree();
    let layout = tree.layout();
    let leaf = tree.top().join("fedora/11/RPMS/x86_64");
    fs::set_permissions(&leaf, fs::Permissions::from_mode(0o000)).unwrap();
    // Permission bits do not stop root.
    if fs::read_dir(&leaf).is_ok() {
        fs::set_permissions(&leaf, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }
    let remote = MemoryRemote::new();

    let result = SyncOrchestrator::new(&layout, remote.clone()).run(Some(&connection()));
    fs::set_permissions(&leaf, fs::Permissions::from_mode(0o755)).unwrap();
    let fault = result.unwrap_err();

    match &fault.error {
        SyncError::PreconditionViolation { path, .. } => assert_eq!(path, &leaf),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        fault.phase,
        SyncPhase::PerArchSync {
            os: "fedora".into(),
            version: "11".into(),
            arch: "x86_64".into(),
        }
    );
    assert!(
        !remote
            .commands()
            .iter()
            .any(|argv| argv == &["createrepo", LEAF]),
        "unreadable leaf must not be refreshed"
    );
    assert_eq!(fault.partial.files_uploaded, 1);
    assert_eq!(remote.journal().last(), Some(&RemoteCall::Close));
}

// =============================================================================
// Signing gate
// =============================================================================

#[test]
fn empty_secret_never_reaches_the_signer() {
    let tree = populated_tree();
    let layout = tree.layout();
    // Would fail with a spawn error if it were ever invoked.
    let pipeline = SigningPipeline::new(&layout, ExternalSigner::new("/nonexistent/sign-rpms"));

    let err = pipeline
        .sign(Some(&SigningSecret::new("")), ArtifactClass::Rpms)
        .unwrap_err();
    assert!(matches!(err, SignError::MissingCredential));
}
