//! Transaction behavior against real directory trees.

use std::path::Path;

use ironbox::{Transaction, TransactionError, TxOutcome};

fn seed(ws: &Path) {
    std::fs::create_dir_all(ws.join("pkg/inner")).unwrap();
    std::fs::write(ws.join("main.py"), "print('v1')\n").unwrap();
    std::fs::write(ws.join("pkg/inner/mod.py"), "VALUE = 1\n").unwrap();
}

#[test]
fn rollback_restores_nested_tree_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    seed(&ws);

    let tx = Transaction::begin(&ws, dir.path().join("snaps")).unwrap();
    std::fs::write(ws.join("main.py"), "print('v2')\n").unwrap();
    std::fs::remove_dir_all(ws.join("pkg")).unwrap();
    std::fs::create_dir_all(ws.join("other")).unwrap();
    std::fs::write(ws.join("other/junk.bin"), [0u8, 1, 2]).unwrap();
    tx.roll_back(&"attempt failed").unwrap();

    assert_eq!(
        std::fs::read_to_string(ws.join("main.py")).unwrap(),
        "print('v1')\n"
    );
    assert_eq!(
        std::fs::read_to_string(ws.join("pkg/inner/mod.py")).unwrap(),
        "VALUE = 1\n"
    );
    assert!(!ws.join("other").exists());
}

#[test]
fn commit_then_new_transaction_sees_committed_state() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    seed(&ws);
    let snaps = dir.path().join("snaps");

    let tx = Transaction::begin(&ws, &snaps).unwrap();
    std::fs::write(ws.join("main.py"), "print('v2')\n").unwrap();
    tx.commit();

    // A later rollback restores the committed state, not the original.
    let tx = Transaction::begin(&ws, &snaps).unwrap();
    std::fs::write(ws.join("main.py"), "print('v3')\n").unwrap();
    tx.roll_back(&"attempt failed").unwrap();

    assert_eq!(
        std::fs::read_to_string(ws.join("main.py")).unwrap(),
        "print('v2')\n"
    );
}

#[test]
fn busy_workspace_is_refused_without_touching_files() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    seed(&ws);
    let snaps = dir.path().join("snaps");

    let _held = Transaction::begin(&ws, &snaps).unwrap();
    let err = Transaction::begin(&ws, &snaps).unwrap_err();
    assert!(matches!(err, TransactionError::WorkspaceBusy { .. }));
    assert_eq!(
        std::fs::read_to_string(ws.join("main.py")).unwrap(),
        "print('v1')\n"
    );
}

#[test]
fn lock_is_keyed_by_workspace_not_snapshot_dir() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    seed(&ws);

    // Two transactions with unrelated snapshot dirs still contend on the
    // same workspace.
    let _held = Transaction::begin(&ws, dir.path().join("snaps_a")).unwrap();
    let err = Transaction::begin(&ws, dir.path().join("snaps_b")).unwrap_err();
    assert!(matches!(err, TransactionError::WorkspaceBusy { .. }));
}

#[test]
fn begin_on_missing_workspace_is_fatal() {
    let dir = tempfile::tempdir().unwrap();

    let err = Transaction::begin(dir.path().join("does-not-exist"), dir.path().join("snaps"))
        .unwrap_err();
    assert!(matches!(err, TransactionError::Snapshot { .. }));
}

#[tokio::test]
async fn scope_reports_outcome_as_value() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    seed(&ws);
    let snaps = dir.path().join("snaps");

    let failed: TxOutcome<()> = Transaction::scope(&ws, &snaps, async {
        std::fs::write(ws.join("main.py"), "broken").unwrap();
        Err::<(), _>(std::io::Error::other("verification failed"))
    })
    .await
    .unwrap();
    assert!(!failed.is_committed());

    let succeeded = Transaction::scope(&ws, &snaps, async {
        std::fs::write(ws.join("main.py"), "print('fixed')\n").unwrap();
        Ok::<_, std::io::Error>("done")
    })
    .await
    .unwrap();
    assert_eq!(succeeded.into_committed(), Some("done"));
    assert_eq!(
        std::fs::read_to_string(ws.join("main.py")).unwrap(),
        "print('fixed')\n"
    );
}
