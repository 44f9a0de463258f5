mod common;

use common::{child_names, Test};
use revtree::{Error, NodeReadTrx, UsageError};

#[test]
fn fresh_database_holds_empty_document() {
    let t = Test::new();
    assert_eq!(t.session.last_committed_revision(), 0);

    let mut rtx = t.session.begin_read(None).unwrap();
    assert_eq!(rtx.revision_number().unwrap(), 0);
    assert_eq!(rtx.node_key().unwrap(), revtree::DOCUMENT_ROOT_KEY);
    assert!(!rtx.move_to_first_child().unwrap());
    assert!(!rtx.move_to_parent().unwrap());
}

#[test]
fn readers_keep_their_revision() {
    let t = Test::new();
    let mut before = t.session.begin_read(None).unwrap();

    let mut wtx = t.session.begin_write().unwrap();
    wtx.insert_element_as_first_child("a", "").unwrap();
    wtx.commit().unwrap();
    wtx.close().unwrap();

    assert!(!before.move_to_first_child().unwrap());
    assert_eq!(before.revision_number().unwrap(), 0);

    let mut after = t.session.begin_read(None).unwrap();
    assert_eq!(after.revision_number().unwrap(), 1);
    assert_eq!(child_names(&mut after), vec!["a"]);

    let mut old = t.session.begin_read(Some(0)).unwrap();
    assert!(child_names(&mut old).is_empty());
}

#[test]
fn reading_future_revision_fails() {
    let t = Test::new();
    let res = t.session.begin_read(Some(1));
    assert!(matches!(
        res,
        Err(Error::Usage(UsageError::RevisionOutOfRange {
            requested: 1,
            last: 0
        }))
    ));
}

#[test]
fn abort_discards_changes() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    wtx.insert_element_as_first_child("gone", "").unwrap();
    assert_eq!(wtx.modification_count(), 1);
    wtx.abort().unwrap();
    assert_eq!(wtx.modification_count(), 0);
    assert_eq!(wtx.node_key().unwrap(), revtree::DOCUMENT_ROOT_KEY);
    assert!(!wtx.move_to_first_child().unwrap());
    wtx.close().unwrap();

    assert_eq!(t.session.last_committed_revision(), 0);
}

#[test]
fn close_with_pending_changes_fails() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    wtx.insert_element_as_first_child("a", "").unwrap();
    assert!(matches!(
        wtx.close(),
        Err(Error::Usage(UsageError::PendingModifications {
            modifications: 1,
            ..
        }))
    ));
    wtx.abort().unwrap();
    wtx.close().unwrap();
    assert!(matches!(
        wtx.node(),
        Err(Error::Usage(UsageError::TransactionClosed(_)))
    ));
}

#[test]
fn revisions_survive_reopen() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    wtx.insert_element_as_first_child("a", "").unwrap();
    wtx.commit().unwrap();
    wtx.insert_text_as_right_sibling(b"hello").unwrap();
    wtx.commit().unwrap();
    wtx.close().unwrap();
    drop(wtx);

    let t = t.reopen(|_| {});
    assert_eq!(t.session.last_committed_revision(), 2);

    let revisions = t.db.revisions().unwrap();
    let numbers: Vec<u64> = revisions.iter().map(|r| r.revision).collect();
    assert_eq!(numbers, vec![0, 1, 2]);
    assert!(revisions[1].timestamp <= revisions[2].timestamp);

    let mut rtx = t.session.begin_read(None).unwrap();
    assert_eq!(child_names(&mut rtx), vec!["a", "hello"]);
    let mut rtx = t.session.begin_read(Some(1)).unwrap();
    assert_eq!(child_names(&mut rtx), vec!["a"]);
}

#[test]
fn revert_continues_from_older_revision() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    wtx.insert_element_as_first_child("a", "").unwrap();
    wtx.commit().unwrap();
    assert!(wtx.move_to_document_root().unwrap());
    assert!(wtx.move_to_first_child().unwrap());
    wtx.remove().unwrap();
    wtx.commit().unwrap();

    wtx.insert_element_as_first_child("pending", "").unwrap();
    assert!(matches!(
        wtx.revert_to(1),
        Err(Error::Usage(UsageError::PendingModifications { .. }))
    ));
    wtx.abort().unwrap();
    assert!(matches!(
        wtx.revert_to(7),
        Err(Error::Usage(UsageError::RevisionOutOfRange { .. }))
    ));

    wtx.revert_to(1).unwrap();
    assert_eq!(child_names(&mut wtx), vec!["a"]);
    wtx.insert_element_as_first_child("b", "").unwrap();
    wtx.commit().unwrap();
    wtx.close().unwrap();

    assert_eq!(t.session.last_committed_revision(), 3);
    let mut rtx = t.session.begin_read(Some(2)).unwrap();
    assert!(child_names(&mut rtx).is_empty());
    let mut rtx = t.session.begin_read(Some(3)).unwrap();
    assert_eq!(child_names(&mut rtx), vec!["b", "a"]);
}

#[test]
fn many_commits_reconstruct_with_bounded_scans() {
    let t = Test::with_options(|o| {
        o.milestone(2);
    });
    let mut wtx = t.session.begin_write().unwrap();
    wtx.insert_element_as_first_child("e0", "").unwrap();
    wtx.commit().unwrap();
    for i in 1..10 {
        wtx.insert_element_as_right_sibling(&format!("e{i}"), "")
            .unwrap();
        wtx.commit().unwrap();
    }
    wtx.close().unwrap();
    drop(wtx);

    // The page cache is filled by commits, so look at the pages from a fresh session.
    let t = t.reopen(|o| {
        o.metrics(true);
    });
    for revision in [1, 4, 10] {
        let mut rtx = t.session.begin_read(Some(revision)).unwrap();
        let expected: Vec<String> = (0..revision).map(|i| format!("e{i}")).collect();
        assert_eq!(child_names(&mut rtx), expected);
    }

    let snapshot = t.session.metrics().snapshot().unwrap();
    assert!(snapshot.page_cache_misses >= 3);
    assert!(snapshot.snapshot_pages_scanned >= snapshot.page_cache_misses);
    assert!(snapshot.snapshot_pages_scanned <= 2 * snapshot.page_cache_misses);
}
