//! Commits interrupted between the trailing and the primary beacon.

mod common;

use common::{opts, Test};
use revtree::{
    read_beacons, store, ConsistencyError, Database, Error, NodeReadTrx, PanicOnSyncMode,
};

#[test]
fn torn_commit_is_detected_on_open() {
    let t = Test::with_options(|o| o.panic_on_sync(PanicOnSyncMode::PostTrailingBeacon));
    let path = t.path();
    let page_file = path.join(store::DATA_DIR).join(store::PAGE_FILE);
    let (before, _) = read_beacons(&page_file).unwrap();

    let mut wtx = t.session.begin_write().unwrap();
    wtx.insert_element_as_first_child("a", "").unwrap();
    let r = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = wtx.commit();
    }));
    assert!(r.is_err());
    drop(wtx);
    t.db.close().unwrap();

    let (primary, trailing) = read_beacons(&page_file).unwrap();
    assert_eq!(primary, before);
    assert_ne!(primary, trailing);
    assert!(trailing.offset > primary.offset);

    let db = Database::open(opts(&path)).unwrap();
    assert!(matches!(
        db.session(),
        Err(Error::Consistency(ConsistencyError::BeaconMismatch { .. }))
    ));
}

#[test]
fn crash_before_trailing_beacon_is_detected_on_open() {
    let t = Test::with_options(|o| o.panic_on_sync(PanicOnSyncMode::PostPages));
    let path = t.path();
    let page_file = path.join(store::DATA_DIR).join(store::PAGE_FILE);
    let (before, _) = read_beacons(&page_file).unwrap();
    let len_before = std::fs::metadata(&page_file).unwrap().len();

    let mut wtx = t.session.begin_write().unwrap();
    wtx.insert_element_as_first_child("a", "").unwrap();
    let r = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = wtx.commit();
    }));
    assert!(r.is_err());
    drop(wtx);
    assert_eq!(t.session.last_committed_revision(), 0);
    t.db.close().unwrap();

    // The pages and the uber page were appended, but no beacon points at them.
    assert!(std::fs::metadata(&page_file).unwrap().len() > len_before);
    let (primary, trailing) = read_beacons(&page_file).unwrap();
    assert_eq!(primary, before);
    assert_ne!(primary, trailing);

    let db = Database::open(opts(&path)).unwrap();
    assert!(matches!(
        db.session(),
        Err(Error::Consistency(ConsistencyError::BeaconMismatch { .. }))
    ));
}

#[test]
fn completed_commit_leaves_matching_beacons() {
    let t = Test::new();
    let page_file = t.path().join(store::DATA_DIR).join(store::PAGE_FILE);

    let mut wtx = t.session.begin_write().unwrap();
    wtx.insert_element_as_first_child("a", "").unwrap();
    wtx.commit().unwrap();
    wtx.close().unwrap();

    let (primary, trailing) = read_beacons(&page_file).unwrap();
    assert_eq!(primary, trailing);
    let revisions = t.db.revisions().unwrap();
    assert_eq!(revisions.last().map(|r| r.beacon), Some(primary));

    let t = t.reopen(|_| {});
    let mut rtx = t.session.begin_read(None).unwrap();
    assert!(rtx.move_to_first_child().unwrap());
    assert_eq!(rtx.name().unwrap().as_deref(), Some("a"));
}
