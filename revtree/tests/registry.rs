mod common;

use common::opts;
use revtree::{Database, Error, NodeReadTrx, Registry, UsageError};

#[test]
fn same_path_shares_one_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let registry = Registry::new();
    registry.create(&opts(&path)).unwrap();

    let first = registry.open(opts(&path)).unwrap();
    // A second independent open would fail on the directory lock.
    let second = registry.open(opts(&path)).unwrap();
    assert!(registry.is_open(&path));

    let mut wtx = first.session().unwrap().begin_write().unwrap();
    wtx.insert_element_as_first_child("shared", "").unwrap();
    wtx.commit().unwrap();
    wtx.close().unwrap();

    let mut rtx = second.session().unwrap().begin_read(None).unwrap();
    assert!(rtx.move_to_first_child().unwrap());
    assert_eq!(rtx.name().unwrap().as_deref(), Some("shared"));
    rtx.close();

    assert!(registry.close(&path).unwrap());
    assert!(!registry.is_open(&path));
    assert!(second.is_closed());
    assert!(!registry.close(&path).unwrap());
}

#[test]
fn independent_open_is_locked_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    Database::create(&opts(&path)).unwrap();

    let db = Database::open(opts(&path)).unwrap();
    assert!(matches!(
        Database::open(opts(&path)),
        Err(Error::Usage(UsageError::DirectoryLocked { .. }))
    ));
    db.close().unwrap();
    Database::open(opts(&path)).unwrap().close().unwrap();
}

#[test]
fn truncate_refuses_open_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let registry = Registry::new();
    registry.create(&opts(&path)).unwrap();
    assert!(matches!(
        registry.create(&opts(&path)),
        Err(Error::Usage(UsageError::DatabaseExists(_)))
    ));

    let _db = registry.open(opts(&path)).unwrap();
    assert!(matches!(
        registry.truncate(&path),
        Err(Error::Usage(UsageError::DatabaseOpen(_)))
    ));

    registry.close(&path).unwrap();
    registry.truncate(&path).unwrap();
    assert!(!Database::exists(&path));
    assert!(matches!(
        registry.open(opts(&path)),
        Err(Error::Usage(UsageError::DatabaseMissing(_)))
    ));
}

#[test]
fn settings_are_fixed_at_creation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let mut o = opts(&path);
    o.revisioning(revtree::Revisioning::SlidingSnapshot);
    o.milestone(3);
    Database::create(&o).unwrap();

    let mut o = opts(&path);
    o.revisioning(revtree::Revisioning::FullDump);
    let db = Database::open(o).unwrap();
    assert_eq!(db.settings().revisioning, revtree::Revisioning::SlidingSnapshot);
    assert_eq!(db.settings().milestone, 3);
    assert_eq!(db.settings().version, revtree::store::CURRENT_VERSION);
    db.close().unwrap();
}

#[test]
fn invalid_options_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut o = opts(dir.path().join("db"));
    o.milestone(0);
    assert!(matches!(
        Database::create(&o),
        Err(Error::Usage(UsageError::InvalidOption(_)))
    ));
}
