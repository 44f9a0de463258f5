use std::path::{Path, PathBuf};

use revtree::{
    hashing::{combine, content_hash},
    Database, NodeReadTrx, Options, Session,
};

pub fn opts(path: impl AsRef<Path>) -> Options {
    let mut o = Options::new();
    o.path(path.as_ref());
    o
}

/// A freshly created database in its own temporary directory.
pub struct Test {
    dir: tempfile::TempDir,
    pub db: Database,
    pub session: Session,
}

#[allow(dead_code)]
impl Test {
    pub fn new() -> Self {
        Self::with_options(|_| {})
    }

    pub fn with_options(configure: impl FnOnce(&mut Options)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut o = opts(dir.path().join("db"));
        configure(&mut o);
        Database::create(&o).unwrap();
        let db = Database::open(o).unwrap();
        let session = db.session().unwrap();
        Test { dir, db, session }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("db")
    }

    /// Close the database and open it again with the options `configure` produces.
    pub fn reopen(self, configure: impl FnOnce(&mut Options)) -> Self {
        let Test { dir, db, session } = self;
        drop(session);
        db.close().unwrap();
        drop(db);

        let mut o = opts(dir.path().join("db"));
        configure(&mut o);
        let db = Database::open(o).unwrap();
        let session = db.session().unwrap();
        Test { dir, db, session }
    }
}

/// The names of the children of the node under the cursor. The cursor ends where it started.
#[allow(dead_code)]
pub fn child_names(txn: &mut impl NodeReadTrx) -> Vec<String> {
    let start = txn.node_key().unwrap();
    let mut names = Vec::new();
    if txn.move_to_first_child().unwrap() {
        loop {
            let label = match txn.name().unwrap() {
                Some(name) => name,
                None => String::from_utf8(txn.value().unwrap().unwrap_or_default()).unwrap(),
            };
            names.push(label);
            if !txn.move_to_right_sibling().unwrap() {
                break;
            }
        }
    }
    assert!(txn.move_to(start).unwrap());
    names
}

/// Recompute the hash of the subtree under the cursor from scratch, asserting on the way that
/// every stored hash below matches. The cursor ends where it started.
#[allow(dead_code)]
pub fn check_hashes(txn: &mut impl NodeReadTrx) -> u64 {
    let node = txn.node().unwrap().clone();
    let mut children = Vec::new();

    if txn.move_to_first_child().unwrap() {
        loop {
            children.push(check_hashes(txn));
            if !txn.move_to_right_sibling().unwrap() {
                break;
            }
        }
        assert!(txn.move_to(node.key).unwrap());
    }
    for key in node.attributes().iter().chain(node.namespaces()) {
        assert!(txn.move_to(*key).unwrap());
        let leaf = txn.node().unwrap().clone();
        assert_eq!(leaf.hash, content_hash(&leaf), "hash of node {}", leaf.key);
        children.push(leaf.hash);
    }
    assert!(txn.move_to(node.key).unwrap());

    let expected = combine(content_hash(&node), children);
    assert_eq!(node.hash, expected, "hash of node {}", node.key);
    expected
}
