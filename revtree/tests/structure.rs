mod common;

use common::{check_hashes, child_names, Test};
use revtree::{
    Error, HashKind, NodeReadTrx, NodeType, UsageError, WriteTransaction, DOCUMENT_ROOT_KEY,
};

/// <root><a x="1"><b/>text<c/></a><d/></root>
fn build(wtx: &mut WriteTransaction) -> [u64; 5] {
    let a = wtx.insert_element_as_first_child("a", "urn:a").unwrap();
    let x = wtx.insert_attribute("x", "", b"1").unwrap();
    assert!(wtx.move_to_parent().unwrap());
    let b = wtx.insert_element_as_first_child("b", "").unwrap();
    wtx.insert_text_as_right_sibling(b"text").unwrap();
    let c = wtx.insert_element_as_right_sibling("c", "").unwrap();
    assert!(wtx.move_to(a).unwrap());
    let d = wtx.insert_element_as_right_sibling("d", "").unwrap();
    [a, b, c, d, x]
}

#[test]
fn inserts_link_nodes() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    let [a, b, c, d, x] = build(&mut wtx);
    wtx.commit().unwrap();
    wtx.close().unwrap();

    let mut rtx = t.session.begin_read(None).unwrap();
    assert_eq!(child_names(&mut rtx), vec!["a", "d"]);
    assert_eq!(rtx.child_count().unwrap(), 2);

    assert!(rtx.move_to(a).unwrap());
    assert_eq!(rtx.node().unwrap().node_type(), NodeType::Element);
    assert_eq!(rtx.uri().unwrap().as_deref(), Some("urn:a"));
    assert_eq!(child_names(&mut rtx), vec!["b", "text", "c"]);
    assert_eq!(rtx.attribute_count().unwrap(), 1);

    assert!(rtx.move_to_attribute(0).unwrap());
    assert_eq!(rtx.node_key().unwrap(), x);
    assert_eq!(rtx.name().unwrap().as_deref(), Some("x"));
    assert_eq!(rtx.value().unwrap(), Some(b"1".to_vec()));
    assert!(rtx.move_to_parent().unwrap());
    assert_eq!(rtx.node_key().unwrap(), a);

    assert!(rtx.move_to(c).unwrap());
    assert!(rtx.move_to_left_sibling().unwrap());
    assert!(rtx.move_to_left_sibling().unwrap());
    assert_eq!(rtx.node_key().unwrap(), b);
    assert!(!rtx.move_to_left_sibling().unwrap());

    assert!(rtx.move_to(d).unwrap());
    assert!(!rtx.move_to_right_sibling().unwrap());
    assert!(!rtx.move_to(10_000).unwrap());
    assert_eq!(rtx.node_key().unwrap(), d);
}

#[test]
fn invalid_positions_are_refused() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    assert!(matches!(
        wtx.insert_element_as_right_sibling("sibling", ""),
        Err(Error::Usage(UsageError::InvalidNodeType { .. }))
    ));
    assert!(matches!(
        wtx.insert_attribute("x", "", b""),
        Err(Error::Usage(UsageError::InvalidNodeType { .. }))
    ));
    assert!(matches!(
        wtx.remove(),
        Err(Error::Usage(UsageError::RemoveDocumentRoot))
    ));

    wtx.insert_text_as_first_child(b"leaf").unwrap();
    assert!(matches!(
        wtx.insert_element_as_first_child("child", ""),
        Err(Error::Usage(UsageError::InvalidNodeType { .. }))
    ));
    assert!(matches!(
        wtx.set_name("renamed"),
        Err(Error::Usage(UsageError::InvalidNodeType { .. }))
    ));
    assert_eq!(wtx.modification_count(), 1);
    wtx.abort().unwrap();
}

#[test]
fn remove_takes_subtree() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    let [a, b, c, d, x] = build(&mut wtx);
    wtx.commit().unwrap();

    assert!(wtx.move_to(a).unwrap());
    wtx.remove().unwrap();
    assert_eq!(wtx.node_key().unwrap(), d);
    for key in [a, b, c, x] {
        assert!(!wtx.move_to(key).unwrap());
    }
    wtx.commit().unwrap();
    wtx.close().unwrap();

    let mut rtx = t.session.begin_read(None).unwrap();
    assert_eq!(child_names(&mut rtx), vec!["d"]);
    assert_eq!(rtx.child_count().unwrap(), 1);
    assert!(rtx.move_to(d).unwrap());
    assert!(!rtx.move_to_left_sibling().unwrap());
    for key in [a, b, c, x] {
        assert!(!rtx.move_to(key).unwrap());
    }

    let mut old = t.session.begin_read(Some(1)).unwrap();
    assert!(old.move_to(b).unwrap());
}

#[test]
fn remove_middle_sibling_relinks() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    let [a, b, c, ..] = build(&mut wtx);

    assert!(wtx.move_to(b).unwrap());
    assert!(wtx.move_to_right_sibling().unwrap());
    wtx.remove().unwrap();
    assert_eq!(wtx.node_key().unwrap(), c);
    assert!(wtx.move_to_left_sibling().unwrap());
    assert_eq!(wtx.node_key().unwrap(), b);

    assert!(wtx.move_to(c).unwrap());
    wtx.remove().unwrap();
    assert_eq!(wtx.node_key().unwrap(), b);
    wtx.remove().unwrap();
    assert_eq!(wtx.node_key().unwrap(), a);
    assert_eq!(wtx.child_count().unwrap(), 0);
    wtx.commit().unwrap();
    wtx.close().unwrap();
}

#[test]
fn remove_attribute_returns_to_element() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    let [a, .., x] = build(&mut wtx);
    assert!(wtx.move_to(x).unwrap());
    wtx.remove().unwrap();
    assert_eq!(wtx.node_key().unwrap(), a);
    assert_eq!(wtx.attribute_count().unwrap(), 0);
    wtx.abort().unwrap();
}

#[test]
fn setters_change_content() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    let [a, _, _, _, x] = build(&mut wtx);

    assert!(wtx.move_to(a).unwrap());
    wtx.set_name("renamed").unwrap();
    wtx.set_uri("urn:b").unwrap();
    assert!(wtx.move_to(x).unwrap());
    wtx.set_value(b"2").unwrap();
    wtx.commit().unwrap();
    wtx.close().unwrap();

    let mut rtx = t.session.begin_read(None).unwrap();
    assert!(rtx.move_to(a).unwrap());
    assert_eq!(rtx.name().unwrap().as_deref(), Some("renamed"));
    assert_eq!(rtx.uri().unwrap().as_deref(), Some("urn:b"));
    assert!(rtx.move_to_attribute(0).unwrap());
    assert_eq!(rtx.value().unwrap(), Some(b"2".to_vec()));
}

#[test]
fn namespaces_hang_off_elements() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    let a = wtx.insert_element_as_first_child("a", "").unwrap();
    let ns = wtx.insert_namespace("p", "urn:p").unwrap();
    assert_eq!(wtx.node().unwrap().node_type(), NodeType::Namespace);
    assert_eq!(wtx.name().unwrap().as_deref(), Some("p"));
    assert!(wtx.move_to_parent().unwrap());
    assert_eq!(wtx.node_key().unwrap(), a);
    assert_eq!(wtx.namespace_count().unwrap(), 1);
    assert!(wtx.move_to_namespace(0).unwrap());
    assert_eq!(wtx.node_key().unwrap(), ns);
    assert!(!wtx.move_to_first_child().unwrap());
    wtx.commit().unwrap();
    wtx.close().unwrap();
}

#[test]
fn names_are_shared_and_resolvable() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    let first = wtx.insert_element_as_first_child("item", "").unwrap();
    wtx.insert_element_as_right_sibling("item", "").unwrap();
    let name_key = wtx.node().unwrap().name_key();
    assert!(wtx.move_to(first).unwrap());
    assert_eq!(wtx.node().unwrap().name_key(), name_key);
    wtx.commit().unwrap();
    wtx.close().unwrap();

    let rtx = t.session.begin_read(None).unwrap();
    let key = rtx.key_for_name("item").unwrap();
    assert_eq!(key, name_key);
    assert_eq!(rtx.name_for_key(key.unwrap()).unwrap().as_deref(), Some("item"));
    assert_eq!(rtx.key_for_name("missing").unwrap(), None);
}

#[test]
fn auto_commit_by_count() {
    let t = Test::new();
    let mut wtx = t
        .session
        .begin_write_with(3, std::time::Duration::ZERO)
        .unwrap();
    wtx.insert_element_as_first_child("e0", "").unwrap();
    wtx.insert_element_as_right_sibling("e1", "").unwrap();
    assert_eq!(t.session.last_committed_revision(), 0);
    wtx.insert_element_as_right_sibling("e2", "").unwrap();
    assert_eq!(t.session.last_committed_revision(), 1);
    assert_eq!(wtx.modification_count(), 0);
    assert_eq!(wtx.revision_number().unwrap(), 2);
    wtx.close().unwrap();
}

#[test]
fn auto_commit_by_time() {
    let t = Test::new();
    let mut wtx = t
        .session
        .begin_write_with(0, std::time::Duration::from_millis(20))
        .unwrap();
    wtx.insert_element_as_first_child("e0", "").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(40));
    assert_eq!(t.session.last_committed_revision(), 0);
    wtx.insert_element_as_right_sibling("e1", "").unwrap();
    assert_eq!(t.session.last_committed_revision(), 1);
    assert_eq!(wtx.modification_count(), 1);
    wtx.abort().unwrap();
    wtx.close().unwrap();
}

fn apply_workload(wtx: &mut WriteTransaction) {
    let [a, b, _, d, x] = build(wtx);
    assert!(wtx.move_to(x).unwrap());
    wtx.set_value(b"changed").unwrap();
    assert!(wtx.move_to(b).unwrap());
    wtx.insert_text_as_first_child(b"deep").unwrap();
    assert!(wtx.move_to(d).unwrap());
    wtx.insert_namespace("p", "urn:p").unwrap();
    assert!(wtx.move_to(b).unwrap());
    wtx.remove().unwrap();
    assert!(wtx.move_to(a).unwrap());
    wtx.set_name("a2").unwrap();
}

fn root_hash(kind: HashKind) -> u64 {
    let t = Test::with_options(|o| o.hash_kind(kind));
    let mut wtx = t.session.begin_write().unwrap();
    apply_workload(&mut wtx);
    wtx.commit().unwrap();
    wtx.close().unwrap();

    let mut rtx = t.session.begin_read(None).unwrap();
    let hash = rtx.node().unwrap().hash;
    if kind != HashKind::None {
        assert_eq!(check_hashes(&mut rtx), hash);
    }
    hash
}

#[test]
fn rolling_and_postorder_hashes_agree() {
    let rolling = root_hash(HashKind::Rolling);
    let postorder = root_hash(HashKind::Postorder);
    assert_ne!(rolling, 0);
    assert_eq!(rolling, postorder);
    assert_eq!(root_hash(HashKind::None), 0);
}

#[test]
fn hashes_follow_removal_back_to_empty() {
    let t = Test::new();
    let mut wtx = t.session.begin_write().unwrap();
    let [a, .., d, _] = build(&mut wtx);
    assert!(wtx.move_to(a).unwrap());
    wtx.remove().unwrap();
    assert!(wtx.move_to(d).unwrap());
    wtx.remove().unwrap();
    assert_eq!(wtx.node_key().unwrap(), DOCUMENT_ROOT_KEY);
    assert_eq!(wtx.node().unwrap().hash, 0);
    wtx.commit().unwrap();
    wtx.close().unwrap();
}
