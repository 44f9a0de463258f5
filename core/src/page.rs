//! Pages and page references.
//!
//! Every page kind lives in the closed [`Page`] enum. Pages hold their children through
//! [`PageReference`]s, which carry the persisted address of the child, its checksum and, while the
//! child is being built by a write transaction, the resident child itself.
//!
//! Committed pages are immutable. Write transactions copy a page before changing it: resident
//! pages are shared behind an [`Arc`] and modified through [`Arc::make_mut`].

use std::{collections::BTreeMap, io::Read, sync::Arc};

use bitvec::prelude::*;

use crate::{
    addressing::{self, KeyOutOfRange, INDIRECT_FANOUT, NODES_PER_PAGE},
    codec::{self, DecodeError, EncodeError},
    node::{NameKey, Node},
};

/// The persisted address of a page within the page file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub offset: u64,
    pub size: u32,
}

/// A pointer to a page.
///
/// A reference is in one of three states:
///   - absent: no key and no page. The child was never created.
///   - persisted: a key, and possibly a copy of the page that was read through it.
///   - dirty: a resident page but no key. The page waits for its first write.
#[derive(Debug, Clone, Default)]
pub struct PageReference {
    key: Option<PageKey>,
    checksum: u64,
    page: Option<Arc<Page>>,
}

impl PageReference {
    pub fn persisted(key: PageKey, checksum: u64) -> Self {
        PageReference {
            key: Some(key),
            checksum,
            page: None,
        }
    }

    pub fn dirty(page: Page) -> Self {
        PageReference {
            key: None,
            checksum: 0,
            page: Some(Arc::new(page)),
        }
    }

    pub fn key(&self) -> Option<PageKey> {
        self.key
    }

    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    pub fn page(&self) -> Option<&Arc<Page>> {
        self.page.as_ref()
    }

    pub fn is_absent(&self) -> bool {
        self.key.is_none() && self.page.is_none()
    }

    pub fn is_dirty(&self) -> bool {
        self.key.is_none() && self.page.is_some()
    }

    /// Record the address the resident page was written to and drop the resident copy.
    pub fn set_persisted(&mut self, key: PageKey, checksum: u64) {
        self.key = Some(key);
        self.checksum = checksum;
        self.page = None;
    }

    /// Make the given page resident and detach the reference from its old address.
    pub fn set_dirty(&mut self, page: Arc<Page>) {
        self.key = None;
        self.checksum = 0;
        self.page = Some(page);
    }

    /// Mutable access to the resident page, copying it first if it is shared.
    pub fn page_mut(&mut self) -> Option<&mut Page> {
        self.page.as_mut().map(Arc::make_mut)
    }

    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        match self.key {
            None if self.page.is_some() => Err(EncodeError::UnpersistedReference),
            None => {
                buf.push(0);
                Ok(())
            }
            Some(key) => {
                buf.push(1);
                encode_key(buf, key, self.checksum);
                Ok(())
            }
        }
    }

    fn decode(r: &mut impl Read) -> Result<Self, DecodeError> {
        match codec::read_u8(r)? {
            0 => Ok(PageReference::default()),
            1 => decode_key(r),
            tag => Err(DecodeError::UnknownTag {
                what: "page reference",
                tag,
            }),
        }
    }
}

fn encode_key(buf: &mut Vec<u8>, key: PageKey, checksum: u64) {
    buf.extend_from_slice(&key.offset.to_le_bytes());
    buf.extend_from_slice(&key.size.to_le_bytes());
    buf.extend_from_slice(&checksum.to_le_bytes());
}

fn decode_key(r: &mut impl Read) -> Result<PageReference, DecodeError> {
    let offset = codec::read_u64(r)?;
    let size = codec::read_u32(r)?;
    let checksum = codec::read_u64(r)?;
    Ok(PageReference::persisted(PageKey { offset, size }, checksum))
}

/// The discriminant of a [`Page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Uber,
    Indirect,
    RevisionRoot,
    Node,
    Name,
}

impl PageKind {
    fn tag(self) -> u8 {
        match self {
            PageKind::Uber => 1,
            PageKind::Indirect => 2,
            PageKind::RevisionRoot => 3,
            PageKind::Node => 4,
            PageKind::Name => 5,
        }
    }
}

/// Errors raised while walking an indirect tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    KeyOutOfRange(u64),
    /// A reference inside the tree pointed at a page of the wrong kind.
    UnexpectedPage { expected: PageKind, found: PageKind },
}

impl From<KeyOutOfRange> for TreeError {
    fn from(e: KeyOutOfRange) -> Self {
        TreeError::KeyOutOfRange(e.0)
    }
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeError::KeyOutOfRange(key) => KeyOutOfRange(*key).fmt(f),
            TreeError::UnexpectedPage { expected, found } => {
                write!(f, "expected {expected:?} page, found {found:?} page")
            }
        }
    }
}

impl std::error::Error for TreeError {}

#[derive(Debug, Clone)]
pub enum Page {
    Uber(UberPage),
    Indirect(IndirectPage),
    RevisionRoot(RevisionRootPage),
    Node(NodePage),
    Name(NamePage),
}

impl Page {
    pub fn kind(&self) -> PageKind {
        match self {
            Page::Uber(_) => PageKind::Uber,
            Page::Indirect(_) => PageKind::Indirect,
            Page::RevisionRoot(_) => PageKind::RevisionRoot,
            Page::Node(_) => PageKind::Node,
            Page::Name(_) => PageKind::Name,
        }
    }

    /// The child references of this page. Empty for leaf pages.
    pub fn references_mut(&mut self) -> Vec<&mut PageReference> {
        match self {
            Page::Uber(uber) => vec![&mut uber.indirect],
            Page::Indirect(indirect) => indirect.children.iter_mut().collect(),
            Page::RevisionRoot(root) => vec![&mut root.node_indirect, &mut root.name_page],
            Page::Node(_) | Page::Name(_) => Vec::new(),
        }
    }

    /// Serialize the page. Every child reference must be absent or persisted.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = vec![self.kind().tag()];
        match self {
            Page::Uber(uber) => {
                buf.extend_from_slice(&uber.revision_count.to_le_bytes());
                uber.indirect.encode_to(&mut buf)?;
            }
            Page::Indirect(indirect) => indirect.encode_to(&mut buf)?,
            Page::RevisionRoot(root) => root.encode_to(&mut buf)?,
            Page::Node(node_page) => node_page.encode_to(&mut buf),
            Page::Name(names) => names.encode_to(&mut buf),
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = bytes;
        let page = match codec::read_u8(&mut r)? {
            1 => {
                let revision_count = codec::read_u64(&mut r)?;
                if revision_count == 0 {
                    return Err(DecodeError::Invalid("uber page revision count"));
                }
                Page::Uber(UberPage {
                    revision_count,
                    indirect: PageReference::decode(&mut r)?,
                })
            }
            2 => Page::Indirect(IndirectPage::decode(&mut r)?),
            3 => Page::RevisionRoot(RevisionRootPage::decode(&mut r)?),
            4 => Page::Node(NodePage::decode(&mut r)?),
            5 => Page::Name(NamePage::decode(&mut r)?),
            tag => return Err(DecodeError::UnknownTag { what: "page", tag }),
        };
        if !r.is_empty() {
            return Err(DecodeError::Invalid("trailing bytes after page"));
        }
        Ok(page)
    }
}

/// The root of roots: anchors the indirect tree of all revision root pages.
#[derive(Debug, Clone)]
pub struct UberPage {
    /// The number of revisions reachable from this page. Revision `revision_count - 1` is the
    /// newest.
    pub revision_count: u64,
    pub indirect: PageReference,
}

impl UberPage {
    /// The uber page of a fresh database: revision 0 holds an empty document made of the document
    /// root node only. Every page of the returned tree is dirty.
    pub fn bootstrap() -> Self {
        let mut node_page = NodePage::new(0, 0);
        node_page.set(0, Node::document_root());

        let mut root = RevisionRootPage {
            revision: 0,
            previous_revision: None,
            timestamp: 0,
            max_node_key: 0,
            node_indirect: PageReference::default(),
            name_page: PageReference::dirty(Page::Name(NamePage::default())),
        };
        place_resident(&mut root.node_indirect, 0, Page::Node(node_page));

        let mut uber = UberPage {
            revision_count: 1,
            indirect: PageReference::default(),
        };
        place_resident(&mut uber.indirect, 0, Page::RevisionRoot(root));
        uber
    }

    /// The newest revision reachable from this page.
    pub fn revision(&self) -> u64 {
        self.revision_count - 1
    }

    /// A copy of this page which makes room for one more revision. The indirect tree is shared
    /// until the new revision root is placed into it.
    pub fn next(&self) -> Self {
        UberPage {
            revision_count: self.revision_count + 1,
            indirect: self.indirect.clone(),
        }
    }
}

// Place a page into a tree made of resident or absent pages only.
fn place_resident(reference: &mut PageReference, key: u64, page: Page) {
    // UNWRAP: bootstrap keys are addressable and the tree holds no persisted pages to load.
    let leaf = prepare_leaf(reference, key, |_, _| -> Result<Arc<Page>, TreeError> {
        Ok(Arc::new(Page::Indirect(IndirectPage::default())))
    })
    .unwrap();
    *leaf = PageReference::dirty(page);
}

/// One level of an indirect tree.
#[derive(Debug, Clone)]
pub struct IndirectPage {
    children: Vec<PageReference>,
}

impl Default for IndirectPage {
    fn default() -> Self {
        IndirectPage {
            children: vec![PageReference::default(); INDIRECT_FANOUT],
        }
    }
}

impl IndirectPage {
    pub fn child(&self, offset: usize) -> &PageReference {
        &self.children[offset]
    }

    pub fn child_mut(&mut self, offset: usize) -> &mut PageReference {
        &mut self.children[offset]
    }

    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        let mut present = BitArray::<[u8; INDIRECT_FANOUT / 8], Lsb0>::ZERO;
        for (i, child) in self.children.iter().enumerate() {
            if child.is_dirty() {
                return Err(EncodeError::UnpersistedReference);
            }
            present.set(i, child.key.is_some());
        }
        buf.extend_from_slice(present.as_raw_slice());
        for child in self.children.iter() {
            if let Some(key) = child.key {
                encode_key(buf, key, child.checksum);
            }
        }
        Ok(())
    }

    fn decode(r: &mut impl Read) -> Result<Self, DecodeError> {
        let present =
            BitArray::<_, Lsb0>::new(codec::read_array::<{ INDIRECT_FANOUT / 8 }>(r)?);
        let mut page = IndirectPage::default();
        for i in present.iter_ones() {
            page.children[i] = decode_key(r)?;
        }
        Ok(page)
    }
}

/// The root of one revision.
#[derive(Debug, Clone)]
pub struct RevisionRootPage {
    pub revision: u64,
    /// The revision this one was derived from. Usually `revision - 1`, but a revision written
    /// after reverting to an older revision derives from that one.
    pub previous_revision: Option<u64>,
    /// Commit time in milliseconds since the unix epoch.
    pub timestamp: i64,
    pub max_node_key: u64,
    pub node_indirect: PageReference,
    pub name_page: PageReference,
}

impl RevisionRootPage {
    /// The root of a new revision, sharing the node tree and names of `base`.
    pub fn derive(base: &RevisionRootPage, revision: u64) -> Self {
        RevisionRootPage {
            revision,
            previous_revision: Some(base.revision),
            timestamp: base.timestamp,
            max_node_key: base.max_node_key,
            node_indirect: base.node_indirect.clone(),
            name_page: base.name_page.clone(),
        }
    }

    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        buf.extend_from_slice(&self.revision.to_le_bytes());
        codec::write_opt_u64(buf, self.previous_revision);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.max_node_key.to_le_bytes());
        self.node_indirect.encode_to(buf)?;
        self.name_page.encode_to(buf)
    }

    fn decode(r: &mut impl Read) -> Result<Self, DecodeError> {
        Ok(RevisionRootPage {
            revision: codec::read_u64(r)?,
            previous_revision: codec::read_opt_u64(r)?,
            timestamp: codec::read_i64(r)?,
            max_node_key: codec::read_u64(r)?,
            node_indirect: PageReference::decode(r)?,
            name_page: PageReference::decode(r)?,
        })
    }
}

/// A fixed-capacity page of node records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePage {
    page_key: u64,
    /// How many times this page key was written before this version.
    version: u64,
    slots: Vec<Option<Node>>,
}

impl NodePage {
    pub fn new(page_key: u64, version: u64) -> Self {
        NodePage {
            page_key,
            version,
            slots: vec![None; NODES_PER_PAGE],
        }
    }

    pub fn page_key(&self) -> u64 {
        self.page_key
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, offset: usize) -> Option<&Node> {
        self.slots[offset].as_ref()
    }

    pub fn set(&mut self, offset: usize, node: Node) {
        self.slots[offset] = Some(node);
    }

    pub fn is_set(&self, offset: usize) -> bool {
        self.slots[offset].is_some()
    }

    /// The occupied slots in offset order.
    pub fn nodes(&self) -> impl Iterator<Item = (usize, &Node)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|node| (i, node)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.page_key.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        let mut present = BitArray::<[u8; NODES_PER_PAGE / 8], Lsb0>::ZERO;
        for (i, _) in self.nodes() {
            present.set(i, true);
        }
        buf.extend_from_slice(present.as_raw_slice());
        for (_, node) in self.nodes() {
            node.encode_to(buf);
        }
    }

    fn decode(r: &mut impl Read) -> Result<Self, DecodeError> {
        let page_key = codec::read_u64(r)?;
        let version = codec::read_u64(r)?;
        let present = BitArray::<_, Lsb0>::new(codec::read_array::<{ NODES_PER_PAGE / 8 }>(r)?);
        let mut page = NodePage::new(page_key, version);
        for i in present.iter_ones() {
            let node = Node::decode(r)?;
            if node.key != addressing::node_key(page_key, i) {
                return Err(DecodeError::Invalid("node key does not match its slot"));
            }
            page.slots[i] = Some(node);
        }
        Ok(page)
    }
}

/// The interned names of a revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamePage {
    names: BTreeMap<NameKey, String>,
}

impl NamePage {
    pub fn get(&self, key: NameKey) -> Option<&str> {
        self.names.get(&key).map(String::as_str)
    }

    pub fn insert(&mut self, key: NameKey, name: String) {
        self.names.insert(key, name);
    }

    pub fn iter(&self) -> impl Iterator<Item = (NameKey, &str)> {
        self.names.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.names.len() as u32).to_le_bytes());
        for (key, name) in &self.names {
            buf.extend_from_slice(&key.to_le_bytes());
            codec::write_bytes(buf, name.as_bytes());
        }
    }

    fn decode(r: &mut impl Read) -> Result<Self, DecodeError> {
        let len = codec::read_u32(r)?;
        let mut names = BTreeMap::new();
        for _ in 0..len {
            let key = codec::read_u32(r)?;
            let name = String::from_utf8(codec::read_bytes(r)?)
                .map_err(|_| DecodeError::Invalid("name is not utf-8"))?;
            names.insert(key, name);
        }
        Ok(NamePage { names })
    }
}

/// Walk an indirect tree from `start` to the leaf reference for `key`.
///
/// Resident pages are used as they are; persisted pages are obtained through `load`. Returns
/// `None` if any page on the path was never created.
pub fn dereference_leaf<E>(
    start: &PageReference,
    key: u64,
    mut load: impl FnMut(PageKey, u64) -> Result<Arc<Page>, E>,
) -> Result<Option<PageReference>, E>
where
    E: From<TreeError>,
{
    let offsets = addressing::level_offsets(key).map_err(TreeError::from)?;
    let mut reference = start.clone();
    for offset in offsets {
        let page = match (&reference.page, reference.key) {
            (Some(page), _) => page.clone(),
            (None, Some(key)) => load(key, reference.checksum)?,
            (None, None) => return Ok(None),
        };
        reference = match &*page {
            Page::Indirect(indirect) => indirect.child(offset).clone(),
            other => {
                return Err(TreeError::UnexpectedPage {
                    expected: PageKind::Indirect,
                    found: other.kind(),
                }
                .into())
            }
        };
    }
    Ok((!reference.is_absent()).then_some(reference))
}

/// Make the path from `start` to the leaf reference for `key` resident and dirty, and return the
/// leaf reference.
///
/// Persisted indirect pages on the path are obtained through `load` and copied. Missing indirect
/// pages are created empty.
pub fn prepare_leaf<'a, E>(
    start: &'a mut PageReference,
    key: u64,
    mut load: impl FnMut(PageKey, u64) -> Result<Arc<Page>, E>,
) -> Result<&'a mut PageReference, E>
where
    E: From<TreeError>,
{
    let offsets = addressing::level_offsets(key).map_err(TreeError::from)?;
    let mut reference = start;
    for offset in offsets {
        let page = match (reference.page.take(), reference.key) {
            (Some(page), _) => page,
            (None, Some(key)) => load(key, reference.checksum)?,
            (None, None) => Arc::new(Page::Indirect(IndirectPage::default())),
        };
        reference.set_dirty(page);

        reference = match reference.page_mut() {
            Some(Page::Indirect(indirect)) => indirect.child_mut(offset),
            Some(other) => {
                return Err(TreeError::UnexpectedPage {
                    expected: PageKind::Indirect,
                    found: other.kind(),
                }
                .into())
            }
            None => unreachable!("page was made resident above"),
        };
    }
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_load(_: PageKey, _: u64) -> Result<Arc<Page>, TreeError> {
        panic!("tree is fully resident")
    }

    #[test]
    fn bootstrap_tree_reaches_document_root() {
        let uber = UberPage::bootstrap();
        assert_eq!(uber.revision(), 0);

        let root_ref = dereference_leaf(&uber.indirect, 0, no_load).unwrap().unwrap();
        let root = match root_ref.page().map(|p| &**p) {
            Some(Page::RevisionRoot(root)) => root.clone(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(root.previous_revision, None);

        let leaf = dereference_leaf(&root.node_indirect, 0, no_load).unwrap().unwrap();
        match leaf.page().map(|p| &**p) {
            Some(Page::Node(page)) => assert_eq!(page.get(0), Some(&Node::document_root())),
            other => panic!("unexpected {other:?}"),
        }

        assert!(dereference_leaf(&uber.indirect, 1, no_load).unwrap().is_none());
        assert!(dereference_leaf(&root.node_indirect, 1 << 20, no_load)
            .unwrap()
            .is_none());
    }

    #[test]
    fn prepare_leaf_copies_instead_of_mutating_shared_pages() {
        let original = UberPage::bootstrap();
        let mut next = original.next();
        let leaf = prepare_leaf(&mut next.indirect, 1, no_load).unwrap();
        assert!(leaf.is_absent());
        *leaf = PageReference::dirty(Page::Name(NamePage::default()));

        assert!(dereference_leaf(&next.indirect, 1, no_load).unwrap().is_some());
        assert!(dereference_leaf(&original.indirect, 1, no_load).unwrap().is_none());
        assert!(dereference_leaf(&next.indirect, 0, no_load).unwrap().is_some());
    }

    #[test]
    fn dirty_children_cannot_be_encoded() {
        let uber = UberPage::bootstrap();
        assert_eq!(
            Page::Uber(uber).encode().unwrap_err(),
            EncodeError::UnpersistedReference
        );
    }

    #[test]
    fn persisted_indirect_page_survives_encoding() {
        let mut indirect = IndirectPage::default();
        *indirect.child_mut(3) = PageReference::persisted(
            PageKey {
                offset: 4096,
                size: 77,
            },
            0xabcdef,
        );
        *indirect.child_mut(127) = PageReference::persisted(
            PageKey {
                offset: 20,
                size: 1,
            },
            1,
        );

        let bytes = Page::Indirect(indirect).encode().unwrap();
        let decoded = match Page::decode(&bytes).unwrap() {
            Page::Indirect(indirect) => indirect,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(decoded.child(3).key().map(|k| k.offset), Some(4096));
        assert_eq!(decoded.child(3).checksum(), 0xabcdef);
        assert_eq!(decoded.child(127).key().map(|k| k.size), Some(1));
        assert!(decoded.child(0).is_absent());
    }

    #[test]
    fn node_in_wrong_slot_is_rejected() {
        let mut page = NodePage::new(1, 0);
        page.set(5, Node::text(addressing::node_key(1, 6), 0, vec![]));
        let bytes = Page::Node(page).encode().unwrap();
        assert!(matches!(
            Page::decode(&bytes),
            Err(DecodeError::Invalid(_))
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = Page::Name(NamePage::default()).encode().unwrap();
        bytes.push(0);
        assert!(Page::decode(&bytes).is_err());
    }
}
