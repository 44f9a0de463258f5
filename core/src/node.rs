//! Node records stored in node pages.
//!
//! The storage engine only needs the structural links of a node (parent, first child and
//! siblings), its attribute and namespace lists, and opaque name keys and values. Interpreting
//! names and values is left to the tree model built on top.

use std::io::Read;

use crate::codec::{self, DecodeError};

/// The key of a node. Node keys are never reused within a database.
pub type NodeKey = u64;

/// The key of an interned name, see [`crate::page::NamePage`].
pub type NameKey = u32;

/// The key of the document root node, present in every revision.
pub const DOCUMENT_ROOT_KEY: NodeKey = 0;

/// The discriminant of a [`NodeKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    DocumentRoot,
    Element,
    Text,
    Attribute,
    Namespace,
    Deleted,
}

impl NodeType {
    pub fn name(self) -> &'static str {
        match self {
            NodeType::DocumentRoot => "document root",
            NodeType::Element => "element",
            NodeType::Text => "text",
            NodeType::Attribute => "attribute",
            NodeType::Namespace => "namespace",
            NodeType::Deleted => "deleted",
        }
    }

    fn tag(self) -> u8 {
        match self {
            NodeType::DocumentRoot => 0,
            NodeType::Element => 1,
            NodeType::Text => 2,
            NodeType::Attribute => 3,
            NodeType::Namespace => 4,
            NodeType::Deleted => 5,
        }
    }
}

/// Links of a node which takes part in the child/sibling structure of the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Structure {
    pub first_child: Option<NodeKey>,
    pub left_sibling: Option<NodeKey>,
    pub right_sibling: Option<NodeKey>,
    pub child_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    DocumentRoot(Structure),
    Element {
        structure: Structure,
        name: NameKey,
        uri: NameKey,
        attributes: Vec<NodeKey>,
        namespaces: Vec<NodeKey>,
    },
    Text {
        structure: Structure,
        value: Vec<u8>,
    },
    Attribute {
        name: NameKey,
        uri: NameKey,
        value: Vec<u8>,
    },
    Namespace {
        prefix: NameKey,
        uri: NameKey,
    },
    /// A tombstone. Shadows every older version of the node.
    Deleted,
}

/// A node record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub key: NodeKey,
    pub parent: Option<NodeKey>,
    /// The subtree hash. Maintained by the write transaction according to the configured hash
    /// kind, zero when hashing is disabled.
    pub hash: u64,
    pub kind: NodeKind,
}

impl Node {
    pub fn document_root() -> Self {
        Node {
            key: DOCUMENT_ROOT_KEY,
            parent: None,
            hash: 0,
            kind: NodeKind::DocumentRoot(Structure::default()),
        }
    }

    pub fn element(key: NodeKey, parent: NodeKey, name: NameKey, uri: NameKey) -> Self {
        Node {
            key,
            parent: Some(parent),
            hash: 0,
            kind: NodeKind::Element {
                structure: Structure::default(),
                name,
                uri,
                attributes: Vec::new(),
                namespaces: Vec::new(),
            },
        }
    }

    pub fn text(key: NodeKey, parent: NodeKey, value: Vec<u8>) -> Self {
        Node {
            key,
            parent: Some(parent),
            hash: 0,
            kind: NodeKind::Text {
                structure: Structure::default(),
                value,
            },
        }
    }

    pub fn attribute(
        key: NodeKey,
        parent: NodeKey,
        name: NameKey,
        uri: NameKey,
        value: Vec<u8>,
    ) -> Self {
        Node {
            key,
            parent: Some(parent),
            hash: 0,
            kind: NodeKind::Attribute { name, uri, value },
        }
    }

    pub fn namespace(key: NodeKey, parent: NodeKey, prefix: NameKey, uri: NameKey) -> Self {
        Node {
            key,
            parent: Some(parent),
            hash: 0,
            kind: NodeKind::Namespace { prefix, uri },
        }
    }

    /// A tombstone for the given key.
    pub fn deleted(key: NodeKey) -> Self {
        Node {
            key,
            parent: None,
            hash: 0,
            kind: NodeKind::Deleted,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::DocumentRoot(_) => NodeType::DocumentRoot,
            NodeKind::Element { .. } => NodeType::Element,
            NodeKind::Text { .. } => NodeType::Text,
            NodeKind::Attribute { .. } => NodeType::Attribute,
            NodeKind::Namespace { .. } => NodeType::Namespace,
            NodeKind::Deleted => NodeType::Deleted,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.kind, NodeKind::Deleted)
    }

    /// Whether the node takes part in the child/sibling structure.
    pub fn is_structural(&self) -> bool {
        self.structure().is_some()
    }

    pub fn structure(&self) -> Option<&Structure> {
        match &self.kind {
            NodeKind::DocumentRoot(s) => Some(s),
            NodeKind::Element { structure, .. } | NodeKind::Text { structure, .. } => {
                Some(structure)
            }
            _ => None,
        }
    }

    pub fn structure_mut(&mut self) -> Option<&mut Structure> {
        match &mut self.kind {
            NodeKind::DocumentRoot(s) => Some(s),
            NodeKind::Element { structure, .. } | NodeKind::Text { structure, .. } => {
                Some(structure)
            }
            _ => None,
        }
    }

    /// The name of an element or attribute, or the prefix of a namespace.
    pub fn name_key(&self) -> Option<NameKey> {
        match self.kind {
            NodeKind::Element { name, .. } | NodeKind::Attribute { name, .. } => Some(name),
            NodeKind::Namespace { prefix, .. } => Some(prefix),
            _ => None,
        }
    }

    pub fn uri_key(&self) -> Option<NameKey> {
        match self.kind {
            NodeKind::Element { uri, .. }
            | NodeKind::Attribute { uri, .. }
            | NodeKind::Namespace { uri, .. } => Some(uri),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        match &self.kind {
            NodeKind::Text { value, .. } | NodeKind::Attribute { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn attributes(&self) -> &[NodeKey] {
        match &self.kind {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    pub fn namespaces(&self) -> &[NodeKey] {
        match &self.kind {
            NodeKind::Element { namespaces, .. } => namespaces,
            _ => &[],
        }
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.node_type().tag());
        buf.extend_from_slice(&self.key.to_le_bytes());
        codec::write_opt_u64(buf, self.parent);
        buf.extend_from_slice(&self.hash.to_le_bytes());

        match &self.kind {
            NodeKind::DocumentRoot(structure) => encode_structure(buf, structure),
            NodeKind::Element {
                structure,
                name,
                uri,
                attributes,
                namespaces,
            } => {
                encode_structure(buf, structure);
                buf.extend_from_slice(&name.to_le_bytes());
                buf.extend_from_slice(&uri.to_le_bytes());
                encode_keys(buf, attributes);
                encode_keys(buf, namespaces);
            }
            NodeKind::Text { structure, value } => {
                encode_structure(buf, structure);
                codec::write_bytes(buf, value);
            }
            NodeKind::Attribute { name, uri, value } => {
                buf.extend_from_slice(&name.to_le_bytes());
                buf.extend_from_slice(&uri.to_le_bytes());
                codec::write_bytes(buf, value);
            }
            NodeKind::Namespace { prefix, uri } => {
                buf.extend_from_slice(&prefix.to_le_bytes());
                buf.extend_from_slice(&uri.to_le_bytes());
            }
            NodeKind::Deleted => {}
        }
    }

    pub fn decode(r: &mut impl Read) -> Result<Self, DecodeError> {
        let tag = codec::read_u8(r)?;
        let key = codec::read_u64(r)?;
        let parent = codec::read_opt_u64(r)?;
        let hash = codec::read_u64(r)?;

        let kind = match tag {
            0 => NodeKind::DocumentRoot(decode_structure(r)?),
            1 => NodeKind::Element {
                structure: decode_structure(r)?,
                name: codec::read_u32(r)?,
                uri: codec::read_u32(r)?,
                attributes: decode_keys(r)?,
                namespaces: decode_keys(r)?,
            },
            2 => NodeKind::Text {
                structure: decode_structure(r)?,
                value: codec::read_bytes(r)?,
            },
            3 => NodeKind::Attribute {
                name: codec::read_u32(r)?,
                uri: codec::read_u32(r)?,
                value: codec::read_bytes(r)?,
            },
            4 => NodeKind::Namespace {
                prefix: codec::read_u32(r)?,
                uri: codec::read_u32(r)?,
            },
            5 => NodeKind::Deleted,
            tag => return Err(DecodeError::UnknownTag { what: "node", tag }),
        };

        Ok(Node {
            key,
            parent,
            hash,
            kind,
        })
    }
}

fn encode_structure(buf: &mut Vec<u8>, structure: &Structure) {
    codec::write_opt_u64(buf, structure.first_child);
    codec::write_opt_u64(buf, structure.left_sibling);
    codec::write_opt_u64(buf, structure.right_sibling);
    buf.extend_from_slice(&structure.child_count.to_le_bytes());
}

fn decode_structure(r: &mut impl Read) -> Result<Structure, DecodeError> {
    Ok(Structure {
        first_child: codec::read_opt_u64(r)?,
        left_sibling: codec::read_opt_u64(r)?,
        right_sibling: codec::read_opt_u64(r)?,
        child_count: codec::read_u64(r)?,
    })
}

fn encode_keys(buf: &mut Vec<u8>, keys: &[NodeKey]) {
    buf.extend_from_slice(&(keys.len() as u32).to_le_bytes());
    for key in keys {
        buf.extend_from_slice(&key.to_le_bytes());
    }
}

fn decode_keys(r: &mut impl Read) -> Result<Vec<NodeKey>, DecodeError> {
    let len = codec::read_u32(r)?;
    (0..len).map(|_| codec::read_u64(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_with_lists_survives_encoding() {
        let mut node = Node::element(7, 3, 11, 0);
        node.hash = 0xdead_beef;
        if let NodeKind::Element {
            structure,
            attributes,
            namespaces,
            ..
        } = &mut node.kind
        {
            structure.first_child = Some(9);
            structure.right_sibling = Some(8);
            structure.child_count = 1;
            attributes.extend([12, 13]);
            namespaces.push(14);
        }

        let mut buf = Vec::new();
        node.encode_to(&mut buf);
        let decoded = Node::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded.attributes(), &[12, 13]);
        assert_eq!(decoded.structure().unwrap().left_sibling, None);
    }

    #[test]
    fn truncated_text_is_rejected() {
        let mut buf = Vec::new();
        Node::text(1, 0, b"hello".to_vec()).encode_to(&mut buf);
        buf.truncate(buf.len() - 2);
        assert_eq!(Node::decode(&mut &buf[..]), Err(DecodeError::Truncated));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut buf = Vec::new();
        Node::deleted(1).encode_to(&mut buf);
        buf[0] = 42;
        assert!(matches!(
            Node::decode(&mut &buf[..]),
            Err(DecodeError::UnknownTag { tag: 42, .. })
        ));
    }

    #[test]
    fn only_tree_nodes_are_structural() {
        assert!(Node::document_root().is_structural());
        assert!(Node::text(1, 0, vec![]).is_structural());
        assert!(!Node::attribute(2, 1, 0, 0, vec![]).is_structural());
        assert!(!Node::deleted(3).is_structural());
        assert_eq!(Node::namespace(4, 1, 5, 6).name_key(), Some(5));
    }
}
