//! Core types of the revtree storage engine.
//!
//! This crate defines the page schema of a revtree database, the addressing scheme of its
//! indirect trees and the revisioning strategies which rebuild node pages from their stored
//! versions. It performs no I/O: the engine in the `revtree` crate decides where pages come from.

pub mod addressing;
pub mod codec;
pub mod node;
pub mod page;
pub mod revisioning;

pub use addressing::{node_page_key, node_page_offset, KeyOutOfRange};
pub use codec::{DecodeError, EncodeError};
pub use node::{NameKey, Node, NodeKey, NodeKind, NodeType, Structure, DOCUMENT_ROOT_KEY};
pub use page::{
    IndirectPage, NamePage, NodePage, Page, PageKey, PageKind, PageReference, RevisionRootPage,
    TreeError, UberPage,
};
pub use revisioning::{NodePageContainer, Revisioning};
