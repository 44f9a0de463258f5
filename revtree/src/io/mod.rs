//! Durable page storage.
//!
//! The engine reaches storage only through the [`IoFactory`], [`Reader`] and [`Writer`] traits.
//! [`file`] provides the implementation backed by a single append-only page file.

use revtree_core::{Page, PageKey, PageReference, UberPage};

use crate::Result;

mod beacon;
pub mod file;

pub use beacon::{Beacon, BEACON_LEN};

/// The checksum stored next to every page address.
pub fn page_checksum(bytes: &[u8]) -> u64 {
    twox_hash::XxHash64::oneshot(0, bytes)
}

/// Reads pages from durable storage. Every transaction owns its own reader.
pub trait Reader: Send {
    /// Read the page at `key` and verify it against `checksum`.
    fn read(&mut self, key: PageKey, checksum: u64) -> Result<Page>;

    /// Locate the uber page of the last commit through the beacons and read it.
    fn read_first_reference(&mut self) -> Result<(PageReference, UberPage)>;
}

/// Appends pages to durable storage.
pub trait Writer: Reader {
    /// Append a page whose children are all persisted, returning its address and checksum.
    fn write(&mut self, page: &Page) -> Result<(PageKey, u64)>;

    /// Append the uber page and make it the durable head of the storage.
    fn write_first_reference(&mut self, uber: &UberPage) -> Result<Beacon>;
}

/// Hands out readers and writers on one storage.
pub trait IoFactory: Send + Sync {
    fn reader(&self) -> Result<Box<dyn Reader>>;

    fn writer(&self) -> Result<Box<dyn Writer>>;
}

/// Write every dirty page reachable from `reference`, children before parents, and return the
/// number of pages written.
///
/// After this returns `reference` and all references below it are persisted.
pub fn write_tree(writer: &mut dyn Writer, reference: &mut PageReference) -> Result<usize> {
    if !reference.is_dirty() {
        return Ok(0);
    }

    let mut written = 0;
    if let Some(page) = reference.page_mut() {
        for child in page.references_mut() {
            written += write_tree(writer, child)?;
        }
    }

    if let Some(page) = reference.page() {
        let (key, checksum) = writer.write(page)?;
        reference.set_persisted(key, checksum);
        written += 1;
    }
    Ok(written)
}
