//! The page file.
//!
//! Layout: the primary beacon at offset 0, followed by the pages of every commit in commit order.
//! Each commit ends with its uber page and a trailing copy of the beacon, so the last
//! [`BEACON_LEN`] bytes of the file always hold the trailing beacon of the last commit.

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt as _,
    path::{Path, PathBuf},
};

use revtree_core::{Page, PageKey, PageReference, UberPage};

use super::{page_checksum, Beacon, IoFactory, Reader, Writer, BEACON_LEN};
use crate::{options::PanicOnSyncMode, ConsistencyError, Result};

/// Opens readers and writers on a page file.
pub struct FileFactory {
    path: PathBuf,
    panic_on_sync: Option<PanicOnSyncMode>,
}

impl FileFactory {
    pub fn new(path: impl Into<PathBuf>, panic_on_sync: Option<PanicOnSyncMode>) -> Self {
        Self {
            path: path.into(),
            panic_on_sync,
        }
    }

    /// Create an empty page file. Fails if the file exists.
    pub fn create(path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IoFactory for FileFactory {
    fn reader(&self) -> Result<Box<dyn Reader>> {
        let file = OpenOptions::new().read(true).open(&self.path)?;
        Ok(Box::new(FileReader { file }))
    }

    fn writer(&self) -> Result<Box<dyn Writer>> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        Ok(Box::new(FileWriter {
            reader: FileReader { file },
            panic_on_sync: self.panic_on_sync,
        }))
    }
}

/// Read both beacons of the page file at `path` without validating them.
///
/// Returns `(primary, trailing)`.
pub fn read_beacons(path: &Path) -> Result<(Beacon, Beacon)> {
    let file = OpenOptions::new().read(true).open(path)?;
    beacons(&file)
}

fn beacons(file: &File) -> Result<(Beacon, Beacon)> {
    let len = file.metadata()?.len();
    if len < 2 * BEACON_LEN {
        return Err(ConsistencyError::MissingBeacon.into());
    }

    let mut buf = [0u8; BEACON_LEN as usize];
    file.read_exact_at(&mut buf, 0)?;
    let primary = Beacon::decode(&buf);
    file.read_exact_at(&mut buf, len - BEACON_LEN)?;
    let trailing = Beacon::decode(&buf);
    Ok((primary, trailing))
}

pub struct FileReader {
    file: File,
}

impl Reader for FileReader {
    fn read(&mut self, key: PageKey, checksum: u64) -> Result<Page> {
        let mut buf = vec![0u8; key.size as usize];
        self.file.read_exact_at(&mut buf, key.offset)?;
        if page_checksum(&buf) != checksum {
            return Err(ConsistencyError::PageChecksum { offset: key.offset }.into());
        }
        Ok(Page::decode(&buf)?)
    }

    fn read_first_reference(&mut self) -> Result<(PageReference, UberPage)> {
        let (primary, trailing) = beacons(&self.file)?;
        if primary != trailing {
            tracing::error!(?primary, ?trailing, "beacons disagree");
            return Err(ConsistencyError::BeaconMismatch {
                primary,
                secondary: trailing,
            }
            .into());
        }

        let key = PageKey {
            offset: primary.offset,
            size: primary.size,
        };
        match self.read(key, primary.checksum)? {
            Page::Uber(uber) => Ok((PageReference::persisted(key, primary.checksum), uber)),
            other => Err(ConsistencyError::MalformedTree(format!(
                "beacon points at a {:?} page",
                other.kind()
            ))
            .into()),
        }
    }
}

pub struct FileWriter {
    reader: FileReader,
    panic_on_sync: Option<PanicOnSyncMode>,
}

impl FileWriter {
    fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.reader.file.metadata()?.len().max(BEACON_LEN);
        self.reader.file.write_all_at(bytes, offset)?;
        Ok(offset)
    }
}

impl Reader for FileWriter {
    fn read(&mut self, key: PageKey, checksum: u64) -> Result<Page> {
        self.reader.read(key, checksum)
    }

    fn read_first_reference(&mut self) -> Result<(PageReference, UberPage)> {
        self.reader.read_first_reference()
    }
}

impl Writer for FileWriter {
    fn write(&mut self, page: &Page) -> Result<(PageKey, u64)> {
        let bytes = page.encode()?;
        let checksum = page_checksum(&bytes);
        let offset = self.append(&bytes)?;
        let key = PageKey {
            offset,
            size: bytes.len() as u32,
        };
        Ok((key, checksum))
    }

    fn write_first_reference(&mut self, uber: &UberPage) -> Result<Beacon> {
        let (key, checksum) = self.write(&Page::Uber(uber.clone()))?;
        let beacon = Beacon {
            offset: key.offset,
            size: key.size,
            checksum,
        };

        if let Some(PanicOnSyncMode::PostPages) = self.panic_on_sync {
            panic!("panic_on_sync: post-pages");
        }

        self.append(&beacon.encode())?;
        self.reader.file.sync_data()?;

        if let Some(PanicOnSyncMode::PostTrailingBeacon) = self.panic_on_sync {
            panic!("panic_on_sync: post-trailing-beacon");
        }

        self.reader.file.write_all_at(&beacon.encode(), 0)?;
        self.reader.file.sync_data()?;
        Ok(beacon)
    }
}
