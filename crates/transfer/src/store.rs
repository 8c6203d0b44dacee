//! Receiving-side staging area for one upload.
//!
//! Blocks land at their final offset in `data.part`; `manifest.json`
//! records which indices were written so an interrupted upload can report
//! its resume cursor after a restart. The manifest keeps the length of the
//! contiguous prefix plus the indices received past it, so its size is
//! bounded by how far out of order blocks arrive.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::plan;

const DATA_FILE: &str = "data.part";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    block_size: u64,
    total_bytes: u64,
    /// Blocks `1..=contiguous` are all present.
    contiguous: u64,
    /// Present blocks above `contiguous + 1`.
    received: BTreeSet<u64>,
}

impl Manifest {
    fn contains(&self, index: u64) -> bool {
        index <= self.contiguous || self.received.contains(&index)
    }

    fn received_count(&self) -> u64 {
        self.contiguous + self.received.len() as u64
    }

    /// Records `index`; returns `false` if it was already present.
    fn insert(&mut self, index: u64) -> bool {
        if self.contains(index) {
            return false;
        }
        if index == self.contiguous + 1 {
            self.contiguous = index;
            while self.received.remove(&(self.contiguous + 1)) {
                self.contiguous += 1;
            }
        } else {
            self.received.insert(index);
        }
        true
    }
}

/// Staging directory collecting the blocks of one file.
#[derive(Debug)]
pub struct BlockStore {
    dir: PathBuf,
    data: File,
    manifest: Manifest,
    total_blocks: u64,
}

impl BlockStore {
    /// Opens the staging directory `dir`, creating it if needed.
    ///
    /// Progress from an earlier store with the same geometry is kept;
    /// anything else is discarded and the store starts empty.
    pub fn open(
        dir: impl AsRef<Path>,
        block_size: u64,
        total_bytes: u64,
    ) -> Result<Self, TransferError> {
        let dir = dir.as_ref().to_path_buf();
        let total_blocks = plan::total_blocks(total_bytes, block_size)?;
        fs::create_dir_all(&dir)?;

        let fresh = Manifest {
            block_size,
            total_bytes,
            contiguous: 0,
            received: BTreeSet::new(),
        };
        let (manifest, reuse) = match read_manifest(&dir.join(MANIFEST_FILE)) {
            Some(m) if m.block_size == block_size && m.total_bytes == total_bytes => (m, true),
            Some(_) => {
                warn!(dir = %dir.display(), "discarding staged blocks with different geometry");
                (fresh, false)
            }
            None => (fresh, false),
        };

        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(!reuse)
            .open(dir.join(DATA_FILE))?;

        let store = Self {
            dir,
            data,
            manifest,
            total_blocks,
        };
        if !reuse {
            store.save_manifest()?;
        }
        debug!(
            dir = %store.dir.display(),
            received = store.manifest.received_count(),
            total_blocks,
            "block store opened"
        );
        Ok(store)
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Writes block `index` at its offset and records it.
    ///
    /// Writing the same block twice overwrites it.
    pub fn write_block(&mut self, index: u64, data: &[u8]) -> Result<(), TransferError> {
        let block = plan::block_range(index, self.manifest.total_bytes, self.manifest.block_size)?;
        if data.len() as u64 != block.length {
            return Err(TransferError::BlockLengthMismatch {
                index,
                expected: block.length,
                actual: data.len() as u64,
            });
        }

        self.data.seek(SeekFrom::Start(block.offset))?;
        self.data.write_all(data)?;
        self.data.flush()?;

        if self.manifest.insert(index) {
            self.save_manifest()?;
        }
        Ok(())
    }

    /// Number of leading blocks `1..=n` that are all present.
    pub fn resume_cursor(&self) -> u64 {
        self.manifest.contiguous
    }

    /// Indices not received yet, ascending.
    pub fn missing_blocks(&self) -> Vec<u64> {
        (self.manifest.contiguous + 1..=self.total_blocks)
            .filter(|i| !self.manifest.received.contains(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.manifest.received_count() == self.total_blocks
    }

    /// Moves the assembled file to `dest` and removes the staging directory.
    ///
    /// Returns the size of the committed file.
    pub fn commit(self, dest: impl AsRef<Path>) -> Result<u64, TransferError> {
        let missing = self.total_blocks - self.manifest.received_count();
        if missing > 0 {
            return Err(TransferError::IncompleteUpload { missing });
        }

        let dest = dest.as_ref();
        self.data.set_len(self.manifest.total_bytes)?;
        self.data.sync_all()?;
        drop(self.data);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(self.dir.join(DATA_FILE), dest)?;
        fs::remove_dir_all(&self.dir)?;

        info!(
            dest = %dest.display(),
            bytes = self.manifest.total_bytes,
            "upload committed"
        );
        Ok(self.manifest.total_bytes)
    }

    fn save_manifest(&self) -> Result<(), TransferError> {
        let tmp = self.dir.join(format!("{MANIFEST_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec(&self.manifest)?)?;
        fs::rename(&tmp, self.dir.join(MANIFEST_FILE))?;
        Ok(())
    }
}

fn read_manifest(path: &Path) -> Option<Manifest> {
    let raw = fs::read(path).ok()?;
    match serde_json::from_slice(&raw) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable manifest");
            None
        }
    }
}
