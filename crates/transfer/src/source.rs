//! Random-access byte providers for the file being uploaded.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::TransferError;
use crate::types::BlockDescriptor;

/// Positioned reads plus a single terminal close.
///
/// `read_at` may be called concurrently from several tasks. Reading after
/// `close` is a programming error reported as [`TransferError::UseAfterClose`].
pub trait ByteRangeSource: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read; `0` means end of data.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, TransferError>;

    /// Releases the underlying medium.
    fn close(&self) -> Result<(), TransferError>;
}

impl<T: ByteRangeSource + ?Sized> ByteRangeSource for Arc<T> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, TransferError> {
        (**self).read_at(buf, offset)
    }

    fn close(&self) -> Result<(), TransferError> {
        (**self).close()
    }
}

impl<T: ByteRangeSource + ?Sized> ByteRangeSource for Box<T> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, TransferError> {
        (**self).read_at(buf, offset)
    }

    fn close(&self) -> Result<(), TransferError> {
        (**self).close()
    }
}

/// Reads the full contents of `block`.
///
/// A source that runs out of data before `block.length` bytes, or fails
/// with an I/O error, yields [`TransferError::ReadFailed`].
pub fn read_block(
    source: &dyn ByteRangeSource,
    block: &BlockDescriptor,
) -> Result<Vec<u8>, TransferError> {
    let length = usize::try_from(block.length).map_err(|_| {
        TransferError::InvalidConfiguration(format!(
            "block length {} exceeds addressable memory",
            block.length
        ))
    })?;

    let mut buf = vec![0u8; length];
    let mut filled = 0;
    while filled < length {
        let offset = block.offset + filled as u64;
        match source.read_at(&mut buf[filled..], offset) {
            Ok(0) => {
                return Err(TransferError::ReadFailed {
                    index: block.index,
                    offset,
                    source: std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!("short read: {filled} of {length} bytes"),
                    ),
                });
            }
            Ok(n) => filled += n,
            Err(TransferError::Io(e)) if e.kind() == ErrorKind::Interrupted => continue,
            Err(TransferError::Io(e)) => {
                return Err(TransferError::ReadFailed {
                    index: block.index,
                    offset,
                    source: e,
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(buf)
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// A local file opened for concurrent positioned reads.
#[derive(Debug)]
pub struct FileSource {
    file: RwLock<Option<File>>,
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// Opens `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: RwLock::new(Some(file)),
            path: path.to_path_buf(),
            len,
        })
    }

    /// Size of the file when it was opened.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.file
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl ByteRangeSource for FileSource {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, TransferError> {
        let guard = self.file.read().unwrap_or_else(PoisonError::into_inner);
        let file = guard.as_ref().ok_or(TransferError::UseAfterClose)?;
        Ok(positioned_read(file, buf, offset)?)
    }

    fn close(&self) -> Result<(), TransferError> {
        // Dropping the handle closes the descriptor.
        self.file
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

#[cfg(unix)]
fn positioned_read(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn positioned_read(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// An in-memory byte source.
#[derive(Debug)]
pub struct MemorySource {
    data: Vec<u8>,
    closed: AtomicBool,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl ByteRangeSource for MemorySource {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, TransferError> {
        if self.is_closed() {
            return Err(TransferError::UseAfterClose);
        }
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn close(&self) -> Result<(), TransferError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SharedSource
// ---------------------------------------------------------------------------

/// Close-once wrapper shared by the coordinator and its block tasks.
///
/// The source is closed either explicitly through [`close_once`] by the
/// last holder, or when the wrapper is dropped, whichever comes first.
/// Since every block task holds an `Arc` to the wrapper while reading,
/// the close can never overtake a read.
///
/// [`close_once`]: SharedSource::close_once
pub(crate) struct SharedSource {
    inner: Box<dyn ByteRangeSource>,
    closed: AtomicBool,
}

impl SharedSource {
    pub(crate) fn new(inner: Box<dyn ByteRangeSource>) -> Self {
        Self {
            inner,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn close_once(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.inner.close() {
            warn!(error = %e, "failed to close byte source");
        }
    }
}

impl ByteRangeSource for SharedSource {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, TransferError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransferError::UseAfterClose);
        }
        self.inner.read_at(buf, offset)
    }

    fn close(&self) -> Result<(), TransferError> {
        self.close_once();
        Ok(())
    }
}

impl Drop for SharedSource {
    fn drop(&mut self) {
        self.close_once();
    }
}
