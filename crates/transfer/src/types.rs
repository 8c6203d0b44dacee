use diagup_protocol::PreCreateResponse;

use crate::TransferError;

/// Remote view of an upload: how many leading blocks it already holds and
/// how large each block is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDescriptor {
    /// Count of blocks `1..=resume_cursor` the endpoint already committed.
    pub resume_cursor: u64,
    /// Bytes per block, fixed for the whole upload.
    pub block_size: u64,
}

impl SessionDescriptor {
    pub fn new(resume_cursor: u64, block_size: u64) -> Self {
        Self {
            resume_cursor,
            block_size,
        }
    }

    /// Number of bytes the endpoint already holds for a file of `total_bytes`.
    pub fn resumed_bytes(&self, total_bytes: u64) -> u64 {
        self.resume_cursor
            .saturating_mul(self.block_size)
            .min(total_bytes)
    }
}

impl TryFrom<&PreCreateResponse> for SessionDescriptor {
    type Error = TransferError;

    fn try_from(resp: &PreCreateResponse) -> Result<Self, Self::Error> {
        if resp.block_bytes <= 0 {
            return Err(TransferError::InvalidConfiguration(format!(
                "block size must be positive, got {}",
                resp.block_bytes
            )));
        }
        if resp.partseq < 0 {
            return Err(TransferError::InvalidConfiguration(format!(
                "resume cursor must not be negative, got {}",
                resp.partseq
            )));
        }
        Ok(Self::new(resp.partseq as u64, resp.block_bytes as u64))
    }
}

/// One contiguous byte range of the file, addressed by its 1-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub index: u64,
    pub offset: u64,
    pub length: u64,
}

impl BlockDescriptor {
    /// Exclusive end offset of the block.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub total_blocks: u64,
    /// Blocks skipped because the endpoint already held them.
    pub skipped_blocks: u64,
    pub sent_blocks: u64,
    pub sent_bytes: u64,
}
