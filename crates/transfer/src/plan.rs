//! Block boundary arithmetic.
//!
//! Block `i` (1-based) covers `[(i-1)*block_size, min(i*block_size, total_bytes))`.
//! Every block is `block_size` long except possibly the last one.

use crate::TransferError;
use crate::types::{BlockDescriptor, SessionDescriptor};

/// Number of blocks needed for `total_bytes` (ceiling division).
///
/// An empty file has zero blocks.
pub fn total_blocks(total_bytes: u64, block_size: u64) -> Result<u64, TransferError> {
    if block_size == 0 {
        return Err(TransferError::InvalidConfiguration(
            "block size must be positive".into(),
        ));
    }
    Ok(total_bytes.div_ceil(block_size))
}

/// Byte range of block `index`, valid for `1 <= index <= total_blocks`.
pub fn block_range(
    index: u64,
    total_bytes: u64,
    block_size: u64,
) -> Result<BlockDescriptor, TransferError> {
    let total = total_blocks(total_bytes, block_size)?;
    if index == 0 || index > total {
        return Err(TransferError::OutOfRange {
            index,
            total_blocks: total,
        });
    }

    let offset = (index - 1) * block_size;
    let length = block_size.min(total_bytes - offset);
    Ok(BlockDescriptor {
        index,
        offset,
        length,
    })
}

/// Blocks still owed to the endpoint, in ascending index order.
pub fn remaining_blocks(
    session: &SessionDescriptor,
    total_bytes: u64,
) -> Result<RemainingBlocks, TransferError> {
    let total = total_blocks(total_bytes, session.block_size)?;
    Ok(RemainingBlocks {
        next: session.resume_cursor.saturating_add(1),
        total_blocks: total,
        total_bytes,
        block_size: session.block_size,
    })
}

/// Iterator over the blocks after the resume cursor.
#[derive(Debug, Clone)]
pub struct RemainingBlocks {
    next: u64,
    total_blocks: u64,
    total_bytes: u64,
    block_size: u64,
}

impl Iterator for RemainingBlocks {
    type Item = BlockDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.total_blocks {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let offset = (index - 1) * self.block_size;
        Some(BlockDescriptor {
            index,
            offset,
            length: self.block_size.min(self.total_bytes - offset),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.total_blocks + 1).saturating_sub(self.next);
        let left = usize::try_from(left).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}
