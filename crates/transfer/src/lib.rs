//! Block upload with bounded concurrency and resume support.
//!
//! A file is split into fixed-size, 1-based blocks whose size is dictated
//! by the remote endpoint. Blocks the endpoint already holds (the resume
//! cursor) are skipped; the rest are read from a [`ByteRangeSource`] and
//! handed to a [`BlockTransmitter`], at most `concurrency` at a time.
//! Once every block is acknowledged the [`UploadFinalizer`] commits the
//! upload. The byte source is closed exactly once, after every in-flight
//! block has finished with it.

mod capability;
mod coordinator;
mod limiter;
pub mod plan;
mod progress;
mod retry;
mod source;
mod store;
mod types;
mod validation;

pub use capability::{
    BlockTransmitter, CapabilityFuture, FinalizeFn, TransmitFn, UploadFinalizer, finalize_fn,
    transmit_fn,
};
pub use coordinator::UploadCoordinator;
pub use limiter::{BlockPermit, ConcurrencyLimiter};
pub use progress::{ProgressCallback, ProgressState, ProgressTransmitter, SpeedCalculator};
pub use retry::{RetryPolicy, RetryTransmitter};
pub use source::{ByteRangeSource, FileSource, MemorySource, read_block};
pub use store::BlockStore;
pub use types::{BlockDescriptor, SessionDescriptor, UploadSummary};
pub use validation::validate_upload_name;

/// Default number of blocks in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Boxed error returned by injected collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("block {index} out of range (total blocks: {total_blocks})")]
    OutOfRange { index: u64, total_blocks: u64 },

    #[error("failed to open byte source: {0}")]
    SourceOpenFailed(#[source] BoxError),

    #[error("failed to read block {index} at offset {offset}: {source}")]
    ReadFailed {
        index: u64,
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to transmit block {index}: {source}")]
    TransmitFailed {
        index: u64,
        #[source]
        source: BoxError,
    },

    #[error("finalize failed: {0}")]
    FinalizeFailed(#[source] BoxError),

    #[error("byte source used after close")]
    UseAfterClose,

    #[error("task for block {index} panicked")]
    BlockTaskPanicked { index: u64 },

    #[error("block {index} has {actual} bytes, expected {expected}")]
    BlockLengthMismatch {
        index: u64,
        expected: u64,
        actual: u64,
    },

    #[error("upload incomplete: {missing} blocks missing")]
    IncompleteUpload { missing: u64 },

    #[error("upload cancelled")]
    Cancelled,

    #[error("invalid upload name: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}
