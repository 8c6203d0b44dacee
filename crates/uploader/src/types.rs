//! Data types for the upload flow.

use diagup_protocol::UploadProgress;
use diagup_transfer::{DEFAULT_CONCURRENCY, RetryPolicy, UploadSummary};

/// Tuning knobs for [`BundleUploader`](crate::BundleUploader).
#[derive(Debug, Clone, PartialEq)]
pub struct UploaderOptions {
    /// Maximum number of blocks in flight.
    pub concurrency: usize,
    /// Per-block retry schedule.
    pub retry: RetryPolicy,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Event emitted while a bundle is uploaded.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// The endpoint accepted the upload.
    Started {
        upload_id: String,
        name: String,
        total_bytes: u64,
        block_size: u64,
        /// Blocks the endpoint already held from an earlier attempt.
        resume_cursor: u64,
    },
    /// A block was acknowledged.
    Progress(UploadProgress),
    /// The endpoint committed the bundle.
    Completed { upload_id: String, path: String },
    /// The upload failed.
    Failed { name: String, error: String },
}

/// Outcome of a successful bundle upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub upload_id: String,
    pub name: String,
    /// Location reported by the endpoint, if any.
    pub remote_path: String,
    pub total_bytes: u64,
    pub summary: UploadSummary,
}
