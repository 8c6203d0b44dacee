//! Wire types for uploader/endpoint communication.
//!
//! The endpoint dictates the block size and reports how many leading
//! blocks it already holds (`partseq`); the uploader sends the remaining
//! blocks addressed by their 1-based index and then asks the endpoint to
//! commit the file.

pub mod messages;
pub mod types;

pub use messages::{
    BlockHeader, CompleteUploadRequest, CompleteUploadResponse, PreCreateRequest,
    PreCreateResponse,
};
pub use types::{UploadProgress, UploadStatus};
