//! Upload error types.

/// Errors produced while uploading a bundle.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("endpoint error: {0}")]
    Endpoint(String),

    #[error("unknown upload: {0}")]
    UnknownUpload(String),

    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("upload rejected: {0}")]
    Rejected(String),

    #[error("cancelled")]
    Cancelled,

    #[error("transfer error: {0}")]
    Transfer(#[from] diagup_transfer::TransferError),
}
