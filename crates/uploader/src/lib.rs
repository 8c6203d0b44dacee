//! Diagnostic bundle upload flow.
//!
//! This crate drives one bundle file from local disk to an upload
//! endpoint. It is transport agnostic: callers provide an
//! [`UploadEndpoint`] implementation, and [`LocalEndpoint`] serves as a
//! directory-backed endpoint for local use and tests.
//!
//! # Pipeline
//!
//! 1. **Stat** the bundle file
//! 2. **Pre-create** the upload; the endpoint returns the block size and
//!    how many leading blocks it already holds
//! 3. **Upload** the remaining blocks with bounded concurrency, retrying
//!    transient failures per block
//! 4. **Complete** the upload so the endpoint commits the file

pub mod endpoint;
pub mod error;
pub mod local;
pub mod types;
pub mod upload;

pub use endpoint::{EndpointFinalizer, EndpointFuture, EndpointTransmitter, UploadEndpoint};
pub use error::UploadError;
pub use local::{LocalEndpoint, LocalEndpointConfig};
pub use types::{UploadEvent, UploadResult, UploaderOptions};
pub use upload::BundleUploader;
