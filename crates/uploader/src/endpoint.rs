//! Upload endpoint trait and its adapters to the transfer capabilities.
//!
//! `UploadEndpoint` is implemented by whatever carries blocks to the
//! remote side. Using a trait keeps the upload flow decoupled from
//! transport and testable with mocks.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use diagup_protocol::{
    BlockHeader, CompleteUploadRequest, CompleteUploadResponse, PreCreateRequest,
    PreCreateResponse,
};
use diagup_transfer::{BlockTransmitter, BoxError, CapabilityFuture, UploadFinalizer};

use crate::error::UploadError;

/// Future returned by [`UploadEndpoint`] methods.
pub type EndpointFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Abstract remote side of an upload.
pub trait UploadEndpoint: Send + Sync {
    /// Opens an upload, or reopens an interrupted one for the same name.
    fn pre_create(&self, req: PreCreateRequest) -> EndpointFuture<'_, PreCreateResponse>;

    /// Stores one block. Blocks may arrive in any order.
    fn upload_block<'a>(&'a self, header: BlockHeader, data: &'a [u8])
    -> EndpointFuture<'a, ()>;

    /// Commits the upload once every block was stored.
    fn complete(&self, req: CompleteUploadRequest)
    -> EndpointFuture<'_, CompleteUploadResponse>;

    /// Returns a human-readable identifier for logs.
    fn endpoint_id(&self) -> &str;
}

/// Sends the blocks of one upload to an endpoint.
pub struct EndpointTransmitter {
    endpoint: Arc<dyn UploadEndpoint>,
    upload_id: String,
}

impl EndpointTransmitter {
    pub fn new(endpoint: Arc<dyn UploadEndpoint>, upload_id: impl Into<String>) -> Self {
        Self {
            endpoint,
            upload_id: upload_id.into(),
        }
    }
}

impl BlockTransmitter for EndpointTransmitter {
    fn transmit<'a>(&'a self, index: u64, data: &'a [u8]) -> CapabilityFuture<'a> {
        Box::pin(async move {
            let header = BlockHeader {
                upload_id: self.upload_id.clone(),
                index,
                size: data.len() as u64,
            };
            self.endpoint
                .upload_block(header, data)
                .await
                .map_err(BoxError::from)
        })
    }
}

/// Completes one upload and keeps the endpoint's answer.
pub struct EndpointFinalizer {
    endpoint: Arc<dyn UploadEndpoint>,
    upload_id: String,
    response: Mutex<Option<CompleteUploadResponse>>,
}

impl EndpointFinalizer {
    pub fn new(endpoint: Arc<dyn UploadEndpoint>, upload_id: impl Into<String>) -> Self {
        Self {
            endpoint,
            upload_id: upload_id.into(),
            response: Mutex::new(None),
        }
    }

    /// Takes the response of a successful completion.
    pub fn take_response(&self) -> Option<CompleteUploadResponse> {
        self.response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl UploadFinalizer for EndpointFinalizer {
    fn finalize(&self) -> CapabilityFuture<'_> {
        Box::pin(async move {
            let resp = self
                .endpoint
                .complete(CompleteUploadRequest {
                    upload_id: self.upload_id.clone(),
                })
                .await?;
            if !resp.success {
                return Err(UploadError::Rejected(resp.error).into());
            }
            *self.response.lock().unwrap_or_else(PoisonError::into_inner) = Some(resp);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records calls and answers complete with a fixed response.
    struct Recorder {
        headers: Mutex<Vec<BlockHeader>>,
        completed: Mutex<Vec<String>>,
        accept: bool,
    }

    impl Recorder {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                headers: Mutex::new(Vec::new()),
                completed: Mutex::new(Vec::new()),
                accept,
            })
        }
    }

    impl UploadEndpoint for Recorder {
        fn pre_create(&self, _req: PreCreateRequest) -> EndpointFuture<'_, PreCreateResponse> {
            Box::pin(async { Err(UploadError::Endpoint("not used".into())) })
        }

        fn upload_block<'a>(
            &'a self,
            header: BlockHeader,
            _data: &'a [u8],
        ) -> EndpointFuture<'a, ()> {
            Box::pin(async move {
                self.headers.lock().unwrap().push(header);
                Ok(())
            })
        }

        fn complete(
            &self,
            req: CompleteUploadRequest,
        ) -> EndpointFuture<'_, CompleteUploadResponse> {
            Box::pin(async move {
                self.completed.lock().unwrap().push(req.upload_id);
                Ok(CompleteUploadResponse {
                    success: self.accept,
                    path: if self.accept { "/srv/bundle.tar.gz".into() } else { String::new() },
                    size: 0,
                    error: if self.accept { String::new() } else { "checksum mismatch".into() },
                })
            })
        }

        fn endpoint_id(&self) -> &str {
            "recorder"
        }
    }

    #[tokio::test]
    async fn transmitter_builds_block_header() {
        let endpoint = Recorder::new(true);
        let transmitter = EndpointTransmitter::new(endpoint.clone(), "u-42");

        transmitter.transmit(3, b"abcd").await.unwrap();

        let headers = endpoint.headers.lock().unwrap();
        assert_eq!(
            *headers,
            vec![BlockHeader {
                upload_id: "u-42".into(),
                index: 3,
                size: 4,
            }]
        );
    }

    #[tokio::test]
    async fn finalizer_keeps_response() {
        let endpoint = Recorder::new(true);
        let finalizer = EndpointFinalizer::new(endpoint.clone(), "u-1");

        finalizer.finalize().await.unwrap();

        assert_eq!(*endpoint.completed.lock().unwrap(), vec!["u-1".to_string()]);
        let resp = finalizer.take_response().unwrap();
        assert_eq!(resp.path, "/srv/bundle.tar.gz");
        assert!(finalizer.take_response().is_none());
    }

    #[tokio::test]
    async fn finalizer_rejects_unsuccessful_completion() {
        let endpoint = Recorder::new(false);
        let finalizer = EndpointFinalizer::new(endpoint, "u-1");

        let err = finalizer.finalize().await.unwrap_err();
        assert_eq!(err.to_string(), "upload rejected: checksum mismatch");
        assert!(finalizer.take_response().is_none());
    }
}
