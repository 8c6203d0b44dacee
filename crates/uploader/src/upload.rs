//! Single-bundle upload session.

use std::path::Path;
use std::sync::Arc;

use diagup_protocol::{PreCreateRequest, UploadStatus};
use diagup_transfer::{
    BlockTransmitter, FileSource, ProgressCallback, ProgressState, ProgressTransmitter,
    RetryTransmitter, SessionDescriptor, TransferError, UploadCoordinator,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::endpoint::{EndpointFinalizer, EndpointTransmitter, UploadEndpoint};
use crate::error::UploadError;
use crate::types::{UploadEvent, UploadResult, UploaderOptions};

/// Uploads bundle files to one endpoint.
pub struct BundleUploader {
    endpoint: Arc<dyn UploadEndpoint>,
    options: UploaderOptions,
    cancel: CancellationToken,
}

impl BundleUploader {
    pub fn new(endpoint: Arc<dyn UploadEndpoint>, options: UploaderOptions) -> Self {
        Self {
            endpoint,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a cancellation token for uploads run by this uploader.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads the bundle at `path`.
    ///
    /// Progress events are sent via `events_tx`. Progress updates are
    /// dropped rather than awaited when the channel is full; `Started`,
    /// `Completed` and `Failed` are always delivered while the receiver
    /// is alive.
    pub async fn upload(
        &self,
        path: &Path,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<UploadResult, UploadError> {
        match self.run(path, events_tx).await {
            Ok(result) => {
                let _ = events_tx
                    .send(UploadEvent::Completed {
                        upload_id: result.upload_id.clone(),
                        path: result.remote_path.clone(),
                    })
                    .await;
                info!(
                    endpoint = %self.endpoint.endpoint_id(),
                    upload_id = %result.upload_id,
                    sent_bytes = result.summary.sent_bytes,
                    skipped_blocks = result.summary.skipped_blocks,
                    "bundle uploaded"
                );
                Ok(result)
            }
            Err(e) => {
                let err_msg = e.to_string();
                let _ = events_tx
                    .send(UploadEvent::Failed {
                        name: display_name(path),
                        error: err_msg.clone(),
                    })
                    .await;
                error!(
                    endpoint = %self.endpoint.endpoint_id(),
                    path = %path.display(),
                    error = %err_msg,
                    "bundle upload failed"
                );
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        path: &Path,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<UploadResult, UploadError> {
        self.check_cancelled()?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::InvalidBundle(format!("no file name: {}", path.display())))?
            .to_string();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(UploadError::InvalidBundle(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        let total_bytes = meta.len();
        let size = i64::try_from(total_bytes)
            .map_err(|_| UploadError::InvalidBundle(format!("file too large: {total_bytes}")))?;

        let resp = self
            .endpoint
            .pre_create(PreCreateRequest {
                name: name.clone(),
                size,
            })
            .await?;
        let session = SessionDescriptor::try_from(&resp)?;
        let upload_id = resp.upload_id;
        debug!(
            upload_id = %upload_id,
            block_size = session.block_size,
            resume_cursor = session.resume_cursor,
            "session negotiated"
        );

        let _ = events_tx
            .send(UploadEvent::Started {
                upload_id: upload_id.clone(),
                name: name.clone(),
                total_bytes,
                block_size: session.block_size,
                resume_cursor: session.resume_cursor,
            })
            .await;

        let state = Arc::new(ProgressState::new(&upload_id, &session, total_bytes)?);
        let _ = events_tx.try_send(UploadEvent::Progress(
            state.snapshot(UploadStatus::Pending),
        ));

        let cancel = self.cancel.child_token();
        let callback: ProgressCallback = {
            let tx = events_tx.clone();
            Box::new(move |progress| {
                let _ = tx.try_send(UploadEvent::Progress(progress));
            })
        };
        let transmit: Arc<dyn BlockTransmitter> = Arc::new(ProgressTransmitter::new(
            RetryTransmitter::new(
                EndpointTransmitter::new(Arc::clone(&self.endpoint), &upload_id),
                self.options.retry.clone(),
            )
            .with_cancellation(cancel.clone()),
            Arc::clone(&state),
            callback,
        ));
        let finalizer = EndpointFinalizer::new(Arc::clone(&self.endpoint), &upload_id);

        let coordinator = UploadCoordinator::new(self.options.concurrency)?
            .with_cancellation(cancel);
        let source_path = path.to_path_buf();
        let outcome = coordinator
            .upload_file(
                session,
                total_bytes,
                &finalizer,
                move || FileSource::open(source_path),
                transmit,
            )
            .await;
        let summary = match outcome {
            Ok(summary) => summary,
            Err(e) => {
                let (status, err) = match e {
                    TransferError::Cancelled => (UploadStatus::Cancelled, UploadError::Cancelled),
                    other => (UploadStatus::Failed, UploadError::Transfer(other)),
                };
                let mut progress = state.snapshot(status);
                progress.error = err.to_string();
                let _ = events_tx.try_send(UploadEvent::Progress(progress));
                return Err(err);
            }
        };

        let _ = events_tx.try_send(UploadEvent::Progress(
            state.snapshot(UploadStatus::Completed),
        ));

        let remote_path = finalizer
            .take_response()
            .map(|resp| resp.path)
            .unwrap_or_default();
        Ok(UploadResult {
            upload_id,
            name,
            remote_path,
            total_bytes,
            summary,
        })
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
