//! Directory-backed upload endpoint.
//!
//! Each upload is staged under `<root>/.staging/<name>` and moved to
//! `<root>/<name>` on completion. Staged blocks survive a restart, so a
//! new pre-create for the same name and size reports how far the
//! previous attempt got.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use diagup_protocol::{
    BlockHeader, CompleteUploadRequest, CompleteUploadResponse, PreCreateRequest,
    PreCreateResponse,
};
use diagup_transfer::{BlockStore, TransferError, validate_upload_name};
use tracing::{debug, info, warn};

use crate::endpoint::{EndpointFuture, UploadEndpoint};
use crate::error::UploadError;

/// Default block size handed out to uploaders (4 MiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

const STAGING_DIR: &str = ".staging";

/// Settings for a [`LocalEndpoint`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEndpointConfig {
    /// Directory receiving committed bundles.
    pub root: PathBuf,
    /// Block size dictated to uploaders.
    pub block_size: u64,
}

impl Default for LocalEndpointConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("uploads"),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

struct ActiveUpload {
    name: String,
    // `None` once the upload was completed.
    store: Arc<Mutex<Option<BlockStore>>>,
}

/// An [`UploadEndpoint`] writing into a local directory.
pub struct LocalEndpoint {
    id: String,
    config: LocalEndpointConfig,
    uploads: Mutex<HashMap<String, ActiveUpload>>,
}

impl LocalEndpoint {
    pub fn new(config: LocalEndpointConfig) -> Result<Self, UploadError> {
        if config.block_size == 0 {
            return Err(TransferError::InvalidConfiguration(
                "endpoint block size must be positive".into(),
            )
            .into());
        }
        Ok(Self {
            id: format!("local:{}", config.root.display()),
            config,
            uploads: Mutex::new(HashMap::new()),
        })
    }

    /// Number of uploads opened but not completed.
    pub fn active_uploads(&self) -> usize {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn store_for(&self, upload_id: &str) -> Result<Arc<Mutex<Option<BlockStore>>>, UploadError> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(upload_id)
            .map(|upload| Arc::clone(&upload.store))
            .ok_or_else(|| UploadError::UnknownUpload(upload_id.to_string()))
    }
}

impl UploadEndpoint for LocalEndpoint {
    fn pre_create(&self, req: PreCreateRequest) -> EndpointFuture<'_, PreCreateResponse> {
        Box::pin(async move {
            validate_upload_name(&req.name)?;
            let size = u64::try_from(req.size)
                .map_err(|_| UploadError::Endpoint(format!("negative size {}", req.size)))?;

            let dir = self.config.root.join(STAGING_DIR).join(&req.name);
            let block_size = self.config.block_size;
            let store = tokio::task::spawn_blocking(move || BlockStore::open(dir, block_size, size))
                .await
                .map_err(|e| UploadError::Endpoint(e.to_string()))??;
            let cursor = store.resume_cursor();

            let upload_id = uuid::Uuid::new_v4().to_string();
            {
                let mut uploads = self.uploads.lock().unwrap_or_else(PoisonError::into_inner);
                // A reopened name supersedes any earlier session for it.
                uploads.retain(|_, upload| upload.name != req.name);
                uploads.insert(
                    upload_id.clone(),
                    ActiveUpload {
                        name: req.name.clone(),
                        store: Arc::new(Mutex::new(Some(store))),
                    },
                );
            }

            info!(
                upload_id = %upload_id,
                name = %req.name,
                size,
                block_size,
                resume_cursor = cursor,
                "upload opened"
            );
            Ok(PreCreateResponse {
                upload_id,
                partseq: cursor as i64,
                block_bytes: block_size as i64,
            })
        })
    }

    fn upload_block<'a>(
        &'a self,
        header: BlockHeader,
        data: &'a [u8],
    ) -> EndpointFuture<'a, ()> {
        Box::pin(async move {
            if header.size != data.len() as u64 {
                return Err(UploadError::Endpoint(format!(
                    "block {} header announces {} bytes, got {}",
                    header.index,
                    header.size,
                    data.len()
                )));
            }

            let store = self.store_for(&header.upload_id)?;
            let data = data.to_vec();
            let index = header.index;
            tokio::task::spawn_blocking(move || {
                let mut guard = store.lock().unwrap_or_else(PoisonError::into_inner);
                let store = guard
                    .as_mut()
                    .ok_or_else(|| UploadError::UnknownUpload(header.upload_id.clone()))?;
                store.write_block(index, &data)?;
                Ok::<_, UploadError>(())
            })
            .await
            .map_err(|e| UploadError::Endpoint(e.to_string()))??;

            debug!(index, "block stored");
            Ok(())
        })
    }

    fn complete(
        &self,
        req: CompleteUploadRequest,
    ) -> EndpointFuture<'_, CompleteUploadResponse> {
        Box::pin(async move {
            let (name, store) = {
                let uploads = self.uploads.lock().unwrap_or_else(PoisonError::into_inner);
                let upload = uploads
                    .get(&req.upload_id)
                    .ok_or_else(|| UploadError::UnknownUpload(req.upload_id.clone()))?;
                (upload.name.clone(), Arc::clone(&upload.store))
            };

            let dest = self.config.root.join(&name);
            let commit_dest = dest.clone();
            let committed = tokio::task::spawn_blocking(move || {
                let mut guard = store.lock().unwrap_or_else(PoisonError::into_inner);
                match guard.take() {
                    Some(store) if store.is_complete() => store.commit(commit_dest).map(Some),
                    Some(store) => {
                        let missing = store.missing_blocks().len() as u64;
                        *guard = Some(store);
                        Err(TransferError::IncompleteUpload { missing })
                    }
                    None => Ok(None),
                }
            })
            .await
            .map_err(|e| UploadError::Endpoint(e.to_string()))?;

            match committed {
                Ok(Some(size)) => {
                    self.uploads
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&req.upload_id);
                    info!(upload_id = %req.upload_id, path = %dest.display(), size, "upload completed");
                    Ok(CompleteUploadResponse {
                        success: true,
                        path: dest.display().to_string(),
                        size,
                        error: String::new(),
                    })
                }
                Ok(None) => Err(UploadError::UnknownUpload(req.upload_id)),
                Err(TransferError::IncompleteUpload { missing }) => {
                    warn!(upload_id = %req.upload_id, missing, "completion refused");
                    Ok(CompleteUploadResponse {
                        success: false,
                        path: String::new(),
                        size: 0,
                        error: format!("{missing} blocks missing"),
                    })
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn endpoint_id(&self) -> &str {
        &self.id
    }
}
