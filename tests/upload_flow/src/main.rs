fn main() {
    println!("Run `cargo test -p upload-flow` to execute the end-to-end upload tests.");
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use diagup_protocol::{
        BlockHeader, CompleteUploadRequest, CompleteUploadResponse, PreCreateRequest,
        PreCreateResponse,
    };
    use diagup_transfer::{RetryPolicy, TransferError};
    use diagup_uploader::{
        BundleUploader, EndpointFuture, LocalEndpoint, LocalEndpointConfig, UploadEndpoint,
        UploadError, UploadEvent, UploaderOptions,
    };
    use tokio::sync::mpsc;

    const BLOCK_SIZE: u64 = 64;

    /// Wraps a [`LocalEndpoint`] and injects failures.
    struct FaultyEndpoint {
        inner: LocalEndpoint,
        /// Blocks with a higher index are refused.
        refuse_after: Option<u64>,
        /// Refuses the next completion.
        refuse_complete: AtomicBool,
    }

    impl FaultyEndpoint {
        fn new(root: &Path) -> Self {
            Self {
                inner: local_endpoint(root),
                refuse_after: None,
                refuse_complete: AtomicBool::new(false),
            }
        }
    }

    impl UploadEndpoint for FaultyEndpoint {
        fn pre_create(&self, req: PreCreateRequest) -> EndpointFuture<'_, PreCreateResponse> {
            self.inner.pre_create(req)
        }

        fn upload_block<'a>(
            &'a self,
            header: BlockHeader,
            data: &'a [u8],
        ) -> EndpointFuture<'a, ()> {
            if self.refuse_after.is_some_and(|limit| header.index > limit) {
                let index = header.index;
                return Box::pin(async move {
                    Err(UploadError::Endpoint(format!("connection lost at block {index}")))
                });
            }
            self.inner.upload_block(header, data)
        }

        fn complete(
            &self,
            req: CompleteUploadRequest,
        ) -> EndpointFuture<'_, CompleteUploadResponse> {
            if self.refuse_complete.swap(false, Ordering::SeqCst) {
                return Box::pin(async { Err(UploadError::Endpoint("commit timed out".into())) });
            }
            self.inner.complete(req)
        }

        fn endpoint_id(&self) -> &str {
            self.inner.endpoint_id()
        }
    }

    fn local_endpoint(root: &Path) -> LocalEndpoint {
        LocalEndpoint::new(LocalEndpointConfig {
            root: root.to_path_buf(),
            block_size: BLOCK_SIZE,
        })
        .unwrap()
    }

    fn write_bundle(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
        let path = dir.join(name);
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    fn options(concurrency: usize) -> UploaderOptions {
        UploaderOptions {
            concurrency,
            retry: RetryPolicy::no_retry(),
        }
    }

    fn started_cursor(rx: &mut mpsc::Receiver<UploadEvent>) -> Option<u64> {
        while let Ok(event) = rx.try_recv() {
            if let UploadEvent::Started { resume_cursor, .. } = event {
                return Some(resume_cursor);
            }
        }
        None
    }

    #[tokio::test]
    async fn bundle_arrives_intact() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("endpoint");
        let (bundle, data) = write_bundle(tmp.path(), "diag.tar.gz", 1000);

        let uploader = BundleUploader::new(Arc::new(local_endpoint(&root)), options(4));
        let (tx, _rx) = mpsc::channel(256);
        let result = uploader.upload(&bundle, &tx).await.unwrap();

        assert_eq!(result.summary.total_blocks, 16);
        assert_eq!(result.summary.sent_blocks, 16);
        assert_eq!(result.summary.sent_bytes, 1000);
        assert_eq!(PathBuf::from(&result.remote_path), root.join("diag.tar.gz"));
        assert_eq!(std::fs::read(root.join("diag.tar.gz")).unwrap(), data);
        assert!(!root.join(".staging").join("diag.tar.gz").exists());
    }

    #[tokio::test]
    async fn interrupted_upload_resumes_after_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("endpoint");
        let (bundle, data) = write_bundle(tmp.path(), "diag.tar.gz", 1000);

        // First attempt: the link drops after block 6.
        let mut faulty = FaultyEndpoint::new(&root);
        faulty.refuse_after = Some(6);
        let uploader = BundleUploader::new(Arc::new(faulty), options(1));
        let (tx, _rx) = mpsc::channel(256);
        let err = uploader.upload(&bundle, &tx).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::Transfer(TransferError::TransmitFailed { index: 7, .. })
        ));
        assert!(!root.join("diag.tar.gz").exists());

        // Second attempt against a fresh endpoint over the same directory.
        let uploader = BundleUploader::new(Arc::new(local_endpoint(&root)), options(4));
        let (tx, mut rx) = mpsc::channel(256);
        let result = uploader.upload(&bundle, &tx).await.unwrap();

        assert_eq!(started_cursor(&mut rx), Some(6));
        assert_eq!(result.summary.skipped_blocks, 6);
        assert_eq!(result.summary.sent_blocks, 10);
        assert_eq!(result.summary.sent_bytes, 1000 - 6 * BLOCK_SIZE);
        assert_eq!(std::fs::read(root.join("diag.tar.gz")).unwrap(), data);
    }

    #[tokio::test]
    async fn failed_commit_is_retried_as_full_resume() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("endpoint");
        let (bundle, data) = write_bundle(tmp.path(), "diag.tar.gz", 700);

        let faulty = Arc::new(FaultyEndpoint::new(&root));
        faulty.refuse_complete.store(true, Ordering::SeqCst);
        let uploader = BundleUploader::new(faulty.clone(), options(3));

        let (tx, _rx) = mpsc::channel(256);
        let err = uploader.upload(&bundle, &tx).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::Transfer(TransferError::FinalizeFailed(_))
        ));

        // Every block is staged; the retry only needs to commit.
        let (tx, mut rx) = mpsc::channel(256);
        let result = uploader.upload(&bundle, &tx).await.unwrap();
        assert_eq!(started_cursor(&mut rx), Some(11));
        assert_eq!(result.summary.sent_blocks, 0);
        assert_eq!(result.summary.skipped_blocks, 11);
        assert_eq!(std::fs::read(root.join("diag.tar.gz")).unwrap(), data);
    }

    #[tokio::test]
    async fn empty_bundle_is_committed() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("endpoint");
        let (bundle, _) = write_bundle(tmp.path(), "empty.tar.gz", 0);

        let uploader = BundleUploader::new(Arc::new(local_endpoint(&root)), options(2));
        let (tx, _rx) = mpsc::channel(256);
        let result = uploader.upload(&bundle, &tx).await.unwrap();

        assert_eq!(result.summary.total_blocks, 0);
        assert_eq!(std::fs::metadata(root.join("empty.tar.gz")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn changed_bundle_size_restarts_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("endpoint");
        let (bundle, _) = write_bundle(tmp.path(), "diag.tar.gz", 1000);

        let mut faulty = FaultyEndpoint::new(&root);
        faulty.refuse_after = Some(4);
        let uploader = BundleUploader::new(Arc::new(faulty), options(1));
        let (tx, _rx) = mpsc::channel(256);
        assert!(uploader.upload(&bundle, &tx).await.is_err());

        // The bundle was regenerated with a different size.
        let (bundle, data) = write_bundle(tmp.path(), "diag.tar.gz", 900);
        let uploader = BundleUploader::new(Arc::new(local_endpoint(&root)), options(4));
        let (tx, mut rx) = mpsc::channel(256);
        let result = uploader.upload(&bundle, &tx).await.unwrap();

        assert_eq!(started_cursor(&mut rx), Some(0));
        assert_eq!(result.summary.sent_blocks, 15);
        assert_eq!(std::fs::read(root.join("diag.tar.gz")).unwrap(), data);
    }
}
