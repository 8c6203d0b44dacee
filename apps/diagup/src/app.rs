//! Upload runner: builds the endpoint and uploader, reports progress.

use std::path::Path;
use std::sync::Arc;

use diagup_protocol::UploadStatus;
use diagup_uploader::{
    BundleUploader, LocalEndpoint, LocalEndpointConfig, UploadEvent, UploadResult,
    UploaderOptions,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;

/// Uploads `bundle` to the endpoint described by `config`.
pub async fn run(config: Config, bundle: &Path) -> anyhow::Result<UploadResult> {
    let endpoint = Arc::new(LocalEndpoint::new(LocalEndpointConfig {
        root: config.endpoint_root(),
        block_size: config.block_size,
    })?);
    let uploader = BundleUploader::new(
        endpoint,
        UploaderOptions {
            concurrency: config.concurrency,
            retry: config.retry.policy(),
        },
    );

    let cancel = uploader.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling upload");
            cancel.cancel();
        }
    });

    let (events_tx, events_rx) = mpsc::channel(256);
    let reporter = tokio::spawn(report_events(events_rx));

    let result = uploader.upload(bundle, &events_tx).await;

    interrupt.abort();
    drop(events_tx);
    reporter.await?;

    Ok(result?)
}

/// Logs upload events, progress at most once per 10%.
async fn report_events(mut events_rx: mpsc::Receiver<UploadEvent>) {
    let mut last_decile: Option<u32> = None;
    while let Some(event) = events_rx.recv().await {
        match event {
            UploadEvent::Started {
                upload_id,
                name,
                total_bytes,
                block_size,
                resume_cursor,
            } => {
                if resume_cursor > 0 {
                    info!(%upload_id, %name, total_bytes, block_size, resume_cursor, "resuming upload");
                } else {
                    info!(%upload_id, %name, total_bytes, block_size, "upload started");
                }
            }
            UploadEvent::Progress(progress) if progress.status == UploadStatus::InProgress => {
                let decile = (progress.percentage() / 10.0).floor() as u32;
                if last_decile.is_none_or(|last| decile > last) {
                    last_decile = Some(decile);
                    info!(
                        percent = progress.percentage().round() as u32,
                        transferred_bytes = progress.transferred_bytes,
                        total_bytes = progress.total_bytes,
                        bytes_per_second = progress.bytes_per_second as u64,
                        eta_seconds = progress.eta_seconds,
                        "upload progress"
                    );
                }
            }
            UploadEvent::Progress(_) => {}
            UploadEvent::Completed { upload_id, path } => {
                info!(%upload_id, %path, "upload completed");
            }
            UploadEvent::Failed { name, error } => {
                warn!(%name, %error, "upload failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;

    fn config_for(root: &Path, block_size: u64) -> Config {
        Config {
            endpoint_dir: root.display().to_string(),
            block_size,
            concurrency: 3,
            retry: RetryConfig::default(),
        }
    }

    #[tokio::test]
    async fn uploads_bundle_into_endpoint_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = tmp.path().join("diag-bundle.tar.gz");
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(&bundle, &data).unwrap();
        let root = tmp.path().join("endpoint");

        let result = run(config_for(&root, 512), &bundle).await.unwrap();

        assert_eq!(result.summary.total_blocks, 10);
        assert_eq!(result.summary.sent_bytes, 5000);
        assert_eq!(std::fs::read(root.join("diag-bundle.tar.gz")).unwrap(), data);
    }

    #[tokio::test]
    async fn missing_bundle_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("endpoint");

        let result = run(config_for(&root, 512), &tmp.path().join("nope.tar.gz")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn zero_block_size_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = tmp.path().join("diag.tar.gz");
        std::fs::write(&bundle, b"data").unwrap();

        let result = run(config_for(tmp.path(), 0), &bundle).await;
        assert!(result.is_err());
    }
}
