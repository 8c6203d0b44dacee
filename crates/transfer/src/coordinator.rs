//! End-to-end upload of one file: plan, open, dispatch, join, finalize, close.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::{BlockTransmitter, UploadFinalizer};
use crate::limiter::ConcurrencyLimiter;
use crate::plan::{self, RemainingBlocks};
use crate::source::{ByteRangeSource, SharedSource, read_block};
use crate::types::{BlockDescriptor, SessionDescriptor, UploadSummary};
use crate::{BoxError, TransferError};

/// Counters and the first-failure latch, guarded by a single lock.
#[derive(Default)]
struct CompletionState {
    dispatched: u64,
    acknowledged: u64,
    sent_bytes: u64,
    error: Option<TransferError>,
}

impl CompletionState {
    fn latch(&mut self, err: TransferError) {
        if self.error.is_none() {
            warn!(error = %err, "block upload failed, halting dispatch");
            self.error = Some(err);
        } else {
            debug!(error = %err, "discarding error after first failure");
        }
    }
}

/// Drives the upload of a single file through a bounded pool of block tasks.
pub struct UploadCoordinator {
    limiter: Arc<ConcurrencyLimiter>,
    cancel: CancellationToken,
}

impl UploadCoordinator {
    /// Creates a coordinator allowing `concurrency` blocks in flight.
    pub fn new(concurrency: usize) -> Result<Self, TransferError> {
        Ok(Self {
            limiter: Arc::new(ConcurrencyLimiter::new(concurrency)?),
            cancel: CancellationToken::new(),
        })
    }

    /// Stops dispatching new blocks once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads the blocks of a `total_bytes` long file that the endpoint
    /// does not hold yet, then finalizes.
    ///
    /// `open_source` is called exactly once, after the block plan is
    /// validated. The source it returns is closed exactly once, after every
    /// block task has finished with it, on every exit path.
    pub async fn upload_file<O, S, E>(
        &self,
        session: SessionDescriptor,
        total_bytes: u64,
        finalize: &dyn UploadFinalizer,
        open_source: O,
        transmit: Arc<dyn BlockTransmitter>,
    ) -> Result<UploadSummary, TransferError>
    where
        O: FnOnce() -> Result<S, E>,
        S: ByteRangeSource + 'static,
        E: Into<BoxError>,
    {
        let total_blocks = plan::total_blocks(total_bytes, session.block_size)?;
        let blocks = plan::remaining_blocks(&session, total_bytes)?;

        let source = open_source().map_err(|e| TransferError::SourceOpenFailed(e.into()))?;
        let source = Arc::new(SharedSource::new(Box::new(source)));

        let skipped_blocks = session.resume_cursor.min(total_blocks);
        info!(
            total_bytes,
            block_size = session.block_size,
            total_blocks,
            skipped_blocks,
            concurrency = self.limiter.capacity(),
            "starting block upload"
        );

        let result = self.run(blocks, &source, transmit, finalize).await;

        // All block tasks are joined; this handle is the last one.
        source.close_once();
        drop(source);

        let (sent_blocks, sent_bytes) = result?;
        info!(sent_blocks, sent_bytes, skipped_blocks, "block upload complete");
        Ok(UploadSummary {
            total_blocks,
            skipped_blocks,
            sent_blocks,
            sent_bytes,
        })
    }

    async fn run(
        &self,
        blocks: RemainingBlocks,
        source: &Arc<SharedSource>,
        transmit: Arc<dyn BlockTransmitter>,
        finalize: &dyn UploadFinalizer,
    ) -> Result<(u64, u64), TransferError> {
        let state = Arc::new(Mutex::new(CompletionState::default()));
        let mut tasks = JoinSet::new();

        for block in blocks {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    state.lock().await.latch(TransferError::Cancelled);
                    break;
                }
                permit = self.limiter.acquire() => permit,
            };

            while let Some(joined) = tasks.try_join_next() {
                reap(joined, &state).await;
            }

            {
                let mut st = state.lock().await;
                if st.error.is_some() {
                    break;
                }
                if self.cancel.is_cancelled() {
                    st.latch(TransferError::Cancelled);
                    break;
                }
                st.dispatched += 1;
            }

            let source = Arc::clone(source);
            let transmit = Arc::clone(&transmit);
            let state = Arc::clone(&state);
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(send_block(block, source, transmit.as_ref()))
                    .catch_unwind()
                    .await
                    .unwrap_or(Err(TransferError::BlockTaskPanicked { index: block.index }));

                let mut st = state.lock().await;
                match outcome {
                    Ok(()) => {
                        st.acknowledged += 1;
                        st.sent_bytes += block.length;
                    }
                    Err(e) => st.latch(e),
                }
                drop(st);
                drop(permit);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            reap(joined, &state).await;
        }

        let mut st = state.lock().await;
        if let Some(err) = st.error.take() {
            return Err(err);
        }
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        debug_assert_eq!(st.acknowledged, st.dispatched);
        let counts = (st.acknowledged, st.sent_bytes);
        drop(st);

        finalize
            .finalize()
            .await
            .map_err(TransferError::FinalizeFailed)?;
        Ok(counts)
    }
}

/// Accounts for a block task that has left the join set.
///
/// Panics inside the block future are caught in the task itself, so a
/// panicking join error is re-raised here.
async fn reap(joined: Result<(), JoinError>, state: &Mutex<CompletionState>) {
    if let Err(e) = joined {
        if e.is_panic() {
            std::panic::resume_unwind(e.into_panic());
        }
        state.lock().await.latch(TransferError::Cancelled);
    }
}

async fn send_block(
    block: BlockDescriptor,
    source: Arc<SharedSource>,
    transmit: &dyn BlockTransmitter,
) -> Result<(), TransferError> {
    let index = block.index;
    let data = tokio::task::spawn_blocking(move || read_block(source.as_ref(), &block))
        .await
        .map_err(|e| {
            if e.is_panic() {
                TransferError::BlockTaskPanicked { index }
            } else {
                TransferError::Cancelled
            }
        })??;

    transmit
        .transmit(index, &data)
        .await
        .map_err(|source| match source.downcast::<TransferError>() {
            Ok(err) if matches!(*err, TransferError::Cancelled) => TransferError::Cancelled,
            Ok(err) => TransferError::TransmitFailed { index, source: err },
            Err(source) => TransferError::TransmitFailed { index, source },
        })?;

    debug!(index, offset = block.offset, length = block.length, "block sent");
    Ok(())
}
