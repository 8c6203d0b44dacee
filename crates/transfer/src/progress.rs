use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use diagup_protocol::{UploadProgress, UploadStatus};

use crate::TransferError;
use crate::capability::{BlockTransmitter, CapabilityFuture};
use crate::plan;
use crate::types::SessionDescriptor;

/// Callback invoked with upload progress.
pub type ProgressCallback = Box<dyn Fn(UploadProgress) + Send + Sync>;

/// Running totals for one upload, shared by every block task.
pub struct ProgressState {
    upload_id: String,
    total_bytes: u64,
    total_blocks: u64,
    transferred: AtomicU64,
    acknowledged: AtomicU64,
    speed: SpeedCalculator,
}

impl ProgressState {
    /// Starts the counters at what the endpoint already holds.
    pub fn new(
        upload_id: impl Into<String>,
        session: &SessionDescriptor,
        total_bytes: u64,
    ) -> Result<Self, TransferError> {
        let total_blocks = plan::total_blocks(total_bytes, session.block_size)?;
        Ok(Self {
            upload_id: upload_id.into(),
            total_bytes,
            total_blocks,
            transferred: AtomicU64::new(session.resumed_bytes(total_bytes)),
            acknowledged: AtomicU64::new(session.resume_cursor.min(total_blocks)),
            speed: SpeedCalculator::new(None, None),
        })
    }

    /// Records one acknowledged block of `bytes`.
    pub fn record(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
        self.speed.add_sample(bytes);
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn acknowledged_blocks(&self) -> u64 {
        self.acknowledged.load(Ordering::Relaxed)
    }

    /// Estimated time to upload the bytes still owed.
    pub fn eta(&self) -> Option<Duration> {
        self.speed
            .eta(self.total_bytes.saturating_sub(self.transferred_bytes()))
    }

    pub fn snapshot(&self, status: UploadStatus) -> UploadProgress {
        UploadProgress {
            upload_id: self.upload_id.clone(),
            status,
            total_bytes: self.total_bytes,
            transferred_bytes: self.transferred_bytes(),
            acknowledged_blocks: self.acknowledged_blocks(),
            total_blocks: self.total_blocks,
            bytes_per_second: self.speed.bytes_per_second(),
            eta_seconds: self.eta().map(|eta| eta.as_secs()),
            error: String::new(),
        }
    }
}

/// Reports progress after each block the wrapped transmitter delivers.
pub struct ProgressTransmitter<T> {
    inner: T,
    state: Arc<ProgressState>,
    callback: ProgressCallback,
}

impl<T> ProgressTransmitter<T> {
    pub fn new(inner: T, state: Arc<ProgressState>, callback: ProgressCallback) -> Self {
        Self {
            inner,
            state,
            callback,
        }
    }
}

impl<T: BlockTransmitter> BlockTransmitter for ProgressTransmitter<T> {
    fn transmit<'a>(&'a self, index: u64, data: &'a [u8]) -> CapabilityFuture<'a> {
        Box::pin(async move {
            self.inner.transmit(index, data).await?;
            self.state.record(data.len() as u64);
            (self.callback)(self.state.snapshot(UploadStatus::InProgress));
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records a sample of `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        if s.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }
}
