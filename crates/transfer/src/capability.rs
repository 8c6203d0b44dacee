//! Injected collaborators: block transmission and upload finalization.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::BoxError;

/// Future returned by the injected capabilities.
pub type CapabilityFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'a>>;

/// Delivers a single block to the remote endpoint.
///
/// Invoked concurrently for distinct indices; at most once per index in a
/// given upload unless wrapped in a retrying transmitter.
pub trait BlockTransmitter: Send + Sync {
    fn transmit<'a>(&'a self, index: u64, data: &'a [u8]) -> CapabilityFuture<'a>;
}

/// Commits an upload after all of its blocks were acknowledged.
pub trait UploadFinalizer: Send + Sync {
    fn finalize(&self) -> CapabilityFuture<'_>;
}

impl<T: BlockTransmitter + ?Sized> BlockTransmitter for Arc<T> {
    fn transmit<'a>(&'a self, index: u64, data: &'a [u8]) -> CapabilityFuture<'a> {
        (**self).transmit(index, data)
    }
}

impl<T: UploadFinalizer + ?Sized> UploadFinalizer for Arc<T> {
    fn finalize(&self) -> CapabilityFuture<'_> {
        (**self).finalize()
    }
}

/// [`BlockTransmitter`] backed by a closure taking an owned copy of the block.
pub struct TransmitFn<F> {
    f: F,
}

/// Wraps `f` as a [`BlockTransmitter`].
pub fn transmit_fn<F, Fut>(f: F) -> TransmitFn<F>
where
    F: Fn(u64, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    TransmitFn { f }
}

impl<F, Fut> BlockTransmitter for TransmitFn<F>
where
    F: Fn(u64, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn transmit<'a>(&'a self, index: u64, data: &'a [u8]) -> CapabilityFuture<'a> {
        Box::pin((self.f)(index, data.to_vec()))
    }
}

/// [`UploadFinalizer`] backed by a closure.
pub struct FinalizeFn<F> {
    f: F,
}

/// Wraps `f` as an [`UploadFinalizer`].
pub fn finalize_fn<F, Fut>(f: F) -> FinalizeFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    FinalizeFn { f }
}

impl<F, Fut> UploadFinalizer for FinalizeFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn finalize(&self) -> CapabilityFuture<'_> {
        Box::pin((self.f)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn transmit_fn_receives_index_and_data() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let transmitter = {
            let seen = Arc::clone(&seen);
            transmit_fn(move |index, data| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push((index, data));
                    Ok(())
                }
            })
        };

        transmitter.transmit(3, b"abc").await.unwrap();
        transmitter.transmit(1, b"x").await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![(3, b"abc".to_vec()), (1, b"x".to_vec())]);
    }

    #[tokio::test]
    async fn transmit_fn_propagates_error() {
        let transmitter = transmit_fn(|index, _data| async move {
            Err::<(), BoxError>(format!("block {index} rejected").into())
        });
        let err = transmitter.transmit(5, b"").await.unwrap_err();
        assert_eq!(err.to_string(), "block 5 rejected");
    }

    #[tokio::test]
    async fn finalize_fn_through_arc() {
        let calls = Arc::new(AtomicUsize::new(0));
        let finalizer: Arc<dyn UploadFinalizer> = {
            let calls = Arc::clone(&calls);
            Arc::new(finalize_fn(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }))
        };

        finalizer.finalize().await.unwrap();
        finalizer.finalize().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
