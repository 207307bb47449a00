//! Single-value-or-error futures returned by every capability entry point.

use cloudrt_core::{CapabilityKind, ProviderCause, Result, UnifiedError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancels the call it was taken from. Idempotent and cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Lazy capability call: nothing is resolved or executed until first poll.
///
/// Resolves to exactly one `Ok` or `Err`. Dropping it before completion
/// abandons the adapter call.
#[must_use = "calls do nothing unless awaited or spawned"]
pub struct Call<T> {
    capability: CapabilityKind,
    inner: BoxFuture<'static, Result<T>>,
    cancel: CancelHandle,
}

impl<T> Call<T> {
    pub(crate) fn new<F>(capability: CapabilityKind, cancel: CancelHandle, fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            capability,
            inner: fut.boxed(),
            cancel,
        }
    }

    /// A call that completes with `err` without reaching any adapter.
    pub fn failed(capability: CapabilityKind, err: UnifiedError) -> Self
    where
        T: Send + 'static,
    {
        Self::new(capability, CancelHandle::new(), async move { Err(err) })
    }

    pub fn capability(&self) -> CapabilityKind {
        self.capability
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run the call on the tokio runtime. The returned handle still yields
    /// exactly one terminal value and can cancel the running call.
    pub fn spawn(self) -> SpawnedCall<T>
    where
        T: Send + 'static,
    {
        let capability = self.capability;
        let cancel = self.cancel.clone();
        SpawnedCall {
            capability,
            cancel,
            join: tokio::spawn(self),
        }
    }
}

impl<T> Future for Call<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

pub struct SpawnedCall<T> {
    capability: CapabilityKind,
    cancel: CancelHandle,
    join: JoinHandle<Result<T>>,
}

impl<T> SpawnedCall<T> {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<T> Future for SpawnedCall<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let capability = self.capability;
        let outcome = ready!(self.join.poll_unpin(cx));
        Poll::Ready(match outcome {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => Err(UnifiedError::Cancelled(format!(
                "{capability} task was aborted"
            ))),
            Err(join_err) => Err(UnifiedError::provider_error(ProviderCause {
                capability,
                service_name: String::new(),
                setting_id: String::new(),
                signal: Some("panic".to_string()),
                message: join_err.to_string(),
                source: None,
            })),
        })
    }
}
