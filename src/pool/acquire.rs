use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Weak},
    task::{ready, Context, Poll},
    time::Instant,
};

use opentelemetry::KeyValue;
use pin_project::{pin_project, pinned_drop};
use tracing::Span;

use crate::{
    error::Error,
    metrics::Metrics,
    pool::state::{Checkout, WaitHandle},
};

/// Way back into the pool for resources nobody ended up taking.
pub(crate) trait Reclaim<R>: Send + Sync {
    /// Route a resource that was bound to an abandoned acquisition.
    fn reclaim(self: Arc<Self>, resource: R);
}

/// Future returned by [`Pool::acquire`](crate::Pool::acquire).
///
/// The request is already registered with the pool when this future is created. Dropping it
/// before completion gives up the place in the queue. A resource already bound to it goes
/// back to the pool.
#[pin_project(PinnedDrop)]
#[must_use = "dropping an acquisition gives up its place in the queue"]
pub struct Acquire<R> {
    #[pin]
    outcome: Outcome<R>,
    /// Pool to return an unclaimed resource to.
    pool: Weak<dyn Reclaim<R>>,
    /// Span of the acquisition, entered on every poll.
    span: Span,
    /// Time when acquisition was requested.
    started: Instant,
    /// Linked metrics storage.
    metrics: Arc<Metrics>,
    /// Premade label used to record metrics.
    label: [KeyValue; 1],
}

#[pin_project(project = OutcomeProj)]
enum Outcome<R> {
    Ready(Option<R>),
    Waiting(#[pin] WaitHandle<R>),
}

impl<R> Acquire<R> {
    pub(crate) fn new(
        checkout: Checkout<R>,
        pool: Weak<dyn Reclaim<R>>,
        span: Span,
        metrics: Arc<Metrics>,
        label: [KeyValue; 1],
    ) -> Self {
        let outcome = match checkout {
            Checkout::Ready(resource) => Outcome::Ready(Some(resource)),
            Checkout::Wait(handle) => Outcome::Waiting(handle),
        };
        Self {
            outcome,
            pool,
            span,
            started: Instant::now(),
            metrics,
            label,
        }
    }

    /// Whether a resource was available at the time of the request.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        matches!(self.outcome, Outcome::Ready(_))
    }
}

impl<R> Future for Acquire<R> {
    type Output = Result<R, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _entered = this.span.enter();
        let output = match this.outcome.project() {
            OutcomeProj::Ready(resource) => {
                Ok(resource.take().expect("Acquire polled after completion"))
            }
            OutcomeProj::Waiting(handle) => match ready!(handle.poll(cx)) {
                Ok(result) => result,
                // Sender is gone with the pool state.
                Err(_) => Err(Error::Closed),
            },
        };
        this.metrics
            .wait_time
            .record(this.started.elapsed().as_secs_f64(), this.label.as_slice());
        Poll::Ready(output)
    }
}

#[pinned_drop]
impl<R> PinnedDrop for Acquire<R> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        let unclaimed = match this.outcome.project() {
            OutcomeProj::Ready(resource) => resource.take(),
            OutcomeProj::Waiting(handle) => {
                let handle = handle.get_mut();
                // No sends succeed after this, so anything already sent is in the channel.
                handle.close();
                match handle.try_recv() {
                    Ok(Ok(resource)) => Some(resource),
                    _ => None,
                }
            }
        };
        if let (Some(resource), Some(pool)) = (unclaimed, this.pool.upgrade()) {
            let _entered = this.span.enter();
            pool.reclaim(resource);
        }
    }
}

impl<R> std::fmt::Debug for Acquire<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquire")
            .field("immediate", &self.is_immediate())
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}
