//! Self-balancing resource pool.

mod acquire;
mod state;

use std::{
    fmt,
    ops::Deref,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, debug_span, trace, warn};

pub use self::acquire::Acquire;
use self::{
    acquire::Reclaim,
    state::{Effects, State},
};
use crate::{
    config::{PoolConfig, PoolPolicy},
    error::Error,
    factory::ResourceFactory,
    metrics::{pool_kv, Metrics, PoolState, POOL_METRICS},
};

/// Asynchronous resource pool.
///
/// Keeps a supply of resources produced by a [`ResourceFactory`] within the bounds of a
/// [`PoolPolicy`], and hands them out to requesters in FIFO order. After every state change
/// the pool reconciles itself against the policy, creating or destroying resources in
/// background Tokio tasks.
///
/// Resources are returned explicitly with [`Pool::release`]. Cloning the pool is cheap, all
/// clones share the same state.
pub struct Pool<F: ResourceFactory> {
    inner: Arc<Inner<F>>,
}

struct Inner<F: ResourceFactory> {
    /// Source of resources.
    factory: F,
    /// Pool label.
    label: [KeyValue; 1],
    /// Linked metrics storage.
    metrics: Arc<Metrics>,
    /// Minimum interval between pool state gauge recordings.
    metrics_interval: Duration,
    /// Time of last gathering of pool state metrics.
    last_gathered_at: Mutex<Instant>,
    /// Runtime used to spawn resource creations and destructions.
    runtime: Handle,
    /// Pool bookkeeping. Every transaction is a single critical section.
    state: Mutex<State<F::Resource>>,
}

impl<F: ResourceFactory> Pool<F> {
    /// Create a pool with given sizing policy.
    ///
    /// Initial resource creations are scheduled before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] if called outside of a Tokio runtime.
    pub fn new(factory: F, policy: PoolPolicy) -> Result<Self, Error> {
        Self::with_config(factory, PoolConfig::default().with_policy(policy))
    }

    /// Create a pool from full pool configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] if called outside of a Tokio runtime.
    pub fn with_config(factory: F, config: PoolConfig) -> Result<Self, Error> {
        let runtime = Handle::try_current()?;
        let label = pool_kv(config.label.map(Into::into));
        if let Err(err) = config.policy.validate() {
            warn!(pool = %label[0].value, %err, "inconsistent pool policy");
        }
        let state = State::new(config.policy, factory.can_destroy());
        let inner = Arc::new(Inner {
            factory,
            label,
            metrics: POOL_METRICS.deref().clone(),
            metrics_interval: config.metrics_interval,
            last_gathered_at: Mutex::new(Instant::now()),
            runtime,
            state: Mutex::new(state),
        });
        let effects = inner.state.lock().start();
        inner.apply(effects);
        inner.record_state();
        Ok(Self { inner })
    }

    /// Request a resource from the pool.
    ///
    /// The request is registered immediately, even if the returned future is never polled.
    /// If an idle resource exists, the future is already complete. Otherwise it completes once
    /// a released or newly created resource is routed to it, in FIFO order with other
    /// requests.
    ///
    /// The future only fails with [`Error::Create`] if the policy enables
    /// [`reject_waiters_on_create_error`](PoolPolicy::reject_waiters_on_create_error), or
    /// with [`Error::Closed`] if the pool went away. It may never complete if no resource is
    /// ever produced, so wrap it in a timeout where needed. Dropping the future, even after a
    /// resource was routed to it, returns that resource to the pool.
    pub fn acquire(&self) -> Acquire<F::Resource> {
        let span = debug_span!("pool_acquire", name = %self.inner.label[0].value);
        let factory = &self.inner.factory;
        let (checkout, effects) =
            span.in_scope(|| self.inner.state.lock().acquire(|r| factory.test(r)));
        self.inner.apply(effects);
        self.inner.update_metrics();
        let pool: Weak<dyn Reclaim<F::Resource>> = Arc::<Inner<F>>::downgrade(&self.inner);
        Acquire::new(
            checkout,
            pool,
            span,
            self.inner.metrics.clone(),
            self.inner.label.clone(),
        )
    }

    /// Return a previously acquired resource to the pool.
    ///
    /// The resource goes to the oldest pending request if there is one, otherwise it becomes
    /// idle.
    pub fn release(&self, resource: F::Resource) {
        let factory = &self.inner.factory;
        let effects = self
            .inner
            .state
            .lock()
            .release(resource, |r| factory.test(r));
        self.inner.apply(effects);
        self.inner.update_metrics();
    }

    /// Replace sizing policy, and reconcile the pool against it.
    pub fn set_policy(&self, policy: PoolPolicy) {
        if let Err(err) = policy.validate() {
            warn!(pool = %self.inner.label[0].value, %err, "inconsistent pool policy");
        }
        let effects = self.inner.state.lock().set_policy(policy);
        self.inner.apply(effects);
        self.inner.record_state();
    }

    /// Current sizing policy.
    #[must_use]
    pub fn policy(&self) -> PoolPolicy {
        self.inner.state.lock().policy().clone()
    }

    /// Total number of resources, including acquired, idle and ones being created.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.state.lock().size()
    }

    /// Number of resource creations in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending()
    }

    /// Number of idle resources ready to be acquired.
    #[must_use]
    pub fn ready(&self) -> usize {
        self.inner.state.lock().ready()
    }

    /// Number of resources checked out to consumers.
    #[must_use]
    pub fn acquired(&self) -> usize {
        self.inner.state.lock().acquired()
    }

    /// Number of requests waiting for a resource.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiting()
    }

    /// Consistent snapshot of all pool counters.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.inner.state.lock().snapshot()
    }

    /// Pool name, as used in metrics and traces.
    #[must_use]
    pub fn label(&self) -> String {
        self.inner.label[0].value.to_string()
    }

    /// Resource factory used by this pool.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Manually update pool metrics.
    ///
    /// Normally you wouldn't need to call this directly, as metrics collection occurs
    /// automatically as you use the pool.
    pub fn update_metrics(&self) {
        self.inner.update_metrics();
    }
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("label", &self.label())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<F: ResourceFactory> Reclaim<F::Resource> for Inner<F> {
    fn reclaim(self: Arc<Self>, resource: F::Resource) {
        trace!(pool = %self.label[0].value, "acquisition dropped, returning its resource");
        let effects = self.state.lock().undelivered(resource);
        self.apply(effects);
        self.update_metrics();
    }
}

impl<F: ResourceFactory> Inner<F> {
    /// Carry out side effects of a transaction.
    ///
    /// Must be called with the state lock released.
    fn apply(self: &Arc<Self>, effects: Effects<F::Resource>) {
        let Effects {
            create,
            destroy,
            deliver,
            reject,
        } = effects;
        for _ in 0..create {
            self.spawn_create();
        }
        for resource in destroy {
            self.spawn_destroy(resource);
        }
        if let Some((waiter, err)) = reject {
            let _ = waiter.send(Err(Error::Create(err)));
        }
        if let Some((waiter, resource)) = deliver {
            if let Err(Ok(resource)) = waiter.send(Ok(resource)) {
                // Requester gave up after the resource was routed to it.
                let effects = self.state.lock().undelivered(resource);
                self.apply(effects);
            }
        }
    }

    fn spawn_create(self: &Arc<Self>) {
        let inner = self.clone();
        self.runtime.spawn(async move {
            let started = Instant::now();
            let result = inner.factory.create().await;
            inner
                .metrics
                .create_time
                .record(started.elapsed().as_secs_f64(), &inner.label);
            let effects = match result {
                Ok(resource) => inner.state.lock().created(resource),
                Err(err) => {
                    warn!(pool = %inner.label[0].value, %err, "resource creation failed");
                    inner.metrics.create_errors.add(1, &inner.label);
                    inner.state.lock().create_failed(Box::new(err))
                }
            };
            inner.apply(effects);
        });
    }

    fn spawn_destroy(self: &Arc<Self>, resource: F::Resource) {
        self.metrics.destroyed.add(1, &self.label);
        let inner = self.clone();
        self.runtime.spawn(async move {
            match inner.factory.destroy(resource).await {
                Ok(true) => debug!(pool = %inner.label[0].value, "resource destroyed"),
                Ok(false) => {
                    warn!(pool = %inner.label[0].value, "resource was not destroyed");
                    inner.metrics.destroy_errors.add(1, &inner.label);
                }
                Err(err) => {
                    warn!(pool = %inner.label[0].value, %err, "resource destruction failed");
                    inner.metrics.destroy_errors.add(1, &inner.label);
                }
            }
        });
    }

    fn update_metrics(&self) {
        let mut last_gathered_at = self.last_gathered_at.lock();
        if last_gathered_at.elapsed() > self.metrics_interval {
            *last_gathered_at = Instant::now();
            drop(last_gathered_at);
            self.record_state();
        }
    }

    fn record_state(&self) {
        let state = self.state.lock().snapshot();
        self.metrics.record_state(&self.label, &state);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counter(AtomicU32);

    #[async_trait::async_trait]
    impl ResourceFactory for Counter {
        type Resource = u32;
        type Error = std::io::Error;

        async fn create(&self) -> Result<u32, std::io::Error> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    /// Pool that never creates anything on its own.
    fn frozen() -> Pool<Counter> {
        let policy = PoolPolicy::default().with_max_pool_size(0);
        Pool::new(Counter::default(), policy).unwrap()
    }

    /// Resource routed to a waiter gone by delivery time becomes idle.
    #[tokio::test]
    async fn failed_delivery_returns_resource() {
        let pool = frozen();
        let request = pool.acquire();
        assert!(!request.is_immediate());
        assert_eq!(pool.pending(), 0);

        let effects = pool.inner.state.lock().created(7);
        assert!(effects.deliver.is_some());
        assert_eq!(pool.acquired(), 1);
        drop(request);
        pool.inner.apply(effects);

        assert_eq!(pool.acquired(), 0);
        assert_eq!(pool.waiting(), 0);
        assert_eq!(pool.ready(), 1);
    }

    /// Failed delivery moves on to the next waiter.
    #[tokio::test]
    async fn failed_delivery_serves_next_waiter() {
        let pool = frozen();
        let first = pool.acquire();
        let second = pool.acquire();

        let effects = pool.inner.state.lock().created(7);
        drop(first);
        pool.inner.apply(effects);

        assert_eq!(pool.acquired(), 1);
        assert_eq!(pool.waiting(), 0);
        assert_eq!(second.await.unwrap(), 7);
    }
}
