//! Pool bookkeeping and the rebalancing pass.
//!
//! Everything here is synchronous. Each public method is one transaction over the pool
//! state, and returns the [`Effects`] the caller must carry out once the state lock is
//! released.

use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::{
    config::PoolPolicy,
    error::{BoxError, Error},
    metrics::PoolState,
    queue::FifoQueue,
};

/// Sending half of a pending acquisition.
pub(crate) type Waiter<R> = oneshot::Sender<Result<R, Error>>;

/// Receiving half of a pending acquisition.
pub(crate) type WaitHandle<R> = oneshot::Receiver<Result<R, Error>>;

/// Result of an acquisition attempt.
pub(crate) enum Checkout<R> {
    /// Idle resource was handed out immediately.
    Ready(R),
    /// Request was queued.
    Wait(WaitHandle<R>),
}

/// Side effects of a single transaction.
#[must_use]
pub(crate) struct Effects<R> {
    /// Number of resource creations to start.
    pub(crate) create: usize,
    /// Resources to hand over to the factory for destruction.
    pub(crate) destroy: Vec<R>,
    /// Waiter to fulfil, always after everything else.
    pub(crate) deliver: Option<(Waiter<R>, R)>,
    /// Waiter to fail with a creation error.
    pub(crate) reject: Option<(Waiter<R>, BoxError)>,
}

impl<R> Default for Effects<R> {
    fn default() -> Self {
        Self {
            create: 0,
            destroy: Vec::new(),
            deliver: None,
            reject: None,
        }
    }
}

impl<R> Effects<R> {
    /// Whether nothing needs to be done.
    pub(crate) fn is_empty(&self) -> bool {
        self.create == 0
            && self.destroy.is_empty()
            && self.deliver.is_none()
            && self.reject.is_none()
    }
}

/// Live state of a pool.
pub(crate) struct State<R> {
    policy: PoolPolicy,
    /// Whether resources can be handed back to the factory for destruction.
    can_destroy: bool,
    /// Idle resources, oldest first.
    available: FifoQueue<R>,
    /// Pending acquisitions, oldest first.
    waiters: FifoQueue<Waiter<R>>,
    /// Resources checked out to consumers.
    acquired: usize,
    /// Resource creations in flight.
    pending: usize,
}

impl<R> State<R> {
    pub(crate) fn new(policy: PoolPolicy, can_destroy: bool) -> Self {
        Self {
            policy,
            can_destroy,
            available: FifoQueue::new(),
            waiters: FifoQueue::new(),
            acquired: 0,
            pending: 0,
        }
    }

    pub(crate) fn policy(&self) -> &PoolPolicy {
        &self.policy
    }

    /// Total number of resources that exist or are being created.
    pub(crate) fn size(&self) -> usize {
        self.acquired + self.pending + self.available.len()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending
    }

    pub(crate) fn ready(&self) -> usize {
        self.available.len()
    }

    pub(crate) fn acquired(&self) -> usize {
        self.acquired
    }

    pub(crate) fn waiting(&self) -> usize {
        self.waiters.len()
    }

    /// Resources free once in-flight creations land and current waiters are served.
    ///
    /// Negative when waiters outnumber idle and incoming resources.
    pub(crate) fn eventually_available(&self) -> isize {
        let incoming = isize::try_from(self.pending + self.available.len()).unwrap_or(isize::MAX);
        incoming - isize::try_from(self.waiters.len()).unwrap_or(isize::MAX)
    }

    pub(crate) fn snapshot(&self) -> PoolState {
        PoolState {
            size: self.size(),
            idle: self.available.len(),
            in_use: self.acquired,
            pending: self.pending,
            waiting: self.waiters.len(),
            min_size: self.policy.min_pool_size,
            max_size: self.policy.max_pool_size,
            min_idle: self.policy.min_available,
            max_idle: self.policy.max_available,
        }
    }

    /// Initial reconciliation right after construction.
    pub(crate) fn start(&mut self) -> Effects<R> {
        let mut fx = Effects::default();
        self.rebalance(&mut fx);
        fx
    }

    /// Replace sizing policy and reconcile against it.
    pub(crate) fn set_policy(&mut self, policy: PoolPolicy) -> Effects<R> {
        self.policy = policy;
        let mut fx = Effects::default();
        self.rebalance(&mut fx);
        fx
    }

    /// Hand out an idle resource, or queue the request.
    pub(crate) fn acquire(&mut self, test: impl Fn(&R) -> bool) -> (Checkout<R>, Effects<R>) {
        let mut fx = Effects::default();
        let checkout = match self.take_idle(&test, &mut fx) {
            Some(resource) => {
                self.acquired += 1;
                Checkout::Ready(resource)
            }
            None => {
                let (waiter, handle) = oneshot::channel();
                self.waiters.enqueue(waiter);
                Checkout::Wait(handle)
            }
        };
        self.rebalance(&mut fx);
        (checkout, fx)
    }

    /// Take back a resource from a consumer.
    pub(crate) fn release(&mut self, resource: R, test: impl Fn(&R) -> bool) -> Effects<R> {
        let mut fx = Effects::default();
        match self.acquired.checked_sub(1) {
            Some(acquired) => self.acquired = acquired,
            None => warn!("released more resources than were acquired"),
        }
        if self.policy.test_after_release && !test(&resource) {
            trace!("released resource failed validation");
            self.discard(resource, &mut fx);
            self.rebalance(&mut fx);
        } else {
            self.dispatch(resource, &mut fx);
        }
        fx
    }

    /// Route a freshly created resource.
    pub(crate) fn created(&mut self, resource: R) -> Effects<R> {
        let mut fx = Effects::default();
        self.pending = self.pending.saturating_sub(1);
        self.dispatch(resource, &mut fx);
        fx
    }

    /// Account for a failed creation.
    ///
    /// No rebalancing happens here, so a factory that keeps failing is not called in a loop.
    pub(crate) fn create_failed(&mut self, error: BoxError) -> Effects<R> {
        let mut fx = Effects::default();
        self.pending = self.pending.saturating_sub(1);
        if self.policy.reject_waiters_on_create_error {
            if let Some(waiter) = self.next_waiter() {
                fx.reject = Some((waiter, error));
            }
        }
        fx
    }

    /// Re-route a resource whose consumer went away before taking it.
    ///
    /// Covers waiters gone between dispatch and delivery, as well as dropped acquisitions
    /// already holding a resource.
    pub(crate) fn undelivered(&mut self, resource: R) -> Effects<R> {
        let mut fx = Effects::default();
        self.acquired = self.acquired.saturating_sub(1);
        self.dispatch(resource, &mut fx);
        fx
    }

    /// Give a resource to the oldest waiter, or put it into the idle queue.
    fn dispatch(&mut self, resource: R, fx: &mut Effects<R>) {
        debug_assert!(fx.deliver.is_none());
        match self.next_waiter() {
            Some(waiter) => {
                self.acquired += 1;
                // Counters must settle before the consumer gets the resource.
                self.rebalance(fx);
                fx.deliver = Some((waiter, resource));
            }
            None => {
                self.available.enqueue(resource);
                self.rebalance(fx);
            }
        }
    }

    /// Dequeue the oldest waiter still interested in a resource.
    fn next_waiter(&mut self) -> Option<Waiter<R>> {
        while let Some(waiter) = self.waiters.try_dequeue() {
            if !waiter.is_closed() {
                return Some(waiter);
            }
            trace!("skipping abandoned acquisition");
        }
        None
    }

    /// Dequeue the oldest idle resource passing validation.
    fn take_idle(&mut self, test: &impl Fn(&R) -> bool, fx: &mut Effects<R>) -> Option<R> {
        while let Some(resource) = self.available.try_dequeue() {
            if !self.policy.test_before_acquire || test(&resource) {
                return Some(resource);
            }
            trace!("idle resource failed validation");
            self.discard(resource, fx);
        }
        None
    }

    /// Drop a resource from the pool for good.
    fn discard(&mut self, resource: R, fx: &mut Effects<R>) {
        if self.can_destroy {
            fx.destroy.push(resource);
        } else {
            trace!("dropping resource, factory cannot destroy it");
            drop(resource);
        }
    }

    /// Start `count` resource creations.
    fn reserve(&mut self, count: usize, fx: &mut Effects<R>) {
        self.pending += count;
        fx.create += count;
    }

    /// Single reconciliation pass against the sizing policy.
    fn rebalance(&mut self, fx: &mut Effects<R>) {
        // Minimum pool size.
        let deficit = self.policy.min_pool_size.saturating_sub(self.size());
        self.reserve(deficit, fx);

        // Minimum available, capped by maximum pool size.
        let gap = self
            .policy
            .min_available
            .saturating_add(self.waiters.len())
            .saturating_sub(self.pending + self.available.len());
        let headroom = match self.policy.max_pool_size {
            Some(max_pool_size) => max_pool_size.saturating_sub(self.size()),
            None => usize::MAX,
        };
        self.reserve(gap.min(headroom), fx);

        // Excess idle resources.
        if let (true, Some(max_available)) = (self.can_destroy, self.policy.max_available) {
            let excess = (self.pending + self.available.len())
                .saturating_sub(self.waiters.len())
                .saturating_sub(max_available);
            // Excess may include creations in flight, those cannot be destroyed yet.
            for _ in 0..excess {
                match self.available.try_dequeue() {
                    Some(resource) => fx.destroy.push(resource),
                    None => break,
                }
            }
        }

        if !fx.is_empty() {
            trace!(
                create = fx.create,
                destroy = fx.destroy.len(),
                size = self.size(),
                pending = self.pending,
                ready = self.available.len(),
                waiting = self.waiters.len(),
                eventually_available = self.eventually_available(),
                "pool rebalanced"
            );
        }
    }
}
