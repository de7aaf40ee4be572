//! Resource factory interface.

/// Source of pooled resources.
///
/// Only [`create`](ResourceFactory::create) is mandatory. Factories able to dispose of
/// resources must both implement [`destroy`](ResourceFactory::destroy) and return `true`
/// from [`can_destroy`](ResourceFactory::can_destroy), otherwise the pool never sheds idle
/// resources above [`max_available`](crate::PoolPolicy::max_available).
#[async_trait::async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// Resource type produced by the factory.
    type Resource: Send + 'static;
    /// Error type used by the factory.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a new resource.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the resource could not be created. The pool does not retry.
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Whether this factory implements [`destroy`](ResourceFactory::destroy).
    fn can_destroy(&self) -> bool {
        false
    }

    /// Dispose of a resource the pool no longer needs.
    ///
    /// Returns `Ok(true)` if the resource was disposed of successfully.
    ///
    /// # Errors
    ///
    /// Returns `Err` if disposal failed. The resource is gone from the pool either way.
    async fn destroy(&self, resource: Self::Resource) -> Result<bool, Self::Error> {
        drop(resource);
        Ok(false)
    }

    /// Check whether a resource is still usable.
    ///
    /// Only consulted when [`test_before_acquire`](crate::PoolPolicy::test_before_acquire) or
    /// [`test_after_release`](crate::PoolPolicy::test_after_release) is enabled.
    fn test(&self, _resource: &Self::Resource) -> bool {
        true
    }
}
