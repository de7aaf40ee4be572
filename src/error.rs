//! Error types and error support code.

/// Boxed error produced by a resource factory.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Removal was attempted on an empty container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, thiserror::Error)]
#[error("cannot remove from an empty container")]
pub struct EmptyContainer;

/// Generalized error type used by the pool.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Pool was constructed outside of a Tokio runtime.
    #[error("pool requires a Tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    /// Pending acquisition was abandoned by the pool before any resource reached it.
    #[error("pool was dropped before a resource was delivered")]
    Closed,
    /// Resource creation failed, and the pool is configured to report it to waiters.
    #[error("resource creation failed: {0}")]
    Create(#[source] BoxError),
}

/// Inconsistent sizing policy.
///
/// The pool tolerates such policies, but will not be able to satisfy every bound at once.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PolicyError {
    /// Minimum available count is larger than minimum pool size.
    #[error("min_available ({min_available}) exceeds min_pool_size ({min_pool_size})")]
    MinAvailableOverMinSize {
        /// Configured minimum available count.
        min_available: usize,
        /// Configured minimum pool size.
        min_pool_size: usize,
    },
    /// Minimum pool size is larger than maximum pool size.
    #[error("min_pool_size ({min_pool_size}) exceeds max_pool_size ({max_pool_size})")]
    MinSizeOverMaxSize {
        /// Configured minimum pool size.
        min_pool_size: usize,
        /// Configured maximum pool size.
        max_pool_size: usize,
    },
    /// Minimum available count is larger than maximum available count.
    #[error("min_available ({min_available}) exceeds max_available ({max_available})")]
    MinAvailableOverMaxAvailable {
        /// Configured minimum available count.
        min_available: usize,
        /// Configured maximum available count.
        max_available: usize,
    },
}
