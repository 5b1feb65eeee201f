//! Pool listener contract.

/// Callbacks through which a connection reports its reusability to the
/// owning connection pool.
pub trait PoolListener: Send + Sync {
    /// The connection finished an exchange and can be checked out again.
    fn on_recycle(&self);

    /// The connection must not be checked out anymore (shutdown, close
    /// directive, upgrade to a raw socket).
    fn on_evict(&self);
}

/// Listener for connections that are not pooled.
#[derive(Debug, Default)]
pub struct NoopListener;

impl PoolListener for NoopListener {
    fn on_recycle(&self) {}
    fn on_evict(&self) {}
}
