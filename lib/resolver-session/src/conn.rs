//! Seams towards the connection-routing framework

use async_trait::async_trait;
use resolver_core::{ResolveError, Result, Snapshot};
use std::sync::Arc;

/// The consumer of resolved addresses.
///
/// Both methods are called from the resolver's merge loop on a runtime
/// thread and must not block: hand the value off and return. A slow call
/// holds back the registry and stalls `close` until it returns.
pub trait ClientConn: Send + Sync {
    /// Accept the complete current address set.
    fn update_state(&self, snapshot: Snapshot);

    /// Observe a resolution failure that happened after build.
    fn report_error(&self, error: ResolveError);
}

/// A running resolver, owned by one logical connection.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Hint that addresses should be refreshed now. May be ignored.
    fn resolve_now(&self);

    /// Stop resolving. Returns once all background work has finished.
    async fn close(&self);
}

/// Creates resolvers for targets of one scheme.
#[async_trait]
pub trait ResolverBuilder: Send + Sync {
    fn scheme(&self) -> &str;

    async fn build(&self, target: &str, conn: Arc<dyn ClientConn>) -> Result<Box<dyn Resolver>>;
}
