//! Builder for naming-registry resolvers

use crate::conn::{ClientConn, Resolver, ResolverBuilder};
use crate::resolver::NamingResolver;
use async_trait::async_trait;
use resolver_core::{ResolveError, Result, Target};
use resolver_naming::{EndpointManager, NamingClient, WatchOptions};
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_SCHEME: &str = "nacos";

/// Builder configuration
#[derive(Clone, Debug)]
pub struct BuilderConfig {
    /// URL scheme this builder answers to
    pub scheme: String,
    /// Group used when a target does not carry `group_name`
    pub group: String,
    pub watch: WatchOptions,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            group: String::new(),
            watch: WatchOptions::default(),
        }
    }
}

pub struct NamingResolverBuilder {
    client: Option<Arc<dyn NamingClient>>,
    config: BuilderConfig,
}

impl NamingResolverBuilder {
    pub fn new(client: Arc<dyn NamingClient>, group: impl Into<String>) -> Self {
        Self {
            client: Some(client),
            config: BuilderConfig {
                group: group.into(),
                ..Default::default()
            },
        }
    }

    /// A builder without a client fails every build.
    pub fn with_config(client: Option<Arc<dyn NamingClient>>, config: BuilderConfig) -> Self {
        Self { client, config }
    }

    /// Resolve `target` for `conn`.
    ///
    /// Returns once the initial listing has been queued and the subscription
    /// is live. Argument problems fail with `InvalidArgument`; failures of the
    /// naming source are wrapped in [`ResolveError::WatchChannel`].
    pub async fn build_session(
        &self,
        target: &str,
        conn: Arc<dyn ClientConn>,
    ) -> Result<NamingResolver> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| ResolveError::InvalidArgument("invalid client".to_string()))?;
        let parsed = Target::parse(target)?;
        if let Some(scheme) = parsed.scheme() {
            if scheme != self.config.scheme {
                return Err(ResolveError::InvalidArgument(format!(
                    "scheme {} not handled by {} resolver",
                    scheme, self.config.scheme
                )));
            }
        }

        let manager =
            EndpointManager::with_target(client, parsed.with_default_group(&self.config.group))
                .with_options(self.config.watch.clone());

        let mut resolver = NamingResolver::new(manager.target().clone(), conn);
        let source = manager
            .new_watch_channel(resolver.cancel_token())
            .await
            .map_err(|e| {
                warn!("Failed to open watch channel for {}: {}", target, e);
                ResolveError::WatchChannel(Box::new(e))
            })?;

        resolver.start(source);
        debug!("Resolver built for {}", target);
        Ok(resolver)
    }
}

#[async_trait]
impl ResolverBuilder for NamingResolverBuilder {
    fn scheme(&self) -> &str {
        &self.config.scheme
    }

    async fn build(&self, target: &str, conn: Arc<dyn ClientConn>) -> Result<Box<dyn Resolver>> {
        let resolver = self.build_session(target, conn).await?;
        Ok(Box::new(resolver))
    }
}
