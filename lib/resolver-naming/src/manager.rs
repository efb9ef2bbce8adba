//! Endpoint manager: bridges registry listing and push notifications into a
//! bounded stream of update batches

use crate::client::{EventListener, Instance, NamingClient, ServiceQuery, SubscriptionId};
use async_trait::async_trait;
use futures::Stream;
use resolver_core::{Endpoint, NamingError, ResolveError, Result, Target, Update};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One item of a watch stream: a batch of updates, or a registry failure.
pub type WatchEvent = Result<Vec<Update>>;

/// Watch channel configuration
#[derive(Clone, Debug)]
pub struct WatchOptions {
    /// Number of batches buffered between the registry and the consumer.
    /// Values below 1 are treated as 1.
    pub channel_capacity: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self { channel_capacity: 1 }
    }
}

/// EndpointManager watches the instances of one service
pub struct EndpointManager {
    client: Arc<dyn NamingClient>,
    target: Target,
    query: ServiceQuery,
    options: WatchOptions,
}

impl EndpointManager {
    /// Create a manager for a raw target string. `group` applies when the
    /// target does not name one.
    pub fn new(client: Option<Arc<dyn NamingClient>>, target: &str, group: &str) -> Result<Self> {
        let client = require_client(client)?;
        if target.trim().is_empty() {
            return Err(ResolveError::InvalidArgument("invalid target".to_string()));
        }
        let target = Target::parse(target)?.with_default_group(group);
        Ok(Self::with_target(client, target))
    }

    /// Create a manager for an already parsed target.
    pub fn with_target(client: Arc<dyn NamingClient>, target: Target) -> Self {
        let query = ServiceQuery::from_target(&target);
        Self {
            client,
            target,
            query,
            options: WatchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: WatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn query(&self) -> &ServiceQuery {
        &self.query
    }

    /// List the current instances, queue them as the first batch, then
    /// subscribe for changes.
    ///
    /// Fails when the listing errors or finds no serving instance, or when
    /// the subscription cannot be established.
    pub async fn new_watch_channel(&self, cancel: CancellationToken) -> Result<WatchChannel> {
        let service = self.query.to_string();

        let instances = self
            .client
            .select_instances(&self.query)
            .await
            .map_err(|source| ResolveError::Lookup {
                service: service.clone(),
                source,
            })?;

        let initial = serving_endpoints(&instances);
        if initial.is_empty() {
            return Err(ResolveError::NoInstances(service));
        }
        debug!("Initial listing of {} has {} instances", service, initial.len());

        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let batch = initial
            .iter()
            .map(|(key, endpoint)| Update::upsert(key.clone(), endpoint.clone()))
            .collect();
        tx.try_send(Ok(batch))
            .map_err(|e| ResolveError::Internal(format!("failed to queue initial batch: {}", e)))?;

        let listener = Arc::new(WatchListener {
            service: service.clone(),
            cancel,
            state: Mutex::new(ListenerState {
                tx: Some(tx),
                seen: initial,
            }),
        });

        let subscription = self
            .client
            .subscribe(&self.query, listener.clone())
            .await
            .map_err(|source| ResolveError::Subscription {
                service: service.clone(),
                source,
            })?;
        info!("Subscribed to {} ({})", service, subscription);

        // The registry owns the listener; if it lets go, the stream ends.
        Ok(WatchChannel {
            rx,
            client: self.client.clone(),
            subscription: Some(subscription),
            listener: Arc::downgrade(&listener),
            service,
        })
    }
}

fn require_client(client: Option<Arc<dyn NamingClient>>) -> Result<Arc<dyn NamingClient>> {
    client.ok_or_else(|| ResolveError::InvalidArgument("invalid client".to_string()))
}

fn serving_endpoints(instances: &[Instance]) -> BTreeMap<String, Endpoint> {
    instances
        .iter()
        .filter(|i| i.is_serving())
        .map(|i| (i.key(), i.to_endpoint()))
        .collect()
}

/// Turn a full instance set into the updates relative to `seen`.
///
/// Keys missing from `instances` become tombstones; new or changed
/// endpoints become upserts. `seen` is replaced by the new set.
pub fn diff_instances(
    seen: &mut BTreeMap<String, Endpoint>,
    instances: &[Instance],
) -> Vec<Update> {
    let current = serving_endpoints(instances);
    let mut updates = Vec::new();

    for key in seen.keys() {
        if !current.contains_key(key) {
            updates.push(Update::tombstone(key.clone()));
        }
    }
    for (key, endpoint) in &current {
        if seen.get(key) != Some(endpoint) {
            updates.push(Update::upsert(key.clone(), endpoint.clone()));
        }
    }

    *seen = current;
    updates
}

struct ListenerState {
    tx: Option<mpsc::Sender<WatchEvent>>,
    seen: BTreeMap<String, Endpoint>,
}

/// Registry-side half of a watch channel.
struct WatchListener {
    service: String,
    cancel: CancellationToken,
    state: Mutex<ListenerState>,
}

impl WatchListener {
    async fn detach(&self) {
        self.state.lock().await.tx = None;
    }
}

#[async_trait]
impl EventListener for WatchListener {
    async fn on_event(&self, event: std::result::Result<Vec<Instance>, NamingError>) {
        // Held across the send so batches keep registry order.
        let mut state = self.state.lock().await;
        let Some(tx) = state.tx.clone() else {
            debug!("Dropping event for detached watch on {}", self.service);
            return;
        };

        let item = match event {
            Ok(instances) => {
                let updates = diff_instances(&mut state.seen, &instances);
                if updates.is_empty() {
                    debug!("No effective change for {}", self.service);
                    return;
                }
                debug!("Pushing {} updates for {}", updates.len(), self.service);
                Ok(updates)
            }
            Err(source) => {
                warn!("Registry reported an error for {}: {}", self.service, source);
                Err(ResolveError::Subscription {
                    service: self.service.clone(),
                    source,
                })
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("Watch on {} cancelled, discarding pending batch", self.service);
            }
            res = tx.send(item) => {
                if res.is_err() {
                    debug!("Watch channel for {} closed", self.service);
                }
            }
        }
    }
}

/// Consumer half of a watch: a stream of update batches.
///
/// The first item is always the initial listing. Call [`WatchChannel::close`]
/// to unsubscribe; the stream ends once closed.
pub struct WatchChannel {
    rx: mpsc::Receiver<WatchEvent>,
    client: Arc<dyn NamingClient>,
    subscription: Option<SubscriptionId>,
    listener: Weak<WatchListener>,
    service: String,
}

impl WatchChannel {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_none()
    }

    /// Stop the subscription and close the stream. Unsubscribe failures are
    /// logged only. Safe to call more than once.
    pub async fn close(&mut self) {
        // Closing first releases a listener blocked on a full channel.
        self.rx.close();

        if let Some(id) = self.subscription.take() {
            match self.client.unsubscribe(id).await {
                Ok(()) => info!("Unsubscribed from {} ({})", self.service, id),
                Err(e) => warn!("Failed to unsubscribe from {} ({}): {}", self.service, id, e),
            }
        }

        if let Some(listener) = self.listener.upgrade() {
            listener.detach().await;
        }
    }
}

impl Stream for WatchChannel {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for WatchChannel {
    fn drop(&mut self) {
        if let Some(id) = self.subscription {
            warn!(
                "Watch channel for {} dropped without close, subscription {} left active",
                self.service, id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNamingClient;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    fn instance(id: &str, ip: &str) -> Instance {
        let mut instance = Instance::new(ip, 9000);
        instance.instance_id = Some(id.to_string());
        instance
    }

    fn addrs(updates: &[Update]) -> Vec<(String, Option<String>)> {
        updates
            .iter()
            .map(|u| (u.key.clone(), u.endpoint.as_ref().map(|e| e.addr.clone())))
            .collect()
    }

    fn manager_for(registry: &Arc<MemoryNamingClient>) -> EndpointManager {
        let client: Arc<dyn NamingClient> = registry.clone();
        EndpointManager::new(Some(client), "orders", "").unwrap()
    }

    async fn next(watch: &mut WatchChannel) -> WatchEvent {
        timeout(Duration::from_secs(5), watch.next())
            .await
            .expect("timed out waiting for batch")
            .expect("watch stream ended")
    }

    #[test]
    fn test_diff_synthesizes_tombstones() {
        let mut seen = BTreeMap::new();
        let first = diff_instances(
            &mut seen,
            &[instance("a", "10.0.0.1"), instance("b", "10.0.0.2")],
        );
        assert_eq!(first.len(), 2);

        let second = diff_instances(
            &mut seen,
            &[instance("b", "10.0.0.2"), instance("c", "10.0.0.3")],
        );
        assert_eq!(
            addrs(&second),
            vec![
                ("a".to_string(), None),
                ("c".to_string(), Some("10.0.0.3:9000".to_string())),
            ]
        );
    }

    #[test]
    fn test_diff_unhealthy_counts_as_removed() {
        let mut seen = BTreeMap::new();
        diff_instances(&mut seen, &[instance("a", "10.0.0.1")]);

        let mut sick = instance("a", "10.0.0.1");
        sick.healthy = false;
        let updates = diff_instances(&mut seen, &[sick]);
        assert_eq!(addrs(&updates), vec![("a".to_string(), None)]);
        assert!(seen.is_empty());
    }

    #[test]
    fn test_diff_unchanged_is_empty() {
        let mut seen = BTreeMap::new();
        diff_instances(&mut seen, &[instance("a", "10.0.0.1")]);
        assert!(diff_instances(&mut seen, &[instance("a", "10.0.0.1")]).is_empty());
    }

    #[test]
    fn test_new_manager_rejects_missing_client() {
        let err = EndpointManager::new(None, "nacos://orders", "").err().unwrap();
        assert!(matches!(err, ResolveError::InvalidArgument(_)));
    }

    #[test]
    fn test_new_manager_rejects_empty_target() {
        let client: Arc<dyn NamingClient> = Arc::new(MemoryNamingClient::new());
        let err = EndpointManager::new(Some(client), "", "").err().unwrap();
        assert!(matches!(err, ResolveError::InvalidArgument(_)));
    }

    #[test]
    fn test_new_manager_applies_group() {
        let client: Arc<dyn NamingClient> = Arc::new(MemoryNamingClient::new());
        let manager = EndpointManager::new(Some(client), "orders", "payments").unwrap();
        assert_eq!(manager.query().group_name, "payments");
        assert_eq!(manager.query().service_name, "orders");
    }

    #[tokio::test]
    async fn test_no_instances_fails() {
        let registry = Arc::new(MemoryNamingClient::new());
        let manager = manager_for(&registry);
        let err = manager.new_watch_channel(CancellationToken::new()).await.err().unwrap();
        assert!(matches!(err, ResolveError::NoInstances(_)));
        assert_eq!(registry.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_lookup_failure() {
        let registry = Arc::new(MemoryNamingClient::new());
        registry.register_instance("DEFAULT_GROUP", "orders", instance("a", "10.0.0.1")).await;
        registry.fail_lookups(Some(NamingError::Unavailable("connection refused".into()))).await;

        let manager = manager_for(&registry);
        let err = manager.new_watch_channel(CancellationToken::new()).await.err().unwrap();
        assert!(matches!(err, ResolveError::Lookup { .. }));
    }

    #[tokio::test]
    async fn test_subscribe_failure() {
        let registry = Arc::new(MemoryNamingClient::new());
        registry.register_instance("DEFAULT_GROUP", "orders", instance("a", "10.0.0.1")).await;
        registry.fail_subscribe(Some(NamingError::Other("quota exceeded".into()))).await;

        let manager = manager_for(&registry);
        let err = manager.new_watch_channel(CancellationToken::new()).await.err().unwrap();
        assert!(matches!(err, ResolveError::Subscription { .. }));
    }

    #[tokio::test]
    async fn test_initial_batch_then_push() {
        let registry = Arc::new(MemoryNamingClient::new());
        registry.register_instance("DEFAULT_GROUP", "orders", instance("a", "10.0.0.1")).await;

        let manager = manager_for(&registry);
        let mut watch = manager.new_watch_channel(CancellationToken::new()).await.unwrap();

        let initial = next(&mut watch).await.unwrap();
        assert_eq!(addrs(&initial), vec![("a".to_string(), Some("10.0.0.1:9000".to_string()))]);

        registry
            .replace_instances("DEFAULT_GROUP", "orders", vec![instance("b", "10.0.0.2")])
            .await;
        let pushed = next(&mut watch).await.unwrap();
        assert_eq!(
            addrs(&pushed),
            vec![
                ("a".to_string(), None),
                ("b".to_string(), Some("10.0.0.2:9000".to_string())),
            ]
        );

        watch.close().await;
        assert!(watch.is_closed());
        assert_eq!(registry.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_registry_error_is_forwarded() {
        let registry = Arc::new(MemoryNamingClient::new());
        registry.register_instance("DEFAULT_GROUP", "orders", instance("a", "10.0.0.1")).await;

        let manager = manager_for(&registry);
        let mut watch = manager.new_watch_channel(CancellationToken::new()).await.unwrap();
        next(&mut watch).await.unwrap();

        let lost = NamingError::Unavailable("lost session".into());
        registry.push_error("DEFAULT_GROUP", "orders", lost).await;
        let err = next(&mut watch).await.unwrap_err();
        assert!(matches!(err, ResolveError::Subscription { .. }));

        watch.close().await;
    }

    #[tokio::test]
    async fn test_close_releases_blocked_producer() {
        let registry = Arc::new(MemoryNamingClient::new());
        registry.register_instance("DEFAULT_GROUP", "orders", instance("a", "10.0.0.1")).await;

        let manager = manager_for(&registry);
        let mut watch = manager.new_watch_channel(CancellationToken::new()).await.unwrap();

        // Nothing drains the channel; the initial batch fills it and these
        // pushes back up in the registry's delivery task.
        registry.register_instance("DEFAULT_GROUP", "orders", instance("b", "10.0.0.2")).await;
        registry.register_instance("DEFAULT_GROUP", "orders", instance("c", "10.0.0.3")).await;

        timeout(Duration::from_secs(5), watch.close())
            .await
            .expect("close blocked on a full channel");
        assert_eq!(registry.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_stream_ends_when_registry_drops_listener() {
        let registry = Arc::new(MemoryNamingClient::new());
        registry.register_instance("DEFAULT_GROUP", "orders", instance("a", "10.0.0.1")).await;

        let manager = manager_for(&registry);
        let mut watch = manager.new_watch_channel(CancellationToken::new()).await.unwrap();
        next(&mut watch).await.unwrap();

        registry.shutdown().await;
        let end = timeout(Duration::from_secs(5), watch.next()).await.unwrap();
        assert!(end.is_none());

        watch.close().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_error_is_not_fatal() {
        let registry = Arc::new(MemoryNamingClient::new());
        registry.register_instance("DEFAULT_GROUP", "orders", instance("a", "10.0.0.1")).await;

        let manager = manager_for(&registry);
        let mut watch = manager.new_watch_channel(CancellationToken::new()).await.unwrap();
        registry.fail_unsubscribe(Some(NamingError::Unavailable("gone".into()))).await;

        watch.close().await;
        assert!(watch.is_closed());
    }
}
