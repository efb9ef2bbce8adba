//! In-process naming registry
//!
//! Keeps instances per `(group, service)` and pushes the full instance set
//! to matching subscribers after every change, from a delivery task per
//! subscription. Failures can be injected for each client operation.

use crate::client::{EventListener, Instance, NamingClient, ServiceQuery, SubscriptionId};
use async_trait::async_trait;
use resolver_core::NamingError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Event = Result<Vec<Instance>, NamingError>;

struct Subscription {
    query: ServiceQuery,
    events: mpsc::UnboundedSender<Event>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    // (group, service) to instances
    services: HashMap<(String, String), Vec<Instance>>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    lookup_error: Option<NamingError>,
    subscribe_error: Option<NamingError>,
    unsubscribe_error: Option<NamingError>,
}

impl Inner {
    fn instances_for(&self, query: &ServiceQuery) -> Vec<Instance> {
        let key = (query.group_name.clone(), query.service_name.clone());
        self.services
            .get(&key)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|i| query.matches_cluster(&i.cluster_name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn notify(&self, group: &str, service: &str) {
        for (id, sub) in &self.subscriptions {
            if sub.query.group_name != group || sub.query.service_name != service {
                continue;
            }
            let instances = self.instances_for(&sub.query);
            if sub.events.send(Ok(instances)).is_err() {
                debug!("Delivery task for subscription {} already stopped", id);
            }
        }
    }
}

/// MemoryNamingClient is a naming registry held in process memory
#[derive(Clone, Default)]
pub struct MemoryNamingClient {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryNamingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update an instance, keyed by [`Instance::key`]
    pub async fn register_instance(&self, group: &str, service: &str, mut instance: Instance) {
        if instance.service_name.is_empty() {
            instance.service_name = service.to_string();
        }
        let mut inner = self.inner.write().await;
        let instances = inner
            .services
            .entry((group.to_string(), service.to_string()))
            .or_default();
        let key = instance.key();
        match instances.iter_mut().find(|i| i.key() == key) {
            Some(existing) => *existing = instance,
            None => instances.push(instance),
        }
        debug!("Registered instance {} of {}@@{}", key, group, service);
        inner.notify(group, service);
    }

    /// Remove an instance by key. Returns false if it was not registered.
    pub async fn deregister_instance(&self, group: &str, service: &str, key: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = match inner.services.get_mut(&(group.to_string(), service.to_string())) {
            Some(instances) => {
                let before = instances.len();
                instances.retain(|i| i.key() != key);
                instances.len() != before
            }
            None => false,
        };
        if removed {
            debug!("Deregistered instance {} of {}@@{}", key, group, service);
            inner.notify(group, service);
        }
        removed
    }

    /// Replace the whole instance set of a service
    pub async fn replace_instances(&self, group: &str, service: &str, instances: Vec<Instance>) {
        let instances = instances
            .into_iter()
            .map(|mut i| {
                if i.service_name.is_empty() {
                    i.service_name = service.to_string();
                }
                i
            })
            .collect();
        let mut inner = self.inner.write().await;
        inner
            .services
            .insert((group.to_string(), service.to_string()), instances);
        inner.notify(group, service);
    }

    /// Deliver an error to every subscriber of a service
    pub async fn push_error(&self, group: &str, service: &str, error: NamingError) {
        let inner = self.inner.read().await;
        for sub in inner.subscriptions.values() {
            if sub.query.group_name == group && sub.query.service_name == service {
                let _ = sub.events.send(Err(error.clone()));
            }
        }
    }

    /// List all known `(group, service)` pairs
    pub async fn services(&self) -> Vec<(String, String)> {
        let inner = self.inner.read().await;
        inner.services.keys().cloned().collect()
    }

    pub async fn fail_lookups(&self, error: Option<NamingError>) {
        self.inner.write().await.lookup_error = error;
    }

    pub async fn fail_subscribe(&self, error: Option<NamingError>) {
        self.inner.write().await.subscribe_error = error;
    }

    pub async fn fail_unsubscribe(&self, error: Option<NamingError>) {
        self.inner.write().await.unsubscribe_error = error;
    }

    /// Drop every subscription, as a registry client does when it shuts
    /// down. Listeners are released once their queued events are delivered.
    pub async fn shutdown(&self) {
        let subscriptions: Vec<(SubscriptionId, Subscription)> = {
            let mut inner = self.inner.write().await;
            inner.subscriptions.drain().collect()
        };
        for (id, Subscription { events, task, .. }) in subscriptions {
            drop(events);
            if let Err(e) = task.await {
                warn!("Delivery task for subscription {} failed: {}", id, e);
            }
        }
        debug!("Registry client shut down");
    }

    pub async fn subscription_count(&self) -> usize {
        self.inner.read().await.subscriptions.len()
    }
}

#[async_trait]
impl NamingClient for MemoryNamingClient {
    async fn select_instances(&self, query: &ServiceQuery) -> Result<Vec<Instance>, NamingError> {
        let inner = self.inner.read().await;
        if let Some(error) = &inner.lookup_error {
            return Err(error.clone());
        }
        let instances = inner
            .instances_for(query)
            .into_iter()
            .filter(|i| !query.healthy_only || i.is_serving())
            .collect();
        Ok(instances)
    }

    async fn subscribe(
        &self,
        query: &ServiceQuery,
        listener: Arc<dyn EventListener>,
    ) -> Result<SubscriptionId, NamingError> {
        let mut inner = self.inner.write().await;
        if let Some(error) = &inner.subscribe_error {
            return Err(error.clone());
        }

        let id = SubscriptionId::new();
        let (events, mut rx) = mpsc::unbounded_channel::<Event>();
        // Registries push the current state to new subscribers.
        let _ = events.send(Ok(inner.instances_for(query)));

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                listener.on_event(event).await;
            }
        });

        inner.subscriptions.insert(
            id,
            Subscription {
                query: query.clone(),
                events,
                task,
            },
        );
        debug!("Subscription {} created for {}", id, query);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), NamingError> {
        let subscription = {
            let mut inner = self.inner.write().await;
            if let Some(error) = &inner.unsubscribe_error {
                return Err(error.clone());
            }
            inner
                .subscriptions
                .remove(&id)
                .ok_or_else(|| NamingError::SubscriptionNotFound(id.to_string()))?
        };

        // Dropping the sender lets the delivery task drain and exit.
        let Subscription { events, task, .. } = subscription;
        drop(events);
        if let Err(e) = task.await {
            warn!("Delivery task for subscription {} failed: {}", id, e);
        }
        debug!("Subscription {} removed", id);
        Ok(())
    }
}
