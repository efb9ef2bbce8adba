//! Naming registry client interface

use async_trait::async_trait;
use resolver_core::{Endpoint, Metadata, NamingError, Target};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// An instance record as reported by the registry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl Instance {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            instance_id: None,
            ip: ip.into(),
            port,
            weight: default_weight(),
            healthy: true,
            enabled: true,
            cluster_name: String::new(),
            service_name: String::new(),
            metadata: Metadata::new(),
        }
    }

    /// Stable identity of the instance within its service.
    pub fn key(&self) -> String {
        match self.instance_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!(
                "{}#{}#{}#{}",
                self.ip, self.port, self.cluster_name, self.service_name
            ),
        }
    }

    /// Dialable address: `ip:port`, bracketed for IPv6 literals.
    pub fn addr(&self) -> String {
        if self.port == 0 {
            self.ip.clone()
        } else if self.ip.contains(':') && !self.ip.starts_with('[') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }

    pub fn is_serving(&self) -> bool {
        self.healthy && self.enabled
    }

    pub fn to_endpoint(&self) -> Endpoint {
        Endpoint::new(self.addr()).with_metadata(self.metadata.clone())
    }
}

/// Selects the instances of one service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceQuery {
    pub service_name: String,
    pub group_name: String,
    /// Empty selects every cluster.
    pub clusters: Vec<String>,
    pub healthy_only: bool,
}

impl ServiceQuery {
    pub fn from_target(target: &Target) -> Self {
        Self {
            service_name: target.service_name().to_string(),
            group_name: target.group().unwrap_or(DEFAULT_GROUP).to_string(),
            clusters: target.clusters().to_vec(),
            healthy_only: true,
        }
    }

    pub fn matches_cluster(&self, cluster: &str) -> bool {
        self.clusters.is_empty() || self.clusters.iter().any(|c| c == cluster)
    }
}

impl fmt::Display for ServiceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@@{}", self.group_name, self.service_name)?;
        if !self.clusters.is_empty() {
            write!(f, "[{}]", self.clusters.join(","))?;
        }
        Ok(())
    }
}

/// Handle for an active subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Receives registry push notifications.
///
/// Each successful event carries the full current instance set of the
/// subscribed query, not a delta.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: Result<Vec<Instance>, NamingError>);
}

/// The registry SDK surface the resolver relies on.
#[async_trait]
pub trait NamingClient: Send + Sync {
    /// List the instances of a service.
    async fn select_instances(&self, query: &ServiceQuery) -> Result<Vec<Instance>, NamingError>;

    /// Register a listener for changes to a service.
    ///
    /// Implementations deliver events from their own task and must not call
    /// the listener before `subscribe` returns.
    async fn subscribe(
        &self,
        query: &ServiceQuery,
        listener: Arc<dyn EventListener>,
    ) -> Result<SubscriptionId, NamingError>;

    /// Stop delivering events to a subscription. Once this returns, the
    /// listener is not called again.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), NamingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_key() {
        let mut instance = Instance::new("10.0.0.1", 9000);
        instance.cluster_name = "sh".to_string();
        instance.service_name = "orders".to_string();
        assert_eq!(instance.key(), "10.0.0.1#9000#sh#orders");

        instance.instance_id = Some("a".to_string());
        assert_eq!(instance.key(), "a");

        instance.instance_id = Some(String::new());
        assert_eq!(instance.key(), "10.0.0.1#9000#sh#orders");
    }

    #[test]
    fn test_instance_addr() {
        assert_eq!(Instance::new("10.0.0.1", 9000).addr(), "10.0.0.1:9000");
        assert_eq!(Instance::new("fe80::1", 9000).addr(), "[fe80::1]:9000");
        assert_eq!(Instance::new("orders.local", 0).addr(), "orders.local");
    }

    #[test]
    fn test_query_from_target() {
        let target = Target::parse("nacos://orders?clusters=sh,bj").unwrap();
        let query = ServiceQuery::from_target(&target);
        assert_eq!(query.group_name, DEFAULT_GROUP);
        assert!(query.healthy_only);
        assert!(query.matches_cluster("bj"));
        assert!(!query.matches_cluster("gz"));
        assert_eq!(query.to_string(), "DEFAULT_GROUP@@orders[sh,bj]");
    }
}
