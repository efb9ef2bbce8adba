//! Endpoints, incremental updates and snapshots
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque per-endpoint attributes, passed through to the consumer unmodified.
pub type Metadata = BTreeMap<String, String>;

/// One reachable instance of a service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Address on which a connection will be established.
    pub addr: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl Endpoint {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A change to one logical instance, identified by `key`.
///
/// A missing endpoint, or one with an empty address, is a tombstone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub key: String,
    pub endpoint: Option<Endpoint>,
}

impl Update {
    pub fn upsert(key: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            key: key.into(),
            endpoint: Some(endpoint),
        }
    }

    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            endpoint: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.endpoint.as_ref().map_or(true, |e| e.addr.is_empty())
    }
}

/// The complete address set at a point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub endpoints: Vec<Endpoint>,
}

impl Snapshot {
    pub fn addrs(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.addr.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
