//! Authoritative key to endpoint table

use crate::{Endpoint, Snapshot, Update};
use std::collections::BTreeMap;
use tracing::debug;

/// AddressTable holds the last known endpoint of every live instance key.
///
/// It has a single owner (the merge loop), so it carries no locking.
#[derive(Clone, Debug, Default)]
pub struct AddressTable {
    entries: BTreeMap<String, Endpoint>,
}

impl AddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a batch in order. Later updates to the same key win.
    pub fn apply(&mut self, batch: &[Update]) {
        for update in batch {
            match &update.endpoint {
                Some(endpoint) if !endpoint.addr.is_empty() => {
                    self.entries.insert(update.key.clone(), endpoint.clone());
                }
                _ => {
                    if self.entries.remove(&update.key).is_none() {
                        debug!("Tombstone for unknown key {}", update.key);
                    }
                }
            }
        }
    }

    /// Materialize the current address set.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            endpoints: self.entries.values().cloned().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Endpoint> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
