//! Naming source adapter
//!
//! Wraps a naming registry client: one listing of the current instances,
//! then a push subscription, both translated into batches of
//! [`resolver_core::Update`] on a bounded [`WatchChannel`].

pub mod client;
pub mod manager;
pub mod memory;

pub use client::{
    EventListener, Instance, NamingClient, ServiceQuery, SubscriptionId, DEFAULT_GROUP,
};
pub use manager::{diff_instances, EndpointManager, WatchChannel, WatchEvent, WatchOptions};
pub use memory::MemoryNamingClient;
