//! Core types for naming-registry backed address resolution
//!
//! This library provides:
//! - Endpoints, incremental updates and full snapshots
//! - The authoritative address table merged from updates
//! - Target identifier parsing
//! - The resolution error taxonomy

pub mod endpoint;
pub mod error;
pub mod table;
pub mod target;

pub use endpoint::{Endpoint, Metadata, Snapshot, Update};
pub use error::{Code, NamingError, ResolveError, Result};
pub use table::AddressTable;
pub use target::Target;
