//! Resolver sessions backed by a naming registry
//!
//! A [`NamingResolverBuilder`] turns a target string into a
//! [`NamingResolver`]: one background merge loop that keeps the consumer's
//! [`ClientConn`] supplied with the complete address set of a service.

mod aggregator;
pub mod builder;
pub mod conn;
pub mod resolver;

pub use builder::{BuilderConfig, NamingResolverBuilder, DEFAULT_SCHEME};
pub use conn::{ClientConn, Resolver, ResolverBuilder};
pub use resolver::{NamingResolver, SessionState};
