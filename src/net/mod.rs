//! Connections and address resolution.

pub mod connection;
pub mod resolver;

pub use connection::{ConnEvent, ConnStatus, Connection};
pub use resolver::{ResolveFuture, Resolver, StaticResolver, SystemResolver};
