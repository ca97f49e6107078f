//! kvpool - failure-aware primary/replica connection routing for key/value clusters

pub mod cli;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod lb;
pub mod pool;

#[cfg(test)]
mod test_utils;

pub use client::RoutingClient;
pub use config::{Config, RoutingOptions};
pub use discovery::{NodeSpec, Operation, Resolver, Role, TopologyUpdate, Watcher};
pub use error::RouteError;
pub use lb::{Lease, NodeStatus};
pub use pool::{Connector, TcpConnector, TransportError};
