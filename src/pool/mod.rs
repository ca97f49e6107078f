//! Connection pooling and circuit breaker module
//!
//! This module provides:
//! - Per-node transport pools with idle reuse and active-connection limits
//! - A sliding-window circuit breaker per node
//! - The [`Connector`] seam for plugging in protocol-aware connections

pub mod circuit;
pub mod connection;

pub use circuit::FailureTracker;
pub use connection::{
    Connector, PoolStats, PooledConn, TcpConnection, TcpConnector, TransportError, TransportPool,
};
