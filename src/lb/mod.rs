//! Node selection
//!
//! - [`NodePool`]: one node's transport pool behind its circuit breaker
//! - [`PoolSet`]: round-robin over the node pools of one role, skipping
//!   nodes whose circuit is open
//!
//! # Selection
//!
//! `PoolSet::acquire` advances a shared atomic counter, then scans the node
//! list from that position (wrapping). Circuit-open nodes are skipped without
//! I/O; the first node that returns a connection or a transport error ends the
//! scan. Only when every node is circuit-open (or there are none) does the
//! caller see [`crate::RouteError::NoUsablePool`].
//!
//! Rotation is a fairness heuristic: concurrent callers may see
//! non-contiguous start positions, but each caller still scans every node.
//!
//! # Thread Safety
//!
//! - The node list sits behind a `tokio::sync::RwLock`: acquisitions share it,
//!   put/del take it exclusively
//! - Each node's failure tracker has its own lock, so recording a failure on
//!   one node never blocks selection among the others

pub mod backend;
pub mod balancer;

pub use backend::{Lease, NodeFactory, NodePool, NodeStatus};
pub use balancer::PoolSet;
