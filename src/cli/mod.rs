//! Operator commands for kvpool
//!
//! # Usage
//!
//! ```bash
//! # Show nodes from a config file
//! kvpool --config kvpool.yaml nodes
//!
//! # Route eight writes and eight reads, then print node health
//! kvpool --config kvpool.yaml check --writes 8 --reads 8
//!
//! # Same, configured from the environment
//! KVPOOL_PRIMARY=10.0.0.1:6379 KVPOOL_REPLICAS=r1=10.0.0.2:6379 kvpool check
//! ```

pub mod commands;
