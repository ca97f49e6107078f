//! Discovery boundary
//!
//! The routing layer does not find nodes itself. A [`Resolver`] hands it the
//! initial node list and, optionally, a [`Watcher`] that streams
//! [`TopologyUpdate`]s for the lifetime of the client.
//!
//! Two implementations ship with the crate:
//! - [`StaticResolver`]: a fixed node list (from config), optionally paired with a watcher
//! - [`channel_watcher`]: an mpsc-backed watcher fed by a [`TopologySender`]

pub mod channel;
pub mod fixed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub use channel::{channel_watcher, ChannelWatcher, TopologySender};
pub use fixed::StaticResolver;

/// Errors produced by a discovery source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery stream closed")]
    Closed,

    #[error("discovery stream error: {0}")]
    Stream(String),

    #[error("resolve failed: {0}")]
    Resolve(String),
}

/// Role of a node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Write-capable node
    Primary,
    /// Read-only node
    Replica,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Replica => "replica",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Identity and settings of one backend node
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Stable node id, unique within its role
    pub id: String,

    /// Network address (`host:port`)
    pub address: String,

    /// Whether the node accepts writes
    #[serde(default)]
    pub primary: bool,

    /// Optional credential handed to the connector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Per-node connection options, see [`crate::config::NodeOverrides`]
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl NodeSpec {
    /// Create a replica node; use [`NodeSpec::primary`] to flip the role
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            primary: false,
            password: None,
            options: HashMap::new(),
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn role(&self) -> Role {
        if self.primary {
            Role::Primary
        } else {
            Role::Replica
        }
    }
}

// Passwords stay out of logs.
impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("primary", &self.primary)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("options", &self.options)
            .finish()
    }
}

impl fmt::Display for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.id, self.address, self.role())
    }
}

/// Kind of topology change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Add a node, or replace the node with the same id
    Put,
    /// Remove the node with this id
    Delete,
}

/// One change pushed by the discovery source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyUpdate {
    pub op: Operation,
    pub node: NodeSpec,
}

impl TopologyUpdate {
    pub fn put(node: NodeSpec) -> Self {
        Self {
            op: Operation::Put,
            node,
        }
    }

    pub fn delete(node: NodeSpec) -> Self {
        Self {
            op: Operation::Delete,
            node,
        }
    }
}

impl fmt::Display for TopologyUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Operation::Put => "put",
            Operation::Delete => "delete",
        };
        write!(f, "{} {}", op, self.node)
    }
}

/// Live subscription to topology changes
#[async_trait]
pub trait Watcher: Send {
    /// Wait for the next update.
    ///
    /// `Ok(None)` means "nothing to apply"; any `Err` is terminal for the
    /// subscriber.
    async fn next(&mut self) -> Result<Option<TopologyUpdate>, DiscoveryError>;

    /// Stop the subscription
    async fn close(&mut self) -> Result<(), DiscoveryError>;
}

/// Result of the initial resolve
pub struct Resolution {
    /// Nodes known at startup
    pub nodes: Vec<NodeSpec>,

    /// Optional live update stream
    pub watcher: Option<Box<dyn Watcher>>,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("nodes", &self.nodes)
            .field("watcher", &self.watcher.is_some())
            .finish()
    }
}

/// Source of the initial node list
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self) -> Result<Resolution, DiscoveryError>;
}
