use async_trait::async_trait;
use std::sync::Mutex;

use super::{DiscoveryError, NodeSpec, Resolution, Resolver, Watcher};

/// Resolver over a fixed node list
///
/// An attached watcher is handed out by the first `resolve` only.
pub struct StaticResolver {
    nodes: Vec<NodeSpec>,
    watcher: Mutex<Option<Box<dyn Watcher>>>,
}

impl StaticResolver {
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        Self {
            nodes,
            watcher: Mutex::new(None),
        }
    }

    /// Attach a live update stream
    pub fn with_watcher(self, watcher: impl Watcher + 'static) -> Self {
        Self {
            nodes: self.nodes,
            watcher: Mutex::new(Some(Box::new(watcher))),
        }
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self) -> Result<Resolution, DiscoveryError> {
        let watcher = self
            .watcher
            .lock()
            .map_err(|_| DiscoveryError::Resolve("watcher slot poisoned".to_string()))?
            .take();

        Ok(Resolution {
            nodes: self.nodes.clone(),
            watcher,
        })
    }
}
