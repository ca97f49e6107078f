//! Shared fixtures for unit tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::ConnOptions;
use crate::discovery::NodeSpec;
use crate::pool::{Connector, TransportError};

/// In-memory connection that remembers which address it was opened to
#[derive(Debug)]
pub struct TestConn {
    pub address: String,
    dropped: Arc<AtomicUsize>,
}

impl Drop for TestConn {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector whose per-address behavior can be flipped at runtime
#[derive(Default)]
pub struct FlakyConnector {
    failing: Mutex<HashSet<String>>,
    connects: Mutex<HashMap<String, usize>>,
    dropped: Arc<AtomicUsize>,
}

impl FlakyConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    pub fn heal(&self, address: &str) {
        self.failing.lock().unwrap().remove(address);
    }

    /// Connection attempts made to `address`, failed ones included
    pub fn connects(&self, address: &str) -> usize {
        self.connects.lock().unwrap().get(address).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.connects.lock().unwrap().values().sum()
    }

    /// Connections dropped so far
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FlakyConnector {
    type Conn = TestConn;

    async fn connect(
        &self,
        node: &NodeSpec,
        _opts: &ConnOptions,
    ) -> Result<TestConn, TransportError> {
        *self
            .connects
            .lock()
            .unwrap()
            .entry(node.address.clone())
            .or_default() += 1;

        if self.failing.lock().unwrap().contains(&node.address) {
            return Err(TransportError::Protocol(format!("{} refused", node.address)));
        }

        Ok(TestConn {
            address: node.address.clone(),
            dropped: Arc::clone(&self.dropped),
        })
    }
}
