use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::backend::{Lease, NodeFactory, NodePool, NodeStatus};
use crate::discovery::{NodeSpec, Role};
use crate::error::RouteError;
use crate::pool::Connector;

/// Round-robin set of node pools sharing one role
///
/// Selection takes the read lock, so any number of callers acquire in
/// parallel; topology changes take the write lock.
pub struct PoolSet<C: Connector> {
    role: Role,
    factory: Arc<NodeFactory<C>>,
    nodes: RwLock<Vec<NodePool<C>>>,
    /// Shared rotation counter, reduced modulo the node count on use
    counter: AtomicUsize,
}

impl<C: Connector> PoolSet<C> {
    pub fn new(role: Role, factory: Arc<NodeFactory<C>>) -> Self {
        Self {
            role,
            factory,
            nodes: RwLock::new(Vec::new()),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Borrow a connection from the next node in rotation.
    ///
    /// Starting at the rotation position, nodes whose circuit is open are
    /// skipped. The first node that answers with a connection or a transport
    /// error decides the result; nothing else is tried after a hard error.
    pub async fn acquire(&self) -> Result<Lease<C::Conn>, RouteError> {
        let nodes = self.nodes.read().await;
        let len = nodes.len();
        if len == 0 {
            return Err(RouteError::NoUsablePool(self.role));
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed) % len;

        for offset in 0..len {
            let node = &nodes[(start + offset) % len];
            match node.acquire().await {
                Err(RouteError::PoolUnavailable { .. }) => {
                    debug!(role = %self.role, node = %node.id(), "Skipping unavailable node");
                }
                result => return result,
            }
        }

        Err(RouteError::NoUsablePool(self.role))
    }

    /// Add a node, or swap in a fresh pool for the node with the same id.
    /// A superseded pool is closed after the swap.
    pub async fn put(&self, spec: NodeSpec) {
        let pool = self.factory.build(spec);
        let mut nodes = self.nodes.write().await;

        match nodes.iter().position(|n| n.id() == pool.id()) {
            Some(idx) => {
                let old = std::mem::replace(&mut nodes[idx], pool);
                old.close();
                info!(
                    role = %self.role,
                    node = %old.id(),
                    address = %nodes[idx].spec().address,
                    "Replaced node"
                );
            }
            None => {
                info!(
                    role = %self.role,
                    node = %pool.id(),
                    address = %pool.spec().address,
                    "Added node"
                );
                nodes.push(pool);
            }
        }
    }

    /// Remove and close the node with this id. Returns `false` if absent.
    pub async fn del(&self, id: &str) -> bool {
        let mut nodes = self.nodes.write().await;

        match nodes.iter().position(|n| n.id() == id) {
            Some(idx) => {
                let old = nodes.remove(idx);
                old.close();
                info!(role = %self.role, node = %id, remaining = nodes.len(), "Removed node");
                true
            }
            None => {
                debug!(role = %self.role, node = %id, "Remove for unknown node ignored");
                false
            }
        }
    }

    /// Close every node. Later acquisitions report no usable pool.
    pub async fn close(&self) {
        let mut nodes = self.nodes.write().await;
        for node in nodes.drain(..) {
            node.close();
        }
        debug!(role = %self.role, "Closed pool set");
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    /// Node ids in rotation order
    pub async fn node_ids(&self) -> Vec<String> {
        self.nodes
            .read()
            .await
            .iter()
            .map(|n| n.id().to_string())
            .collect()
    }

    pub async fn status(&self) -> Vec<NodeStatus> {
        self.nodes.read().await.iter().map(NodePool::status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitOptions, ConnOptions};
    use crate::test_utils::FlakyConnector;
    use std::collections::HashSet;
    use std::time::Duration;

    fn pool_set(connector: &Arc<FlakyConnector>) -> PoolSet<FlakyConnector> {
        let factory = NodeFactory::new(
            Arc::clone(connector),
            ConnOptions::default(),
            CircuitOptions {
                fail_window: Duration::from_secs(5),
                max_fails: 3,
            },
        );
        PoolSet::new(Role::Replica, Arc::new(factory))
    }

    async fn with_nodes(connector: &Arc<FlakyConnector>, count: usize) -> PoolSet<FlakyConnector> {
        let set = pool_set(connector);
        for i in 0..count {
            set.put(NodeSpec::new(format!("kv-{}", i), format!("10.0.0.{}:6379", i)))
                .await;
        }
        set
    }

    #[tokio::test]
    async fn test_round_robin_visits_every_node() {
        let connector = FlakyConnector::new();
        let set = with_nodes(&connector, 3).await;

        let mut seen = HashSet::new();
        for _ in 0..3 {
            let lease = set.acquire().await.unwrap();
            seen.insert(lease.node_id().to_string());
        }

        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_skips_open_circuit() {
        let connector = FlakyConnector::new();
        let set = with_nodes(&connector, 3).await;

        // Trip kv-1: every attempt on it fails until the circuit opens
        connector.fail("10.0.0.1:6379");
        let mut failures = 0;
        while failures < 3 {
            if set.acquire().await.is_err() {
                failures += 1;
            }
        }
        let attempts = connector.connects("10.0.0.1:6379");

        for _ in 0..30 {
            let lease = set.acquire().await.unwrap();
            assert_ne!(lease.node_id(), "kv-1");
        }
        assert_eq!(connector.connects("10.0.0.1:6379"), attempts);
    }

    #[tokio::test]
    async fn test_hard_error_returned_without_scanning_further() {
        let connector = FlakyConnector::new();
        let set = with_nodes(&connector, 2).await;
        connector.fail("10.0.0.0:6379");
        connector.fail("10.0.0.1:6379");

        let err = set.acquire().await.err().unwrap();
        assert!(matches!(err, RouteError::Transport { .. }));
        assert_eq!(connector.total_connects(), 1);
    }

    #[tokio::test]
    async fn test_empty_set_has_no_usable_pool() {
        let connector = FlakyConnector::new();
        let set = pool_set(&connector);

        let err = set.acquire().await.err().unwrap();
        assert!(matches!(err, RouteError::NoUsablePool(Role::Replica)));
    }

    #[tokio::test]
    async fn test_all_open_has_no_usable_pool_and_no_io() {
        let connector = FlakyConnector::new();
        let set = with_nodes(&connector, 2).await;
        connector.fail("10.0.0.0:6379");
        connector.fail("10.0.0.1:6379");

        // Three failures per node; a hard error ends each scan
        for _ in 0..6 {
            assert!(set.acquire().await.is_err());
        }
        let attempts = connector.total_connects();

        let err = set.acquire().await.err().unwrap();
        assert!(matches!(err, RouteError::NoUsablePool(_)));
        assert_eq!(connector.total_connects(), attempts);
    }

    #[tokio::test]
    async fn test_put_replaces_in_place_and_closes_old() {
        let connector = FlakyConnector::new();
        let set = with_nodes(&connector, 2).await;

        // Park one idle connection in kv-0's pool
        drop(set.acquire().await.unwrap());
        assert_eq!(connector.dropped(), 0);

        set.put(NodeSpec::new("kv-0", "10.0.0.9:6379")).await;

        assert_eq!(set.len().await, 2);
        assert_eq!(set.node_ids().await, vec!["kv-0", "kv-1"]);
        assert_eq!(connector.dropped(), 1);

        let status = set.status().await;
        assert_eq!(status[0].address, "10.0.0.9:6379");
    }

    #[tokio::test]
    async fn test_del_removes_and_closes() {
        let connector = FlakyConnector::new();
        let set = with_nodes(&connector, 2).await;

        let lease = set.acquire().await.unwrap();
        let served = lease.node_id().to_string();
        drop(lease);

        assert!(set.del(&served).await);
        assert!(!set.del(&served).await);
        assert_eq!(set.len().await, 1);
        assert_eq!(connector.dropped(), 1);

        for _ in 0..4 {
            assert_ne!(set.acquire().await.unwrap().node_id(), served);
        }
    }

    #[tokio::test]
    async fn test_close_empties_set() {
        let connector = FlakyConnector::new();
        let set = with_nodes(&connector, 2).await;

        set.close().await;
        assert!(set.is_empty().await);
        assert!(matches!(
            set.acquire().await.err().unwrap(),
            RouteError::NoUsablePool(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_reaches_all_nodes() {
        let connector = FlakyConnector::new();
        let set = Arc::new(with_nodes(&connector, 4).await);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let set = Arc::clone(&set);
            handles.push(tokio::spawn(async move {
                set.acquire().await.map(|lease| lease.node_id().to_string())
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            seen.insert(handle.await.unwrap().unwrap());
        }
        assert_eq!(seen.len(), 4);
    }
}
