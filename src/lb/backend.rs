use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::{CircuitOptions, ConnOptions, NodeOverrides};
use crate::discovery::{NodeSpec, Role};
use crate::error::RouteError;
use crate::pool::{Connector, FailureTracker, PoolStats, PooledConn, TransportPool};

/// One backend node: its transport pool guarded by its own circuit breaker
pub struct NodePool<C: Connector> {
    id: Arc<str>,
    spec: NodeSpec,
    transport: TransportPool<C>,
    tracker: FailureTracker,
}

impl<C: Connector> NodePool<C> {
    pub fn new(
        spec: NodeSpec,
        opts: ConnOptions,
        circuit: &CircuitOptions,
        connector: Arc<C>,
    ) -> Self {
        Self {
            id: Arc::from(spec.id.as_str()),
            transport: TransportPool::new(spec.clone(), opts, connector),
            tracker: FailureTracker::new(circuit.fail_window, circuit.max_fails),
            spec,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    /// Effective options after per-node overrides
    pub fn options(&self) -> &ConnOptions {
        self.transport.options()
    }

    /// Whether the circuit currently lets this node be tried
    pub fn is_available(&self) -> bool {
        self.tracker.is_available()
    }

    /// Try to borrow a connection.
    ///
    /// Fails fast with [`RouteError::PoolUnavailable`] while the circuit is
    /// open. Transport errors are returned unchanged and counted as failures.
    pub async fn acquire(&self) -> Result<Lease<C::Conn>, RouteError> {
        if !self.tracker.is_available() {
            return Err(RouteError::PoolUnavailable {
                node: self.id.to_string(),
            });
        }

        match self.transport.get().await {
            Ok(conn) => {
                self.tracker.mark_success();
                Ok(Lease {
                    node: Arc::clone(&self.id),
                    conn,
                })
            }
            Err(e) => {
                error!(
                    node = %self.id,
                    address = %self.spec.address,
                    error = %e,
                    "Failed to acquire connection"
                );
                if self.tracker.mark_fail() {
                    warn!(
                        node = %self.id,
                        window_ms = self.tracker.window().as_millis() as u64,
                        trips = self.tracker.trip_count(),
                        "Circuit opened, node will be skipped"
                    );
                }
                Err(RouteError::Transport {
                    node: self.id.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Release the transport pool. Safe to call more than once.
    pub fn close(&self) -> bool {
        self.transport.close()
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id.to_string(),
            address: self.spec.address.clone(),
            role: self.spec.role(),
            available: self.tracker.is_available(),
            trips: self.tracker.trip_count(),
            options: self.options().clone(),
            stats: self.transport.stats(),
        }
    }
}

/// Point-in-time view of a node for reporting
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub id: String,
    pub address: String,
    pub role: Role,
    pub available: bool,
    pub trips: u64,
    pub options: ConnOptions,
    pub stats: PoolStats,
}

/// Builds [`NodePool`]s from node specs using the client-wide defaults
pub struct NodeFactory<C: Connector> {
    connector: Arc<C>,
    defaults: ConnOptions,
    circuit: CircuitOptions,
}

impl<C: Connector> NodeFactory<C> {
    pub fn new(connector: Arc<C>, defaults: ConnOptions, circuit: CircuitOptions) -> Self {
        Self {
            connector,
            defaults,
            circuit,
        }
    }

    pub fn build(&self, spec: NodeSpec) -> NodePool<C> {
        let overrides = NodeOverrides::parse(&spec.options);
        let opts = self.defaults.merged(&overrides);
        debug!(
            node = %spec.id,
            address = %spec.address,
            role = %spec.role(),
            overridden = !overrides.is_empty(),
            "Building node pool"
        );
        NodePool::new(spec, opts, &self.circuit, Arc::clone(&self.connector))
    }
}

/// A borrowed connection tagged with the node that served it
///
/// Dropping the lease returns the connection to its node's pool.
pub struct Lease<T: Send + 'static> {
    node: Arc<str>,
    conn: PooledConn<T>,
}

impl<T: Send + 'static> Lease<T> {
    /// Id of the node this connection belongs to
    pub fn node_id(&self) -> &str {
        &self.node
    }

    /// Close the connection instead of returning it
    pub fn discard(self) {
        self.conn.discard();
    }

    pub fn into_inner(self) -> PooledConn<T> {
        self.conn
    }
}

impl<T: Send + 'static> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.conn
    }
}

impl<T: Send + 'static> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.conn
    }
}
