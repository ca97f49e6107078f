use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RoutingOptions};
use crate::discovery::{Operation, Resolver, Role, StaticResolver, TopologyUpdate, Watcher};
use crate::error::RouteError;
use crate::lb::{Lease, NodeFactory, NodeStatus, PoolSet};
use crate::pool::{Connector, TcpConnector};

/// Routes operations to primary or replica nodes
///
/// Writes always go to the primary pool set. Reads go to the replica pool set
/// unless reads are pinned to primaries or no replica has ever been seen.
/// The client is meant to be shared (`Arc<RoutingClient>`) by many tasks.
pub struct RoutingClient<C: Connector = TcpConnector> {
    topology: Arc<Topology<C>>,
    read_from_primary: AtomicBool,
    watch: Mutex<Option<WatchHandle>>,
}

impl RoutingClient<TcpConnector> {
    /// Build a TCP client over the nodes listed in `config`
    pub async fn from_config(config: &Config) -> Result<Self, RouteError> {
        let resolver = StaticResolver::new(config.nodes.clone());
        Self::connect(&resolver, Arc::new(TcpConnector), config.routing_options()).await
    }
}

impl<C: Connector> RoutingClient<C> {
    /// Resolve the initial node set and start following topology updates.
    ///
    /// Every resolved node is installed before this returns. Fails with
    /// [`RouteError::ResolutionFailed`] if the resolver errors or yields no
    /// nodes.
    pub async fn connect<R>(
        resolver: &R,
        connector: Arc<C>,
        options: RoutingOptions,
    ) -> Result<Self, RouteError>
    where
        R: Resolver + ?Sized,
    {
        let resolution = resolver
            .resolve()
            .await
            .map_err(|e| RouteError::ResolutionFailed(e.to_string()))?;

        if resolution.nodes.is_empty() {
            return Err(RouteError::ResolutionFailed(
                "resolver returned no nodes".to_string(),
            ));
        }

        let factory = NodeFactory::new(connector, options.conn, options.circuit);
        let topology = Arc::new(Topology::new(Arc::new(factory)));

        let mut primaries = 0;
        let mut replicas = 0;
        for node in resolution.nodes {
            match node.role() {
                Role::Primary => primaries += 1,
                Role::Replica => replicas += 1,
            }
            topology.pool_set_or_create(node.role()).put(node).await;
        }

        let watch = resolution
            .watcher
            .map(|watcher| WatchHandle::spawn(Arc::clone(&topology), watcher));

        info!(
            primaries,
            replicas,
            watching = watch.is_some(),
            read_from_primary = options.read_from_primary,
            "Routing client ready"
        );

        Ok(Self {
            topology,
            read_from_primary: AtomicBool::new(options.read_from_primary),
            watch: Mutex::new(watch),
        })
    }

    /// Borrow a connection to a primary
    pub async fn acquire_for_write(&self) -> Result<Lease<C::Conn>, RouteError> {
        match self.topology.pool_set(Role::Primary) {
            Some(primary) => primary.acquire().await,
            None => Err(RouteError::NoPrimaryConfigured),
        }
    }

    /// Borrow a connection for a read
    pub async fn acquire_for_read(&self) -> Result<Lease<C::Conn>, RouteError> {
        if self.reads_from_primary() {
            return self.acquire_for_write().await;
        }
        match self.topology.pool_set(Role::Replica) {
            Some(replica) => replica.acquire().await,
            None => self.acquire_for_write().await,
        }
    }

    /// Pin reads to primaries; applies from the next read on
    pub fn set_read_from_primary(&self, enabled: bool) {
        self.read_from_primary.store(enabled, Ordering::Relaxed);
        debug!(enabled, "Read-from-primary toggled");
    }

    pub fn reads_from_primary(&self) -> bool {
        self.read_from_primary.load(Ordering::Relaxed)
    }

    /// The pool set for `role`, if one has been created
    pub fn pool_set(&self, role: Role) -> Option<Arc<PoolSet<C>>> {
        self.topology.pool_set(role)
    }

    /// Whether the topology watch task is still running
    pub fn is_watching(&self) -> bool {
        self.watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    /// Status of every node, primaries first
    pub async fn status(&self) -> Vec<NodeStatus> {
        let mut nodes = Vec::new();
        for role in [Role::Primary, Role::Replica] {
            if let Some(set) = self.topology.pool_set(role) {
                nodes.extend(set.status().await);
            }
        }
        nodes
    }

    /// Stop the topology watch, wait for it to finish, then close every pool.
    ///
    /// Connections already handed out stay usable; they are dropped instead of
    /// pooled when returned.
    pub async fn close(&self) {
        let handle = self.watch.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.stop().await;
        }

        for role in [Role::Primary, Role::Replica] {
            if let Some(set) = self.topology.pool_set(role) {
                set.close().await;
            }
        }
        info!("Routing client closed");
    }
}

/// Role-indexed pool sets, shared with the watch task
struct Topology<C: Connector> {
    factory: Arc<NodeFactory<C>>,
    primary: RwLock<Option<Arc<PoolSet<C>>>>,
    replica: RwLock<Option<Arc<PoolSet<C>>>>,
}

impl<C: Connector> Topology<C> {
    fn new(factory: Arc<NodeFactory<C>>) -> Self {
        Self {
            factory,
            primary: RwLock::new(None),
            replica: RwLock::new(None),
        }
    }

    fn slot(&self, role: Role) -> &RwLock<Option<Arc<PoolSet<C>>>> {
        match role {
            Role::Primary => &self.primary,
            Role::Replica => &self.replica,
        }
    }

    fn pool_set(&self, role: Role) -> Option<Arc<PoolSet<C>>> {
        self.slot(role)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn pool_set_or_create(&self, role: Role) -> Arc<PoolSet<C>> {
        let mut slot = self.slot(role).write().unwrap_or_else(PoisonError::into_inner);
        let set = slot.get_or_insert_with(|| {
            debug!(role = %role, "Creating pool set");
            Arc::new(PoolSet::new(role, Arc::clone(&self.factory)))
        });
        Arc::clone(set)
    }

    async fn apply(&self, update: TopologyUpdate) {
        let role = update.node.role();
        match update.op {
            Operation::Delete => match self.pool_set(role) {
                Some(set) => {
                    set.del(&update.node.id).await;
                }
                None => debug!(role = %role, node = %update.node.id, "No pool set for delete"),
            },
            Operation::Put => self.pool_set_or_create(role).put(update.node).await,
        }
    }
}

struct WatchHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    fn spawn<C: Connector>(topology: Arc<Topology<C>>, watcher: Box<dyn Watcher>) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(watch_topology(topology, watcher, shutdown_rx));
        Self { shutdown, task }
    }

    async fn stop(self) {
        // The task may already be gone after a stream error
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Topology watch task ended abnormally");
        }
    }
}

/// Apply updates one at a time until shutdown or the first stream error.
/// A stream error is not retried: the node set stays as last applied.
async fn watch_topology<C: Connector>(
    topology: Arc<Topology<C>>,
    mut watcher: Box<dyn Watcher>,
    mut shutdown: oneshot::Receiver<()>,
) {
    debug!("Topology watch started");

    loop {
        // Shutdown first, so a ready watcher cannot outrun close()
        let next = tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("Topology watch stopping");
                break;
            }
            next = watcher.next() => next,
        };

        match next {
            Ok(Some(update)) => {
                info!(update = %update, "Applying topology update");
                topology.apply(update).await;
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "Topology watch stopped, node set is frozen");
                break;
            }
        }
    }

    if let Err(e) = watcher.close().await {
        warn!(error = %e, "Failed to close topology watcher");
    }
}
