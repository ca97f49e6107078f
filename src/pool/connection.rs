//! Per-node transport connection pool
//!
//! Each node owns one [`TransportPool`] with:
//! - a cap on checked-out connections (`max_active`), optionally waited on
//! - a LIFO stack of idle connections (`max_idle`) expired after `idle_timeout`
//! - a borrow-time liveness check delegated to the [`Connector`]
//!
//! The pool is generic over a [`Connector`], which knows how to dial a node and
//! how to tell whether an idle connection is still usable. [`TcpConnector`] is
//! the default: plain TCP with keep-alive and read/write deadlines.

use async_trait::async_trait;
use socket2::SockRef;
use std::collections::VecDeque;
use std::io;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info};

use crate::config::ConnOptions;
use crate::discovery::NodeSpec;

/// Error types for transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection pool exhausted ({max_active} active)")]
    Exhausted { max_active: usize },

    #[error("timed out after {0:?} waiting for a free connection")]
    WaitTimeout(Duration),

    #[error("connection pool is closed")]
    Closed,

    #[error("connection is stale")]
    Stale,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Knows how to open and vet connections to a node
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// Open a new connection. Credentials, if any, are on `node`.
    async fn connect(&self, node: &NodeSpec, opts: &ConnOptions)
        -> Result<Self::Conn, TransportError>;

    /// Vet an idle connection before handing it out again
    async fn check(&self, _conn: &mut Self::Conn) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Statistics for a transport pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total connections created
    pub total_created: u64,

    /// Total idle connections handed out again
    pub total_reused: u64,

    /// Failed connection attempts
    pub failed_attempts: u64,

    /// Connections currently checked out
    pub active_connections: usize,

    /// Connections waiting in the idle stack
    pub idle_connections: usize,
}

struct IdleConn<T> {
    conn: T,
    returned_at: Instant,
}

/// State shared between a pool and its outstanding [`PooledConn`]s
struct Shared<T> {
    idle: Mutex<VecDeque<IdleConn<T>>>,
    closed: AtomicBool,
    max_idle: usize,
    total_created: AtomicU64,
    total_reused: AtomicU64,
    failed_attempts: AtomicU64,
}

impl<T> Shared<T> {
    fn idle(&self) -> MutexGuard<'_, VecDeque<IdleConn<T>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop_idle(&self) -> Option<IdleConn<T>> {
        self.idle().pop_front()
    }

    /// Put a connection back, or drop it if the pool is closed or full
    fn release(&self, conn: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut idle = self.idle();
        if idle.len() < self.max_idle {
            idle.push_front(IdleConn {
                conn,
                returned_at: Instant::now(),
            });
        }
    }
}

/// Connection pool for a single node
pub struct TransportPool<C: Connector> {
    node: NodeSpec,
    opts: ConnOptions,
    connector: Arc<C>,
    permits: Arc<Semaphore>,
    shared: Arc<Shared<C::Conn>>,
}

impl<C: Connector> TransportPool<C> {
    /// A `max_active` of zero is raised to one; [`TransportPool::options`]
    /// reports the effective value.
    pub fn new(node: NodeSpec, mut opts: ConnOptions, connector: Arc<C>) -> Self {
        opts.max_active = opts.max_active.max(1);
        Self {
            permits: Arc::new(Semaphore::new(opts.max_active)),
            shared: Arc::new(Shared {
                idle: Mutex::new(VecDeque::with_capacity(opts.max_idle)),
                closed: AtomicBool::new(false),
                max_idle: opts.max_idle,
                total_created: AtomicU64::new(0),
                total_reused: AtomicU64::new(0),
                failed_attempts: AtomicU64::new(0),
            }),
            node,
            opts,
            connector,
        }
    }

    pub fn options(&self) -> &ConnOptions {
        &self.opts
    }

    /// Borrow a connection, reusing an idle one when it passes the check
    pub async fn get(&self) -> Result<PooledConn<C::Conn>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let permit = self.acquire_permit().await?;

        while let Some(mut idle) = self.shared.pop_idle() {
            if idle.returned_at.elapsed() >= self.opts.idle_timeout {
                debug!(node = %self.node.id, "Discarding expired idle connection");
                continue;
            }

            match self.connector.check(&mut idle.conn).await {
                Ok(()) => {
                    self.shared.total_reused.fetch_add(1, Ordering::Relaxed);
                    return Ok(PooledConn::new(idle.conn, permit, Arc::clone(&self.shared)));
                }
                Err(e) => {
                    debug!(node = %self.node.id, error = %e, "Discarding unhealthy connection");
                }
            }
        }

        let conn = match self.connector.connect(&self.node, &self.opts).await {
            Ok(conn) => conn,
            Err(e) => {
                self.shared.failed_attempts.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let created = self.shared.total_created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            node = %self.node.id,
            address = %self.node.address,
            total_created = created,
            "Created new connection"
        );

        Ok(PooledConn::new(conn, permit, Arc::clone(&self.shared)))
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, TransportError> {
        let permits = Arc::clone(&self.permits);

        if !self.opts.wait_conn {
            return permits.try_acquire_owned().map_err(|e| match e {
                TryAcquireError::Closed => TransportError::Closed,
                TryAcquireError::NoPermits => TransportError::Exhausted {
                    max_active: self.opts.max_active,
                },
            });
        }

        let wait = self.opts.connect_timeout;
        match tokio::time::timeout(wait, permits.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::WaitTimeout(wait)),
        }
    }

    /// Drop idle connections and refuse further borrows. Returns `false` if
    /// the pool was already closed.
    pub fn close(&self) -> bool {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.permits.close();
        let dropped = {
            let mut idle = self.shared.idle();
            let n = idle.len();
            idle.clear();
            n
        };
        info!(node = %self.node.id, idle_dropped = dropped, "Closed transport pool");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        let available = self.permits.available_permits();
        PoolStats {
            total_created: self.shared.total_created.load(Ordering::Relaxed),
            total_reused: self.shared.total_reused.load(Ordering::Relaxed),
            failed_attempts: self.shared.failed_attempts.load(Ordering::Relaxed),
            active_connections: if self.is_closed() {
                0
            } else {
                self.opts.max_active.saturating_sub(available)
            },
            idle_connections: self.shared.idle().len(),
        }
    }
}

/// A connection borrowed from a [`TransportPool`]
///
/// Dropping it returns the connection to the idle stack; call
/// [`PooledConn::discard`] for connections left in an unknown state.
pub struct PooledConn<T: Send + 'static> {
    conn: Option<T>,
    shared: Arc<Shared<T>>,
    _permit: OwnedSemaphorePermit,
}

impl<T: Send + 'static> PooledConn<T> {
    fn new(conn: T, permit: OwnedSemaphorePermit, shared: Arc<Shared<T>>) -> Self {
        Self {
            conn: Some(conn),
            shared,
            _permit: permit,
        }
    }

    /// Close the connection instead of returning it to the pool
    pub fn discard(mut self) {
        self.conn.take();
    }
}

impl<T: Send + 'static> Deref for PooledConn<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<T: Send + 'static> DerefMut for PooledConn<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<T: Send + 'static> Drop for PooledConn<T> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn);
        }
    }
}

/// Plain TCP connector
///
/// Does not speak the store's protocol, so node passwords are not used here;
/// protocol-aware connectors authenticate inside `connect`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn connect(
        &self,
        node: &NodeSpec,
        opts: &ConnOptions,
    ) -> Result<TcpConnection, TransportError> {
        let stream = tokio::time::timeout(opts.connect_timeout, TcpStream::connect(&node.address))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                addr: node.address.clone(),
                timeout: opts.connect_timeout,
            })?
            .map_err(|e| TransportError::Connect {
                addr: node.address.clone(),
                source: e,
            })?;

        stream.set_nodelay(true)?;
        SockRef::from(&stream).set_keepalive(true)?;

        Ok(TcpConnection {
            stream,
            peer: node.address.clone(),
            read_timeout: opts.read_timeout,
            write_timeout: opts.write_timeout,
        })
    }

    /// An idle socket must have nothing to read: EOF means the peer hung up,
    /// pending bytes mean a reply nobody consumed.
    async fn check(&self, conn: &mut TcpConnection) -> Result<(), TransportError> {
        let sock = SockRef::from(&conn.stream);
        if let Some(e) = sock.take_error()? {
            return Err(TransportError::Io(e));
        }

        let mut buf = [MaybeUninit::<u8>::uninit(); 1];
        match sock.peek(&mut buf) {
            Ok(0) => Err(TransportError::Stale),
            Ok(_) => Err(TransportError::Protocol(
                "unread data on idle connection".to_string(),
            )),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

/// TCP connection with per-call read and write deadlines
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl TcpConnection {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write the whole buffer within the write timeout
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        tokio::time::timeout(self.write_timeout, self.stream.write_all(buf))
            .await
            .map_err(|_| timed_out("write", self.write_timeout))??;
        Ok(())
    }

    /// Read into `buf` within the read timeout; `Ok(0)` means the peer closed
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = tokio::time::timeout(self.read_timeout, self.stream.read(buf))
            .await
            .map_err(|_| timed_out("read", self.read_timeout))??;
        Ok(n)
    }

    /// Raw stream access for protocol layers that manage their own deadlines
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

fn timed_out(op: &str, after: Duration) -> TransportError {
    TransportError::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{} timed out after {:?}", op, after),
    ))
}
