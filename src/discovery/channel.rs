//! Channel-fed topology watcher
//!
//! Bridges any discovery integration (service registry client, admin API,
//! test harness) into a [`Watcher`]: the integration holds a
//! [`TopologySender`], the routing client consumes the [`ChannelWatcher`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{DiscoveryError, NodeSpec, TopologyUpdate, Watcher};

type Event = Result<TopologyUpdate, DiscoveryError>;

/// Create a connected sender/watcher pair with the given buffer size
pub fn channel_watcher(buffer: usize) -> (TopologySender, ChannelWatcher) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (TopologySender { tx }, ChannelWatcher { rx: Some(rx) })
}

/// Producer half of [`channel_watcher`]
#[derive(Debug, Clone)]
pub struct TopologySender {
    tx: mpsc::Sender<Event>,
}

impl TopologySender {
    /// Announce a new or changed node
    pub async fn put(&self, node: NodeSpec) -> Result<(), DiscoveryError> {
        self.send(Ok(TopologyUpdate::put(node))).await
    }

    /// Announce a removed node
    pub async fn delete(&self, node: NodeSpec) -> Result<(), DiscoveryError> {
        self.send(Ok(TopologyUpdate::delete(node))).await
    }

    /// Deliver a terminal error to the watcher
    pub async fn fail(&self, reason: impl Into<String>) -> Result<(), DiscoveryError> {
        self.send(Err(DiscoveryError::Stream(reason.into()))).await
    }

    /// Whether the watching side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, event: Event) -> Result<(), DiscoveryError> {
        self.tx.send(event).await.map_err(|_| DiscoveryError::Closed)
    }
}

/// Consumer half of [`channel_watcher`]
#[derive(Debug)]
pub struct ChannelWatcher {
    rx: Option<mpsc::Receiver<Event>>,
}

#[async_trait]
impl Watcher for ChannelWatcher {
    async fn next(&mut self) -> Result<Option<TopologyUpdate>, DiscoveryError> {
        let rx = self.rx.as_mut().ok_or(DiscoveryError::Closed)?;
        match rx.recv().await {
            Some(event) => event.map(Some),
            None => Err(DiscoveryError::Closed),
        }
    }

    async fn close(&mut self) -> Result<(), DiscoveryError> {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            debug!("Topology channel closed");
        }
        Ok(())
    }
}
