//! Errors surfaced by the routing layer

use crate::discovery::Role;
use crate::pool::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// Circuit open for this node; no I/O was attempted
    #[error("node {node} is unavailable (circuit open)")]
    PoolUnavailable { node: String },

    /// The pool set is empty or every node is circuit-open
    #[error("no usable {0} pool")]
    NoUsablePool(Role),

    #[error("no primary pool configured")]
    NoPrimaryConfigured,

    /// Transport failure, passed through unchanged
    #[error("node {node}: {source}")]
    Transport {
        node: String,
        #[source]
        source: TransportError,
    },

    #[error("resolve failed: {0}")]
    ResolutionFailed(String),
}

impl RouteError {
    /// Worth retrying later: the cluster may recover on its own
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouteError::PoolUnavailable { .. }
                | RouteError::NoUsablePool(_)
                | RouteError::Transport { .. }
        )
    }

    /// The underlying transport error, if any
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            RouteError::Transport { source, .. } => Some(source),
            _ => None,
        }
    }
}
