//! Typed connection options and per-node overrides
//!
//! Client-wide defaults are an immutable [`ConnOptions`] value. Each node may
//! carry a string map of overrides which [`NodeOverrides::parse`] validates
//! field by field; [`ConnOptions::merged`] applies whatever survived.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Transport pool settings for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnOptions {
    /// Dial timeout; also bounds the wait for a free connection
    pub connect_timeout: Duration,

    /// Per-read timeout on a borrowed connection
    pub read_timeout: Duration,

    /// Per-write timeout on a borrowed connection
    pub write_timeout: Duration,

    /// Idle connections older than this are dropped on borrow
    pub idle_timeout: Duration,

    /// Maximum connections checked out at once
    pub max_active: usize,

    /// Maximum idle connections kept for reuse
    pub max_idle: usize,

    /// Wait for a free connection when `max_active` is reached
    pub wait_conn: bool,
}

impl Default for ConnOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(500),
            write_timeout: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(60),
            max_active: 50,
            max_idle: 20,
            wait_conn: true,
        }
    }
}

impl ConnOptions {
    /// Apply node overrides on top of these defaults
    pub fn merged(&self, overrides: &NodeOverrides) -> ConnOptions {
        ConnOptions {
            connect_timeout: overrides.connect_timeout.unwrap_or(self.connect_timeout),
            read_timeout: overrides.read_timeout.unwrap_or(self.read_timeout),
            write_timeout: overrides.write_timeout.unwrap_or(self.write_timeout),
            idle_timeout: overrides.idle_timeout.unwrap_or(self.idle_timeout),
            max_active: overrides.max_active.unwrap_or(self.max_active),
            max_idle: overrides.max_idle.unwrap_or(self.max_idle),
            wait_conn: overrides.wait_conn.unwrap_or(self.wait_conn),
        }
    }
}

/// Circuit breaker settings shared by every node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOptions {
    /// Trip duration, and the span in which `max_fails` failures trip
    pub fail_window: Duration,

    /// Failures within one window needed to trip
    pub max_fails: usize,
}

impl Default for CircuitOptions {
    fn default() -> Self {
        Self {
            fail_window: Duration::from_secs(1),
            max_fails: 3,
        }
    }
}

/// Everything a [`crate::RoutingClient`] needs besides its resolver and connector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingOptions {
    pub conn: ConnOptions,
    pub circuit: CircuitOptions,
    pub read_from_primary: bool,
}

/// Per-node overrides; `None` keeps the client default
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeOverrides {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub max_active: Option<usize>,
    pub max_idle: Option<usize>,
    pub wait_conn: Option<bool>,
}

impl NodeOverrides {
    /// Parse a node's option map. Unknown keys and invalid values are ignored.
    pub fn parse(options: &HashMap<String, String>) -> Self {
        let mut overrides = NodeOverrides::default();

        for (key, value) in options {
            if key.is_empty() || value.is_empty() {
                continue;
            }

            let accepted = match key.as_str() {
                "connect_timeout" => set(&mut overrides.connect_timeout, parse_millis(value)),
                "read_timeout" => set(&mut overrides.read_timeout, parse_millis(value)),
                "write_timeout" => set(&mut overrides.write_timeout, parse_millis(value)),
                "idle_timeout" => set(&mut overrides.idle_timeout, parse_millis(value)),
                "max_active" => set(&mut overrides.max_active, parse_positive(value)),
                "max_idle" => set(&mut overrides.max_idle, parse_positive(value)),
                "wait_conn" => set(&mut overrides.wait_conn, parse_flag(value)),
                _ => {
                    debug!(option = %key, "Ignoring unknown node option");
                    continue;
                }
            };

            if !accepted {
                warn!(option = %key, value = %value, "Ignoring invalid node option");
            }
        }

        overrides
    }

    pub fn is_empty(&self) -> bool {
        *self == NodeOverrides::default()
    }
}

fn set<T>(slot: &mut Option<T>, parsed: Option<T>) -> bool {
    match parsed {
        Some(value) => {
            *slot = Some(value);
            true
        }
        None => false,
    }
}

/// Positive integer
pub fn parse_positive(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|v| *v > 0)
}

/// Positive integer number of milliseconds
pub fn parse_millis(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|v| *v > 0)
        .map(Duration::from_millis)
}

/// Literal `"true"` or `"false"`
pub fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
