//! Client configuration
//!
//! Loaded from a YAML file or from `KVPOOL_*` environment variables and turned
//! into the immutable [`RoutingOptions`] the routing client is built with.

pub mod options;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::discovery::{NodeSpec, Role};

pub use options::{
    parse_flag, parse_millis, parse_positive, CircuitOptions, ConnOptions, NodeOverrides,
    RoutingOptions,
};

/// Client-wide transport pool defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_max_active")]
    pub max_active: usize,

    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// Wait for a free connection instead of failing when `max_active` is reached
    #[serde(default = "default_wait_conn")]
    pub wait_conn: bool,
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_read_timeout_ms() -> u64 {
    500
}

fn default_write_timeout_ms() -> u64 {
    500
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

fn default_max_active() -> usize {
    50
}

fn default_max_idle() -> usize {
    20
}

fn default_wait_conn() -> bool {
    true
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_active: default_max_active(),
            max_idle: default_max_idle(),
            wait_conn: default_wait_conn(),
        }
    }
}

impl From<&PoolSettings> for ConnOptions {
    fn from(settings: &PoolSettings) -> Self {
        ConnOptions {
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
            write_timeout: Duration::from_millis(settings.write_timeout_ms),
            idle_timeout: Duration::from_millis(settings.idle_timeout_ms),
            max_active: settings.max_active,
            max_idle: settings.max_idle,
            wait_conn: settings.wait_conn,
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSettings {
    /// Trip duration and failure counting window, in milliseconds
    #[serde(default = "default_fail_window_ms")]
    pub fail_window_ms: u64,

    /// Failures within one window that trip a node
    #[serde(default = "default_max_fails")]
    pub max_fails: usize,
}

fn default_fail_window_ms() -> u64 {
    1000
}

fn default_max_fails() -> usize {
    3
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            fail_window_ms: default_fail_window_ms(),
            max_fails: default_max_fails(),
        }
    }
}

impl From<&CircuitSettings> for CircuitOptions {
    fn from(settings: &CircuitSettings) -> Self {
        CircuitOptions {
            fail_window: Duration::from_millis(settings.fail_window_ms),
            max_fails: settings.max_fails,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Transport pool defaults, overridable per node
    #[serde(default)]
    pub pool: PoolSettings,

    /// Circuit breaker settings
    #[serde(default)]
    pub circuit: CircuitSettings,

    /// Send reads to primaries even when replicas exist
    #[serde(default)]
    pub read_from_primary: bool,

    /// Statically known nodes
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Immutable options for [`crate::RoutingClient::connect`]
    pub fn routing_options(&self) -> RoutingOptions {
        RoutingOptions {
            conn: ConnOptions::from(&self.pool),
            circuit: CircuitOptions::from(&self.circuit),
            read_from_primary: self.read_from_primary,
        }
    }

    /// Nodes of one role, in declaration order
    pub fn nodes_with_role(&self, role: Role) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(move |node| node.role() == role)
    }

    /// Reject settings the routing layer cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_active == 0 {
            anyhow::bail!("pool.max_active must be positive");
        }
        for (name, value) in [
            ("connect_timeout_ms", self.pool.connect_timeout_ms),
            ("read_timeout_ms", self.pool.read_timeout_ms),
            ("write_timeout_ms", self.pool.write_timeout_ms),
            ("idle_timeout_ms", self.pool.idle_timeout_ms),
        ] {
            if value == 0 {
                anyhow::bail!("pool.{} must be positive", name);
            }
        }
        if self.circuit.max_fails == 0 {
            anyhow::bail!("circuit.max_fails must be at least 1");
        }
        if self.circuit.fail_window_ms == 0 {
            anyhow::bail!("circuit.fail_window_ms must be positive");
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                anyhow::bail!("node with address '{}' has an empty id", node.address);
            }
            if node.address.trim().is_empty() {
                anyhow::bail!("node '{}' has an empty address", node.id);
            }
            if !seen.insert((node.role(), node.id.as_str())) {
                anyhow::bail!("duplicate {} node id '{}'", node.role(), node.id);
            }
        }

        Ok(())
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    config.validate()?;
    Ok(config)
}

/// Load configuration from environment variables
///
/// - `KVPOOL_PRIMARY`: comma-separated primaries, `addr` or `id=addr`
/// - `KVPOOL_REPLICAS`: comma-separated replicas, same format (optional)
/// - `KVPOOL_PASSWORD`: credential for every node (optional)
/// - `KVPOOL_READ_FROM_PRIMARY`: `true`/`false` (optional)
/// - `KVPOOL_CONNECT_TIMEOUT_MS`, `KVPOOL_READ_TIMEOUT_MS`, `KVPOOL_WRITE_TIMEOUT_MS`,
///   `KVPOOL_IDLE_TIMEOUT_MS`, `KVPOOL_MAX_ACTIVE`, `KVPOOL_MAX_IDLE`, `KVPOOL_WAIT_CONN`,
///   `KVPOOL_FAIL_WINDOW_MS`, `KVPOOL_MAX_FAILS` (optional, invalid values ignored)
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    from_env_vars(|key| std::env::var(key).ok())
}

/// Build a configuration from an environment lookup function
pub fn from_env_vars<F>(var: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = Config::new();
    let password = var("KVPOOL_PASSWORD").filter(|p| !p.is_empty());

    for (key, primary) in [("KVPOOL_PRIMARY", true), ("KVPOOL_REPLICAS", false)] {
        let Some(list) = var(key) else { continue };

        for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (id, address) = match entry.split_once('=') {
                Some((id, address)) => (id.trim(), address.trim()),
                None => (entry, entry),
            };

            let mut node = NodeSpec::new(id, address);
            node.primary = primary;
            node.password = password.clone();
            config.nodes.push(node);
        }
    }

    if config.nodes.is_empty() {
        anyhow::bail!("Neither KVPOOL_PRIMARY nor KVPOOL_REPLICAS lists any node");
    }

    if let Some(v) = var("KVPOOL_READ_FROM_PRIMARY").as_deref().and_then(parse_flag) {
        config.read_from_primary = v;
    }

    let pool = &mut config.pool;
    let millis = |key: &str| {
        var(key)
            .as_deref()
            .and_then(parse_millis)
            .map(|d| d.as_millis() as u64)
    };

    if let Some(v) = millis("KVPOOL_CONNECT_TIMEOUT_MS") {
        pool.connect_timeout_ms = v;
    }
    if let Some(v) = millis("KVPOOL_READ_TIMEOUT_MS") {
        pool.read_timeout_ms = v;
    }
    if let Some(v) = millis("KVPOOL_WRITE_TIMEOUT_MS") {
        pool.write_timeout_ms = v;
    }
    if let Some(v) = millis("KVPOOL_IDLE_TIMEOUT_MS") {
        pool.idle_timeout_ms = v;
    }
    if let Some(v) = var("KVPOOL_MAX_ACTIVE").as_deref().and_then(parse_positive) {
        pool.max_active = v;
    }
    if let Some(v) = var("KVPOOL_MAX_IDLE").as_deref().and_then(parse_positive) {
        pool.max_idle = v;
    }
    if let Some(v) = var("KVPOOL_WAIT_CONN").as_deref().and_then(parse_flag) {
        pool.wait_conn = v;
    }
    if let Some(v) = millis("KVPOOL_FAIL_WINDOW_MS") {
        config.circuit.fail_window_ms = v;
    }
    if let Some(v) = var("KVPOOL_MAX_FAILS").as_deref().and_then(parse_positive) {
        config.circuit.max_fails = v;
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from file or environment
///
/// Reads the YAML file when a path is given, otherwise falls back to
/// environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    match config_path {
        Some(path) => load_from_yaml(path),
        None => load_from_env(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
pool:
  connect_timeout_ms: 1500
  max_active: 80
  wait_conn: false

circuit:
  fail_window_ms: 2000
  max_fails: 5

read_from_primary: true

nodes:
  - id: kv-1
    address: 10.0.0.1:6379
    primary: true
    password: secret
  - id: kv-2
    address: 10.0.0.2:6379
    options:
      max_active: "10"
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.pool.connect_timeout_ms, 1500);
        assert_eq!(config.pool.max_active, 80);
        assert!(!config.pool.wait_conn);
        assert_eq!(config.pool.read_timeout_ms, 500);
        assert!(config.read_from_primary);
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes_with_role(Role::Primary).count(), 1);
        assert_eq!(config.nodes[0].password.as_deref(), Some("secret"));
        assert_eq!(config.nodes[1].options.get("max_active").map(String::as_str), Some("10"));

        let opts = config.routing_options();
        assert_eq!(opts.conn.connect_timeout, Duration::from_millis(1500));
        assert_eq!(opts.circuit.fail_window, Duration::from_secs(2));
        assert_eq!(opts.circuit.max_fails, 5);
        assert!(opts.read_from_primary);
    }

    #[test]
    fn test_default_values() {
        let config: Config = serde_yaml::from_str("nodes: []").unwrap();
        assert_eq!(config.routing_options(), RoutingOptions::default());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut config = Config::new();
        config.nodes.push(NodeSpec::new("kv-1", "10.0.0.1:6379"));
        config.nodes.push(NodeSpec::new("kv-1", "10.0.0.9:6379"));
        assert!(config.validate().is_err());

        // Same id under a different role is a different pool set
        config.nodes[1].primary = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_vars() {
        let vars: HashMap<&str, &str> = [
            ("KVPOOL_PRIMARY", "kv-1=10.0.0.1:6379"),
            ("KVPOOL_REPLICAS", "10.0.0.2:6379, 10.0.0.3:6379"),
            ("KVPOOL_PASSWORD", "pw"),
            ("KVPOOL_MAX_ACTIVE", "12"),
            ("KVPOOL_MAX_IDLE", "-1"),
            ("KVPOOL_WAIT_CONN", "false"),
            ("KVPOOL_FAIL_WINDOW_MS", "250"),
        ]
        .into_iter()
        .collect();

        let config = from_env_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.nodes.len(), 3);
        assert_eq!(config.nodes[0].id, "kv-1");
        assert_eq!(config.nodes[0].address, "10.0.0.1:6379");
        assert!(config.nodes[0].primary);
        assert_eq!(config.nodes[1].id, "10.0.0.2:6379");
        assert!(!config.nodes[2].primary);
        assert!(config.nodes.iter().all(|n| n.password.as_deref() == Some("pw")));

        assert_eq!(config.pool.max_active, 12);
        assert_eq!(config.pool.max_idle, 20);
        assert!(!config.pool.wait_conn);
        assert_eq!(config.circuit.fail_window_ms, 250);
    }

    #[test]
    fn test_from_env_vars_requires_nodes() {
        assert!(from_env_vars(|_| None).is_err());
    }
}
