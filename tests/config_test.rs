use kvpool::config::{self, ConnOptions, NodeOverrides};
use kvpool::{RoutingClient, Role};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn write_config(dir: &TempDir, yaml: &str) -> String {
    let path = dir.path().join("kvpool.yaml");
    fs::write(&path, yaml).unwrap();
    path.to_string_lossy().into_owned()
}

/// Test loading configuration from YAML file
#[test]
fn test_load_yaml_config() {
    let yaml = r#"
pool:
  connect_timeout_ms: 1500
  max_active: 8
  wait_conn: false

circuit:
  fail_window_ms: 2000
  max_fails: 5

read_from_primary: true

nodes:
  - id: kv-a
    address: 10.0.0.1:6379
    primary: true
    password: hunter2
  - id: kv-b
    address: 10.0.0.2:6379
    options:
      max_active: "4"
      read_timeout: "250"
  - id: kv-c
    address: 10.0.0.3:6379
"#;

    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, yaml);
    let config = config::load_config(Some(&path)).unwrap();

    assert_eq!(config.nodes.len(), 3);
    assert_eq!(config.nodes_with_role(Role::Primary).count(), 1);
    assert_eq!(config.nodes_with_role(Role::Replica).count(), 2);
    assert_eq!(config.nodes[0].password.as_deref(), Some("hunter2"));

    let opts = config.routing_options();
    assert!(opts.read_from_primary);
    assert_eq!(opts.conn.connect_timeout, Duration::from_millis(1500));
    assert_eq!(opts.conn.max_active, 8);
    assert!(!opts.conn.wait_conn);
    // Unset fields keep their defaults
    assert_eq!(opts.conn.max_idle, ConnOptions::default().max_idle);
    assert_eq!(opts.circuit.fail_window, Duration::from_secs(2));
    assert_eq!(opts.circuit.max_fails, 5);

    let merged = opts.conn.merged(&NodeOverrides::parse(&config.nodes[1].options));
    assert_eq!(merged.max_active, 4);
    assert_eq!(merged.read_timeout, Duration::from_millis(250));
}

#[test]
fn test_yaml_rejects_duplicate_ids() {
    let yaml = r#"
nodes:
  - id: kv-a
    address: 10.0.0.1:6379
  - id: kv-a
    address: 10.0.0.2:6379
"#;

    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, yaml);
    let err = config::load_from_yaml(&path).unwrap_err();
    assert!(err.to_string().contains("duplicate"));
}

#[test]
fn test_yaml_same_id_allowed_across_roles() {
    let yaml = r#"
nodes:
  - id: kv-a
    address: 10.0.0.1:6379
    primary: true
  - id: kv-a
    address: 10.0.0.2:6379
"#;

    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, yaml);
    assert!(config::load_from_yaml(&path).is_ok());
}

#[test]
fn test_yaml_rejects_zero_max_fails() {
    let yaml = r#"
circuit:
  max_fails: 0
nodes:
  - id: kv-a
    address: 10.0.0.1:6379
"#;

    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, yaml);
    assert!(config::load_from_yaml(&path).is_err());
}

#[test]
fn test_yaml_rejects_zero_timeouts() {
    for field in ["idle_timeout_ms", "read_timeout_ms", "write_timeout_ms"] {
        let yaml = format!(
            "pool:\n  {}: 0\nnodes:\n  - id: kv-a\n    address: 10.0.0.1:6379\n",
            field
        );

        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, &yaml);
        let err = config::load_from_yaml(&path).unwrap_err();
        assert!(err.to_string().contains(field), "{}: {}", field, err);
    }
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.yaml");
    let err = config::load_from_yaml(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_env_config() {
    let vars: HashMap<&str, &str> = [
        ("KVPOOL_PRIMARY", "main=10.0.0.1:6379"),
        ("KVPOOL_REPLICAS", "10.0.0.2:6379, r2=10.0.0.3:6379"),
        ("KVPOOL_PASSWORD", "s3cret"),
        ("KVPOOL_READ_FROM_PRIMARY", "true"),
        ("KVPOOL_MAX_ACTIVE", "16"),
        ("KVPOOL_READ_TIMEOUT_MS", "not-a-number"),
        ("KVPOOL_MAX_FAILS", "7"),
    ]
    .into_iter()
    .collect();

    let config = config::from_env_vars(|key| vars.get(key).map(|v| v.to_string())).unwrap();

    let primaries: Vec<_> = config.nodes_with_role(Role::Primary).collect();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].id, "main");
    assert_eq!(primaries[0].address, "10.0.0.1:6379");

    let replicas: Vec<_> = config.nodes_with_role(Role::Replica).collect();
    assert_eq!(replicas.len(), 2);
    assert_eq!(replicas[0].id, "10.0.0.2:6379");
    assert_eq!(replicas[1].id, "r2");
    assert!(replicas.iter().all(|n| n.password.as_deref() == Some("s3cret")));

    let opts = config.routing_options();
    assert!(opts.read_from_primary);
    assert_eq!(opts.conn.max_active, 16);
    assert_eq!(opts.conn.read_timeout, ConnOptions::default().read_timeout);
    assert_eq!(opts.circuit.max_fails, 7);
}

#[test]
fn test_env_config_requires_nodes() {
    let err = config::from_env_vars(|_| None).unwrap_err();
    assert!(err.to_string().contains("KVPOOL_PRIMARY"));
}

#[tokio::test]
async fn test_client_from_config_without_dialing() {
    let yaml = r#"
nodes:
  - id: kv-a
    address: 192.0.2.1:6379
    primary: true
  - id: kv-b
    address: 192.0.2.2:6379
"#;

    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, yaml);
    let config = config::load_config(Some(&path)).unwrap();

    // Pools connect lazily, so unreachable nodes do not fail construction
    let client = RoutingClient::from_config(&config).await.unwrap();
    let status = client.status().await;
    assert_eq!(status.len(), 2);
    assert!(status.iter().all(|s| s.available && s.stats.total_created == 0));
    assert!(!client.is_watching());

    client.close().await;
}
