use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::client::RoutingClient;
use crate::config::{Config, ConnOptions, NodeOverrides};
use crate::discovery::Role;
use crate::lb::NodeStatus;

// ============================================================================
// Data structures for command results
// ============================================================================

/// Which nodes served a run of acquisitions, and what failed
#[derive(Debug, Default)]
pub struct CheckReport {
    pub served: BTreeMap<String, usize>,
    pub failures: Vec<String>,
}

impl CheckReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_served(&mut self, node: &str) {
        *self.served.entry(node.to_string()).or_insert(0) += 1;
    }

    pub fn record_failure(&mut self, error: impl ToString) {
        self.failures.push(error.to_string());
    }

    pub fn attempts(&self) -> usize {
        self.served.values().sum::<usize>() + self.failures.len()
    }

    fn print(&self, label: &str) {
        println!(
            "{}: {} attempts, {} failed",
            label,
            self.attempts(),
            self.failures.len()
        );
        for (node, count) in &self.served {
            println!("  {:<20} {}", node, count);
        }
        for failure in &self.failures {
            println!("  error: {}", failure);
        }
    }
}

// ============================================================================
// Utility functions
// ============================================================================

/// Format a duration as whole seconds when exact, otherwise milliseconds
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms != 0 && ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{}ms", ms)
    }
}

/// One-line summary of connection options
pub fn format_options(opts: &ConnOptions) -> String {
    format!(
        "connect={} read={} write={} idle={} active={} idle_max={} wait={}",
        format_duration(opts.connect_timeout),
        format_duration(opts.read_timeout),
        format_duration(opts.write_timeout),
        format_duration(opts.idle_timeout),
        opts.max_active,
        opts.max_idle,
        opts.wait_conn
    )
}

fn print_status(status: &NodeStatus) {
    println!(
        "  {:<20} {:<24} {:<8} {:<12} trips={} created={} reused={} failed={} idle={}",
        status.id,
        status.address,
        status.role,
        if status.available { "available" } else { "circuit-open" },
        status.trips,
        status.stats.total_created,
        status.stats.total_reused,
        status.stats.failed_attempts,
        status.stats.idle_connections
    );
}

// ============================================================================
// Commands
// ============================================================================

/// Nodes command: print the configured topology without connecting
pub fn cmd_nodes(config: &Config) -> Result<()> {
    let defaults = config.routing_options().conn;

    println!("Defaults: {}", format_options(&defaults));
    println!(
        "Circuit: window={} max_fails={}",
        format_duration(Duration::from_millis(config.circuit.fail_window_ms)),
        config.circuit.max_fails
    );
    println!("Read from primary: {}", config.read_from_primary);

    for role in [Role::Primary, Role::Replica] {
        let nodes: Vec<_> = config.nodes_with_role(role).collect();
        println!("\n{} nodes ({}):", role, nodes.len());

        for node in nodes {
            let overrides = NodeOverrides::parse(&node.options);
            let effective = defaults.merged(&overrides);
            let marker = if overrides.is_empty() { "" } else { " *" };
            println!("  {:<20} {:<24}{}", node.id, node.address, marker);
            println!("    {}", format_options(&effective));
        }
    }

    Ok(())
}

/// Check command: route acquisitions through a live client and report where they went
pub async fn cmd_check(
    config: &Config,
    writes: usize,
    reads: usize,
    read_from_primary: bool,
) -> Result<()> {
    let client = RoutingClient::from_config(config)
        .await
        .context("Failed to build routing client")?;
    if read_from_primary {
        client.set_read_from_primary(true);
    }

    let start = Instant::now();

    let mut write_report = CheckReport::new();
    for i in 0..writes {
        match client.acquire_for_write().await {
            Ok(lease) => {
                debug!(attempt = i, node = %lease.node_id(), peer = ?lease.peer(), "Write acquired");
                write_report.record_served(lease.node_id());
            }
            Err(e) => write_report.record_failure(e),
        }
    }

    let mut read_report = CheckReport::new();
    for i in 0..reads {
        match client.acquire_for_read().await {
            Ok(lease) => {
                debug!(attempt = i, node = %lease.node_id(), peer = ?lease.peer(), "Read acquired");
                read_report.record_served(lease.node_id());
            }
            Err(e) => read_report.record_failure(e),
        }
    }

    info!(elapsed_ms = start.elapsed().as_millis() as u64, "Check finished");

    write_report.print("Writes");
    read_report.print("Reads");

    println!("\nNodes:");
    for status in client.status().await {
        print_status(&status);
    }

    client.close().await;

    let failed = write_report.failures.len() + read_report.failures.len();
    if failed > 0 {
        anyhow::bail!(
            "{} of {} acquisitions failed",
            failed,
            write_report.attempts() + read_report.attempts()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(2)), "2s");
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::ZERO), "0ms");
    }

    #[test]
    fn test_format_options() {
        let line = format_options(&ConnOptions::default());
        assert_eq!(
            line,
            "connect=2s read=500ms write=500ms idle=60s active=50 idle_max=20 wait=true"
        );
    }

    #[test]
    fn test_check_report_counts() {
        let mut report = CheckReport::new();
        report.record_served("kv-1");
        report.record_served("kv-1");
        report.record_served("kv-2");
        report.record_failure("no usable replica pool");

        assert_eq!(report.attempts(), 4);
        assert_eq!(report.served["kv-1"], 2);
        assert_eq!(report.failures.len(), 1);
    }
}
