//! canopy-cli — HTTP frontend for the Canopy knowledge-graph service
//!
//! # Subcommands
//! - `generate <file> [--max-nodes N] [--no-wait]` — upload a document and build its graph
//! - `status <topology-id>`                        — show build status
//! - `graph <topology-id> [--json]`                — print a stored graph
//! - `regenerate <topology-id> [--max-nodes N]`    — rebuild from stored content
//! - `reset <topology-id>`                         — clear mastery state
//! - `health`                                      — show server health

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8970";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const POLL_ATTEMPTS: usize = 240;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "canopy-cli",
    version,
    about = "Canopy knowledge-graph service CLI"
)]
struct Cli {
    /// Canopy HTTP server URL (overrides CANOPY_HTTP_URL env var)
    #[arg(long, env = "CANOPY_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a UTF-8 text document and generate its knowledge graph
    Generate {
        /// Path to the document (plain text)
        file: String,

        /// Node budget (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_nodes: i32,

        /// Owner recorded on the topology
        #[arg(long)]
        owner: Option<String>,

        /// Return the topology id immediately instead of polling to completion
        #[arg(long)]
        no_wait: bool,
    },

    /// Show the build status of a topology
    Status {
        topology_id: String,
    },

    /// Print a stored knowledge graph
    Graph {
        topology_id: String,

        /// Output the raw JSON payload
        #[arg(long)]
        json: bool,
    },

    /// Rebuild a topology from its stored content
    Regenerate {
        topology_id: String,

        /// New node budget (omit to keep the stored one)
        #[arg(long)]
        max_nodes: Option<i32>,
    },

    /// Clear all mastery state for a topology
    Reset {
        topology_id: String,
    },

    /// Show Canopy server health
    Health,
}

// ============================================================================
// Output formatting
// ============================================================================

/// One-line-per-node summary of a graph payload, highest-value nodes first.
pub fn summarize_graph(payload: &Value) -> String {
    let data = &payload["data"];
    let mut out = format!(
        "root: {}\nnodes: {}  edges: {}\n",
        data["root"].as_str().unwrap_or("-"),
        payload["node_count"].as_u64().unwrap_or(0),
        payload["edge_count"].as_u64().unwrap_or(0),
    );

    let mut nodes: Vec<&Value> = data["nodes"].as_array().map(|v| v.iter().collect()).unwrap_or_default();
    nodes.sort_by_key(|n| std::cmp::Reverse(n["value"].as_i64().unwrap_or(0)));
    for node in nodes {
        let mastered = if node["mastered"].as_bool().unwrap_or(false) {
            "✓"
        } else {
            " "
        };
        out.push_str(&format!(
            "{} L{} v{:<3} {}\n",
            mastered,
            node["level"].as_i64().unwrap_or(0),
            node["value"].as_i64().unwrap_or(1),
            node["label"].as_str().unwrap_or("?"),
        ));
    }
    out
}

/// Render a status payload as a single human-readable line.
pub fn format_status(payload: &Value) -> String {
    match payload["status"].as_str() {
        Some("processing") => format!(
            "processing {:>3}%: {}",
            payload["progress"].as_u64().unwrap_or(0),
            payload["message"].as_str().unwrap_or("")
        ),
        Some("completed") => "completed".to_string(),
        Some("failed") => format!("failed: {}", payload["message"].as_str().unwrap_or("unknown")),
        other => format!("unknown status: {:?}", other),
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout: Duration) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder().timeout(timeout).build()?)
}

fn get_json(server: &str, path: &str) -> anyhow::Result<Value> {
    let url = format!("{}{}", server, path);
    let resp = client(Duration::from_secs(30))?.get(&url).send();
    handle_response(resp, &url)
}

fn post_json(server: &str, path: &str, body: &Value) -> anyhow::Result<Value> {
    let url = format!("{}{}", server, path);
    let resp = client(Duration::from_secs(120))?.post(&url).json(body).send();
    handle_response(resp, &url)
}

fn handle_response(
    resp: Result<reqwest::blocking::Response, reqwest::Error>,
    url: &str,
) -> anyhow::Result<Value> {
    let resp = match resp {
        Ok(r) => r,
        Err(e) => {
            eprintln!("canopy-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: Value = resp.json().unwrap_or(Value::Null);
    if !status.is_success() {
        eprintln!(
            "canopy-cli: server returned {}: {}",
            status,
            body["error"].as_str().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
    Ok(body)
}

fn do_generate(
    server: &str,
    file: &str,
    max_nodes: i32,
    owner: Option<String>,
    no_wait: bool,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)?;
    let body = serde_json::json!({
        "content": content,
        "max_nodes": max_nodes,
        "owner": owner,
    });
    let resp = post_json(server, "/generate", &body)?;
    let topology_id = resp["topology_id"].as_str().unwrap_or_default().to_string();
    println!("topology: {}", topology_id);

    if no_wait {
        return Ok(());
    }

    for _ in 0..POLL_ATTEMPTS {
        let status = get_json(server, &format!("/topology/{}/status", topology_id))?;
        match status["status"].as_str() {
            Some("completed") => {
                let graph = get_json(server, &format!("/topology/{}", topology_id))?;
                print!("{}", summarize_graph(&graph));
                return Ok(());
            }
            Some("failed") => {
                eprintln!("canopy-cli: {}", format_status(&status));
                std::process::exit(1);
            }
            _ => {
                eprintln!("{}", format_status(&status));
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    eprintln!("canopy-cli: timed out waiting for the build to finish");
    std::process::exit(1);
}

fn do_status(server: &str, topology_id: &str) -> anyhow::Result<()> {
    let status = get_json(server, &format!("/topology/{}/status", topology_id))?;
    println!("{}", format_status(&status));
    Ok(())
}

fn do_graph(server: &str, topology_id: &str, json: bool) -> anyhow::Result<()> {
    let graph = get_json(server, &format!("/topology/{}", topology_id))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&graph)?);
    } else {
        print!("{}", summarize_graph(&graph));
    }
    Ok(())
}

fn do_regenerate(server: &str, topology_id: &str, max_nodes: Option<i32>) -> anyhow::Result<()> {
    let body = serde_json::json!({ "max_nodes": max_nodes });
    let resp = post_json(server, &format!("/topology/{}/regenerate", topology_id), &body)?;
    println!(
        "regenerated: {} nodes, {} edges",
        resp["node_count"].as_u64().unwrap_or(0),
        resp["edge_count"].as_u64().unwrap_or(0)
    );
    Ok(())
}

fn do_reset(server: &str, topology_id: &str) -> anyhow::Result<()> {
    let resp = post_json(server, &format!("/topology/{}/reset", topology_id), &serde_json::json!({}))?;
    println!("reset mastery on {} nodes", resp["nodes"].as_u64().unwrap_or(0));
    Ok(())
}

fn do_health(server: &str) -> anyhow::Result<()> {
    let body = get_json(server, "/health")?;
    println!("Canopy server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:       {}", body["version"].as_str().unwrap_or("?"));
    println!("PostgreSQL:    {}", body["postgresql"].as_str().unwrap_or("?"));
    println!("Socket:        {}", body["socket"].as_str().unwrap_or("?"));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Generate {
            file,
            max_nodes,
            owner,
            no_wait,
        } => do_generate(&server, &file, max_nodes, owner, no_wait),
        Commands::Status { topology_id } => do_status(&server, &topology_id),
        Commands::Graph { topology_id, json } => do_graph(&server, &topology_id, json),
        Commands::Regenerate {
            topology_id,
            max_nodes,
        } => do_regenerate(&server, &topology_id, max_nodes),
        Commands::Reset { topology_id } => do_reset(&server, &topology_id),
        Commands::Health => do_health(&server),
    };

    if let Err(e) = result {
        eprintln!("canopy-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_payload() -> Value {
        serde_json::json!({
            "status": "completed",
            "node_count": 3,
            "edge_count": 2,
            "data": {
                "root": "Memory",
                "nodes": [
                    {"label": "Ownership", "level": 1, "value": 1, "mastered": true},
                    {"label": "Memory", "level": 0, "value": 2, "mastered": false},
                    {"label": "Borrowing", "level": 1, "value": 1, "mastered": false}
                ],
                "edges": []
            }
        })
    }

    // ========================================================================
    // TEST 1: summary leads with root and counts
    // ========================================================================
    #[test]
    fn test_summary_header() {
        let out = summarize_graph(&graph_payload());
        assert!(out.starts_with("root: Memory\nnodes: 3  edges: 2\n"));
    }

    // ========================================================================
    // TEST 2: nodes are ordered by value, descending
    // ========================================================================
    #[test]
    fn test_summary_orders_by_value() {
        let out = summarize_graph(&graph_payload());
        let memory = out.find("Memory").expect("Memory listed");
        let ownership = out.find("Ownership").expect("Ownership listed");
        assert!(memory < ownership, "higher-value node prints first");
    }

    // ========================================================================
    // TEST 3: mastered nodes carry a check mark
    // ========================================================================
    #[test]
    fn test_summary_marks_mastered_nodes() {
        let out = summarize_graph(&graph_payload());
        let line = out
            .lines()
            .find(|l| l.contains("Ownership"))
            .expect("Ownership line");
        assert!(line.starts_with('✓'));
    }

    // ========================================================================
    // TEST 4: processing status renders percent and message
    // ========================================================================
    #[test]
    fn test_format_status_processing() {
        let status = serde_json::json!({
            "status": "processing",
            "progress": 60,
            "message": "Extracting knowledge relations"
        });
        let line = format_status(&status);
        assert!(line.contains("60%"));
        assert!(line.contains("Extracting"));
    }

    // ========================================================================
    // TEST 5: failed status carries the message
    // ========================================================================
    #[test]
    fn test_format_status_failed() {
        let status = serde_json::json!({"status": "failed", "message": "boom"});
        assert_eq!(format_status(&status), "failed: boom");
    }

    // ========================================================================
    // TEST 6: empty payload degrades gracefully
    // ========================================================================
    #[test]
    fn test_summary_of_empty_payload() {
        let out = summarize_graph(&serde_json::json!({}));
        assert!(out.contains("root: -"));
        assert!(out.contains("nodes: 0"));
    }
}
