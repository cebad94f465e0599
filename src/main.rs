//! Example binary demonstrating the vms_reconcile library.
//!
//! This example converges a demo NFS view on a declared state.
//!
//! ## Usage
//!
//! 1. Create a `.env` file with `VMS_URL` and `VMS_API_TOKEN`
//! 2. Run: `cargo run`

#![allow(clippy::print_stdout)] // Allow println! in the binary example

use serde_json::{Map, json};
use vms_reconcile::{ResourceManager, VmsRestClient, VmsRestConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from environment
    let cfg = VmsRestConfig::from_env()?;
    println!("Configuration loaded:");
    println!("  VMS URL: {}", cfg.base_url);
    println!("  Validate certs: {}", cfg.validate_certs);

    let client = VmsRestClient::new(cfg)?;
    let manager = ResourceManager::new(&client, "views");

    // Declared state for a demo view
    let path = std::env::var("VMS_DEMO_VIEW_PATH").unwrap_or_else(|_| "/shares/demo".to_string());
    let mut desired = Map::new();
    desired.insert("path".to_string(), json!(path));
    desired.insert("protocols".to_string(), json!(["NFS"]));
    desired.insert("create_dir".to_string(), json!(true));

    println!("\nReconciling view {}...", desired["path"]);
    let outcome = manager.ensure_present(None, &desired).await?;

    if outcome.changed {
        println!("\nView converged (changes applied).");
    } else {
        println!("\nView already matches the desired state.");
    }
    println!("  ID: {:?}", outcome.resource.get("id"));
    println!("  Protocols: {:?}", outcome.resource.get("protocols"));

    if let Some(diff) = &outcome.diff {
        println!("\nDiff:");
        println!("  before: {}", json!(diff.before));
        println!("  after:  {}", json!(diff.after));
    }

    Ok(())
}
