//! Stride CLI
//!
//! Command-line interface for Stride operations:
//! - Record entries
//! - List an author's entries
//! - Trigger a sync or a dedup pass
//! - Check sync status

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stride")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sync engine for per-day fitness metrics")]
#[command(
    long_about = "Stride reconciles per-day metrics across the local store,\nthe remote account store, and the device health source."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API server URL
    #[arg(long, default_value = "http://localhost:8086", global = true)]
    pub api_url: String,

    /// Author id (the owning user)
    #[arg(short, long, default_value = "default", global = true)]
    pub author: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record an entry
    Add {
        /// Value (e.g., step count)
        value: f64,
        /// Measurement instant (RFC 3339, default: now)
        #[arg(short, long)]
        date: Option<DateTime<Utc>>,
    },

    /// List the author's entries
    List {
        /// Include soft-deleted entries
        #[arg(long)]
        include_deleted: bool,
    },

    /// Trigger an explicit sync + merge
    Sync {
        /// Account creation date; floors the first health-source import
        #[arg(long)]
        account_created: Option<DateTime<Utc>>,
    },

    /// Collapse days with duplicate entries
    Dedupe,

    /// Delete an entry from both stores
    Delete {
        /// Entry id
        id: String,
    },

    /// Show the last sync status
    Status,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Add { value, date } => {
            let url = format!("{}/api/v1/users/{}/entries", cli.api_url, cli.author);
            let mut body = serde_json::json!({ "value": value });
            if let Some(date) = date {
                body["date"] = Value::String(date.to_rfc3339());
            }

            let response = client
                .post(&url)
                .json(&body)
                .send()
                .await
                .context("request failed, is the server running?")?;

            let status = response.status();
            let body: Value = response.json().await?;
            if !status.is_success() {
                bail!("server returned {}: {}", status, body);
            }

            println!(
                "Recorded {} on {} (id {})",
                body["value"], body["date"], body["id"]
            );
        }

        Commands::List { include_deleted } => {
            let url = format!(
                "{}/api/v1/users/{}/entries?include_deleted={}",
                cli.api_url, cli.author, include_deleted
            );

            let response = client
                .get(&url)
                .send()
                .await
                .context("request failed, is the server running?")?;
            let body: Value = response.json().await?;

            let entries = body["entries"].as_array().cloned().unwrap_or_default();
            if entries.is_empty() {
                println!("No entries for {}", cli.author);
                return Ok(());
            }

            println!("{:<12} {:>12}  {:<16} {}", "DATE", "VALUE", "SOURCE", "ID");
            for entry in entries {
                let date = entry["date"].as_str().unwrap_or_default();
                println!(
                    "{:<12} {:>12} {:<16} {}",
                    &date[..date.len().min(10)],
                    entry["value"],
                    entry["source"].as_str().unwrap_or_default(),
                    entry["id"].as_str().unwrap_or_default(),
                );
            }
        }

        Commands::Sync { account_created } => {
            let url = format!("{}/api/v1/users/{}/sync", cli.api_url, cli.author);
            let mut body = serde_json::json!({});
            if let Some(created) = account_created {
                body["account_created"] = Value::String(created.to_rfc3339());
            }

            let response = client
                .post(&url)
                .json(&body)
                .send()
                .await
                .context("request failed, is the server running?")?;

            let status = response.status();
            let body: Value = response.json().await?;
            if !status.is_success() {
                bail!("sync failed ({}): {}", status, body);
            }

            println!(
                "Sync {}: {} entries, {} imported, {} merged, {} exported",
                body["status"].as_str().unwrap_or_default(),
                body["total"],
                body["imported"],
                body["merged"],
                body["exported"],
            );
            if let Some(error) = body["error"].as_str() {
                println!("  warning: {}", error);
            }
        }

        Commands::Dedupe => {
            let url = format!("{}/api/v1/users/{}/dedupe", cli.api_url, cli.author);

            let response = client
                .post(&url)
                .send()
                .await
                .context("request failed, is the server running?")?;
            let body: Value = response.json().await?;

            println!(
                "Collapsed {} days, removed {} entries",
                body["days_collapsed"], body["entries_removed"]
            );
        }

        Commands::Delete { id } => {
            let url = format!("{}/api/v1/entries/{}", cli.api_url, id);

            let response = client
                .delete(&url)
                .send()
                .await
                .context("request failed, is the server running?")?;

            if response.status().is_success() {
                println!("Deleted {}", id);
            } else {
                let body: Value = response.json().await?;
                bail!("delete failed: {}", body);
            }
        }

        Commands::Status => {
            let url = format!("{}/api/v1/sync/status", cli.api_url);

            let response = client
                .get(&url)
                .send()
                .await
                .context("request failed, is the server running?")?;
            let body: Value = response.json().await?;

            println!(
                "Health source: {}",
                if body["external_source_available"].as_bool().unwrap_or(false) {
                    "available"
                } else {
                    "absent"
                }
            );
            match body.get("last_status") {
                Some(last) if !last.is_null() => {
                    println!(
                        "Last sync: {} imported, {} merged, {} exported in {} ms",
                        last["imported"], last["merged"], last["exported"], last["duration_ms"]
                    );
                    if let Some(error) = last["error"].as_str() {
                        println!("  warning: {}", error);
                    }
                }
                _ => println!("No sync has run yet"),
            }
        }

        Commands::Config { output } => {
            let content = stride::config::generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("failed to write {:?}", path))?;
                    println!("Wrote default config to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}
