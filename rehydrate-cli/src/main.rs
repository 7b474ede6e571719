/*!
Rehydrate CLI - inspect, verify and clean up rehydrate state stores.

Operates on the local filesystem backend: one `<key>.json` record per stored
document under the directory given with `--path`.
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use rehydrate_core::snapshot::summarize;
use rehydrate_core::{
    HydrateError, LocalFileStorage, PersistedDocument, Serializer, SnapshotRecord, StateKey,
    Store,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rehydrate")]
#[command(about = "CLI for rehydrate state stores")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the state records
    #[arg(short, long, global = true, default_value = "./state")]
    path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all stored records
    List,
    /// Show a record and its decoded document
    Show {
        /// Record key
        key: String,
        /// Encryption key for encrypted records
        #[arg(short = 'k', long = "key", env = "REHYDRATE_KEY", hide_env_values = true)]
        encryption_key: Option<String>,
    },
    /// Verify the integrity of a record
    Verify {
        /// Record key
        key: String,
        /// Encryption key for encrypted records
        #[arg(short = 'k', long = "key", env = "REHYDRATE_KEY", hide_env_values = true)]
        encryption_key: Option<String>,
    },
    /// Delete a record
    Delete {
        /// Record key
        key: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// List the named snapshots of a state
    Snapshots {
        /// State key (see `state-key`)
        state_key: String,
    },
    /// Print the state key for a state type and optional discriminator
    StateKey {
        type_name: String,
        discriminator: Option<String>,
    },
}

#[derive(Tabled)]
struct RecordInfo {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Compressed")]
    compressed: bool,
    #[tabled(rename = "Encrypted")]
    encrypted: bool,
    #[tabled(rename = "Size")]
    size: String,
}

#[derive(Tabled)]
struct SnapshotInfo {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Summary")]
    summary: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::List => list_records(&cli.path)?,
        Commands::Show {
            key,
            encryption_key,
        } => show_record(&cli.path, &key, encryption_key.as_deref())?,
        Commands::Verify {
            key,
            encryption_key,
        } => verify_record(&cli.path, &key, encryption_key.as_deref())?,
        Commands::Delete { key, force } => delete_record(&cli.path, &key, force)?,
        Commands::Snapshots { state_key } => list_snapshots(&cli.path, &state_key)?,
        Commands::StateKey {
            type_name,
            discriminator,
        } => println!("{}", StateKey::derive(&type_name, discriminator.as_deref())),
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(path: &Path, encryption_key: Option<&str>) -> Result<Store, anyhow::Error> {
    let store = Store::new(Arc::new(LocalFileStorage::with_base_dir(path)));
    store.set_encryption_key(encryption_key)?;
    Ok(store)
}

fn list_records(path: &Path) -> Result<(), anyhow::Error> {
    info!("Listing records in {}", path.display());

    if !path.exists() {
        println!("No state directory found at: {}", path.display());
        return Ok(());
    }

    let records = collect_records(&open_store(path, None)?, path)?;
    if records.is_empty() {
        println!("No records found");
    } else {
        println!("{}", Table::new(records));
    }
    Ok(())
}

fn collect_records(store: &Store, path: &Path) -> Result<Vec<RecordInfo>, anyhow::Error> {
    let mut records = Vec::new();
    for key in store.keys()? {
        let (compressed, encrypted) = match store.get_record(&key) {
            Ok(Some(record)) => (record.compressed, record.encrypted),
            Ok(None) => continue,
            Err(e) => {
                error!("Skipping unreadable record {}: {}", key, e);
                continue;
            }
        };
        let size = std::fs::metadata(path.join(format!("{key}.json")))
            .map(|meta| format_size(meta.len()))
            .unwrap_or_else(|_| "Unknown".to_string());

        records.push(RecordInfo {
            kind: record_kind(&key).to_string(),
            key,
            compressed,
            encrypted,
            size,
        });
    }
    Ok(records)
}

fn record_kind(key: &str) -> &'static str {
    if key.contains("_snapshot_") {
        "snapshot"
    } else {
        "state"
    }
}

fn show_record(path: &Path, key: &str, encryption_key: Option<&str>) -> Result<(), anyhow::Error> {
    info!("Showing record: {}", key);

    let store = open_store(path, encryption_key)?;
    let record = store
        .get_record(key)?
        .with_context(|| format!("no record named '{key}'"))?;

    println!("Record Details:");
    println!("  Key: {key}");
    println!("  Kind: {}", record_kind(key));
    println!("  Format Version: {}", record.version);
    println!("  Content Hash: {}", record.hash);
    println!("  Compressed: {}", record.compressed);
    println!("  Encrypted: {}", record.encrypted);

    let document = store
        .get(key, true, true)?
        .with_context(|| format!("record '{key}' disappeared while reading"))?;

    println!();
    println!("{}", serde_json::to_string_pretty(&render_document(&document))?);
    Ok(())
}

/// Decode the state envelope of a primary record; other documents print as stored
fn render_document(document: &Value) -> Value {
    let Ok(persisted) = serde_json::from_value::<PersistedDocument>(document.clone()) else {
        return document.clone();
    };

    let mut rendered = serde_json::Map::new();
    rendered.insert("version".into(), persisted.version.into());
    rendered.insert(
        "timestamp".into(),
        persisted
            .timestamp
            .map(|ts| Value::String(format_timestamp(ts.timestamp())))
            .unwrap_or(Value::Null),
    );
    let state = match Serializer::new().decode(&persisted.state) {
        Ok((state, _)) => state,
        Err(e) => Value::String(format!("<undecodable: {e}>")),
    };
    rendered.insert("state".into(), state);
    Value::Object(rendered)
}

fn verify_record(path: &Path, key: &str, encryption_key: Option<&str>) -> Result<(), anyhow::Error> {
    info!("Verifying record: {}", key);

    let store = open_store(path, encryption_key)?;
    match store.get(key, true, true) {
        Ok(Some(_)) => {
            println!("✓ Record is valid and integrity check passed");
            Ok(())
        }
        Ok(None) => Err(anyhow::anyhow!("no record named '{key}'")),
        Err(HydrateError::IntegrityCheckFailed { expected, actual }) => {
            error!("✗ Integrity check failed:");
            error!("  Expected hash: {}", expected);
            error!("  Actual hash: {}", actual);
            Err(anyhow::anyhow!("Integrity check failed"))
        }
        Err(HydrateError::Configuration(msg)) => Err(anyhow::anyhow!(
            "{msg}; pass --key or set REHYDRATE_KEY to verify encrypted records"
        )),
        Err(e) => {
            error!("✗ Failed to verify record: {}", e);
            Err(e.into())
        }
    }
}

fn delete_record(path: &Path, key: &str, force: bool) -> Result<(), anyhow::Error> {
    let store = open_store(path, None)?;
    if !store.contains(key) {
        return Err(anyhow::anyhow!("no record named '{key}'"));
    }

    if !force {
        print!("Are you sure you want to delete record '{key}'? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Deletion cancelled");
            return Ok(());
        }
    }

    store.delete(key)?;
    println!("✓ Record deleted successfully");
    Ok(())
}

fn list_snapshots(path: &Path, state_key: &str) -> Result<(), anyhow::Error> {
    info!("Listing snapshots of {}", state_key);

    let snapshots = collect_snapshots(&open_store(path, None)?, state_key)?;
    if snapshots.is_empty() {
        println!("No snapshots found");
    } else {
        println!("{}", Table::new(snapshots));
    }
    Ok(())
}

fn collect_snapshots(store: &Store, state_key: &str) -> Result<Vec<SnapshotInfo>, anyhow::Error> {
    let prefix = format!("{state_key}_snapshot_");
    let mut snapshots = Vec::new();

    for key in store.keys()? {
        let Some(name) = key.strip_prefix(&prefix) else {
            continue;
        };
        let record: SnapshotRecord = match store.get(&key, false, false) {
            Ok(Some(document)) => serde_json::from_value(document)?,
            Ok(None) => continue,
            Err(e) => {
                error!("Skipping unreadable snapshot {}: {}", name, e);
                continue;
            }
        };

        snapshots.push(SnapshotInfo {
            name: name.to_string(),
            created: format_timestamp(record.creation_time.timestamp()),
            summary: summarize(&record.state_data).to_string(),
        });
    }
    Ok(snapshots)
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(timestamp: i64) -> String {
    use chrono::{Local, TimeZone};

    match Local.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => timestamp.to_string(),
    }
}
