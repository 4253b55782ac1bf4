//! NetChunk CLI
//!
//! Verb-style front-end over the NetChunk storage engine:
//!
//! ```text
//! netchunk upload <local> <remote>     store a file
//! netchunk download <remote> <local>   fetch a file
//! netchunk list                        list stored files
//! netchunk delete <remote>             remove a file
//! netchunk verify <remote> [--repair]  check (and fix) replica health
//! netchunk health                      probe every configured server
//! netchunk version                     print the engine version
//! ```
//!
//! Results go to stdout, progress and diagnostics to stderr. Exit codes:
//! 0 on success, 1 on any failure, 2 on usage errors.
//!
//! The binary drives the engine over the directory-backed blob store
//! (one subdirectory per configured server under `--store-root`). A real
//! FTP deployment plugs its transport in behind the same `BlobStore`
//! capability.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use netchunk_core::config::{expand_path, find_config_file, Config};
use netchunk_core::engine::{Engine, ProgressUpdate};
use netchunk_core::error::{Error, Result};
use netchunk_core::health::ServerStatus;
use netchunk_core::repair::RepairStats;
use netchunk_core::transport::DirBlobStore;

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "netchunk", about = "Distributed file storage over commodity servers", disable_version_flag = true)]
struct Cli {
    /// Configuration file (defaults to the standard search path)
    #[arg(short, long, env = "NETCHUNK_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for the local server store (one subdir per server)
    #[arg(long, env = "NETCHUNK_STORE_ROOT", default_value = "~/.netchunk/servers")]
    store_root: String,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file under a remote name
    Upload {
        /// Path of the local file to store
        local: PathBuf,
        /// Remote name to store it under
        remote: String,
    },
    /// Download a stored file
    Download {
        /// Remote name to fetch
        remote: String,
        /// Local path to write
        local: PathBuf,
    },
    /// List every stored file
    List,
    /// Delete a stored file and its replicas
    Delete {
        /// Remote name to delete
        remote: String,
    },
    /// Verify replica health for a stored file
    Verify {
        /// Remote name to verify
        remote: String,
        /// Repair what can be repaired from surviving replicas
        #[arg(long)]
        repair: bool,
    },
    /// Probe every configured server
    Health,
    /// Print the engine version
    Version,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("NETCHUNK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = %e, "command failed");
            eprintln!("netchunk: error: {}", e.short_str());
            eprintln!("  {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::Version = cli.command {
        println!("netchunk {}", Engine::version());
        return Ok(());
    }

    let mut engine = build_engine(&cli)?;
    if !cli.quiet {
        engine.set_progress(Arc::new(report_progress));
    }

    match cli.command {
        Command::Upload { local, remote } => {
            let stats = engine.upload(&local, &remote).await?;
            println!(
                "uploaded {} as '{}' ({} bytes, {} chunks, {} servers, {} retries)",
                local.display(),
                remote,
                stats.bytes_processed,
                stats.chunks_processed,
                stats.servers_used,
                stats.retries
            );
        }
        Command::Download { remote, local } => {
            let stats = engine.download(&remote, &local).await?;
            println!(
                "downloaded '{}' to {} ({} bytes, {} chunks)",
                remote,
                local.display(),
                stats.bytes_processed,
                stats.chunks_processed
            );
        }
        Command::List => {
            let manifests = engine.list().await?;
            if manifests.is_empty() {
                println!("no files stored");
            }
            for manifest in manifests {
                println!(
                    "{}\t{} bytes\t{} chunks\tx{}\t{}",
                    manifest.remote_name,
                    manifest.total_size,
                    manifest.chunk_count(),
                    manifest.replication_factor,
                    format_timestamp(manifest.created_at)
                );
            }
        }
        Command::Delete { remote } => {
            engine.delete(&remote).await?;
            println!("deleted '{}'", remote);
        }
        Command::Verify { remote, repair } => {
            let stats = engine.verify(&remote, repair).await?;
            print_verify_stats(&remote, &stats);
            if stats.chunks_lost > 0 {
                return Err(Error::ChunkIntegrity(format!(
                    "{} chunks have no valid replica",
                    stats.chunks_lost
                )));
            }
        }
        Command::Health => {
            let servers = engine.health_check().await?;
            let healthy = servers
                .iter()
                .filter(|s| s.status == ServerStatus::Available)
                .count();
            for server in &servers {
                match server.status {
                    ServerStatus::Available => println!(
                        "{}\tok\t{:.1} ms",
                        server.id,
                        server.latency_ms.unwrap_or(0.0)
                    ),
                    _ => println!("{}\tunreachable", server.id),
                }
            }
            println!("{}/{} servers healthy", healthy, servers.len());
        }
        Command::Version => unreachable!("handled above"),
    }

    Ok(())
}

// ── Engine Construction ───────────────────────────────────────────────────────

fn build_engine(cli: &Cli) -> Result<Engine> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => match find_config_file() {
            Some(path) => Config::load(&path)?,
            None => {
                return Err(Error::InvalidInput(
                    "no config file found; create netchunk.toml or pass --config".into(),
                ))
            }
        },
    };

    let store_root = expand_path(&cli.store_root);
    let server_ids: Vec<&str> = config
        .enabled_servers()
        .iter()
        .map(|s| s.id.as_str())
        .collect();
    let store = DirBlobStore::with_layout(&store_root, &server_ids)?;

    Engine::new(config, Arc::new(store))
}

// ── Output Helpers ────────────────────────────────────────────────────────────

fn report_progress(update: &ProgressUpdate) {
    if update.bytes_total > 0 {
        eprintln!(
            "{} [{}/{}] {} / {} bytes",
            update.operation, update.current, update.total, update.bytes_done, update.bytes_total
        );
    } else {
        eprintln!("{} [{}/{}]", update.operation, update.current, update.total);
    }
}

fn print_verify_stats(remote: &str, stats: &RepairStats) {
    println!(
        "verified '{}': {} chunks ({} healthy, {} degraded, {} critical, {} lost)",
        remote,
        stats.chunks_verified,
        stats.chunks_healthy,
        stats.chunks_degraded,
        stats.chunks_critical,
        stats.chunks_lost
    );
    if stats.chunks_repaired > 0 || stats.replicas_added > 0 || stats.replicas_removed > 0 {
        println!(
            "repaired {} chunks (+{} replicas, -{} replicas)",
            stats.chunks_repaired, stats.replicas_added, stats.replicas_removed
        );
    }
}

fn format_timestamp(unix_seconds: i64) -> String {
    chrono::DateTime::from_timestamp(unix_seconds, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| unix_seconds.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
