//! # Projector CLI (`projector`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `projector generate` | Refresh the lookup store from the Bungie manifest |
//! | `projector query <table> <hash>` | Print one definition from the lookup store |
//! | `projector stats` | Summarize the lookup store |
//! | `projector serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! BUNGIE_API_KEY=... projector generate --config ./config/projector.toml
//! projector query DestinyInventoryItemDefinition 3093570047
//! RUST_LOG=projector=debug projector serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use projector::config;
use projector::lookup;
use projector::pipeline;
use projector::progress::ProgressMode;
use projector::server;
use projector::stats;

/// Projector: Destiny 2 manifest pipeline and portfolio backend.
#[derive(Parser)]
#[command(name = "projector", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/projector.toml`. When the default file does not
    /// exist, built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/projector.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh the lookup store.
    ///
    /// Downloads the current manifest bundle, extracts it, and rebuilds the
    /// configured definition tables keyed by hash.
    Generate {
        /// Progress output on stderr. Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print one definition from the lookup store as JSON.
    Query {
        /// Definition table, e.g. `DestinyInventoryItemDefinition`.
        table: String,
        /// Semantic hash of the definition.
        hash: String,
    },

    /// Show lookup store size and per-table record counts.
    Stats,

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        let cfg = config::Config::minimal();
        config::validate(&cfg)?;
        cfg
    };

    match cli.command {
        Commands::Generate { progress } => {
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let report = pipeline::generate_manifest(&cfg.manifest, reporter.as_ref()).await?;

            println!("generate {}", report.locale);
            println!(
                "  version: {}",
                report.version.as_deref().unwrap_or("unknown")
            );
            println!("  bundle: {} bytes ({})", report.bundle_bytes, report.bundle_sha256);
            for t in &report.tables {
                println!(
                    "  {}: {} records ({} rows, {} duplicates)",
                    t.table, t.records_written, t.rows_read, t.duplicates
                );
            }
            if report.intermediates_removed {
                println!("  intermediates removed");
            }
            println!("ok");
        }
        Commands::Query { table, hash } => {
            match lookup::query_definition(&cfg.manifest.lookup_db, &hash, &table).await {
                Ok(Some(item)) => println!("{}", serde_json::to_string_pretty(&item)?),
                Ok(None) => {
                    eprintln!("not found: {} in {}", hash, table);
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(2);
                }
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg.manifest.lookup_db).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
