mod api;
mod config;
mod db;
mod enrich;
mod error;
mod filter;
mod pipeline;
mod store;
mod writer;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::api::YoutubeClient;
use crate::config::Config;
use crate::enrich::PageEnricher;
use crate::writer::CsvWriter;

#[derive(Parser)]
#[command(name = "yt_harvester", about = "YouTube channel discovery and enrichment pipeline")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "harvester.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover, filter, enrich, and write channels for every keyword
    Run {
        /// Max channels to write (default: until queries are exhausted)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Retry enrichment for channels whose first scrape failed
    Enrich {
        /// Max channels to enrich (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show collection statistics
    Stats,
    /// Write a fresh CSV snapshot of all collected channels
    Export {
        /// Destination path (default: output_csv from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let result = match cli.command {
        Commands::Run { limit } => {
            let conn = db::connect(&config.db_path)?;
            db::init_schema(&conn)?;

            let fetcher = YoutubeClient::new(
                config.require_api_key()?,
                config.backoff(),
                config.region_code.clone(),
            );
            let enricher = PageEnricher::new()?;
            let mut store = db::SqliteIdStore::new(&conn);
            let mut csv = CsvWriter::append_to(&config.output_csv)?;
            let criteria = config.criteria();

            let summary = pipeline::run(
                &conn,
                &fetcher,
                &enricher,
                &mut store,
                &mut csv,
                &criteria,
                &config.keywords,
                limit,
            )
            .await?;
            summary.print();
            Ok(())
        }
        Commands::Enrich { limit } => {
            let conn = db::connect(&config.db_path)?;
            db::init_schema(&conn)?;

            let enricher = PageEnricher::new()?;
            let counts = pipeline::enrich_pending(&conn, &enricher, limit).await?;
            if counts.total == 0 {
                println!("No channels pending enrichment.");
            } else {
                println!(
                    "Enriched {} of {} pending channels ({} failed).",
                    counts.updated, counts.total, counts.failed
                );
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&config.db_path)?;
            db::init_schema(&conn)?;
            let stats = db::get_stats(&conn)?;
            println!("Processed videos:   {}", stats.processed_videos);
            println!("Processed channels: {}", stats.processed_channels);
            println!("Channels written:   {}", stats.channels);
            println!("Enriched:           {}", stats.enriched);
            println!("With email:         {}", stats.with_email);
            println!("With location:      {}", stats.with_location);
            Ok(())
        }
        Commands::Export { output } => {
            let conn = db::connect(&config.db_path)?;
            db::init_schema(&conn)?;
            let records = db::fetch_channels(&conn)?;
            let path = output.unwrap_or_else(|| config.output_csv.clone());
            writer::export(&path, &records)?;
            println!("Exported {} channels to {}", records.len(), path.display());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }

    result
}
