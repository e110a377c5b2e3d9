//! Catalog builder CLI application.

use anyhow::{bail, Context, Result};
use catalog_builder::{CacheGenerator, GenerationReport};
use clap::{Parser, Subcommand};
use shared::{Config, LogConfig};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the daily cache for every configured genre
    Generate {
        /// Run the full initial population even if the catalog has books
        #[arg(long)]
        force_initial: bool,
    },

    /// Incrementally refresh one genre, or all of them
    Refresh {
        /// Genre key to refresh
        genre: Option<String>,

        /// Refresh every configured genre
        #[arg(long, conflicts_with = "genre")]
        all: bool,
    },

    /// Print a random sample of books from a genre
    Sample {
        genre: String,

        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },

    /// Print master catalog and daily cache statistics
    Stats,

    /// Re-validate the catalog and drop entries that no longer pass
    Cleanup,

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::InitConfig { force } = args.command {
        return init_config(&args.config, force);
    }

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize logging
    let mut log_config = LogConfig::from_config(&config, "catalog-builder");
    if args.verbose {
        log_config.default_level = tracing::Level::DEBUG;
    }
    shared::logging::init(log_config)?;

    info!(config_file = %args.config.display(), "Loaded configuration");

    let generator = CacheGenerator::from_config(&config).context("Failed to set up pipeline")?;

    match args.command {
        Command::Generate { force_initial } => {
            let report =
                run_until_interrupted(&generator, generator.generate_daily_cache(force_initial))
                    .await?;
            print_report(&report);
            log_metadata_stats(&generator);
        }
        Command::Refresh { genre: Some(genre), .. } => {
            let report = generator.refresh_genre(&genre).await?;
            info!(
                genre = %report.genre,
                books_added = report.books_added,
                total = report.total_in_genre,
                "Genre refreshed"
            );
            log_metadata_stats(&generator);
        }
        Command::Refresh { genre: None, all: true } => {
            let report = run_until_interrupted(&generator, generator.refresh_all()).await?;
            print_report(&report);
            log_metadata_stats(&generator);
        }
        Command::Refresh { genre: None, all: false } => {
            bail!("Name a genre to refresh, or pass --all");
        }
        Command::Sample { genre, count } => {
            let books = generator.get_books(&genre, count);
            if books.is_empty() {
                warn!(genre = %genre, "No books available");
            }
            for book in books {
                println!(
                    "{} | {} | {} | {:.2}",
                    book.key().unwrap_or("-"),
                    book.title,
                    book.authors.join(", "),
                    book.average_rating
                );
            }
        }
        Command::Stats => {
            let stats = serde_json::json!({
                "master": generator.master_stats(),
                "daily": generator.cache_stats(),
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Cleanup => {
            let removed = generator.store().cleanup_invalid();
            for book in &removed {
                info!(key = %book.key, title = %book.title, reason = %book.reason, "Removed");
            }
            generator
                .store()
                .save()
                .await
                .context("Failed to save catalog after cleanup")?;
            info!(removed = removed.len(), "Cleanup complete");
        }
        // Handled before the config is loaded
        Command::InitConfig { .. } => {}
    }

    Ok(())
}

/// Drive a generation run; Ctrl-C lets the current batch finish, then stops
async fn run_until_interrupted<F>(generator: &CacheGenerator, run: F) -> Result<GenerationReport>
where
    F: Future<Output = Result<GenerationReport, catalog_builder::CatalogError>>,
{
    tokio::pin!(run);

    let report = tokio::select! {
        report = &mut run => report?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupt received, finishing current batch");
            generator.request_stop();
            run.await?
        }
    };
    Ok(report)
}

fn print_report(report: &GenerationReport) {
    info!("=== Generation Complete ===");
    info!("Mode: {:?}", report.mode);
    info!(
        "Batches: {}/{}{}",
        report.batches_completed,
        report.batches_total,
        if report.stopped_early { " (stopped)" } else { "" }
    );
    for genre in &report.genres {
        match &genre.error {
            Some(error) => warn!("{}: failed: {}", genre.genre, error),
            None => info!(
                "{}: scraped {}, stored {}, added {}, total {}",
                genre.genre, genre.scraped, genre.stored, genre.books_added, genre.total_in_genre
            ),
        }
    }
    info!("Books in daily cache: {}", report.snapshot.total_books());
}

fn log_metadata_stats(generator: &CacheGenerator) {
    let stats = generator.metadata_stats();
    info!(
        calls = stats.calls,
        rate_limit_hits = stats.rate_limit_hits,
        rotations = stats.rotations,
        pauses = stats.pauses,
        short_circuited = stats.short_circuited,
        active_credential = stats.active_credential,
        "Metadata client activity"
    );
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    Config::default()
        .save(path)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
