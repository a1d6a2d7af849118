//! Vedette main entry point
//!
//! This is the command-line interface for the Vedette site watcher.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vedette::config::load_config_with_hash;

/// Vedette: a scheduled site watcher
///
/// Vedette polls configured sites on their own schedules, extracts
/// structured items with declarative selector rules, remembers what it has
/// already seen, and notifies once per new item.
#[derive(Parser, Debug)]
#[command(name = "vedette")]
#[command(version = "1.0.0")]
#[command(about = "A scheduled site watcher", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(
        short,
        long,
        global = true,
        value_name = "CONFIG",
        default_value = "vedette.toml"
    )]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the watch daemon until interrupted
    Run,
    /// Run one immediate pass over the enabled targets, then exit
    Once {
        /// Only run the target with this slug
        #[arg(long, value_name = "SLUG")]
        target: Option<String>,
    },
    /// Check the configuration and show what would be watched
    Validate,
    /// Print recent run reports
    Report {
        /// Maximum reports to print
        #[arg(long, default_value_t = 20)]
        limit: u32,
        /// Only show runs for the target with this slug
        #[arg(long, value_name = "SLUG")]
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Validate => handle_validate(&config),
        Command::Report { limit, target } => handle_report(&config, limit, target.as_deref()),
        Command::Once { target } => handle_once(config, config_hash, target.as_deref()).await,
        Command::Run => handle_run(config, config_hash, cli.config).await,
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("vedette=info,warn"),
            1 => EnvFilter::new("vedette=debug,info"),
            2 => EnvFilter::new("vedette=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the validate subcommand: the config already loaded, so show it
fn handle_validate(config: &vedette::Config) -> anyhow::Result<()> {
    println!("=== Vedette Config Check ===\n");

    println!("Engine:");
    println!("  Tick interval: {}s", config.engine.tick_interval_secs);
    println!("  Max concurrent runs: {}", config.engine.max_concurrent_runs);
    println!("  Run timeout: {}s", config.engine.run_timeout_secs);
    println!("  Early-stop pages: {}", config.engine.early_stop_pages);

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    match &config.notify.webhook_url {
        Some(url) => println!("\nDelivery: webhook {}", url),
        None => println!("\nDelivery: log only"),
    }
    if !config.notify.ignore_tokens.is_empty() {
        println!("  Ignore tokens: {}", config.notify.ignore_tokens.join(", "));
    }

    if !config.browser.endpoints.is_empty() {
        println!("\nBrowser sessions ({}):", config.browser.endpoints.len());
        for endpoint in &config.browser.endpoints {
            println!("  - {}", endpoint);
        }
    }
    if !config.proxy.endpoints.is_empty() {
        println!("\nProxies ({}):", config.proxy.endpoints.len());
        for endpoint in &config.proxy.endpoints {
            println!("  - {}", endpoint);
        }
    }

    println!("\nTargets ({}):", config.targets.len());
    for target in &config.targets {
        let mut notes = Vec::new();
        if !target.enabled {
            notes.push("disabled");
        }
        if target.requires_browser {
            notes.push("browser");
        }
        if target.proxy.uses_pool() {
            notes.push("proxy");
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!(" [{}]", notes.join(", "))
        };

        println!(
            "  - {} every {}m{}",
            target.slug, target.interval_minutes, notes
        );
        println!("    url: {}", target.url);
        println!("    listing: {}", target.listing.selector);
        for field in &target.content_fields {
            println!("    field: {} <- {}", field.name, field.selector);
        }
        if let Some(pagination) = &target.pagination {
            println!(
                "    pagination: {} (up to {} pages)",
                pagination.selector, target.max_pages
            );
        }
    }

    let enabled = config.targets.iter().filter(|t| t.enabled).count();
    println!("\n✓ Configuration is valid");
    println!("✓ Would watch {} enabled targets", enabled);

    Ok(())
}

/// Handles the report subcommand: prints recent run reports
fn handle_report(
    config: &vedette::Config,
    limit: u32,
    target: Option<&str>,
) -> anyhow::Result<()> {
    use std::path::Path;
    use vedette::SqliteStore;

    let store = SqliteStore::new(Path::new(&config.storage.database_path))?;
    let reports = match target {
        Some(slug) => store.runs_for_target(slug, limit)?,
        None => store.recent_runs(limit)?,
    };

    if reports.is_empty() {
        println!("No run reports recorded yet");
        return Ok(());
    }

    println!(
        "{:<18} {:<21} {:<9} {:>6} {:>6} {:>5} {:>5} {:>9}",
        "TARGET", "STARTED", "STATUS", "PAGES", "ITEMS", "NEW", "FAIL", "MS"
    );
    for report in &reports {
        // RFC3339 with sub-second precision is noise here
        let started = report.started_at.get(..19).unwrap_or(&report.started_at);
        let duration = report
            .duration_ms
            .map(|ms| ms.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<18} {:<21} {:<9} {:>6} {:>6} {:>5} {:>5} {:>9}",
            report.target_slug,
            started,
            report.status.to_db_string(),
            report.pages_fetched,
            report.items_extracted,
            report.items_new,
            report.failures,
            duration
        );
        if let Some(message) = &report.error_message {
            println!("    {}", message);
        }
    }

    Ok(())
}

/// Handles the once subcommand: one immediate pass, then exit
async fn handle_once(
    config: vedette::Config,
    config_hash: String,
    target: Option<&str>,
) -> anyhow::Result<()> {
    let mut engine = vedette::Engine::new(config, config_hash)?;
    engine.run_once(target).await?;
    Ok(())
}

/// Handles the run subcommand: the watch daemon
///
/// The config file keeps being watched; edits to it apply on the next tick.
async fn handle_run(
    config: vedette::Config,
    config_hash: String,
    config_path: PathBuf,
) -> anyhow::Result<()> {
    let enabled = config.targets.iter().filter(|t| t.enabled).count();
    tracing::info!("Watching {} of {} targets", enabled, config.targets.len());

    match vedette::crawl::run_daemon(config, config_hash, config_path).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Engine failed: {}", e);
            Err(e.into())
        }
    }
}
