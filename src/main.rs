use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lta_results::api::build_router;
use lta_results::api::state::AppState;
use lta_results::calculate::{query_player_stats, query_team_stats};
use lta_results::config::{AppConfig, ScraperMode};
use lta_results::fetch::{BrowserLauncher, Fetcher, HttpLauncher, SessionLauncher};
use lta_results::ingest;
use lta_results::parse::MatchParser;
use lta_results::parse_duration;
use lta_results::retry::TokioClock;
use lta_results::storage::{JsonlMatchStore, MatchStore, SnapshotWriter};
use lta_results::sync::{IngestOrchestrator, IngestReport, IngestRunner, Region, Scheduler, Trigger};

#[derive(Parser)]
#[command(name = "lta-results")]
#[command(about = "LTA match results ingestion and statistics service")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "./config.toml")]
    config: PathBuf,

    /// Data directory path (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server and the daily ingestion schedule
    Serve {
        /// Bind address
        #[arg(long)]
        host: Option<String>,

        /// Port number
        #[arg(long)]
        port: Option<u16>,

        /// Do not start the daily schedule
        #[arg(long)]
        no_schedule: bool,
    },

    /// Run one ingestion cycle in the foreground
    Scrape {
        /// Only scrape this region (repeatable)
        #[arg(long = "region")]
        regions: Vec<String>,

        /// Session deadline per region (e.g., "60s", "2m")
        #[arg(long)]
        session_timeout: Option<String>,
    },

    /// Parse a saved results page and store its matches
    Import {
        /// Region the page belongs to
        #[arg(long)]
        region: String,

        /// Saved page (raw snapshot or browser "save as")
        #[arg(long)]
        file: PathBuf,
    },

    /// Print aggregated stats as JSON
    Stats {
        #[command(subcommand)]
        target: StatsTarget,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum StatsTarget {
    /// Stats for one player
    Player { name: String },
    /// Stats for one team
    Team { name: String },
}

fn init_tracing(level: &str, json: bool) {
    // RUST_LOG wins over the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (text, json) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
}

fn open_store(config: &AppConfig) -> Result<Arc<dyn MatchStore>> {
    let store = JsonlMatchStore::open(&config.storage())
        .with_context(|| format!("opening match store in {}", config.data_dir.display()))?;
    Ok(Arc::new(store))
}

fn build_orchestrator(
    config: &AppConfig,
    regions: Vec<Region>,
    store: Arc<dyn MatchStore>,
) -> Result<IngestOrchestrator> {
    let scraper = &config.scraper;
    let launcher: Arc<dyn SessionLauncher> = match scraper.mode {
        ScraperMode::Browser => Arc::new(BrowserLauncher::new(scraper.browser_settings())),
        ScraperMode::Http => Arc::new(HttpLauncher::new(scraper.user_agent.clone())),
    };
    let fetcher = Fetcher::new(scraper.fetcher_config(), Arc::new(TokioClock));
    let parser = Arc::new(MatchParser::new(&scraper.selectors)?);

    let mut orchestrator = IngestOrchestrator::new(regions, launcher, fetcher, parser, store)
        .with_store_timeout(scraper.store_timeout());
    if scraper.keep_snapshots {
        orchestrator = orchestrator.with_snapshots(SnapshotWriter::new(&config.storage()));
    }
    Ok(orchestrator)
}

fn print_report(report: &IngestReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    let t = &report.totals;
    eprintln!(
        "\nRegions ingested: {}  failed: {}",
        t.regions_ingested, t.regions_failed
    );
    eprintln!(
        "Cards seen: {}  dropped: {}  stored: {}  failed writes: {}",
        t.cards_seen, t.cards_dropped, t.stored, t.failed
    );
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown requested, draining connections"),
        Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    init_tracing(&config.log_level, cli.json_logs);
    tracing::info!("Starting lta-results v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve {
            host,
            port,
            no_schedule,
        } => {
            let store = open_store(&config)?;
            let regions = config.scraper.regions.clone();
            let orchestrator = build_orchestrator(&config, regions, store.clone())?;
            let runner = IngestRunner::new(Arc::new(orchestrator));

            if no_schedule {
                tracing::info!("Daily schedule disabled");
            } else {
                let schedule = config.scraper.daily_schedule()?;
                let scheduler = Scheduler::new(schedule, runner.clone(), Arc::new(TokioClock));
                tokio::spawn(scheduler.run());
            }

            let admin_key = config.admin.api_key();
            if admin_key.is_none() {
                tracing::warn!(
                    "{} is not set; admin routes will reject every request",
                    config.admin.api_key_env
                );
            }

            let state = AppState {
                store,
                runner,
                admin_key,
                query_timeout: config.scraper.query_timeout(),
                store_timeout: config.scraper.store_timeout(),
                cors_origin: config.server.cors_origin.clone(),
            };
            let app = build_router(state);

            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let addr = format!("{}:{}", host, port);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {}", addr))?;
            tracing::info!("API listening on http://{}/api/v1", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Commands::Scrape {
            regions,
            session_timeout,
        } => {
            if let Some(raw) = session_timeout {
                let timeout = parse_duration(&raw)
                    .filter(|d| d.as_secs() > 0)
                    .ok_or_else(|| anyhow!("Invalid --session-timeout '{}'", raw))?;
                config.scraper.session_timeout_seconds = timeout.as_secs();
            }

            let regions = config.scraper.select_regions(&regions)?;
            let store = open_store(&config)?;
            let runner = IngestRunner::new(Arc::new(build_orchestrator(&config, regions, store)?));

            let report = runner.run_now(Trigger::Cli).await?;
            print_report(&report)?;
            if report.totals.regions_ingested == 0 {
                bail!("No region was ingested");
            }
        }
        Commands::Import { region, file } => {
            if !config.scraper.regions.iter().any(|r| r.name == region) {
                tracing::warn!("Region '{}' is not configured, importing anyway", region);
            }
            let store = open_store(&config)?;
            let orchestrator = build_orchestrator(&config, Vec::new(), store)?;

            let report = ingest::import_file(&orchestrator, &region, &file)
                .await
                .with_context(|| format!("importing {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Stats { target } => {
            let store = open_store(&config)?;
            let timeout = config.scraper.query_timeout();
            let json = match target {
                StatsTarget::Player { name } => {
                    serde_json::to_string_pretty(&query_player_stats(store.as_ref(), &name, timeout).await?)?
                }
                StatsTarget::Team { name } => {
                    serde_json::to_string_pretty(&query_team_stats(store.as_ref(), &name, timeout).await?)?
                }
            };
            println!("{}", json);
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
