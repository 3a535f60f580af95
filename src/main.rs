use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trendlens::labeler::{check_lookback_days, MAX_LOOKBACK_DAYS};
use trendlens::pipeline::MAX_BACKFILL_DAYS;
use trendlens::sources::{
    http_client, GhArchiveClient, GitHubMetadataClient, HackerNewsClient, Sources,
    TrendingPageClient,
};
use trendlens::{
    Config, FeatureSink, MemorySink, Pipeline, SqliteSink, TrendLabeler, TrendingHistory,
};

#[derive(Parser)]
#[command(name = "trendlens")]
#[command(about = "Collects repository features and labels them with a forward-looking trending window")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Directory for history, staging copies and the feature database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Days after collection in which a trending appearance counts
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..=MAX_LOOKBACK_DAYS as i64))]
    lookback_days: Option<u32>,

    /// Concurrent enrichment workers
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Fetch Hacker News mentions for the buzz score
    #[arg(long, global = true)]
    enable_buzz: bool,

    /// Publish to an in-memory sink instead of the SQLite database
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect today's features and label the batch from `lookback_days` ago
    Daily,

    /// Rebuild a historical range from the event archive
    Backfill {
        /// Number of days to backfill
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(..=MAX_BACKFILL_DAYS as i64))]
        days: u32,

        /// Repositories per day treated as trending
        #[arg(long, default_value_t = 50)]
        top_n: usize,
    },

    /// Report whether records collected on a date can be labeled
    LabelStatus {
        /// Collection date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,
    },

    /// Print the first and last dates in the trending history
    HistorySpan,

    /// Print feature database statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command {
        Commands::Daily => {
            let mut pipeline = build_pipeline(&config, args.dry_run)?;
            let summary = pipeline.run_daily(Utc::now()).await?;
            println!("{}", summary);
        }
        Commands::Backfill { days, top_n } => {
            let mut pipeline = build_pipeline(&config, args.dry_run)?;
            let summary = pipeline.run_backfill(Utc::now(), days, top_n).await?;
            println!("{}", summary);
        }
        Commands::LabelStatus { date } => {
            let history = TrendingHistory::open(config.history_path());
            println!("{}", TrendLabeler::new(config.lookback_days).status(&history, date));
        }
        Commands::HistorySpan => {
            let history = TrendingHistory::open(config.history_path());
            match history.known_span() {
                Some((first, last)) => println!("{} to {} ({} dates)", first, last, history.len()),
                None => println!("Trending history is empty"),
            }
        }
        Commands::Stats => {
            let sink = SqliteSink::open(config.feature_db_path())
                .with_context(|| format!("Failed to open {}", config.feature_db_path().display()))?;
            println!("{}", sink.statistics()?);
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(days) = args.lookback_days {
        config.lookback_days = check_lookback_days(days).context("Invalid --lookback-days")?;
    }
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }
    if args.enable_buzz {
        config.enable_buzz = true;
    }
    Ok(config)
}

fn build_sources(config: &Config) -> Result<Sources> {
    let client = http_client(config.http_timeout).context("Failed to build HTTP client")?;
    let archive_client =
        http_client(config.archive_timeout).context("Failed to build archive HTTP client")?;

    Ok(Sources {
        metadata: Arc::new(GitHubMetadataClient::new(client.clone(), config.github_token.clone())),
        archive: Arc::new(GhArchiveClient::new(archive_client)),
        buzz: Arc::new(HackerNewsClient::new(client.clone())),
        trending: Arc::new(TrendingPageClient::new(client, config.trending_retry.clone())),
    })
}

fn build_pipeline(config: &Config, dry_run: bool) -> Result<Pipeline> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    let sink: Arc<dyn FeatureSink> = if dry_run {
        warn!("Dry run: features are published to an in-memory sink");
        Arc::new(MemorySink::new())
    } else {
        let path = config.feature_db_path();
        Arc::new(
            SqliteSink::open(&path)
                .with_context(|| format!("Failed to open feature database {}", path.display()))?,
        )
    };

    info!(
        data_dir = %config.data_dir.display(),
        sink = sink.name(),
        lookback_days = config.lookback_days,
        hours = %config.sampled_hours,
        "Pipeline configured"
    );
    Ok(Pipeline::from_config(config, build_sources(config)?, sink))
}
