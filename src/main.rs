use anyhow::{Context, Result};
use chrono::{Local, NaiveTime};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herald::config::AppConfig;
use herald::delivery::{ChannelSendQueue, Dispatcher, Outgoing, PlainRenderer};
use herald::metrics;
use herald::platform::PlatformRegistry;
use herald::scheduler::{SchedulerDeps, SchedulerManager};
use herald::storage::{MemoryCookieStore, MemorySubscriptionStore, SubscriptionStore};

#[derive(Parser)]
#[command(
    name = "herald",
    version,
    about = "Weighted polling scheduler that watches feeds and fans new posts out to subscribers",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the config file's value
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every scheduler and poll until interrupted
    Run {
        /// TOML config file; environment variables are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate the config and list the schedulers that would start
    Check {
        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the resolved weight of every subscribed target
    Weights {
        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Time of day (HH:MM); defaults to now
        #[arg(long)]
        at: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Commands::Run { config } | Commands::Check { config } | Commands::Weights { config, .. } => {
            config.clone()
        }
    };
    let config = load_config(config_path.as_deref())?;

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Run { .. } => {
            tracing::info!("herald starting");
            run(config).await?;
        }
        Commands::Check { .. } => check(config).await?,
        Commands::Weights { at, .. } => weights(config, at).await?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("herald=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("herald={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn seed_store(config: &AppConfig) -> Result<Arc<MemorySubscriptionStore>> {
    let store =
        MemorySubscriptionStore::from_seed(config.subscriptions.clone(), config.weights.clone())
            .await
            .context("Failed to seed subscriptions")?;
    Ok(Arc::new(store))
}

async fn run(config: AppConfig) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed");
    }

    let registry = Arc::new(PlatformRegistry::builtin(&config.fetch_options())?);
    let store = seed_store(&config).await?;
    let cookie_store = Arc::new(MemoryCookieStore::new());

    let (queue, rx) = ChannelSendQueue::new(config.delivery.queue_capacity);
    let consumer = tokio::spawn(consume(rx));
    let dispatcher = Dispatcher::new(Arc::new(PlainRenderer), Arc::new(queue));

    let deps = SchedulerDeps {
        registry,
        store,
        dispatcher,
    };
    let manager =
        SchedulerManager::init(deps, cookie_store, config.http_settings(), &config.scheduler)
            .await?;
    manager.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    manager.shutdown().await;
    consumer.abort();
    Ok(())
}

/// Stand-in transport: logs every message leaving the queue
async fn consume(mut rx: mpsc::Receiver<Outgoing>) {
    while let Some(outgoing) = rx.recv().await {
        let text: Vec<String> = outgoing.segments.iter().map(ToString::to_string).collect();
        tracing::info!(recipient = %outgoing.recipient, message = %text.join(" "), "Delivering");
    }
}

async fn check(config: AppConfig) -> Result<()> {
    let registry = PlatformRegistry::builtin(&config.fetch_options())?;
    let store = seed_store(&config).await?;

    println!("Configuration OK");
    println!();
    println!("Schedulers:");
    for site in registry.sites() {
        let runnable = !site.require_browser || config.scheduler.use_browser;
        let mut targets = 0;
        for platform_name in registry.platforms_of_site(&site.name) {
            targets += store.get_platform_target(&platform_name).await?.len();
        }
        println!(
            "  {:<16} {:<24} {:>4} target(s){}",
            site.name,
            site.schedule.to_string(),
            targets,
            if runnable { "" } else { "  [skipped: needs browser]" }
        );
    }

    for (platform_name, reason) in registry.unavailable_platforms(config.scheduler.use_browser) {
        println!("  unavailable platform {platform_name}: {reason}");
    }

    for platform_name in store.get_platform_names().await? {
        if registry.get(&platform_name).is_none() {
            println!("  unknown platform in subscriptions: {platform_name}");
        }
    }

    Ok(())
}

async fn weights(config: AppConfig, at: Option<String>) -> Result<()> {
    let time = match at {
        Some(at) => NaiveTime::parse_from_str(&at, "%H:%M")
            .with_context(|| format!("Invalid time '{at}', expected HH:MM"))?,
        None => Local::now().time(),
    };

    let registry = PlatformRegistry::builtin(&config.fetch_options())?;
    let store = seed_store(&config).await?;

    println!("Weights at {}:", time.format("%H:%M"));
    for site in registry.sites() {
        let platforms = registry.platforms_of_site(&site.name);
        let mut resolved: Vec<(String, u32)> =
            store.weights_at(&platforms, time).await.into_iter().collect();
        if resolved.is_empty() {
            continue;
        }
        resolved.sort();

        println!("  [{}]", site.name);
        for (key, weight) in resolved {
            println!("    {key:<60} {weight}");
        }
    }

    Ok(())
}
