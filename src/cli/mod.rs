//! Command-line interface for the rollup engine.
//!
//! Run `rollup` to start the warehouse with its background tasks; add
//! `--demo` to feed it generated business events.

use crate::core::config::ConfigBuilder;
use crate::core::{Config, Result, RollupError};
use crate::scheduler::Scheduler;
use crate::storage::SampleGenerator;
use crate::warehouse::Warehouse;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-process analytics rollup engine
#[derive(Parser, Debug)]
#[command(name = "rollup")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/rollup/config.yaml)
    #[arg(short, long, env = "ROLLUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "ROLLUP_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,

    /// Feed generated revenue, order, session and product-view samples
    #[arg(long, env = "ROLLUP_DEMO")]
    pub demo: bool,

    /// How often to log the warehouse status
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub status_interval: Duration,

    /// Do not start the background tasks
    #[arg(long)]
    pub no_scheduler: bool,
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Config file
    /// 3. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => Some(path.clone()),
            None => dirs::config_dir()
                .map(|d| d.join("rollup").join("config.yaml"))
                .filter(|p| p.exists()),
        };

        if let Some(path) = config_path {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    builder = builder.from_yaml(&content)?;
                    tracing::info!("Loaded configuration from: {:?}", path);
                }
                Err(e) => {
                    return Err(RollupError::config(format!(
                        "Failed to read config file {:?}: {}",
                        path, e
                    )));
                }
            }
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if self.no_scheduler {
            builder = builder.scheduler_enabled(false);
        }
        builder.debug(self.debug).build()
    }

    /// Initialize logging: `RUST_LOG`, then `ROLLUP_LOG_LEVEL`, then the
    /// configured level. `--debug` wins over all of them.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let level = std::env::var("ROLLUP_LOG_LEVEL")
            .unwrap_or_else(|_| config.logging.level.as_str().to_string());

        let filter = if self.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level))
        };

        let fmt_layer = if config.logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| RollupError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the rollup daemon.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  UTC offset: {} minutes", config.warehouse.utc_offset_minutes);
        println!("  Query log capacity: {}", config.warehouse.query_log_capacity);
        for policy in &config.retention.policies {
            println!(
                "  {}: archive after {}d, purge after {}d, compression {:?}{}",
                policy.data_type,
                policy.archive_after_days,
                policy.purge_after_days,
                policy.compression_level,
                if policy.is_active { "" } else { " (inactive)" }
            );
        }
        return Ok(());
    }

    cli.init_logging(&config)?;
    run(config, cli.demo, cli.status_interval).await
}

async fn run(config: Config, demo: bool, status_interval: Duration) -> Result<()> {
    let scheduler_enabled = config.scheduler.enabled;
    let warehouse = Arc::new(Warehouse::new(config)?);
    let shutdown = warehouse.shutdown_token();

    let scheduler = Scheduler::for_warehouse(&warehouse);
    if scheduler_enabled {
        scheduler.start();
    } else {
        tracing::info!("Background tasks disabled");
    }

    if demo {
        tokio::spawn(feed_demo_samples(Arc::clone(&warehouse), shutdown.clone()));
    }

    let mut ticker = tokio::time::interval(status_interval);
    tracing::info!("Rollup engine running, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = ticker.tick() => log_status(&warehouse),
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
                tracing::info!("Received shutdown signal, stopping...");
                break;
            }
        }
    }

    warehouse.shutdown();
    scheduler.shutdown().await;
    log_status(&warehouse);
    Ok(())
}

fn log_status(warehouse: &Warehouse) {
    let status = warehouse.get_warehouse_status();
    match serde_json::to_string(&status) {
        Ok(json) => tracing::info!(status = %json, "Warehouse status"),
        Err(e) => tracing::warn!("Failed to serialize warehouse status: {}", e),
    }
}

async fn feed_demo_samples(warehouse: Arc<Warehouse>, shutdown: CancellationToken) {
    let generator = SampleGenerator::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = warehouse.clock().now();
                for sample in generator.batch(25, now) {
                    if let Err(e) = warehouse.ingest(sample) {
                        tracing::warn!("Demo sample rejected: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["rollup"]);

        assert!(!cli.debug);
        assert!(!cli.demo);
        assert!(!cli.no_scheduler);
        assert_eq!(cli.status_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "rollup",
            "--demo",
            "--no-scheduler",
            "--status-interval",
            "5m",
            "--config",
            "/tmp/rollup.yaml",
        ]);

        assert!(cli.demo);
        assert!(cli.no_scheduler);
        assert_eq!(cli.status_interval, Duration::from_secs(300));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/rollup.yaml")));
    }

    #[tokio::test]
    async fn test_missing_explicit_config_is_an_error() {
        let cli = Cli::parse_from(["rollup", "--config", "/nonexistent/rollup.yaml"]);
        let err = cli.load_config().await.unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[tokio::test]
    async fn test_no_scheduler_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "scheduler:\n  enabled: true\n").unwrap();

        let cli = Cli::parse_from([
            "rollup",
            "--no-scheduler",
            "--config",
            path.to_str().unwrap(),
        ]);
        let config = cli.load_config().await.unwrap();
        assert!(!config.scheduler.enabled);
    }
}
