//! Gridwatch Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - GRIDWATCH_HOST: Bind address (default: 0.0.0.0)
//! - GRIDWATCH_PORT: Port number (default: 8080)
//! - GRIDWATCH_DATA_DIR: Event log directory (default: ./gridwatch_data, `memory` for no persistence)
//! - GRIDWATCH_THRESHOLDS: Path to a JSON array of threshold configs (default: built-in set)
//! - GRIDWATCH_DRAIN_INTERVAL_MS: Journal drain interval (default: 1000)
//! - GRIDWATCH_QUEUE_CAPACITY: Transition queue capacity (default: 4096)
//! - GRIDWATCH_WEBHOOKS: Comma-separated webhook URLs notified on persisted transitions
//! - RUST_LOG: Log level (default: gridwatch=info,tower_http=info)

use std::path::PathBuf;
use std::time::Duration;

use gridwatch::alerts::NotifyConfig;
use gridwatch::api::{run_server, ServerConfig};
use gridwatch::data::{default_thresholds, load_thresholds};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparsable environment variable");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let defaults = ServerConfig::default();

    let host = std::env::var("GRIDWATCH_HOST").unwrap_or(defaults.host);
    let port: u16 = env_parse("GRIDWATCH_PORT").unwrap_or(defaults.port);

    let data_dir = match std::env::var("GRIDWATCH_DATA_DIR") {
        Ok(dir) if dir.eq_ignore_ascii_case("memory") => None,
        Ok(dir) => Some(PathBuf::from(dir)),
        Err(_) => defaults.data_dir,
    };

    let thresholds = match std::env::var("GRIDWATCH_THRESHOLDS") {
        Ok(path) => load_thresholds(&path)?,
        Err(_) => default_thresholds(),
    };

    let drain_interval = env_parse::<u64>("GRIDWATCH_DRAIN_INTERVAL_MS")
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(defaults.drain_interval);
    let queue_capacity = env_parse::<usize>("GRIDWATCH_QUEUE_CAPACITY")
        .filter(|c| *c > 0)
        .unwrap_or(defaults.queue_capacity);

    let notify = NotifyConfig::from_webhook_list(
        &std::env::var("GRIDWATCH_WEBHOOKS").unwrap_or_default(),
    );

    let config = ServerConfig {
        host,
        port,
        data_dir,
        thresholds,
        drain_interval,
        queue_capacity,
        notify,
    };

    tracing::info!("Gridwatch configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    match &config.data_dir {
        Some(dir) => tracing::info!("  Event log: {}", dir.display()),
        None => tracing::info!("  Event log: in-memory"),
    }
    tracing::info!("  Signals configured: {}", config.thresholds.len());
    for threshold in &config.thresholds {
        tracing::info!(
            "    - {} ({}) warning [{:?}, {:?}] critical [{:?}, {:?}]",
            threshold.signal_id,
            threshold.signal_type,
            threshold.warning_min,
            threshold.warning_max,
            threshold.critical_min,
            threshold.critical_max
        );
    }
    tracing::info!("  Drain interval: {:?}", config.drain_interval);
    tracing::info!("  Queue capacity: {}", config.queue_capacity);
    tracing::info!("  Notify targets: {}", config.notify.targets.len());

    println!(
        r#"
   ____      _     _               _       _
  / ___|_ __(_) __| |_      ____ _| |_ ___| |__
 | |  _| '__| |/ _` \ \ /\ / / _` | __/ __| '_ \
 | |_| | |  | | (_| |\ V  V / (_| | || (__| | | |
  \____|_|  |_|\__,_| \_/\_/ \__,_|\__\___|_| |_|

 Real-Time Grid Threshold Monitoring
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
