// Copyright 2025 Docwatch Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! `docwatch` - forward MongoDB document changes to a webhook.
//!
//! Every option can also be given through a `DOCWATCH_*` environment
//! variable. Log verbosity follows `RUST_LOG` (default `info`).
//!
//! ```text
//! docwatch --mongodb-uri "mongodb://localhost:27017/?replicaSet=rs0" \
//!          --database app \
//!          --webhook-url https://hooks.example.com/changes \
//!          --exclude sessions,audit
//! ```

use clap::{ArgAction, Parser};
use docwatch_core::config::{MonitorConfig, DEFAULT_MAX_EVENTS, DEFAULT_SOURCE_TAG};
use docwatch_core::destination::Destination;
use docwatch_core::metrics;
use docwatch_core::monitor::Monitor;
use docwatch_destinations::webhook::{WebhookConfig, WebhookDestination};
use docwatch_sources::mongodb::MongoSource;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Watch every collection of a MongoDB database and POST each change to a webhook
#[derive(Parser, Debug)]
#[command(name = "docwatch", version, about, long_about = None)]
struct Cli {
    /// MongoDB connection string (replica set or sharded cluster)
    #[arg(long, env = "DOCWATCH_MONGODB_URI")]
    mongodb_uri: String,

    /// Database whose collections are watched
    #[arg(long, env = "DOCWATCH_DATABASE")]
    database: String,

    /// Webhook endpoint; without it events are only kept in memory
    #[arg(long, env = "DOCWATCH_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Webhook request timeout in seconds
    #[arg(long, env = "DOCWATCH_WEBHOOK_TIMEOUT_SECS", default_value_t = 10)]
    webhook_timeout_secs: u64,

    /// Extra webhook header as NAME=VALUE (repeatable)
    #[arg(
        long = "webhook-header",
        env = "DOCWATCH_WEBHOOK_HEADERS",
        value_delimiter = ',',
        value_parser = parse_header
    )]
    webhook_headers: Vec<(String, String)>,

    /// Collections never watched (repeatable or comma separated)
    #[arg(long = "exclude", env = "DOCWATCH_EXCLUDED_COLLECTIONS", value_delimiter = ',')]
    excluded: Vec<String>,

    /// Maximum number of events kept in memory
    #[arg(long, env = "DOCWATCH_MAX_EVENTS", default_value_t = DEFAULT_MAX_EVENTS)]
    max_events: usize,

    /// Seconds between discovery runs
    #[arg(long, env = "DOCWATCH_DISCOVERY_INTERVAL_SECS", default_value_t = 30)]
    discovery_interval_secs: u64,

    /// Seconds to wait before re-subscribing a failed stream
    #[arg(long, env = "DOCWATCH_RESUBSCRIBE_DELAY_SECS", default_value_t = 5)]
    resubscribe_delay_secs: u64,

    /// Milliseconds between consecutive subscriptions at startup
    #[arg(long, env = "DOCWATCH_SUBSCRIBE_PAUSE_MS", default_value_t = 100)]
    subscribe_pause_ms: u64,

    /// Seconds to wait before the first discovery
    #[arg(long, env = "DOCWATCH_STARTUP_DELAY_SECS", default_value_t = 3)]
    startup_delay_secs: u64,

    /// Value of `metadata.source` in every event
    #[arg(long, env = "DOCWATCH_SOURCE_TAG", default_value = DEFAULT_SOURCE_TAG)]
    source_tag: String,

    /// Deliver events to the webhook (false keeps them in memory only)
    #[arg(
        long,
        env = "DOCWATCH_MONITORING_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    monitoring_enabled: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "DOCWATCH_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn monitor_config(&self) -> Result<MonitorConfig, Box<dyn Error>> {
        let config = MonitorConfig::builder()
            .monitoring_enabled(self.monitoring_enabled)
            .excluded_collections(self.excluded.iter().map(|s| s.trim()).filter(|s| !s.is_empty()))
            .max_events_in_memory(self.max_events)
            .discovery_interval(Duration::from_secs(self.discovery_interval_secs))
            .resubscribe_delay(Duration::from_secs(self.resubscribe_delay_secs))
            .subscribe_pause(Duration::from_millis(self.subscribe_pause_ms))
            .startup_delay(Duration::from_secs(self.startup_delay_secs))
            .source_tag(self.source_tag.clone())
            .build()?;
        Ok(config)
    }

    fn webhook_config(&self) -> Result<Option<WebhookConfig>, Box<dyn Error>> {
        let Some(url) = &self.webhook_url else {
            return Ok(None);
        };

        let mut builder = WebhookConfig::builder()
            .url(url.clone())
            .timeout(Duration::from_secs(self.webhook_timeout_secs));
        for (name, value) in &self.webhook_headers {
            builder = builder.header(name.clone(), value.clone());
        }

        Ok(Some(builder.build()?))
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = cli.monitor_config()?;
    let webhook_config = cli.webhook_config()?;

    let source = Arc::new(MongoSource::connect(&cli.mongodb_uri, &cli.database).await?);

    let destination: Option<Arc<dyn Destination>> = match webhook_config {
        Some(webhook_config) => Some(Arc::new(WebhookDestination::new(webhook_config)?)),
        None => {
            warn!("No webhook URL configured; events are only kept in memory");
            None
        }
    };

    let monitor = Monitor::new(config, source, destination)?;
    monitor.run_until(shutdown_signal()).await?;

    let stats = monitor.stats();
    info!(
        events = stats.events_recorded,
        delivered = stats.deliveries_succeeded,
        failed = stats.deliveries_failed,
        "docwatch stopped"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);
    metrics::init_metrics();

    info!(database = %cli.database, version = env!("CARGO_PKG_VERSION"), "Starting docwatch");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "docwatch failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["docwatch", "--mongodb-uri", "mongodb://db", "--database", "app"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_match_monitor_defaults() {
        let cli = parse(&[]);
        let config = cli.monitor_config().unwrap();

        assert_eq!(config, MonitorConfig::default());
        assert!(cli.webhook_config().unwrap().is_none());
    }

    #[test]
    fn test_exclusions_and_headers() {
        let cli = parse(&[
            "--exclude",
            "sessions,audit",
            "--exclude",
            "cache",
            "--webhook-url",
            "https://hooks.example.com/x",
            "--webhook-header",
            "Authorization=Bearer abc",
            "--monitoring-enabled",
            "false",
        ]);

        let config = cli.monitor_config().unwrap();
        assert!(config.is_excluded("sessions"));
        assert!(config.is_excluded("audit"));
        assert!(config.is_excluded("cache"));
        assert!(!config.monitoring_enabled);

        let webhook = cli.webhook_config().unwrap().unwrap();
        assert_eq!(
            webhook.headers,
            vec![("Authorization".to_string(), "Bearer abc".to_string())]
        );
        assert_eq!(webhook.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        assert!(parse(&["--max-events", "0"]).monitor_config().is_err());
        assert!(parse(&["--webhook-url", "ftp://x"]).webhook_config().is_err());
        assert!(parse_header("no-equals").is_err());
        assert!(parse_header("=value").is_err());
        assert_eq!(
            parse_header("X-Key = v=1").unwrap(),
            ("X-Key".to_string(), "v=1".to_string())
        );
    }
}
