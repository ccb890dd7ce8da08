//! Engine configuration from environment variables

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Everything the gateway needs to wire the core together
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Counter store endpoint (`REDIS_URL`)
    pub redis_url: String,
    /// Durable store endpoint (`DATABASE_URL`)
    pub database_url: String,
    /// Coordination store endpoints (`ETCD_ENDPOINTS`, comma-separated)
    pub etcd_endpoints: Vec<String>,
    /// Event bus endpoint (`NATS_URL`)
    pub nats_url: String,
    /// Event stream name (`EVENT_STREAM`, default `seckill`)
    pub stream_name: String,
    /// Base consumer group (`CONSUMER_GROUP`, default `seckill_core`);
    /// the payment consumer derives `<base>_payment`
    pub consumer_group: String,
    /// Length of the per-user rate window
    pub rate_window: Duration,
    /// Stock count applied by the administrative reset
    /// (`RESET_STOCK_COUNT`, default 100)
    pub reset_stock_count: i64,
    /// Token gating the administrative surface (`ADMIN_TOKEN`); when unset
    /// every administrative operation is refused
    pub admin_token: Option<String>,
}

impl EngineConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let redis_url = env::var("REDIS_URL").context("REDIS_URL is not set")?;
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let etcd_endpoints = env::var("ETCD_ENDPOINTS")
            .context("ETCD_ENDPOINTS is not set")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        anyhow::ensure!(!etcd_endpoints.is_empty(), "ETCD_ENDPOINTS is empty");
        let nats_url = env::var("NATS_URL").context("NATS_URL is not set")?;

        let reset_stock_count = match env::var("RESET_STOCK_COUNT") {
            Ok(raw) => raw
                .parse::<i64>()
                .context("RESET_STOCK_COUNT is not an integer")?,
            Err(_) => 100,
        };
        anyhow::ensure!(reset_stock_count > 0, "RESET_STOCK_COUNT must be positive");

        Ok(Self {
            redis_url,
            database_url,
            etcd_endpoints,
            nats_url,
            stream_name: env::var("EVENT_STREAM").unwrap_or_else(|_| "seckill".to_string()),
            consumer_group: env::var("CONSUMER_GROUP")
                .unwrap_or_else(|_| "seckill_core".to_string()),
            rate_window: Duration::from_secs(60),
            reset_stock_count,
            admin_token: env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }

    /// Configuration for tests and local development against the in-memory
    /// adapters; the store endpoints are never dialed.
    pub fn for_testing(admin_token: &str) -> Self {
        Self {
            redis_url: String::new(),
            database_url: String::new(),
            etcd_endpoints: Vec::new(),
            nats_url: String::new(),
            stream_name: "seckill".to_string(),
            consumer_group: "seckill_core".to_string(),
            rate_window: Duration::from_secs(60),
            reset_stock_count: 100,
            admin_token: Some(admin_token.to_string()),
        }
    }
}
