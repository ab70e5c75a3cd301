//! # Application Configuration
//!
//! Everything is read from the environment (a `.env` file is honoured).

use std::net::SocketAddr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Environment (development, staging, production)
    pub environment: String,
    /// PostgreSQL URL; the in-memory store is used when absent
    pub database_url: Option<String>,
    /// Period of the expired-token sweep
    pub token_sweep_interval: Duration,
    pub activation_token_ttl: chrono::Duration,
    pub auth_token_ttl: chrono::Duration,
    /// Deadline for a single store call
    pub store_timeout: Duration,
    /// Deadline for a single payment gateway call
    pub gateway_timeout: Duration,
    /// Explicit plan catalog location
    pub plans_path: Option<String>,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values fall back to defaults
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str, default: u64| -> u64 {
            get(key)
                .and_then(|v| v.trim().parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        // Values chrono cannot represent fall back to the default.
        let ttl = |key: &str, default: chrono::Duration| -> chrono::Duration {
            get(key)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|v| *v > 0)
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(default)
        };

        Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: get("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            environment: get("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            database_url: get("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            token_sweep_interval: Duration::from_secs(number("TOKEN_SWEEP_INTERVAL_SECS", 60)),
            activation_token_ttl: ttl("ACTIVATION_TOKEN_TTL_SECS", chrono::Duration::days(3)),
            auth_token_ttl: ttl("AUTH_TOKEN_TTL_SECS", chrono::Duration::hours(24)),
            store_timeout: Duration::from_millis(number("STORE_TIMEOUT_MS", 2_000)),
            gateway_timeout: Duration::from_millis(number("GATEWAY_TIMEOUT_MS", 10_000)),
            plans_path: get("PLANS_PATH"),
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid socket address {}:{}: {}", self.host, self.port, e))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
