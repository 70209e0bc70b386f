//! Configuration management for the account balances demo.
//!
//! Loads configuration from environment variables (and a `.env` file, if present)
//! with sensible defaults.

use commitflow_postgres::PostgresConfig;
use std::env;
use std::net::SocketAddr;

/// Demo configuration.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Projection database
    pub database: PostgresConfig,
    /// Tracing filter directive (`RUST_LOG`)
    pub log_filter: String,
    /// Address to expose Prometheus metrics on; metrics stay unrendered when unset
    pub metrics_addr: Option<SocketAddr>,
    /// Number of distinct accounts in the seeded commit log
    pub accounts: usize,
    /// Number of commits to seed
    pub commits: usize,
}

impl DemoConfig {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database: PostgresConfig::from_lookup(&lookup),
            log_filter: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            metrics_addr: lookup("METRICS_ADDR").and_then(|s| s.parse().ok()),
            accounts: lookup("DEMO_ACCOUNTS")
                .and_then(|s| s.parse().ok())
                .filter(|accounts| *accounts > 0)
                .unwrap_or(5),
            commits: lookup("DEMO_COMMITS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_without_environment() {
        let config = DemoConfig::from_lookup(|_| None);

        assert_eq!(config.log_filter, "info");
        assert_eq!(config.metrics_addr, None);
        assert_eq!(config.accounts, 5);
        assert_eq!(config.commits, 100);
    }

    #[test]
    fn zero_accounts_falls_back_to_default() {
        let vars = HashMap::from([
            ("DEMO_ACCOUNTS", "0"),
            ("DEMO_COMMITS", "12"),
            ("METRICS_ADDR", "127.0.0.1:9100"),
        ]);
        let config = DemoConfig::from_lookup(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.accounts, 5);
        assert_eq!(config.commits, 12);
        assert_eq!(config.metrics_addr.map(|addr| addr.port()), Some(9100));
    }
}
