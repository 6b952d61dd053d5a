//! Configuration for Studbook
//!
//! CLI arguments and environment variable handling using clap.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use uuid::Uuid;

use crate::projection::ProjectionConfig;
use crate::types::{Result, StudbookError};

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Studbook - animal ownership transfer service
#[derive(Parser, Debug, Clone)]
#[command(name = "studbook")]
#[command(about = "Ownership transfers and public projections for pedigree records")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory fallback when MongoDB is unavailable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI (replica set required for transactions)
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "studbook")]
    pub mongodb_db: String,

    /// Header carrying the account id resolved by the upstream auth layer
    #[arg(long, env = "IDENTITY_HEADER", default_value = "x-account-id")]
    pub identity_header: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Attempts for a transfer resolution transaction before giving up
    #[arg(long, env = "TRANSACTION_RETRIES", default_value = "5")]
    pub transaction_retries: u32,

    /// Seconds between projection reconcile sweeps (0 disables)
    #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value = "3600")]
    pub reconcile_interval_secs: u64,

    /// Maximum entries in the projection hot cache
    #[arg(long, env = "PROJECTION_CACHE_MAX_ENTRIES", default_value = "10000")]
    pub projection_cache_max_entries: usize,

    /// Projection hot cache TTL in seconds
    #[arg(long, env = "PROJECTION_CACHE_TTL_SECS", default_value = "300")]
    pub projection_cache_ttl_secs: u64,

    /// Comma-separated account ids allowed to call admin endpoints
    #[arg(long, env = "ADMIN_ACCOUNTS")]
    pub admin_accounts: Option<String>,
}

impl Args {
    /// Accounts allowed to call admin endpoints
    pub fn admin_account_set(&self) -> HashSet<String> {
        self.admin_accounts
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn is_admin(&self, account_id: &str) -> bool {
        self.admin_account_set().contains(account_id)
    }

    /// Reconcile interval, `None` when disabled
    pub fn reconcile_interval(&self) -> Option<Duration> {
        match self.reconcile_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn projection_config(&self) -> ProjectionConfig {
        ProjectionConfig {
            max_hot_cache_entries: self.projection_cache_max_entries,
            hot_cache_ttl_secs: self.projection_cache_ttl_secs,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.identity_header.trim().is_empty() {
            return Err(StudbookError::Config("IDENTITY_HEADER must not be empty".into()));
        }

        if hyper::header::HeaderName::from_bytes(self.identity_header.as_bytes()).is_err() {
            return Err(StudbookError::Config(format!(
                "IDENTITY_HEADER '{}' is not a valid header name",
                self.identity_header
            )));
        }

        if self.transaction_retries == 0 {
            return Err(StudbookError::Config(
                "TRANSACTION_RETRIES must be at least 1".into(),
            ));
        }

        if self.projection_cache_max_entries == 0 {
            return Err(StudbookError::Config(
                "PROJECTION_CACHE_MAX_ENTRIES must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["studbook"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_admin_accounts_parsing() {
        let args = parse(&["--admin-accounts", " ops-1, ,ops-2 "]);
        assert!(args.is_admin("ops-1"));
        assert!(args.is_admin("ops-2"));
        assert!(!args.is_admin(""));
        assert_eq!(args.admin_account_set().len(), 2);
    }

    #[test]
    fn test_reconcile_interval_zero_disables() {
        let args = parse(&["--reconcile-interval-secs", "0"]);
        assert!(args.reconcile_interval().is_none());

        let args = parse(&["--reconcile-interval-secs", "60"]);
        assert_eq!(args.reconcile_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(parse(&["--transaction-retries", "0"]).validate().is_err());
        assert!(parse(&["--identity-header", "bad header"]).validate().is_err());
        assert!(parse(&["--projection-cache-max-entries", "0"]).validate().is_err());
        assert!(parse(&["--log-format", "json"]).validate().is_ok());
    }
}
