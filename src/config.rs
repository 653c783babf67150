//! Config & Region Resolver (§4.1): validates caller configuration and
//! extracts the Aurora DSQL region from the cluster endpoint.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, StorageError};

/// DSQL endpoints look like `<cluster-id>.dsql.<region>.on.aws`.
static DSQL_HOST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.dsql\.([a-z0-9-]+)\.on\.aws$").expect("static regex is valid"));

/// The 3,300s pool default leaves a five-minute margin before DSQL force-
/// closes a connection at its 3,600s wall-clock maximum, so no in-flight
/// query is ever cut off mid-statement.
pub const DEFAULT_MAX_LIFETIME_SECONDS: u64 = 3300;
pub const DSQL_MAX_CONNECTION_LIFETIME_SECONDS: u64 = 3600;

/// Pool tuning knobs (§4.1 "Pool defaults when creating internally").
#[derive(Debug, Clone)]
pub struct PoolDefaults {
    pub max: u32,
    pub min: u32,
    pub idle_timeout_ms: u64,
    pub max_lifetime_seconds: u64,
    pub connect_timeout_ms: u64,
    pub allow_exit_on_idle: bool,
}

impl Default for PoolDefaults {
    fn default() -> Self {
        Self {
            max: 10,
            min: 0,
            idle_timeout_ms: 600_000,
            max_lifetime_seconds: DEFAULT_MAX_LIFETIME_SECONDS,
            connect_timeout_ms: 5_000,
            allow_exit_on_idle: true,
        }
    }
}

/// Plain configuration accepted when the caller has not already built a
/// client or pool (§4.1 shape (c)).
#[derive(Debug, Clone)]
pub struct DsqlConfig {
    pub id: String,
    pub host: String,
    pub user: String,
    pub database: String,
    pub region: Option<String>,
    pub schema_name: String,
    pub pool: PoolDefaults,
}

impl DsqlConfig {
    /// Validates the configuration and resolves the effective region.
    ///
    /// - `id` and `host` must be non-empty after trimming.
    /// - `max_lifetime_seconds`, if not left at the default, must be
    ///   strictly less than 3600.
    /// - the effective region is the explicit `region` if given, otherwise
    ///   extracted from `host`; if neither yields a region, validation fails.
    pub fn validate(&self) -> Result<ResolvedConfig> {
        if self.id.trim().is_empty() {
            return Err(StorageError::Config {
                message: "id must not be empty".to_string(),
            });
        }
        if self.host.trim().is_empty() {
            return Err(StorageError::Config {
                message: "host must not be empty".to_string(),
            });
        }
        if self.pool.max_lifetime_seconds >= DSQL_MAX_CONNECTION_LIFETIME_SECONDS {
            return Err(StorageError::Config {
                message: format!(
                    "maxLifetimeSeconds must be < {DSQL_MAX_CONNECTION_LIFETIME_SECONDS}, got {}",
                    self.pool.max_lifetime_seconds
                ),
            });
        }

        let region = match self.region.clone() {
            Some(region) if !region.trim().is_empty() => region,
            _ => extract_region(&self.host).ok_or_else(|| StorageError::Config {
                message: format!(
                    "could not resolve a region: host {:?} is not a DSQL endpoint and no region was supplied",
                    self.host
                ),
            })?,
        };

        Ok(ResolvedConfig {
            id: self.id.trim().to_string(),
            host: self.host.trim().to_string(),
            user: self.user.clone(),
            database: self.database.clone(),
            region,
            schema_name: self.schema_name.clone(),
            pool: self.pool.clone(),
        })
    }
}

/// A [`DsqlConfig`] that has passed validation and has a concrete region.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub id: String,
    pub host: String,
    pub user: String,
    pub database: String,
    pub region: String,
    pub schema_name: String,
    pub pool: PoolDefaults,
}

/// Extracts the region from a DSQL endpoint of the form
/// `<cluster-id>.dsql.<region>.on.aws`. Returns `None` for `localhost`, RDS
/// endpoints, and any other host that doesn't match the DSQL pattern.
pub fn extract_region(host: &str) -> Option<String> {
    DSQL_HOST_RE
        .captures(host)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DsqlConfig {
        DsqlConfig {
            id: "primary".to_string(),
            host: "my-cluster.dsql.us-east-1.on.aws".to_string(),
            user: "admin".to_string(),
            database: "postgres".to_string(),
            region: None,
            schema_name: "public".to_string(),
            pool: PoolDefaults::default(),
        }
    }

    #[test]
    fn region_extraction_law() {
        assert_eq!(extract_region("x.dsql.us-east-1.on.aws"), Some("us-east-1".to_string()));
        assert_eq!(extract_region("cluster.dsql.ap-northeast-1.on.aws"), Some("ap-northeast-1".to_string()));
        assert_eq!(extract_region("localhost"), None);
        assert_eq!(extract_region("mydb.abc123.us-east-1.rds.amazonaws.com"), None);
        assert_eq!(extract_region("cluster.dsql.on.aws"), None);
    }

    #[test]
    fn explicit_region_wins_over_host_extraction() {
        let mut config = base_config();
        config.host = "cluster.dsql.us-east-1.on.aws".to_string();
        config.region = Some("eu-west-1".to_string());
        let resolved = config.validate().unwrap();
        assert_eq!(resolved.region, "eu-west-1");
    }

    #[test]
    fn region_is_extracted_from_host_when_not_explicit() {
        let resolved = base_config().validate().unwrap();
        assert_eq!(resolved.region, "us-east-1");
    }

    #[test]
    fn localhost_with_no_region_fails_validation() {
        let mut config = base_config();
        config.host = "localhost".to_string();
        config.region = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_or_whitespace_id_and_host_are_rejected() {
        for (id, host) in [("", "h.dsql.us-east-1.on.aws"), ("   ", "h.dsql.us-east-1.on.aws"), ("id", ""), ("id", "   ")] {
            let mut config = base_config();
            config.id = id.to_string();
            config.host = host.to_string();
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn max_lifetime_seconds_must_be_strictly_less_than_3600() {
        let mut config = base_config();
        config.pool.max_lifetime_seconds = 3600;
        assert!(config.validate().is_err());
        config.pool.max_lifetime_seconds = 3599;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn pool_defaults_match_section_4_1() {
        let defaults = PoolDefaults::default();
        assert_eq!(defaults.max, 10);
        assert_eq!(defaults.min, 0);
        assert_eq!(defaults.idle_timeout_ms, 600_000);
        assert_eq!(defaults.max_lifetime_seconds, 3300);
        assert_eq!(defaults.connect_timeout_ms, 5_000);
        assert!(defaults.allow_exit_on_idle);
    }
}
