//! Dashboard Configuration Module
//!
//! Configuration is loaded from environment variables with defaults suitable
//! for a local ledger node. Tunables with unparseable values fall back to
//! their defaults with a warning; values the selected upstream cannot work
//! without are reported as [`ConfigError`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vigil_core::ConfigError;
use vigil_storage::CacheConfig;
use vigil_upstream::{ContractAddress, Credentials, RetryPolicy};

pub const DEFAULT_WEB3_PROVIDER: &str = "http://127.0.0.1:8545";
pub const DEFAULT_RESULTS_DIR: &str = "anomaly_results/annotated_anomalies";
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;

const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CONNECT_RETRIES: u32 = 5;
const DEFAULT_CONNECT_DELAY_SECS: u64 = 5;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// SOURCE SELECTION
// ============================================================================

/// Where the anomaly log is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    /// Anomaly contract on a ledger node.
    Ledger,
    /// Edge device proxying its own `/api/blockchain-data`.
    Edge,
}

impl FromStr for UpstreamKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ledger" => Ok(Self::Ledger),
            "edge" => Ok(Self::Edge),
            _ => Err(ConfigError::InvalidValue {
                field: "VIGIL_UPSTREAM".to_string(),
                value: s.to_string(),
                reason: "expected `ledger` or `edge`".to_string(),
            }),
        }
    }
}

/// Where evidence images are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    Local,
    Remote,
}

impl FromStr for ArtifactSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            _ => Err(ConfigError::InvalidValue {
                field: "VIGIL_ARTIFACT_SOURCE".to_string(),
                value: s.to_string(),
                reason: "expected `local` or `remote`".to_string(),
            }),
        }
    }
}

// ============================================================================
// DASHBOARD CONFIGURATION
// ============================================================================

/// Full runtime configuration of the dashboard server.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    // ========================================================================
    // Upstream
    // ========================================================================
    pub upstream: UpstreamKind,

    /// Ledger node endpoint, `ws(s)://` or `http(s)://`.
    pub web3_provider: String,

    /// Anomaly contract. Always set when `upstream` is `Ledger`.
    pub contract_address: Option<ContractAddress>,

    /// Edge device base URL. Always set when `upstream` is `Edge` or
    /// `artifact_source` is `Remote`.
    pub edge_base_url: Option<String>,

    pub credentials: Credentials,

    // ========================================================================
    // Cache and connector
    // ========================================================================
    pub cache_ttl: Duration,
    pub serve_stale_on_error: bool,
    pub connect_retries: u32,
    pub connect_delay: Duration,
    pub call_timeout: Duration,

    // ========================================================================
    // Artifacts
    // ========================================================================
    pub artifact_source: ArtifactSource,
    pub results_dir: PathBuf,

    // ========================================================================
    // HTTP
    // ========================================================================
    /// Allowed CORS origins. Empty means allow all origins.
    /// Example: "https://dashboard.example.org,*.example.org"
    pub cors_origins: Vec<String>,

    pub bind_addr: SocketAddr,
}

impl DashboardConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `VIGIL_UPSTREAM`: `ledger` or `edge` (default: `edge` when `RPI_BASE_URL` is set)
    /// - `WEB3_PROVIDER`: ledger endpoint (default: http://127.0.0.1:8545)
    /// - `CONTRACT_ADDRESS`: anomaly contract, required for `ledger`
    /// - `RPI_BASE_URL`: edge device base URL, required for `edge` and remote artifacts
    /// - `VIGIL_UPSTREAM_TOKEN`: optional bearer credential
    /// - `VIGIL_CACHE_TTL_SECS`: cache ttl (default: 300)
    /// - `VIGIL_SERVE_STALE_ON_ERROR`: "true" or "false" (default: false)
    /// - `VIGIL_CONNECT_RETRIES`: connection attempts (default: 5)
    /// - `VIGIL_CONNECT_DELAY_SECS`: delay between attempts (default: 5)
    /// - `VIGIL_CALL_TIMEOUT_SECS`: per-call timeout (default: 10)
    /// - `VIGIL_ARTIFACT_SOURCE`: `local` or `remote` (default: local)
    /// - `ANOMALY_RESULTS_DIR`: local artifact directory
    /// - `VIGIL_CORS_ORIGINS`: comma-separated allowed origins (empty = allow all)
    /// - `VIGIL_API_BIND`, `PORT` / `VIGIL_API_PORT`: bind address (default: 0.0.0.0:5000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let edge_base_url = var("RPI_BASE_URL").map(|url| url.trim_end_matches('/').to_string());

        let upstream = match var("VIGIL_UPSTREAM") {
            Some(raw) => raw.parse()?,
            None if edge_base_url.is_some() => UpstreamKind::Edge,
            None => UpstreamKind::Ledger,
        };

        // Only the ledger source reads the contract; edge deployments may
        // carry a stale value.
        let contract_address = match upstream {
            UpstreamKind::Ledger => var("CONTRACT_ADDRESS")
                .map(|raw| ContractAddress::parse(&raw))
                .transpose()?,
            UpstreamKind::Edge => None,
        };

        let artifact_source = match var("VIGIL_ARTIFACT_SOURCE") {
            Some(raw) => raw.parse()?,
            None => ArtifactSource::Local,
        };

        match upstream {
            UpstreamKind::Ledger if contract_address.is_none() => {
                return Err(ConfigError::MissingRequired {
                    field: "CONTRACT_ADDRESS".to_string(),
                });
            }
            UpstreamKind::Edge if edge_base_url.is_none() => {
                return Err(ConfigError::MissingRequired {
                    field: "RPI_BASE_URL".to_string(),
                });
            }
            _ => {}
        }
        if artifact_source == ArtifactSource::Remote && edge_base_url.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "RPI_BASE_URL".to_string(),
            });
        }

        let credentials = var("VIGIL_UPSTREAM_TOKEN")
            .map(Credentials::bearer)
            .unwrap_or_else(Credentials::none);

        let cors_origins = var("VIGIL_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            upstream,
            web3_provider: var("WEB3_PROVIDER").unwrap_or_else(|| DEFAULT_WEB3_PROVIDER.to_string()),
            contract_address,
            edge_base_url,
            credentials,
            cache_ttl: Duration::from_secs(parse_or(
                "VIGIL_CACHE_TTL_SECS",
                var("VIGIL_CACHE_TTL_SECS"),
                DEFAULT_CACHE_TTL_SECS,
            )),
            serve_stale_on_error: var("VIGIL_SERVE_STALE_ON_ERROR")
                .map(|s| parse_flag(&s))
                .unwrap_or(false),
            connect_retries: parse_or(
                "VIGIL_CONNECT_RETRIES",
                var("VIGIL_CONNECT_RETRIES"),
                DEFAULT_CONNECT_RETRIES,
            ),
            connect_delay: Duration::from_secs(parse_or(
                "VIGIL_CONNECT_DELAY_SECS",
                var("VIGIL_CONNECT_DELAY_SECS"),
                DEFAULT_CONNECT_DELAY_SECS,
            )),
            call_timeout: Duration::from_secs(parse_or(
                "VIGIL_CALL_TIMEOUT_SECS",
                var("VIGIL_CALL_TIMEOUT_SECS"),
                DEFAULT_CALL_TIMEOUT_SECS,
            )),
            artifact_source,
            results_dir: var("ANOMALY_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_DIR)),
            cors_origins,
            bind_addr: resolve_bind_addr(
                var("VIGIL_API_BIND"),
                var("PORT").or_else(|| var("VIGIL_API_PORT")),
            )?,
        })
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_ttl(self.cache_ttl)
            .with_serve_stale_on_error(self.serve_stale_on_error)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.connect_retries, self.connect_delay)
    }

    /// Check if running with a restricted CORS origin list.
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.org
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain
                        .strip_suffix(pattern)
                        .is_some_and(|sub| sub.ends_with('.'));
                }
            }
            false
        })
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_or<T>(field: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(field, value = %raw, default = %default, "Ignoring invalid configuration value");
            default
        }),
    }
}

fn resolve_bind_addr(host: Option<String>, port: Option<String>) -> Result<SocketAddr, ConfigError> {
    let host = host.unwrap_or_else(|| DEFAULT_BIND_HOST.to_string());
    let port = match port {
        Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
            field: "PORT".to_string(),
            value: raw.clone(),
            reason: "expected a port number".to_string(),
        })?,
        None => DEFAULT_PORT,
    };

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>().map_err(|e| ConfigError::InvalidValue {
        field: "VIGIL_API_BIND".to_string(),
        value: addr.clone(),
        reason: e.to_string(),
    })
}
