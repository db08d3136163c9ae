//! Configuration for the TradingGateway
//!
//! Values come from an optional TOML file named by `GATEWAY_CONFIG`, then
//! environment variables on top. Secrets are only ever read from the
//! environment and are never serialized back out.

use crate::error::{GatewayError, GatewayResult};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";

/// Main configuration for the TradingGateway
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Trading venue (CLOB) configuration
    pub venue: VenueConfig,

    /// Relayer configuration
    pub relayer: RelayerConfig,

    /// Builder header configuration
    pub builder: BuilderConfig,

    /// Session configuration
    pub session: SessionConfig,

    /// Metrics exporter configuration
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    /// Base URL of the venue API; order and link paths fail without it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Transport timeout for venue and relayer calls
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RelayerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Token sent on submissions
    #[serde(skip)]
    pub api_key: Option<SecretString>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Remote signing endpoint; signs in-process when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_url: Option<String>,

    /// Upper bound on the builder sub-call
    pub sign_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie signing key, at least 32 bytes
    #[serde(skip)]
    pub secret: Option<SecretString>,

    pub cookie_name: String,

    /// Lifetime of a linked session
    pub ttl_seconds: u64,

    /// Redis back-end; sessions stay in process memory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,

    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus listener address; no exporter when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: crate::DEFAULT_PORT }
    }
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self { url: None, timeout_ms: 10_000 }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self { sign_url: None, sign_timeout_ms: 2_000 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: None,
            cookie_name: "gw_session".to_string(),
            ttl_seconds: 86_400,
            redis_url: None,
            cookie_secure: true,
        }
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> GatewayResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| GatewayError::Config(format!("{} has an invalid value", name)))
}

fn parse_bool(name: &str, value: &str) -> GatewayResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(GatewayError::Config(format!("{} must be a boolean", name))),
    }
}

impl GatewayConfig {
    /// Get the server address
    pub fn server_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }

    /// Load configuration from file
    pub fn load_from_file(path: &str) -> GatewayResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("cannot read {}: {}", path, e)))?;
        toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("cannot parse {}: {}", path, e)))
    }

    /// File (if `GATEWAY_CONFIG` names one) plus environment overrides
    pub fn from_lookup<F>(lookup: F) -> GatewayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_PATH_ENV) {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(lookup)?;
        Ok(config)
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Override fields from environment-style variables. Blank values are
    /// treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("GATEWAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("GATEWAY_PORT") {
            self.server.port = parse_env("GATEWAY_PORT", &port)?;
        }
        if let Some(url) = get("CLOB_API_URL") {
            self.venue.url = Some(url);
        }
        if let Some(ms) = get("UPSTREAM_TIMEOUT_MS") {
            self.venue.timeout_ms = parse_env("UPSTREAM_TIMEOUT_MS", &ms)?;
        }
        if let Some(url) = get("RELAYER_URL") {
            self.relayer.url = Some(url);
        }
        if let Some(key) = get("RELAYER_API_KEY") {
            self.relayer.api_key = Some(SecretString::from(key));
        }
        if let Some(url) = get("BUILDER_SIGN_URL") {
            self.builder.sign_url = Some(url);
        }
        if let Some(ms) = get("BUILDER_SIGN_TIMEOUT_MS") {
            self.builder.sign_timeout_ms = parse_env("BUILDER_SIGN_TIMEOUT_MS", &ms)?;
        }
        if let Some(secret) = get("SESSION_SECRET") {
            self.session.secret = Some(SecretString::from(secret));
        }
        if let Some(ttl) = get("SESSION_TTL_SECONDS") {
            self.session.ttl_seconds = parse_env("SESSION_TTL_SECONDS", &ttl)?;
        }
        if let Some(url) = get("SESSION_REDIS_URL") {
            self.session.redis_url = Some(url);
        }
        if let Some(secure) = get("SESSION_COOKIE_SECURE") {
            self.session.cookie_secure = parse_bool("SESSION_COOKIE_SECURE", &secure)?;
        }
        if let Some(addr) = get("METRICS_ADDR") {
            self.metrics.addr = Some(addr);
        }

        if self.session.ttl_seconds == 0 {
            return Err(GatewayError::Config("SESSION_TTL_SECONDS must be positive".to_string()));
        }
        Ok(())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.venue.timeout_ms)
    }

    pub fn builder_sign_timeout(&self) -> Duration {
        Duration::from_millis(self.builder.sign_timeout_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_seconds)
    }
}
