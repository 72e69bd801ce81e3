use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub max_pool_size: u32,
    pub pg_ssl_root_cert: Option<String>,
    pub pg_ssl_cert: Option<String>,
    pub pg_ssl_key: Option<String>,
    pub redis_url: Option<String>,
    pub cache_ttl: Duration,
    pub api_token: Option<String>,
    pub default_page_size: i64,
    pub max_page_size: i64,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    analytics_listen_addr: Option<String>,
    #[serde(default)]
    analytics_listen_host: Option<String>,
    #[serde(default)]
    analytics_listen_port: Option<u16>,
    #[serde(default)]
    analytics_database_url: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    analytics_max_pool_size: u32,
    #[serde(default)]
    pgsslrootcert: Option<String>,
    #[serde(default)]
    pgsslcert: Option<String>,
    #[serde(default)]
    pgsslkey: Option<String>,
    #[serde(default)]
    analytics_redis_url: Option<String>,
    #[serde(default)]
    redis_url: Option<String>,
    #[serde(default = "default_cache_ttl_secs")]
    analytics_cache_ttl_secs: u64,
    #[serde(default)]
    analytics_api_token: Option<String>,
    #[serde(default = "default_page_size")]
    analytics_default_page_size: i64,
    #[serde(default = "default_max_page_size")]
    analytics_max_page_size: i64,
    #[serde(default = "default_timeout_secs")]
    analytics_request_timeout_secs: u64,
}

const fn default_pool_size() -> u32 {
    10
}

pub const fn default_cache_ttl_secs() -> u64 {
    1800
}

const fn default_page_size() -> i64 {
    20
}

const fn default_max_page_size() -> i64 {
    100
}

const fn default_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse ANALYTICS_* environment variables")?;

        let listen_addr = resolve_addr(
            raw.analytics_listen_addr,
            raw.analytics_listen_host,
            raw.analytics_listen_port,
        )?;

        let database_url = raw
            .analytics_database_url
            .or(raw.database_url)
            .or_else(|| env::var("DATABASE_URL").ok())
            .context("ANALYTICS_DATABASE_URL or DATABASE_URL must be set")?;

        let redis_url = non_blank(raw.analytics_redis_url).or_else(|| non_blank(raw.redis_url));
        let default_page_size = raw.analytics_default_page_size.max(1);

        Ok(Self {
            listen_addr,
            database_url,
            max_pool_size: raw.analytics_max_pool_size.max(1),
            pg_ssl_root_cert: non_blank(raw.pgsslrootcert),
            pg_ssl_cert: non_blank(raw.pgsslcert),
            pg_ssl_key: non_blank(raw.pgsslkey),
            redis_url,
            cache_ttl: Duration::from_secs(raw.analytics_cache_ttl_secs.max(1)),
            api_token: non_blank(raw.analytics_api_token),
            default_page_size,
            max_page_size: raw.analytics_max_page_size.max(default_page_size),
            request_timeout: Duration::from_secs(raw.analytics_request_timeout_secs.max(1)),
        })
    }

    /// Configuration for in-process use (tests, tooling) with every optional
    /// integration switched off.
    pub fn embedded(database_url: String) -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url,
            max_pool_size: 2,
            pg_ssl_root_cert: None,
            pg_ssl_cert: None,
            pg_ssl_key: None,
            redis_url: None,
            cache_ttl: Duration::from_secs(default_cache_ttl_secs()),
            api_token: None,
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            request_timeout: Duration::from_secs(default_timeout_secs()),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid ANALYTICS_LISTEN_ADDR value")?
            .next()
            .context("ANALYTICS_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(3000);
    let combined = format!("{}:{}", host, port);
    combined
        .to_socket_addrs()
        .context("invalid listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}
