pub mod catalog;

use std::{env, io, time::Duration};

use tracing::debug;

use crate::models::Source;

const DEFAULT_DATABASE_URL: &str = "sqlite://listings.db?mode=rwc";
const DEFAULT_PROXIES_HOST: &str = "brd.superproxy.io";
const DEFAULT_PROXIES_PORT: u16 = 33335;

/// Proxy gateway settings; each pool entry becomes one egress identity.
#[derive(Clone, Debug, Default)]
pub struct ProxyConfig {
    pub pool: Vec<String>,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Proxy URLs for every identity in the pool, in pool order.
    pub fn urls(&self) -> Vec<String> {
        let username = self.username.as_deref().unwrap_or_default();
        let password = self.password.as_deref().unwrap_or_default();
        self.pool
            .iter()
            .map(|ip| {
                format!(
                    "http://{}-ip-{}:{}@{}:{}",
                    username, ip, password, self.host, self.port
                )
            })
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct ScoutConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub http_timeout: Duration,
    pub http_max_retries: u32,
    pub http_backoff_base: Duration,
    pub proxies: ProxyConfig,
    pub parser_pause: Duration,
    pub check_interval: Duration,
    pub enabled_sources: Vec<Source>,
    pub liveness_enabled: bool,
}

impl ScoutConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            database_max_connections: parse_u32("DATABASE_MAX_CONNECTIONS", 10).max(1),
            http_timeout: Duration::from_secs(parse_u64("HTTP_TIMEOUT_SECS", 15)),
            http_max_retries: parse_u32("HTTP_MAX_RETRIES", 3).max(1),
            http_backoff_base: Duration::from_millis(parse_u64("HTTP_BACKOFF_BASE_MS", 1_000)),
            proxies: ProxyConfig {
                pool: parse_list("PROXIES_POOL"),
                host: env::var("PROXIES_HOST")
                    .unwrap_or_else(|_| DEFAULT_PROXIES_HOST.to_string()),
                port: parse_u32("PROXIES_PORT", DEFAULT_PROXIES_PORT as u32) as u16,
                username: env::var("PROXIES_USERNAME").ok(),
                password: env::var("PROXIES_PASS").ok(),
            },
            parser_pause: Duration::from_secs(parse_u64("PARSER_PAUSE_SECS", 180)),
            check_interval: Duration::from_secs(parse_u64("CHECK_INTERVAL_HOURS", 2) * 3600),
            enabled_sources: parse_sources("ENABLED_SOURCES"),
            liveness_enabled: parse_bool("LIVENESS_ENABLED", true),
        }
    }

    /// Liveness workers: one per proxy identity, at least one.
    pub fn liveness_workers(&self) -> usize {
        self.proxies.pool.len().max(1)
    }
}

fn load_dotenv() {
    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_sources(key: &str) -> Vec<Source> {
    let raw = parse_list(key);
    if raw.is_empty() {
        return Source::ALL.to_vec();
    }
    raw.iter().filter_map(|name| Source::parse(name)).collect()
}
