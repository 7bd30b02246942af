//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::StoreBackend;

mod cli;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides, StoreOverrides, SweepArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vitrine";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MEMORY_ENTRY_LIMIT: usize = 1024;
const DEFAULT_SUCCESS_TTL_SECS: u64 = 60 * 60 * 24 * 30;
const DEFAULT_PLACEHOLDER_TTL_SECS: u64 = 60 * 60 * 24;
const DEFAULT_CLIENT_MAX_AGE_SECS: u64 = 60 * 60 * 24;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
const MAX_LIFETIME_SECS: u64 = 60 * 60 * 24 * 365 * 10;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_COVER_ARCHIVE_URL: &str = "https://coverartarchive.org";
const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_PLACEHOLDER_URL: &str = "https://placehold.co";
const DEFAULT_ORIGIN_TIMEOUT_MS: u64 = 4000;
const DEFAULT_ORIGIN_CONNECT_TIMEOUT_MS: u64 = 2000;
const DEFAULT_MAX_CHAIN_LENGTH: usize = 3;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub database: DatabaseSettings,
    pub origins: OriginSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: StoreBackend,
    pub memory_entry_limit: usize,
    pub success_ttl: Duration,
    pub placeholder_ttl: Duration,
    pub client_max_age: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    pub cover_archive_url: Url,
    pub backend_url: Url,
    pub placeholder_url: Url,
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_chain_length: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("VITRINE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Sweep(args)) => raw.apply_store_overrides(&args.store),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

/// Default client identification sent to every origin.
pub fn default_user_agent() -> String {
    format!("vitrine/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    database: RawDatabaseSettings,
    origins: RawOriginSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(limit) = overrides.cache_memory_entry_limit {
            self.cache.memory_entry_limit = Some(limit);
        }
        if let Some(url) = overrides.origins_cover_archive_url.as_ref() {
            self.origins.cover_archive_url = Some(url.clone());
        }
        if let Some(url) = overrides.origins_backend_url.as_ref() {
            self.origins.backend_url = Some(url.clone());
        }
        if let Some(url) = overrides.origins_placeholder_url.as_ref() {
            self.origins.placeholder_url = Some(url.clone());
        }
        if let Some(timeout) = overrides.origins_timeout_ms {
            self.origins.timeout_ms = Some(timeout);
        }

        self.apply_store_overrides(&overrides.store);
    }

    fn apply_store_overrides(&mut self, overrides: &StoreOverrides) {
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            database,
            origins,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let database = build_database_settings(database)?;
        let origins = build_origin_settings(origins)?;

        if cache.backend == StoreBackend::Postgres && database.url.is_none() {
            return Err(LoadError::invalid(
                "database.url",
                "required when cache.backend is `postgres`",
            ));
        }

        Ok(Self {
            server,
            logging,
            cache,
            database,
            origins,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = non_zero_secs(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None => StoreBackend::Memory,
        Some(value) if value.eq_ignore_ascii_case("memory") => StoreBackend::Memory,
        Some(value) if value.eq_ignore_ascii_case("postgres") => StoreBackend::Postgres,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}`, expected `memory` or `postgres`"),
            ));
        }
    };

    let memory_entry_limit = cache
        .memory_entry_limit
        .unwrap_or(DEFAULT_MEMORY_ENTRY_LIMIT);
    if memory_entry_limit == 0 {
        return Err(LoadError::invalid(
            "cache.memory_entry_limit",
            "must be greater than zero",
        ));
    }

    let success_ttl = bounded_secs(
        cache.success_ttl_seconds.unwrap_or(DEFAULT_SUCCESS_TTL_SECS),
        "cache.success_ttl_seconds",
    )?;
    let placeholder_ttl = bounded_secs(
        cache
            .placeholder_ttl_seconds
            .unwrap_or(DEFAULT_PLACEHOLDER_TTL_SECS),
        "cache.placeholder_ttl_seconds",
    )?;
    let sweep_interval = bounded_secs(
        cache
            .sweep_interval_seconds
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        "cache.sweep_interval_seconds",
    )?;
    let client_max_age = Duration::from_secs(
        cache
            .client_max_age_seconds
            .unwrap_or(DEFAULT_CLIENT_MAX_AGE_SECS),
    );

    Ok(CacheSettings {
        backend,
        memory_entry_limit,
        success_ttl,
        placeholder_ttl,
        client_max_age,
        sweep_interval,
    })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = NonZeroU32::new(max_connections).ok_or_else(|| {
        LoadError::invalid("database.max_connections", "must be greater than zero")
    })?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_origin_settings(origins: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let cover_archive_url = parse_base_url(
        origins.cover_archive_url.as_deref(),
        DEFAULT_COVER_ARCHIVE_URL,
        "origins.cover_archive_url",
    )?;
    let backend_url = parse_base_url(
        origins.backend_url.as_deref(),
        DEFAULT_BACKEND_URL,
        "origins.backend_url",
    )?;
    let placeholder_url = parse_base_url(
        origins.placeholder_url.as_deref(),
        DEFAULT_PLACEHOLDER_URL,
        "origins.placeholder_url",
    )?;

    let user_agent = origins
        .user_agent
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(default_user_agent);

    let timeout = non_zero_millis(
        origins.timeout_ms.unwrap_or(DEFAULT_ORIGIN_TIMEOUT_MS),
        "origins.timeout_ms",
    )?;
    let connect_timeout = non_zero_millis(
        origins
            .connect_timeout_ms
            .unwrap_or(DEFAULT_ORIGIN_CONNECT_TIMEOUT_MS),
        "origins.connect_timeout_ms",
    )?;

    let max_chain_length = NonZeroUsize::new(
        origins
            .max_chain_length
            .unwrap_or(DEFAULT_MAX_CHAIN_LENGTH),
    )
    .ok_or_else(|| LoadError::invalid("origins.max_chain_length", "must be greater than zero"))?;

    Ok(OriginSettings {
        cover_archive_url,
        backend_url,
        placeholder_url,
        user_agent,
        timeout,
        connect_timeout,
        max_chain_length,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    memory_entry_limit: Option<usize>,
    success_ttl_seconds: Option<u64>,
    placeholder_ttl_seconds: Option<u64>,
    client_max_age_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    cover_archive_url: Option<String>,
    backend_url: Option<String>,
    placeholder_url: Option<String>,
    user_agent: Option<String>,
    timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    max_chain_length: Option<usize>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_base_url(
    value: Option<&str>,
    default: &str,
    key: &'static str,
) -> Result<Url, LoadError> {
    let candidate = value.map(str::trim).unwrap_or(default);
    let url = Url::parse(candidate)
        .map_err(|err| LoadError::invalid(key, format!("invalid url `{candidate}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(key, "scheme must be http or https"));
    }
    Ok(url)
}

fn non_zero_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn bounded_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value > MAX_LIFETIME_SECS {
        return Err(LoadError::invalid(
            key,
            format!("must not exceed {MAX_LIFETIME_SECS} seconds"),
        ));
    }
    non_zero_secs(value, key)
}

fn non_zero_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}
