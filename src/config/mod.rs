//! Configuration layer: typed settings with layered precedence
//! (`config/default.toml` → `folio.toml` → `--config-file` → `FOLIO__*` env →
//! well-known env vars and CLI flags).

mod cli;

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{CacheBackend, FailurePolicy};
use crate::util::secrets::describe_presence;

pub use cli::{
    CacheArgs, CacheCommand, CliArgs, Command, EnvOverrides, NewPostArgs, ServeArgs,
    ServeOverrides, SyncArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "folio";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;

const DEFAULT_POSTS_DIR: &str = "content/posts";
const DEFAULT_IMAGES_DIR: &str = "public/images/posts";
const DEFAULT_IMAGE_URL_PREFIX: &str = "/images/posts";

const DEFAULT_NOTION_API_BASE: &str = "https://api.notion.com/v1/";
const DEFAULT_NOTION_MIN_INTERVAL_MS: u64 = 334;
const DEFAULT_NOTION_MAX_ATTEMPTS: u64 = 4;
const DEFAULT_NOTION_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_NOTION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_NOTION_MAX_DOWNLOAD_BYTES: u64 = 20 * 1024 * 1024;

const DEFAULT_KV_TIMEOUT_MS: u64 = 2_000;

const DEFAULT_PROXY_MAX_CONCURRENCY: u64 = 4;
const DEFAULT_PROXY_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_PROXY_COOLDOWN_MS: u64 = 400;
const DEFAULT_PROXY_MAX_ATTEMPTS: u64 = 3;
const DEFAULT_PROXY_BACKOFF_BASE_MS: u64 = 250;
const DEFAULT_PROXY_BACKOFF_MAX_MS: u64 = 4_000;
const DEFAULT_PROXY_MAX_BYTES: u64 = 4 * 1024 * 1024;
const DEFAULT_PROXY_HOST_CAPACITY: u64 = 256;
const DEFAULT_PROXY_SIGNED_FAILURE_LIMIT: u64 = 3;
const DEFAULT_PROXY_SIGNED_FAILURE_WINDOW_SECS: u64 = 600;
const DEFAULT_PROXY_SIGNED_CAPACITY: u64 = 1_024;
const DEFAULT_PROXY_SCHEMES: &[&str] = &["https"];
const DEFAULT_PROXY_HOSTS: &[&str] = &[
    "*.amazonaws.com",
    "*.notion.so",
    "*.notion-static.com",
    "images.unsplash.com",
];

const DEFAULT_SEARCH_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_SEARCH_CACHE_CAPACITY: u64 = 256;
const DEFAULT_SEARCH_BODY_CHARS: u64 = 5_000;

const DEFAULT_RATE_LIMIT_CAPACITY: u64 = 10_000;
const DEFAULT_SENSITIVE_LIMIT: (u64, u64) = (5, 15 * 60);
const DEFAULT_PUBLIC_LIMIT: (u64, u64) = (100, 60);
const DEFAULT_IMAGES_LIMIT: (u64, u64) = (300, 60);

const DEFAULT_CACHE_CAPACITY: usize = 512;
const DEFAULT_CACHE_POST_TTL_SECS: u64 = 300;

const DEFAULT_CLIENT_SERVER_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 30;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub content: ContentSettings,
    pub notion: NotionSettings,
    pub kv: KvSettings,
    pub auth: AuthSettings,
    pub image_proxy: ImageProxySettings,
    pub search: SearchSettings,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
    pub client: ClientSettings,
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
pub struct ContentSettings {
    pub posts_dir: PathBuf,
    pub images_dir: PathBuf,
    pub image_url_prefix: String,
}

#[derive(Debug, Clone)]
pub struct NotionSettings {
    pub token: Option<String>,
    pub database_id: Option<String>,
    pub api_base: Url,
    pub min_interval: Duration,
    pub max_attempts: NonZeroU32,
    pub backoff_base: Duration,
    pub timeout: Duration,
    pub max_download_bytes: NonZeroU64,
}

impl NotionSettings {
    pub fn is_configured(&self) -> bool {
        self.token.is_some() && self.database_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct KvSettings {
    pub url: Option<Url>,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl KvSettings {
    /// Endpoint and token when both are present.
    pub fn credentials(&self) -> Option<(&Url, &str)> {
        Some((self.url.as_ref()?, self.token.as_deref()?))
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    pub admin_token: Option<String>,
    pub webhook_secret: Option<String>,
    pub cron_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImageProxySettings {
    pub allowed_schemes: Vec<String>,
    pub allowed_hosts: Vec<String>,
    pub max_concurrency: NonZeroU32,
    pub timeout_ms: NonZeroU64,
    pub cooldown_ms: u64,
    pub max_attempts: NonZeroU32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_bytes: NonZeroU64,
    pub host_capacity: NonZeroU32,
    pub signed_failure_limit: NonZeroU32,
    pub signed_failure_window_secs: NonZeroU64,
    pub signed_capacity: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub cache_ttl_seconds: NonZeroU64,
    pub cache_capacity: NonZeroU32,
    pub body_chars: NonZeroU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyLimit {
    pub max_requests: NonZeroU32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub failure_policy: FailurePolicy,
    /// Counters kept by the in-process store before the oldest are evicted.
    pub capacity: NonZeroU32,
    pub sensitive: PolicyLimit,
    pub public: PolicyLimit,
    pub images: PolicyLimit,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub capacity: usize,
    pub post_ttl_seconds: u64,
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub server_url: Url,
    pub timeout: Duration,
}

impl Settings {
    /// Presence report of every externally supplied value, secrets masked.
    pub fn environment_report(&self) -> BTreeMap<String, String> {
        let mut report = BTreeMap::new();
        let mut put = |key: &str, value: Option<&str>, secret: bool| {
            report.insert(key.to_string(), describe_presence(value, secret));
        };
        put("NOTION_TOKEN", self.notion.token.as_deref(), true);
        put("NOTION_DATABASE_ID", self.notion.database_id.as_deref(), false);
        put("KV_REST_API_URL", self.kv.url.as_ref().map(Url::as_str), false);
        put("KV_REST_API_TOKEN", self.kv.token.as_deref(), true);
        put("WEBHOOK_SECRET", self.auth.webhook_secret.as_deref(), true);
        put("CRON_SECRET", self.auth.cron_secret.as_deref(), true);
        put("ADMIN_TOKEN", self.auth.admin_token.as_deref(), true);
        report
    }

    /// Names of settings a sync cannot run without.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.notion.token.is_none() {
            missing.push("NOTION_TOKEN");
        }
        if self.notion.database_id.is_none() {
            missing.push("NOTION_DATABASE_ID");
        }
        missing
    }
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

/// Load settings using the configured precedence.
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("FOLIO")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("image_proxy.allowed_hosts")
            .with_list_parse_key("image_proxy.allowed_schemes")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_env_overrides(&cli.env);

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Sync(args)) => {
            raw.apply_content_dirs(args.posts_dir.as_ref(), args.images_dir.as_ref())
        }
        Some(Command::NewPost(args)) => raw.apply_content_dirs(args.posts_dir.as_ref(), None),
        Some(Command::Cache(args)) => {
            if let Some(url) = args.server_url.as_ref() {
                raw.client.server_url = Some(url.clone());
            }
        }
        Some(Command::VerifyEnv) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    content: RawContentSettings,
    notion: RawNotionSettings,
    kv: RawKvSettings,
    auth: RawAuthSettings,
    image_proxy: RawImageProxySettings,
    search: RawSearchSettings,
    rate_limit: RawRateLimitSettings,
    cache: RawCacheSettings,
    client: RawClientSettings,
}

impl RawSettings {
    fn apply_env_overrides(&mut self, env: &EnvOverrides) {
        if let Some(token) = env.notion_token.as_ref() {
            self.notion.token = Some(token.clone());
        }
        if let Some(id) = env.notion_database_id.as_ref() {
            self.notion.database_id = Some(id.clone());
        }
        if let Some(url) = env.kv_rest_api_url.as_ref() {
            self.kv.url = Some(url.clone());
        }
        if let Some(token) = env.kv_rest_api_token.as_ref() {
            self.kv.token = Some(token.clone());
        }
        if let Some(secret) = env.webhook_secret.as_ref() {
            self.auth.webhook_secret = Some(secret.clone());
        }
        if let Some(secret) = env.cron_secret.as_ref() {
            self.auth.cron_secret = Some(secret.clone());
        }
        if let Some(token) = env.admin_token.as_ref() {
            self.auth.admin_token = Some(token.clone());
        }
        if let Some(value) = env.image_proxy_max_concurrency {
            self.image_proxy.max_concurrency = Some(value.into());
        }
        if let Some(value) = env.image_proxy_timeout_ms {
            self.image_proxy.timeout_ms = Some(value);
        }
        if let Some(value) = env.image_proxy_cooldown_ms {
            self.image_proxy.cooldown_ms = Some(value);
        }
        if let Some(value) = env.image_max_bytes {
            self.image_proxy.max_bytes = Some(value);
        }
        if let Some(level) = env.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = env.log_json {
            self.logging.json = Some(json);
        }
    }

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
        if let Some(fail_open) = overrides.rate_limit_fail_open {
            self.rate_limit.fail_open = Some(fail_open);
        }
        self.apply_content_dirs(overrides.posts_dir.as_ref(), None);
    }

    fn apply_content_dirs(&mut self, posts_dir: Option<&PathBuf>, images_dir: Option<&PathBuf>) {
        if let Some(dir) = posts_dir {
            self.content.posts_dir = Some(dir.clone());
        }
        if let Some(dir) = images_dir {
            self.content.images_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            content,
            notion,
            kv,
            auth,
            image_proxy,
            search,
            rate_limit,
            cache,
            client,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            content: build_content_settings(content)?,
            notion: build_notion_settings(notion)?,
            kv: build_kv_settings(kv)?,
            auth: build_auth_settings(auth),
            image_proxy: build_image_proxy_settings(image_proxy)?,
            search: build_search_settings(search)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            cache: build_cache_settings(cache)?,
            client: build_client_settings(client)?,
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
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
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

fn build_content_settings(content: RawContentSettings) -> Result<ContentSettings, LoadError> {
    let posts_dir = content
        .posts_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_POSTS_DIR));
    if posts_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "content.posts_dir",
            "path must not be empty",
        ));
    }
    let images_dir = content
        .images_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGES_DIR));
    if images_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "content.images_dir",
            "path must not be empty",
        ));
    }
    let image_url_prefix = content
        .image_url_prefix
        .unwrap_or_else(|| DEFAULT_IMAGE_URL_PREFIX.to_string());
    if !image_url_prefix.starts_with('/') {
        return Err(LoadError::invalid(
            "content.image_url_prefix",
            "must start with `/`",
        ));
    }

    Ok(ContentSettings {
        posts_dir,
        images_dir,
        image_url_prefix,
    })
}

fn build_notion_settings(notion: RawNotionSettings) -> Result<NotionSettings, LoadError> {
    let api_base = parse_url(
        notion.api_base.as_deref().unwrap_or(DEFAULT_NOTION_API_BASE),
        "notion.api_base",
    )?;
    let max_attempts = non_zero_u32(
        notion.max_attempts.unwrap_or(DEFAULT_NOTION_MAX_ATTEMPTS),
        "notion.max_attempts",
    )?;
    let timeout_secs = notion.timeout_seconds.unwrap_or(DEFAULT_NOTION_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "notion.timeout_seconds",
            "must be greater than zero",
        ));
    }
    let max_download_bytes = non_zero_u64(
        notion
            .max_download_bytes
            .unwrap_or(DEFAULT_NOTION_MAX_DOWNLOAD_BYTES),
        "notion.max_download_bytes",
    )?;

    Ok(NotionSettings {
        token: non_blank(notion.token),
        database_id: non_blank(notion.database_id),
        api_base,
        min_interval: Duration::from_millis(
            notion.min_interval_ms.unwrap_or(DEFAULT_NOTION_MIN_INTERVAL_MS),
        ),
        max_attempts,
        backoff_base: Duration::from_millis(
            notion.backoff_base_ms.unwrap_or(DEFAULT_NOTION_BACKOFF_BASE_MS),
        ),
        timeout: Duration::from_secs(timeout_secs),
        max_download_bytes,
    })
}

fn build_kv_settings(kv: RawKvSettings) -> Result<KvSettings, LoadError> {
    let url = match non_blank(kv.url) {
        Some(value) => Some(parse_url(&value, "kv.url")?),
        None => None,
    };
    let timeout_ms = kv.timeout_ms.unwrap_or(DEFAULT_KV_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid("kv.timeout_ms", "must be greater than zero"));
    }

    Ok(KvSettings {
        url,
        token: non_blank(kv.token),
        timeout: Duration::from_millis(timeout_ms),
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> AuthSettings {
    AuthSettings {
        admin_token: non_blank(auth.admin_token),
        webhook_secret: non_blank(auth.webhook_secret),
        cron_secret: non_blank(auth.cron_secret),
    }
}

fn build_image_proxy_settings(
    proxy: RawImageProxySettings,
) -> Result<ImageProxySettings, LoadError> {
    let allowed_schemes = proxy
        .allowed_schemes
        .unwrap_or_else(|| DEFAULT_PROXY_SCHEMES.iter().map(|s| s.to_string()).collect());
    if allowed_schemes.is_empty() {
        return Err(LoadError::invalid(
            "image_proxy.allowed_schemes",
            "at least one scheme is required",
        ));
    }
    let allowed_hosts = proxy
        .allowed_hosts
        .unwrap_or_else(|| DEFAULT_PROXY_HOSTS.iter().map(|s| s.to_string()).collect());

    let backoff_base_ms = proxy.backoff_base_ms.unwrap_or(DEFAULT_PROXY_BACKOFF_BASE_MS);
    let backoff_max_ms = proxy.backoff_max_ms.unwrap_or(DEFAULT_PROXY_BACKOFF_MAX_MS);
    if backoff_max_ms < backoff_base_ms {
        return Err(LoadError::invalid(
            "image_proxy.backoff_max_ms",
            "must not be smaller than backoff_base_ms",
        ));
    }

    Ok(ImageProxySettings {
        allowed_schemes,
        allowed_hosts,
        max_concurrency: non_zero_u32(
            proxy.max_concurrency.unwrap_or(DEFAULT_PROXY_MAX_CONCURRENCY),
            "image_proxy.max_concurrency",
        )?,
        timeout_ms: non_zero_u64(
            proxy.timeout_ms.unwrap_or(DEFAULT_PROXY_TIMEOUT_MS),
            "image_proxy.timeout_ms",
        )?,
        cooldown_ms: proxy.cooldown_ms.unwrap_or(DEFAULT_PROXY_COOLDOWN_MS),
        max_attempts: non_zero_u32(
            proxy.max_attempts.unwrap_or(DEFAULT_PROXY_MAX_ATTEMPTS),
            "image_proxy.max_attempts",
        )?,
        backoff_base_ms,
        backoff_max_ms,
        max_bytes: non_zero_u64(
            proxy.max_bytes.unwrap_or(DEFAULT_PROXY_MAX_BYTES),
            "image_proxy.max_bytes",
        )?,
        host_capacity: non_zero_u32(
            proxy.host_capacity.unwrap_or(DEFAULT_PROXY_HOST_CAPACITY),
            "image_proxy.host_capacity",
        )?,
        signed_failure_limit: non_zero_u32(
            proxy
                .signed_failure_limit
                .unwrap_or(DEFAULT_PROXY_SIGNED_FAILURE_LIMIT),
            "image_proxy.signed_failure_limit",
        )?,
        signed_failure_window_secs: non_zero_u64(
            proxy
                .signed_failure_window_secs
                .unwrap_or(DEFAULT_PROXY_SIGNED_FAILURE_WINDOW_SECS),
            "image_proxy.signed_failure_window_secs",
        )?,
        signed_capacity: non_zero_u32(
            proxy.signed_capacity.unwrap_or(DEFAULT_PROXY_SIGNED_CAPACITY),
            "image_proxy.signed_capacity",
        )?,
    })
}

fn build_search_settings(search: RawSearchSettings) -> Result<SearchSettings, LoadError> {
    Ok(SearchSettings {
        cache_ttl_seconds: non_zero_u64(
            search.cache_ttl_seconds.unwrap_or(DEFAULT_SEARCH_CACHE_TTL_SECS),
            "search.cache_ttl_seconds",
        )?,
        cache_capacity: non_zero_u32(
            search.cache_capacity.unwrap_or(DEFAULT_SEARCH_CACHE_CAPACITY),
            "search.cache_capacity",
        )?,
        body_chars: non_zero_u32(
            search.body_chars.unwrap_or(DEFAULT_SEARCH_BODY_CHARS),
            "search.body_chars",
        )?,
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    Ok(RateLimitSettings {
        failure_policy: FailurePolicy::from_fail_open(rate_limit.fail_open.unwrap_or(true)),
        capacity: non_zero_u32(
            rate_limit.capacity.unwrap_or(DEFAULT_RATE_LIMIT_CAPACITY),
            "rate_limit.capacity",
        )?,
        sensitive: build_policy_limit(
            rate_limit.sensitive,
            DEFAULT_SENSITIVE_LIMIT,
            ("rate_limit.sensitive.max_requests", "rate_limit.sensitive.window_seconds"),
        )?,
        public: build_policy_limit(
            rate_limit.public,
            DEFAULT_PUBLIC_LIMIT,
            ("rate_limit.public.max_requests", "rate_limit.public.window_seconds"),
        )?,
        images: build_policy_limit(
            rate_limit.images,
            DEFAULT_IMAGES_LIMIT,
            ("rate_limit.images.max_requests", "rate_limit.images.window_seconds"),
        )?,
    })
}

fn build_policy_limit(
    raw: RawPolicyLimit,
    (default_max, default_window): (u64, u64),
    (max_key, window_key): (&'static str, &'static str),
) -> Result<PolicyLimit, LoadError> {
    let max_requests = non_zero_u32(raw.max_requests.unwrap_or(default_max), max_key)?;
    let window_seconds = raw.window_seconds.unwrap_or(default_window);
    if window_seconds == 0 {
        return Err(LoadError::invalid(window_key, "must be greater than zero"));
    }
    Ok(PolicyLimit {
        max_requests,
        window: Duration::from_secs(window_seconds),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("") | Some("auto") => CacheBackend::Auto,
        Some("memory") => CacheBackend::Memory,
        Some("remote") => CacheBackend::Remote,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}` (expected auto, memory or remote)"),
            ));
        }
    };
    let capacity = cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
    if capacity == 0 {
        return Err(LoadError::invalid("cache.capacity", "must be greater than zero"));
    }
    let post_ttl_seconds = cache.post_ttl_seconds.unwrap_or(DEFAULT_CACHE_POST_TTL_SECS);
    if post_ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.post_ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        backend,
        capacity,
        post_ttl_seconds,
        failure_policy: FailurePolicy::from_fail_open(cache.fail_open.unwrap_or(true)),
    })
}

fn build_client_settings(client: RawClientSettings) -> Result<ClientSettings, LoadError> {
    let server_url = parse_url(
        client
            .server_url
            .as_deref()
            .unwrap_or(DEFAULT_CLIENT_SERVER_URL),
        "client.server_url",
    )?;
    let timeout_secs = client.timeout_seconds.unwrap_or(DEFAULT_CLIENT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "client.timeout_seconds",
            "must be greater than zero",
        ));
    }
    Ok(ClientSettings {
        server_url,
        timeout: Duration::from_secs(timeout_secs),
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
struct RawContentSettings {
    posts_dir: Option<PathBuf>,
    images_dir: Option<PathBuf>,
    image_url_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNotionSettings {
    token: Option<String>,
    database_id: Option<String>,
    api_base: Option<String>,
    min_interval_ms: Option<u64>,
    max_attempts: Option<u64>,
    backoff_base_ms: Option<u64>,
    timeout_seconds: Option<u64>,
    max_download_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawKvSettings {
    url: Option<String>,
    token: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    admin_token: Option<String>,
    webhook_secret: Option<String>,
    cron_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawImageProxySettings {
    allowed_schemes: Option<Vec<String>>,
    allowed_hosts: Option<Vec<String>>,
    max_concurrency: Option<u64>,
    timeout_ms: Option<u64>,
    cooldown_ms: Option<u64>,
    max_attempts: Option<u64>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    max_bytes: Option<u64>,
    host_capacity: Option<u64>,
    signed_failure_limit: Option<u64>,
    signed_failure_window_secs: Option<u64>,
    signed_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSearchSettings {
    cache_ttl_seconds: Option<u64>,
    cache_capacity: Option<u64>,
    body_chars: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    fail_open: Option<bool>,
    capacity: Option<u64>,
    sensitive: RawPolicyLimit,
    public: RawPolicyLimit,
    images: RawPolicyLimit,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPolicyLimit {
    max_requests: Option<u64>,
    window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    capacity: Option<usize>,
    post_ttl_seconds: Option<u64>,
    fail_open: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawClientSettings {
    server_url: Option<String>,
    timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid URL: {err}")))?;
    if url.cannot_be_a_base() {
        return Err(LoadError::invalid(key, "URL cannot be used as a base"));
    }
    Ok(url)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
