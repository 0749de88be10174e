use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the Folio binary.
#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Folio content service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FOLIO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub env: EnvOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP API (default).
    Serve(Box<ServeArgs>),
    /// Pull published pages from Notion into the content directory.
    Sync(SyncArgs),
    /// Inspect or manage the caches of a running server.
    Cache(CacheArgs),
    /// Report which settings are present; exits 1 when required ones are missing.
    #[command(name = "verify-env")]
    VerifyEnv,
    /// Scaffold a new markdown post.
    #[command(name = "new-post")]
    NewPost(NewPostArgs),
}

/// Well-known environment variables, also accepted as flags.
#[derive(Debug, Args, Default, Clone)]
pub struct EnvOverrides {
    /// Notion integration token.
    #[arg(long = "notion-token", env = "NOTION_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    pub notion_token: Option<String>,

    /// Notion database holding the posts.
    #[arg(long = "notion-database-id", env = "NOTION_DATABASE_ID", value_name = "ID")]
    pub notion_database_id: Option<String>,

    /// REST endpoint of the key-value store.
    #[arg(long = "kv-rest-api-url", env = "KV_REST_API_URL", value_name = "URL")]
    pub kv_rest_api_url: Option<String>,

    /// Bearer token of the key-value store.
    #[arg(long = "kv-rest-api-token", env = "KV_REST_API_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    pub kv_rest_api_token: Option<String>,

    /// Shared secret accepted by the revalidation webhook.
    #[arg(long = "webhook-secret", env = "WEBHOOK_SECRET", hide_env_values = true, value_name = "SECRET")]
    pub webhook_secret: Option<String>,

    /// Shared secret accepted by the scheduled refresh.
    #[arg(long = "cron-secret", env = "CRON_SECRET", hide_env_values = true, value_name = "SECRET")]
    pub cron_secret: Option<String>,

    /// Admin token for every authenticated route and for `folio cache`.
    #[arg(long = "admin-token", env = "ADMIN_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    pub admin_token: Option<String>,

    /// Image proxy slot count.
    #[arg(long = "image-proxy-max-concurrency", env = "IMAGE_PROXY_MAX_CONCURRENCY", value_name = "COUNT")]
    pub image_proxy_max_concurrency: Option<u32>,

    /// Per-attempt upstream timeout of the image proxy.
    #[arg(long = "image-proxy-timeout-ms", env = "IMAGE_PROXY_TIMEOUT_MS", value_name = "MS")]
    pub image_proxy_timeout_ms: Option<u64>,

    /// Minimum delay between two requests to one image host.
    #[arg(long = "image-proxy-cooldown-ms", env = "IMAGE_PROXY_COOLDOWN_MS", value_name = "MS")]
    pub image_proxy_cooldown_ms: Option<u64>,

    /// Largest image body the proxy will return.
    #[arg(long = "image-max-bytes", env = "IMAGE_MAX_BYTES", value_name = "BYTES")]
    pub image_max_bytes: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the posts directory.
    #[arg(long = "posts-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub posts_dir: Option<PathBuf>,

    /// Allow requests through when the rate-limit store errors.
    #[arg(
        long = "rate-limit-fail-open",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub rate_limit_fail_open: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SyncArgs {
    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Override the posts directory.
    #[arg(long = "posts-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub posts_dir: Option<PathBuf>,

    /// Override the images directory.
    #[arg(long = "images-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub images_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    /// Base URL of the running server.
    #[arg(long = "server-url", env = "FOLIO_SERVER_URL", value_name = "URL")]
    pub server_url: Option<String>,

    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand, Clone, Copy, PartialEq, Eq)]
pub enum CacheCommand {
    /// Show data and search cache statistics.
    Stats,
    /// Clear the data and search caches.
    Clear,
    /// Precompute post payloads.
    Warm,
    /// Show the health report.
    Health,
}

#[derive(Debug, Args, Clone)]
pub struct NewPostArgs {
    /// Post title; the file name is derived from it.
    #[arg(value_name = "TITLE")]
    pub title: String,

    /// Comma separated tags.
    #[arg(long, value_delimiter = ',', value_name = "TAGS")]
    pub tags: Vec<String>,

    /// Mark the post as a draft.
    #[arg(long)]
    pub draft: bool,

    /// Author name written to the frontmatter.
    #[arg(long, value_name = "NAME")]
    pub author: Option<String>,

    /// Override the posts directory.
    #[arg(long = "posts-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub posts_dir: Option<PathBuf>,
}
