use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr};

/// Image types accepted by `/upload` unless overridden.
pub const DEFAULT_ALLOWED_TYPES: [&str; 8] = [
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    "image/bmp",
    "image/x-icon",
    "image/avif",
];

/// Where rate-limit windows are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterBackend {
    /// Shared through the metadata database.
    Sqlite,
    /// Per-process only.
    Memory,
}

impl FromStr for CounterBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown counter backend `{}` (expected sqlite or memory)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Shared secret compared against the `Authorization` header.
    pub auth_token: Option<String>,
    /// Public base URL used to build `externalUrl` for stored objects.
    pub public_url: String,
    pub allowed_types: Vec<String>,
    /// Requests per window per client on `/upload`.
    pub upload_rate_limit: u32,
    /// Requests per window across every client on `/upload`.
    pub global_rate_limit: u32,
    pub rate_limit_window_secs: u64,
    /// Allow requests through when the counter store cannot be reached.
    pub rate_limit_fail_open: bool,
    pub counter_backend: CounterBackend,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            storage_dir: "./data/objects".into(),
            database_url: "sqlite://./data/meta/image_gateway.db".into(),
            auth_token: None,
            public_url: "http://localhost:3000".into(),
            allowed_types: DEFAULT_ALLOWED_TYPES.iter().map(|t| t.to_string()).collect(),
            upload_rate_limit: 20,
            global_rate_limit: 100,
            rate_limit_window_secs: 60,
            rate_limit_fail_open: true,
            counter_backend: CounterBackend::Sqlite,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Image storage gateway")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides IMAGE_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides IMAGE_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL for copyable links (overrides IMAGE_GATEWAY_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Counter backend for rate limits: sqlite or memory (overrides IMAGE_GATEWAY_COUNTER_BACKEND)
    #[arg(long)]
    pub counter_backend: Option<String>,

    /// Apply the schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let defaults = Self::default();

        let env_host = env::var("IMAGE_GATEWAY_HOST").unwrap_or(defaults.host);
        let env_port = env_parsed("IMAGE_GATEWAY_PORT", defaults.port)?;
        let env_storage = env::var("IMAGE_GATEWAY_STORAGE_DIR").unwrap_or(defaults.storage_dir);
        let env_db = env::var("IMAGE_GATEWAY_DATABASE_URL").unwrap_or(defaults.database_url);
        let env_public = env::var("IMAGE_GATEWAY_PUBLIC_URL").unwrap_or(defaults.public_url);
        let auth_token = env::var("IMAGE_GATEWAY_AUTH_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let allowed_types = match env::var("IMAGE_GATEWAY_ALLOWED_TYPES") {
            Ok(list) => parse_type_list(&list),
            Err(_) => defaults.allowed_types,
        };

        let counter_backend = match args
            .counter_backend
            .or_else(|| env::var("IMAGE_GATEWAY_COUNTER_BACKEND").ok())
        {
            Some(raw) => raw.parse()?,
            None => defaults.counter_backend,
        };

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            auth_token,
            public_url: args.public_url.unwrap_or(env_public),
            allowed_types,
            upload_rate_limit: env_parsed("IMAGE_GATEWAY_UPLOAD_RATE_LIMIT", defaults.upload_rate_limit)?,
            global_rate_limit: env_parsed("IMAGE_GATEWAY_GLOBAL_RATE_LIMIT", defaults.global_rate_limit)?,
            rate_limit_window_secs: env_parsed(
                "IMAGE_GATEWAY_RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window_secs,
            )?,
            rate_limit_fail_open: env_parsed(
                "IMAGE_GATEWAY_RATE_LIMIT_FAIL_OPEN",
                defaults.rate_limit_fail_open,
            )?,
            counter_backend,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn parse_type_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
