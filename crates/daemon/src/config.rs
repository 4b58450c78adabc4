use anyhow::{Context, Result};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_PROVIDER_MODEL: &str = "veo-3.0-generate-preview";

/// Service configuration, loaded from the environment (and `.env`).
///
/// | Env var              | Default                     |
/// |----------------------|-----------------------------|
/// | `HOST`               | `127.0.0.1`                 |
/// | `PORT`               | `7777`                      |
/// | `APP_ENV`            | `development`               |
/// | `DATABASE_PATH`      | `.cache/reel.db`            |
/// | `S3_BUCKET`          | `generated-videos`          |
/// | `AWS_REGION`         | `us-east-1`                 |
/// | `S3_ENDPOINT_URL`    | unset                       |
/// | `S3_PUBLIC_BASE_URL` | unset                       |
/// | `GOOGLE_API_KEY`     | required                    |
/// | `PROVIDER_MODEL`     | `veo-3.0-generate-preview`  |
/// | `PROVIDER_BASE_URL`  | Generative Language v1beta  |
/// | `POLL_INTERVAL_SECS` | `10`                        |
/// | `POLL_MAX_ATTEMPTS`  | unset (poll forever)        |
/// | `STAGING_DIR`        | OS temp dir                 |
/// | `CORS_ORIGINS`       | `*`                         |
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub database_path: PathBuf,
    pub storage: StorageConfig,
    pub provider: ProviderConfig,
    pub poll_interval: Duration,
    pub poll_max_attempts: Option<u32>,
    pub staging_dir: PathBuf,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible providers (MinIO etc.)
    pub endpoint_url: Option<String>,
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let storage = StorageConfig {
            bucket: env_or("S3_BUCKET", "generated-videos"),
            region: env_or("AWS_REGION", "us-east-1"),
            endpoint_url: env_opt("S3_ENDPOINT_URL"),
            public_base_url: env_opt("S3_PUBLIC_BASE_URL"),
        };

        let provider = ProviderConfig {
            api_key: env_opt("GOOGLE_API_KEY")
                .context("GOOGLE_API_KEY environment variable not set")?,
            model: env_or("PROVIDER_MODEL", DEFAULT_PROVIDER_MODEL),
            base_url: env_or("PROVIDER_BASE_URL", DEFAULT_PROVIDER_BASE_URL),
        };

        let cors_origins = env_or("CORS_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            host: env_or("HOST", "127.0.0.1"),
            port: env_parse("PORT", 7777)?,
            environment: env_or("APP_ENV", "development"),
            database_path: PathBuf::from(env_or("DATABASE_PATH", ".cache/reel.db")),
            storage,
            provider,
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL_SECS", 10)?),
            poll_max_attempts: parse_max_attempts(env_opt("POLL_MAX_ATTEMPTS").as_deref())?,
            staging_dir: env_opt("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            cors_origins,
        })
    }
}

/// Unset means unbounded. Zero would end polling after a single check, so
/// it is rejected along with anything non-numeric.
fn parse_max_attempts(raw: Option<&str>) -> Result<Option<u32>> {
    raw.map(|v| {
        v.parse::<NonZeroU32>()
            .map(NonZeroU32::get)
            .with_context(|| format!("POLL_MAX_ATTEMPTS must be a positive integer, got {}", v))
    })
    .transpose()
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", name, raw)),
        None => Ok(default),
    }
}
