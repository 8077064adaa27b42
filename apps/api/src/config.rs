use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails fast if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub storage_provider: String,
    pub storage_root: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub llm_provider: String,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub analysis_version: String,
    pub worker_concurrency: usize,
    pub poll_window_ms: u64,
    pub llm_retry_base_delay_ms: u64,
    pub min_job_description_runes: usize,
    pub max_job_description_runes: usize,
    pub free_analysis_limit: i64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let storage_provider = env_or("STORAGE_PROVIDER", "local");
        if storage_provider != "local" && storage_provider != "s3" {
            anyhow::bail!("STORAGE_PROVIDER must be 'local' or 's3', got '{storage_provider}'");
        }

        // S3 credentials are only mandatory when the s3 provider is selected.
        let (s3_bucket, s3_endpoint, aws_access_key_id, aws_secret_access_key) =
            if storage_provider == "s3" {
                (
                    require_env("S3_BUCKET")?,
                    require_env("S3_ENDPOINT")?,
                    require_env("AWS_ACCESS_KEY_ID")?,
                    require_env("AWS_SECRET_ACCESS_KEY")?,
                )
            } else {
                (
                    env_or("S3_BUCKET", ""),
                    env_or("S3_ENDPOINT", ""),
                    env_or("AWS_ACCESS_KEY_ID", ""),
                    env_or("AWS_SECRET_ACCESS_KEY", ""),
                )
            };

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            storage_provider,
            storage_root: env_or("STORAGE_ROOT", "./data"),
            s3_bucket,
            s3_endpoint,
            aws_access_key_id,
            aws_secret_access_key,
            llm_provider: env_or("LLM_PROVIDER", "openai"),
            llm_api_key: require_env("LLM_API_KEY")?,
            llm_base_url: env_or("LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_model: env_or("LLM_MODEL", "gpt-4o-mini"),
            analysis_version: env_or("ANALYSIS_VERSION", "unknown"),
            worker_concurrency: parse_env("WORKER_CONCURRENCY", 2)?,
            poll_window_ms: parse_env("POLL_WINDOW_MS", 1000)?,
            llm_retry_base_delay_ms: parse_env("LLM_RETRY_BASE_DELAY_MS", 300)?,
            min_job_description_runes: parse_env("MIN_JOB_DESCRIPTION_RUNES", 300)?,
            max_job_description_runes: parse_env("MAX_JOB_DESCRIPTION_RUNES", 50_000)?,
            free_analysis_limit: parse_env("FREE_ANALYSIS_LIMIT", 10)?,
            port: parse_env("PORT", 8080)?,
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("'{key}' has an invalid value")),
        Err(_) => Ok(default),
    }
}
