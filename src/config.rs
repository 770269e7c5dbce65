use std::{
    env,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};
use anyhow::{Context, Result};

/// Default stamp template when the uploader does not supply one.
pub const DEFAULT_WATERMARK_TEXT: &str = "CONFIDENTIAL";

/// Which `DocumentStore` implementation `DATABASE_URL` selects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// A PostgreSQL connection string.
    Postgres(String),
    /// A SQLite file path, or `:memory:`.
    Sqlite(String),
}

impl StoreBackend {
    /// Classifies a database URL.
    pub fn parse(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(StoreBackend::Postgres(url.to_string()));
        }

        if let Some(path) = url.strip_prefix("sqlite:") {
            let path = path.trim_start_matches("//");
            if path.is_empty() {
                anyhow::bail!("DATABASE_URL sqlite: scheme needs a path or :memory:");
            }
            return Ok(StoreBackend::Sqlite(path.to_string()));
        }

        anyhow::bail!("DATABASE_URL must start with postgres://, postgresql:// or sqlite:")
    }
}

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The document store backend.
    pub store: StoreBackend,
    /// The URL of the Redis server. Owner routes are disabled without it.
    pub redis_url: Option<String>,
    /// The socket address to listen on.
    pub bind_addr: SocketAddr,
    /// The public base URL used to build share links.
    pub app_url: String,
    /// Directory holding the original uploads.
    pub upload_dir: PathBuf,
    /// Largest accepted upload in bytes.
    pub max_upload_bytes: usize,
    /// Stamp template used when an upload does not carry one.
    pub default_watermark_text: String,
    /// Number of watermark renders allowed to run at once.
    pub render_concurrency: usize,
    /// Interval of the expiry sweep in seconds. Zero disables it.
    pub expiry_sweep_secs: u64,
    /// Public view/heartbeat requests allowed per IP per minute.
    pub view_rate_limit_per_minute: u32,
    /// Reverse proxies whose forwarding headers the view rate limit trusts.
    pub trusted_proxies: Vec<IpAddr>,
    /// The origin allowed by CORS.
    pub cors_origin: String,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        Ok(Self {
            store: StoreBackend::parse(&database_url)?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
                .parse()
                .context("Invalid BIND_ADDR")?,
            app_url: env::var("APP_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            upload_dir: env::var("UPLOAD_DIR")
                .unwrap_or_else(|_| "uploads".to_string())
                .into(),
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .unwrap_or_else(|_| (10 * 1024 * 1024).to_string())
                .parse()
                .context("Invalid MAX_UPLOAD_BYTES")?,
            default_watermark_text: env::var("DEFAULT_WATERMARK_TEXT")
                .unwrap_or_else(|_| DEFAULT_WATERMARK_TEXT.to_string()),
            render_concurrency: env::var("RENDER_CONCURRENCY")
                .unwrap_or_else(|_| "8".to_string())
                .parse::<usize>()
                .context("Invalid RENDER_CONCURRENCY")?
                .max(1),
            expiry_sweep_secs: env::var("EXPIRY_SWEEP_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("Invalid EXPIRY_SWEEP_SECS")?,
            view_rate_limit_per_minute: env::var("VIEW_RATE_LIMIT_PER_MINUTE")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid VIEW_RATE_LIMIT_PER_MINUTE")?,
            trusted_proxies: parse_ip_list(&env::var("TRUSTED_PROXIES").unwrap_or_default())
                .context("Invalid TRUSTED_PROXIES")?,
            cors_origin: env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }

    /// A configuration suitable for tests and embedded use: in-memory
    /// SQLite, no Redis, no sweep.
    pub fn local(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreBackend::Sqlite(":memory:".to_string()),
            redis_url: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            app_url: "http://localhost:3000".to_string(),
            upload_dir: upload_dir.into(),
            max_upload_bytes: 10 * 1024 * 1024,
            default_watermark_text: DEFAULT_WATERMARK_TEXT.to_string(),
            render_concurrency: 4,
            expiry_sweep_secs: 0,
            view_rate_limit_per_minute: 60,
            trusted_proxies: Vec::new(),
            cors_origin: "http://localhost:3000".to_string(),
        }
    }
}

/// Parses a comma-separated list of IP addresses. Blank entries are skipped.
fn parse_ip_list(raw: &str) -> Result<Vec<IpAddr>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpAddr>()
                .with_context(|| format!("{entry:?} is not an IP address"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_proxy_list() {
        assert!(parse_ip_list("").unwrap().is_empty());
        assert_eq!(
            parse_ip_list("10.0.0.1, ::1,").unwrap(),
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "::1".parse::<IpAddr>().unwrap()
            ]
        );
        assert!(parse_ip_list("10.0.0.1,proxy.local").is_err());
    }

    #[test]
    fn database_url_selects_backend() {
        assert_eq!(
            StoreBackend::parse("postgres://u:p@localhost/docs").unwrap(),
            StoreBackend::Postgres("postgres://u:p@localhost/docs".to_string())
        );
        assert_eq!(
            StoreBackend::parse("sqlite:./dev.db").unwrap(),
            StoreBackend::Sqlite("./dev.db".to_string())
        );
        assert_eq!(
            StoreBackend::parse("sqlite::memory:").unwrap(),
            StoreBackend::Sqlite(":memory:".to_string())
        );
        assert!(StoreBackend::parse("mysql://localhost").is_err());
        assert!(StoreBackend::parse("sqlite:").is_err());
    }
}
