use dotenvy::dotenv;
use eyre::{Result, WrapErr};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_SYMBOLS_FILE: &str = "nifty100.csv";

/// Connection and polling settings, resolved once at startup and handed to every client.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: Url,
    pub poll_interval: Duration,          // Fixed delay between job status queries
    pub poll_timeout: Duration,           // Give up on a job that never reaches a terminal status
    pub request_timeout: Duration,
    pub read_retries: u32,                // Transient retries for GET requests only
    pub detached_refresh_delay: Duration, // Wait before refreshing history after an id-less background run
    pub symbols_file: String,
}

impl Config {
    /// Defaults for everything except the backend location
    pub fn new(backend_url: Url) -> Self {
        Self {
            backend_url,
            poll_interval: Duration::from_millis(3000),
            poll_timeout: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(30),
            read_retries: 2,
            detached_refresh_delay: Duration::from_millis(4000),
            symbols_file: DEFAULT_SYMBOLS_FILE.to_string(),
        }
    }

    pub fn load() -> Result<Self> {
        dotenv().ok();

        let backend_url = env::var("BACKEND_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());
        let backend_url = Url::parse(&backend_url)
            .wrap_err_with(|| format!("Invalid BACKEND_URL: {}", backend_url))?;

        let mut config = Config::new(backend_url);
        if let Some(ms) = env_parse::<u64>("POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("POLL_TIMEOUT_SECS")? {
            config.poll_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = env_parse::<u32>("READ_RETRIES")? {
            config.read_retries = retries;
        }
        if let Some(ms) = env_parse::<u64>("DETACHED_REFRESH_DELAY_MS")? {
            config.detached_refresh_delay = Duration::from_millis(ms);
        }
        if let Ok(symbols_file) = env::var("SYMBOLS_FILE") {
            config.symbols_file = symbols_file;
        }

        if config.poll_interval.is_zero() {
            eyre::bail!("POLL_INTERVAL_MS must be greater than zero");
        }

        Ok(config)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_read_retries(mut self, retries: u32) -> Self {
        self.read_retries = retries;
        self
    }

    pub fn with_detached_refresh_delay(mut self, delay: Duration) -> Self {
        self.detached_refresh_delay = delay;
        self
    }

    /// Resolve an endpoint path against the backend base URL, keeping any base path prefix
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        let mut base = self.backend_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .wrap_err_with(|| format!("Invalid value for {}: {}", key, raw)),
        Err(_) => Ok(None),
    }
}
