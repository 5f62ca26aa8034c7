use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::error::{GymError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub base: BaseConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub holidayer: HolidayerConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaseConfig {
    /// IANA time zone name used for day classification and the holiday
    /// calendar. Empty means UTC.
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub debug: bool,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            timezone: String::new(),
            debug: false,
        }
    }
}

impl BaseConfig {
    /// Resolve the configured time zone, defaulting to UTC.
    pub fn timezone(&self) -> Result<Tz> {
        if self.timezone.is_empty() {
            return Ok(Tz::UTC);
        }
        self.timezone
            .parse()
            .map_err(|_| GymError::InvalidConfig(format!("invalid timezone {:?}", self.timezone)))
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.timezone.is_empty() && self.timezone.parse::<Tz>().is_err() {
            errors.push(format!("base: invalid timezone {:?}", self.timezone));
        }
        errors
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    #[serde(default)]
    pub active: bool,
    /// Poll period in seconds
    #[serde(default = "default_period_secs")]
    pub period: u64,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub url: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            active: false,
            period: default_period_secs(),
            token: String::new(),
            url: String::new(),
        }
    }
}

impl FetcherConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period)
    }

    /// The authorization header value with the Bearer prefix.
    pub fn auth_token(&self) -> String {
        if self.token.is_empty() {
            return String::new();
        }
        format!("Bearer {}", self.token)
    }

    fn validate(&self) -> Vec<String> {
        if !self.active {
            return Vec::new();
        }
        let mut errors = Vec::new();
        if self.period == 0 {
            errors.push("fetcher: period must be greater than zero".to_string());
        }
        if self.token.is_empty() {
            errors.push("fetcher: token is required".to_string());
        }
        if let Err(e) = validate_http_url(&self.url) {
            errors.push(format!("fetcher: url: {e}"));
        }
        errors
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HolidayerConfig {
    #[serde(default)]
    pub active: bool,
    /// Poll period in seconds
    #[serde(default = "default_holidayer_period_secs")]
    pub period: u64,
    /// URL template containing the literal `<YEAR>` placeholder
    #[serde(default)]
    pub url: String,
}

impl Default for HolidayerConfig {
    fn default() -> Self {
        Self {
            active: false,
            period: default_holidayer_period_secs(),
            url: String::new(),
        }
    }
}

impl HolidayerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period)
    }

    fn validate(&self) -> Vec<String> {
        if !self.active {
            return Vec::new();
        }
        let mut errors = Vec::new();
        if self.period == 0 {
            errors.push("holidayer: period must be greater than zero".to_string());
        }
        if let Err(e) = validate_http_url(&self.url) {
            errors.push(format!("holidayer: url: {e}"));
        }
        errors
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictorConfig {
    #[serde(default)]
    pub active: bool,
    /// Default forecast horizon, 1..=24 hours
    #[serde(default = "default_predictor_hours")]
    pub hours: u8,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            active: false,
            hours: default_predictor_hours(),
        }
    }
}

impl PredictorConfig {
    fn validate(&self) -> Vec<String> {
        if !self.active {
            return Vec::new();
        }
        let mut errors = Vec::new();
        if self.hours < 1 || self.hours > 24 {
            errors.push(format!(
                "predictor: hours must be between 1 and 24, got {}",
                self.hours
            ));
        }
        errors
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    /// Per-call timeout in seconds
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout: u64,
}

impl DatabaseConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.path.is_empty() {
            errors.push("database: path is required".to_string());
        }
        if self.query_timeout == 0 {
            errors.push("database: query_timeout must be greater than zero".to_string());
        }
        errors
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, with `GYMLOAD_*` environment
    /// variables taking precedence, then validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let cfg: AppConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("GYMLOAD").separator("__"))
            .build()?
            .try_deserialize()?;

        let errors = cfg.validate();
        if !errors.is_empty() {
            return Err(GymError::InvalidConfig(errors.join("; ")));
        }

        Ok(cfg)
    }

    /// Validate config invariants. Returns list of problems (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.base.validate());
        errors.extend(self.fetcher.validate());
        errors.extend(self.holidayer.validate());
        errors.extend(self.predictor.validate());
        errors.extend(self.database.validate());
        errors
    }
}

fn default_period_secs() -> u64 {
    90
}

fn default_holidayer_period_secs() -> u64 {
    86_400
}

fn default_predictor_hours() -> u8 {
    12
}

fn default_query_timeout_secs() -> u64 {
    5
}

fn validate_http_url(raw: &str) -> std::result::Result<(), String> {
    if raw.is_empty() {
        return Err("empty URL".to_string());
    }
    let url = Url::parse(raw).map_err(|e| format!("invalid URL: {e}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!(
            "invalid scheme {:?}, must be http or https",
            url.scheme()
        ));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}
