use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL (postgres:// or sqlite://)
    #[validate(length(min = 1, message = "database_url is required"))]
    pub database_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Deployment environment: development, staging, production
    #[serde(default = "default_env")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable output
    #[serde(default)]
    pub log_json: bool,

    /// Create missing tables at startup
    #[serde(default = "default_true")]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Merchant virtual payment address embedded in gateway deep links
    #[validate(length(min = 3, message = "merchant_vpa is required"))]
    pub merchant_vpa: String,

    #[validate(length(min = 1, message = "merchant_name is required"))]
    pub merchant_name: String,

    /// Out-of-band payment verification worker endpoint. When unset,
    /// verification notifications are disabled.
    #[serde(default)]
    pub verification_worker_url: Option<String>,

    /// Shared secret for signing verification notifications
    #[serde(default)]
    pub verification_webhook_secret: Option<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_env() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_true() -> bool {
    true
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}

impl AppConfig {
    /// Construct a configuration directly, primarily for tests.
    pub fn new(database_url: String, merchant_vpa: String, merchant_name: String) -> Self {
        Self {
            database_url,
            host: default_host(),
            port: default_port(),
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            merchant_vpa,
            merchant_name,
            verification_worker_url: None,
            verification_webhook_secret: None,
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// overlay, and `APP__`-prefixed environment variables, in that order.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("environment", run_env.clone())?
        .add_source(File::from(Path::new(CONFIG_DIR).join("default")).required(false))
        .add_source(File::from(Path::new(CONFIG_DIR).join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    // DATABASE_URL wins over file configuration, matching deploy conventions.
    if let Ok(url) = env::var("DATABASE_URL") {
        builder = builder.set_override("database_url", url)?;
    }

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;
    Ok(cfg)
}

/// Initializes the global tracing subscriber. `RUST_LOG` overrides the
/// configured level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("checkout_api={level},tower_http=debug");
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        tracing_subscriber::registry()
            .with(EnvFilter::new(filter))
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(EnvFilter::new(filter))
            .with(fmt::layer())
            .init();
    }
}
