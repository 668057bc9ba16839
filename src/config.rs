use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "INR";
const DEFAULT_FLAT_SHIPPING_FEE: f64 = 55.0;
const DEFAULT_FREE_SHIPPING_THRESHOLD: f64 = 800.0;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SHIPPING_TIMEOUT_SECS: u64 = 15;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to create missing tables on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// Settlement currency for carts, orders and payment intents
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Flat shipping surcharge applied below the free-shipping threshold
    #[serde(default = "default_flat_shipping_fee")]
    pub flat_shipping_fee: f64,

    /// Net-total threshold at and above which shipping is free
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: f64,

    /// Payment methods accepted at checkout
    #[serde(default = "default_payment_methods")]
    pub allowed_payment_methods: Vec<String>,

    /// Payment gateway base URL
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Payment gateway API key id
    #[serde(default)]
    pub gateway_key_id: String,

    /// Payment gateway API key secret; also the HMAC secret for
    /// confirmation-signature verification
    #[serde(default)]
    pub gateway_key_secret: String,

    /// Cross-check captured status with the gateway during confirmation
    #[serde(default)]
    pub gateway_verify_capture: bool,

    /// Payment gateway request timeout (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Shipping provider base URL
    #[serde(default = "default_shipping_base_url")]
    pub shipping_base_url: String,

    /// Shipping provider login email
    #[serde(default)]
    pub shipping_email: String,

    /// Shipping provider login password
    #[serde(default)]
    pub shipping_password: String,

    /// Shipping provider request timeout (seconds)
    #[serde(default = "default_shipping_timeout_secs")]
    pub shipping_timeout_secs: u64,

    /// Warehouse pickup location registered with the shipping provider
    #[serde(default = "default_pickup_location")]
    pub shipping_pickup_location: String,

    /// Notification relay endpoint; unset disables outbound notifications
    #[serde(default)]
    pub notification_relay_url: Option<String>,

    /// Address that receives operational escalation alerts
    #[serde(default = "default_admin_alert_address")]
    pub admin_alert_address: String,
}

impl AppConfig {
    /// Minimal constructor used by tests and embedded setups.
    pub fn new(
        database_url: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            host: host.into(),
            port,
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            currency: default_currency(),
            flat_shipping_fee: default_flat_shipping_fee(),
            free_shipping_threshold: default_free_shipping_threshold(),
            allowed_payment_methods: default_payment_methods(),
            gateway_base_url: default_gateway_base_url(),
            gateway_key_id: String::new(),
            gateway_key_secret: String::new(),
            gateway_verify_capture: false,
            gateway_timeout_secs: default_gateway_timeout_secs(),
            shipping_base_url: default_shipping_base_url(),
            shipping_email: String::new(),
            shipping_password: String::new(),
            shipping_timeout_secs: default_shipping_timeout_secs(),
            shipping_pickup_location: default_pickup_location(),
            notification_relay_url: None,
            admin_alert_address: default_admin_alert_address(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    /// Flat fee as a money amount.
    pub fn flat_shipping_fee(&self) -> Decimal {
        Decimal::from_f64_retain(self.flat_shipping_fee).unwrap_or(Decimal::ZERO)
    }

    /// Free-shipping threshold as a money amount.
    pub fn free_shipping_threshold(&self) -> Decimal {
        Decimal::from_f64_retain(self.free_shipping_threshold).unwrap_or(Decimal::ZERO)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    10
}

fn default_db_acquire_timeout_secs() -> u64 {
    10
}

fn default_db_idle_timeout_secs() -> u64 {
    300
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_flat_shipping_fee() -> f64 {
    DEFAULT_FLAT_SHIPPING_FEE
}

fn default_free_shipping_threshold() -> f64 {
    DEFAULT_FREE_SHIPPING_THRESHOLD
}

fn default_payment_methods() -> Vec<String> {
    vec!["gateway".to_string(), "upi".to_string()]
}

fn default_gateway_base_url() -> String {
    "https://api.gateway.example.com/v1".to_string()
}

fn default_shipping_base_url() -> String {
    "https://api.dispatch.example.com/v1".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_shipping_timeout_secs() -> u64 {
    DEFAULT_SHIPPING_TIMEOUT_SECS
}

fn default_pickup_location() -> String {
    "Primary".to_string()
}

fn default_admin_alert_address() -> String {
    "ops@localhost".to_string()
}

/// Initializes the tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads configuration from `config/` files plus `APP__`-prefixed environment
/// variables, then validates it.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn shipping_policy_defaults_match_storefront() {
        let cfg = AppConfig::new("sqlite::memory:", "127.0.0.1", 8080, "test");
        assert_eq!(cfg.flat_shipping_fee(), dec!(55));
        assert_eq!(cfg.free_shipping_threshold(), dec!(800));
        assert_eq!(cfg.currency, "INR");
    }

    #[test]
    fn development_environments_detected() {
        let mut cfg = AppConfig::new("sqlite::memory:", "127.0.0.1", 8080, "test");
        assert!(cfg.is_development());
        cfg.environment = "production".into();
        assert!(!cfg.is_development());
    }
}
