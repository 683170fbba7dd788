use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.mch.mobilepay.example";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SIGNATURE_TOLERANCE_SECS: u64 = 300;
const DEFAULT_REMINDER_INTERVAL_SECS: u64 = 3600;
const DEFAULT_REMINDER_LEAD_DAYS: i64 = 1;
const DEFAULT_REMINDER_BATCH_SIZE: u64 = 200;
const DEFAULT_WEBHOOK_DEDUPE_TTL_SECS: u64 = 600;

/// Mobile-payment gateway credentials and endpoints.
///
/// Passed to the gateway adapter at construction; nothing in the crate reads payment
/// credentials from anywhere else.
#[derive(Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Base URL of the gateway REST API
    #[serde(default = "default_gateway_base_url")]
    #[validate(length(min = 1))]
    pub base_url: String,

    /// Client application id the prepay handle is issued for
    #[validate(length(min = 1, message = "gateway.app_id is required"))]
    pub app_id: String,

    /// Merchant id placed in the authorization header
    #[validate(length(min = 1, message = "gateway.merchant_id is required"))]
    pub merchant_id: String,

    /// Serial number of the merchant signing key
    #[validate(length(min = 1, message = "gateway.merchant_serial_no is required"))]
    pub merchant_serial_no: String,

    /// Merchant API key used to sign outbound requests and client payment params
    #[validate(length(min = 16, message = "gateway.api_key must be at least 16 characters"))]
    pub api_key: String,

    /// Secret shared with the gateway for verifying responses and callbacks
    #[validate(length(min = 16, message = "gateway.platform_secret must be at least 16 characters"))]
    pub platform_secret: String,

    /// Public URL the gateway calls with payment results
    #[validate(length(min = 1))]
    pub notify_url: String,

    /// Public URL the gateway calls with refund results
    #[validate(length(min = 1))]
    pub refund_notify_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Accepted clock skew for signed responses and callbacks
    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: u64,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .field("merchant_id", &self.merchant_id)
            .field("merchant_serial_no", &self.merchant_serial_no)
            .field("api_key", &"<redacted>")
            .field("platform_secret", &"<redacted>")
            .field("notify_url", &self.notify_url)
            .field("refund_notify_url", &self.refund_notify_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("signature_tolerance_secs", &self.signature_tolerance_secs)
            .finish()
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
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

    /// Event channel capacity for async notification delivery
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Take stock when an order is created instead of when it is paid
    #[serde(default)]
    pub reserve_stock_on_create: bool,

    /// Reminder sweep interval (seconds)
    #[serde(default = "default_reminder_interval_secs")]
    pub reminder_interval_secs: u64,

    /// Orders travelling within this many days get a reminder
    #[serde(default = "default_reminder_lead_days")]
    pub reminder_lead_days: i64,

    /// Upper bound of orders handled per sweep
    #[serde(default = "default_reminder_batch_size")]
    pub reminder_batch_size: u64,

    /// How long processed webhook ids are remembered in memory
    #[serde(default = "default_webhook_dedupe_ttl_secs")]
    pub webhook_dedupe_ttl_secs: u64,

    /// Payment gateway settings
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Creates a new configuration
    pub fn new(
        database_url: String,
        host: String,
        port: u16,
        environment: String,
        gateway: GatewayConfig,
    ) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            reserve_stock_on_create: false,
            reminder_interval_secs: default_reminder_interval_secs(),
            reminder_lead_days: default_reminder_lead_days(),
            reminder_batch_size: default_reminder_batch_size(),
            webhook_dedupe_ttl_secs: default_webhook_dedupe_ttl_secs(),
            gateway,
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(self.reminder_interval_secs)
    }

    pub fn webhook_dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.webhook_dedupe_ttl_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.reminder_interval_secs == 0 {
            let mut err = ValidationError::new("reminder_interval_secs");
            err.message = Some("reminder_interval_secs must be greater than 0".into());
            errors.add("reminder_interval_secs", err);
        }

        if self.reminder_lead_days < 0 {
            let mut err = ValidationError::new("reminder_lead_days");
            err.message = Some("reminder_lead_days cannot be negative".into());
            errors.add("reminder_lead_days", err);
        }

        if self.is_production() && !self.gateway.base_url.starts_with("https://") {
            let mut err = ValidationError::new("gateway_base_url_insecure");
            err.message = Some("gateway.base_url must use https in production".into());
            errors.add("gateway", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
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
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_reminder_interval_secs() -> u64 {
    DEFAULT_REMINDER_INTERVAL_SECS
}

fn default_reminder_lead_days() -> i64 {
    DEFAULT_REMINDER_LEAD_DAYS
}

fn default_reminder_batch_size() -> u64 {
    DEFAULT_REMINDER_BATCH_SIZE
}

fn default_webhook_dedupe_ttl_secs() -> u64 {
    DEFAULT_WEBHOOK_DEDUPE_TTL_SECS
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_signature_tolerance_secs() -> u64 {
    DEFAULT_SIGNATURE_TOLERANCE_SECS
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("studytrip_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*, e.g. APP__GATEWAY__MERCHANT_ID)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
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

    // Gateway credentials have no defaults; they must come from a file or APP__GATEWAY__*.
    let config = Config::builder()
        .set_default("database_url", "sqlite://studytrip.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", run_env.as_str())?
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

    app_config.gateway.validate().map_err(|e| {
        error!("Gateway configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> GatewayConfig {
        GatewayConfig {
            base_url: "https://gateway.test".into(),
            app_id: "wx-app".into(),
            merchant_id: "1900000001".into(),
            merchant_serial_no: "SERIAL01".into(),
            api_key: "merchant-api-key-0123456789".into(),
            platform_secret: "platform-secret-0123456789".into(),
            notify_url: "https://trips.test/api/v1/payments/notify".into(),
            refund_notify_url: "https://trips.test/api/v1/payments/refund-notify".into(),
            request_timeout_secs: 5,
            signature_tolerance_secs: 300,
        }
    }

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
            gateway(),
        )
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.gateway.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert!(!cfg.reserve_stock_on_create);
    }

    #[test]
    fn production_requires_https_gateway() {
        let mut cfg = base_config();
        cfg.gateway.base_url = "http://gateway.test".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn short_gateway_secrets_are_rejected() {
        let mut cfg = base_config();
        cfg.gateway.api_key = "short".into();
        let errors = cfg.gateway.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("api_key"));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let rendered = format!("{:?}", gateway());
        assert!(!rendered.contains("merchant-api-key"));
        assert!(!rendered.contains("platform-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn invalid_log_level_fails_validation() {
        let mut cfg = base_config();
        cfg.log_level = "verbose".into();
        assert!(cfg.validate().is_err());
    }
}
