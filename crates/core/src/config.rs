use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::purchase_order::PricingTerms;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub events: EventSettings,
    pub notifications: NotificationSettings,
    pub artifacts: ArtifactSettings,
    pub delivery: DeliverySettings,
    pub orders: OrderSettings,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSettings {
    pub flush_interval_ms: u64,
    pub default_throttle_secs: u64,
    /// Event type name to minimum seconds between emissions.
    pub throttle_overrides: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationSettings {
    pub capacity: usize,
    pub ttl_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactSettings {
    pub remote_base_url: Option<String>,
    pub remote_timeout_secs: u64,
    pub template_dir: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct DeliverySettings {
    pub default_timeout_secs: u64,
    pub channels: Vec<ChannelConfig>,
    pub sender_name: String,
    pub company_name: String,
}

/// One outbound channel. Endpoints are `http(s)://` URLs or `log:` for the logging channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub name: String,
    pub endpoint: String,
    pub timeout_secs: Option<u64>,
    pub api_key: Option<SecretString>,
}

impl ChannelConfig {
    pub fn effective_timeout_secs(&self, default_timeout_secs: u64) -> u64 {
        self.timeout_secs.unwrap_or(default_timeout_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderSettings {
    pub default_tax_rate: Decimal,
    pub default_shipping: Decimal,
}

impl OrderSettings {
    pub fn default_pricing(&self) -> PricingTerms {
        PricingTerms { tax_rate: self.default_tax_rate, shipping: self.default_shipping }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub health_check_port: Option<u16>,
    pub remote_artifact_base_url: Option<String>,
    pub template_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://poflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            events: EventSettings {
                flush_interval_ms: 250,
                default_throttle_secs: 5,
                throttle_overrides: BTreeMap::new(),
            },
            notifications: NotificationSettings { capacity: 10, ttl_secs: 5 },
            artifacts: ArtifactSettings {
                remote_base_url: None,
                remote_timeout_secs: 30,
                template_dir: None,
            },
            delivery: DeliverySettings {
                default_timeout_secs: 30,
                channels: vec![ChannelConfig {
                    name: "log".to_string(),
                    endpoint: "log:".to_string(),
                    timeout_secs: None,
                    api_key: None,
                }],
                sender_name: "Purchasing Department".to_string(),
                company_name: "poflow".to_string(),
            },
            orders: OrderSettings {
                default_tax_rate: Decimal::new(10, 2),
                default_shipping: Decimal::ZERO,
            },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("poflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(events) = patch.events {
            if let Some(flush_interval_ms) = events.flush_interval_ms {
                self.events.flush_interval_ms = flush_interval_ms;
            }
            if let Some(default_throttle_secs) = events.default_throttle_secs {
                self.events.default_throttle_secs = default_throttle_secs;
            }
            if let Some(throttle_overrides) = events.throttle_overrides {
                self.events.throttle_overrides.extend(throttle_overrides);
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(capacity) = notifications.capacity {
                self.notifications.capacity = capacity;
            }
            if let Some(ttl_secs) = notifications.ttl_secs {
                self.notifications.ttl_secs = ttl_secs;
            }
        }

        if let Some(artifacts) = patch.artifacts {
            if let Some(remote_base_url) = artifacts.remote_base_url {
                self.artifacts.remote_base_url = Some(remote_base_url);
            }
            if let Some(remote_timeout_secs) = artifacts.remote_timeout_secs {
                self.artifacts.remote_timeout_secs = remote_timeout_secs;
            }
            if let Some(template_dir) = artifacts.template_dir {
                self.artifacts.template_dir = Some(template_dir);
            }
        }

        if let Some(delivery) = patch.delivery {
            if let Some(default_timeout_secs) = delivery.default_timeout_secs {
                self.delivery.default_timeout_secs = default_timeout_secs;
            }
            if let Some(channels) = delivery.channels {
                self.delivery.channels = channels
                    .into_iter()
                    .map(|channel| ChannelConfig {
                        name: channel.name,
                        endpoint: channel.endpoint,
                        timeout_secs: channel.timeout_secs,
                        api_key: channel.api_key.map(secret_value),
                    })
                    .collect();
            }
            if let Some(sender_name) = delivery.sender_name {
                self.delivery.sender_name = sender_name;
            }
            if let Some(company_name) = delivery.company_name {
                self.delivery.company_name = company_name;
            }
        }

        if let Some(orders) = patch.orders {
            if let Some(default_tax_rate) = orders.default_tax_rate {
                self.orders.default_tax_rate = default_tax_rate;
            }
            if let Some(default_shipping) = orders.default_shipping {
                self.orders.default_shipping = default_shipping;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("POFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("POFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("POFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("POFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("POFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("POFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("POFLOW_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_env("POFLOW_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("POFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("POFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("POFLOW_LOGGING_LEVEL").or_else(|| read_env("POFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("POFLOW_LOGGING_FORMAT").or_else(|| read_env("POFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("POFLOW_EVENTS_FLUSH_INTERVAL_MS") {
            self.events.flush_interval_ms = parse_env("POFLOW_EVENTS_FLUSH_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("POFLOW_EVENTS_DEFAULT_THROTTLE_SECS") {
            self.events.default_throttle_secs =
                parse_env("POFLOW_EVENTS_DEFAULT_THROTTLE_SECS", &value)?;
        }

        if let Some(value) = read_env("POFLOW_NOTIFICATIONS_CAPACITY") {
            self.notifications.capacity = parse_env("POFLOW_NOTIFICATIONS_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("POFLOW_NOTIFICATIONS_TTL_SECS") {
            self.notifications.ttl_secs = parse_env("POFLOW_NOTIFICATIONS_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("POFLOW_ARTIFACTS_REMOTE_BASE_URL") {
            self.artifacts.remote_base_url = Some(value);
        }
        if let Some(value) = read_env("POFLOW_ARTIFACTS_REMOTE_TIMEOUT_SECS") {
            self.artifacts.remote_timeout_secs =
                parse_env("POFLOW_ARTIFACTS_REMOTE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("POFLOW_ARTIFACTS_TEMPLATE_DIR") {
            self.artifacts.template_dir = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("POFLOW_DELIVERY_DEFAULT_TIMEOUT_SECS") {
            self.delivery.default_timeout_secs =
                parse_env("POFLOW_DELIVERY_DEFAULT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("POFLOW_DELIVERY_SENDER_NAME") {
            self.delivery.sender_name = value;
        }
        if let Some(value) = read_env("POFLOW_DELIVERY_COMPANY_NAME") {
            self.delivery.company_name = value;
        }

        if let Some(value) = read_env("POFLOW_ORDERS_DEFAULT_TAX_RATE") {
            self.orders.default_tax_rate = parse_env("POFLOW_ORDERS_DEFAULT_TAX_RATE", &value)?;
        }
        if let Some(value) = read_env("POFLOW_ORDERS_DEFAULT_SHIPPING") {
            self.orders.default_shipping = parse_env("POFLOW_ORDERS_DEFAULT_SHIPPING", &value)?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(health_check_port) = overrides.health_check_port {
            self.server.health_check_port = health_check_port;
        }
        if let Some(remote_base_url) = overrides.remote_artifact_base_url {
            self.artifacts.remote_base_url = Some(remote_base_url);
        }
        if let Some(template_dir) = overrides.template_dir {
            self.artifacts.template_dir = Some(template_dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_events(&self.events)?;
        validate_notifications(&self.notifications)?;
        validate_artifacts(&self.artifacts)?;
        validate_delivery(&self.delivery)?;
        validate_orders(&self.orders)?;
        Ok(())
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("poflow.toml"), PathBuf::from("config/poflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_events(events: &EventSettings) -> Result<(), ConfigError> {
    if events.flush_interval_ms < 10 || events.flush_interval_ms > 60_000 {
        return Err(ConfigError::Validation(
            "events.flush_interval_ms must be in range 10..=60000".to_string(),
        ));
    }
    if events.default_throttle_secs > 3600 {
        return Err(ConfigError::Validation(
            "events.default_throttle_secs must be at most 3600".to_string(),
        ));
    }
    if events.throttle_overrides.keys().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "events.throttle_overrides keys must be non-empty event type names".to_string(),
        ));
    }
    Ok(())
}

fn validate_notifications(notifications: &NotificationSettings) -> Result<(), ConfigError> {
    if notifications.capacity == 0 {
        return Err(ConfigError::Validation(
            "notifications.capacity must be greater than zero".to_string(),
        ));
    }
    if notifications.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "notifications.ttl_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_artifacts(artifacts: &ArtifactSettings) -> Result<(), ConfigError> {
    if let Some(base_url) = &artifacts.remote_base_url {
        if !is_http_url(base_url) {
            return Err(ConfigError::Validation(
                "artifacts.remote_base_url must start with http:// or https://".to_string(),
            ));
        }
    }
    if artifacts.remote_timeout_secs == 0 || artifacts.remote_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "artifacts.remote_timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_delivery(delivery: &DeliverySettings) -> Result<(), ConfigError> {
    if delivery.default_timeout_secs == 0 || delivery.default_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "delivery.default_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for channel in &delivery.channels {
        let name = channel.name.trim();
        if name.is_empty() {
            return Err(ConfigError::Validation(
                "delivery.channels[].name must not be empty".to_string(),
            ));
        }
        if !names.insert(name.to_string()) {
            return Err(ConfigError::Validation(format!(
                "delivery channel `{name}` is declared more than once"
            )));
        }
        if !is_http_url(&channel.endpoint) && channel.endpoint.trim() != "log:" {
            return Err(ConfigError::Validation(format!(
                "delivery channel `{name}` endpoint must be an http(s) URL or `log:`"
            )));
        }
        if let Some(timeout_secs) = channel.timeout_secs {
            if timeout_secs == 0 || timeout_secs > 300 {
                return Err(ConfigError::Validation(format!(
                    "delivery channel `{name}` timeout_secs must be in range 1..=300"
                )));
            }
        }
    }

    Ok(())
}

fn validate_orders(orders: &OrderSettings) -> Result<(), ConfigError> {
    if orders.default_tax_rate.is_sign_negative() || orders.default_tax_rate > Decimal::ONE {
        return Err(ConfigError::Validation(
            "orders.default_tax_rate must be a fraction in range 0..=1 (e.g. 0.10)".to_string(),
        ));
    }
    if orders.default_shipping.is_sign_negative() {
        return Err(ConfigError::Validation(
            "orders.default_shipping must not be negative".to_string(),
        ));
    }
    Ok(())
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    events: Option<EventsPatch>,
    notifications: Option<NotificationsPatch>,
    artifacts: Option<ArtifactsPatch>,
    delivery: Option<DeliveryPatch>,
    orders: Option<OrdersPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct EventsPatch {
    flush_interval_ms: Option<u64>,
    default_throttle_secs: Option<u64>,
    throttle_overrides: Option<BTreeMap<String, u64>>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationsPatch {
    capacity: Option<usize>,
    ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ArtifactsPatch {
    remote_base_url: Option<String>,
    remote_timeout_secs: Option<u64>,
    template_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct DeliveryPatch {
    default_timeout_secs: Option<u64>,
    channels: Option<Vec<ChannelPatch>>,
    sender_name: Option<String>,
    company_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelPatch {
    name: String,
    endpoint: String,
    timeout_secs: Option<u64>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OrdersPatch {
    default_tax_rate: Option<Decimal>,
    default_shipping: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_and_match_documented_values() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| format!("defaults should validate: {err}"))?;

        ensure(config.events.flush_interval_ms == 250, "flush tick defaults to 250ms")?;
        ensure(config.notifications.capacity == 10, "notification capacity defaults to 10")?;
        ensure(config.notifications.ttl_secs == 5, "notification ttl defaults to 5s")?;
        ensure(config.delivery.default_timeout_secs == 30, "channel timeout defaults to 30s")?;
        ensure(
            config.orders.default_pricing().tax_rate == Decimal::new(10, 2),
            "default tax rate is 10%",
        )?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_POFLOW_MAIL_KEY", "mail-key-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("poflow.toml");
            fs::write(
                &path,
                r#"
[delivery]
sender_name = "Dana Reyes"

[[delivery.channels]]
name = "primary"
endpoint = "https://mail.internal/purchase-orders/send-email"
api_key = "${TEST_POFLOW_MAIL_KEY}"

[[delivery.channels]]
name = "fallback"
endpoint = "https://mock-mail.internal/send"
timeout_secs = 10
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.delivery.channels.len() == 2, "both channels should be loaded")?;
            ensure(
                config.delivery.channels[0]
                    .api_key
                    .as_ref()
                    .is_some_and(|key| key.expose_secret() == "mail-key-from-env"),
                "api key should be interpolated from environment",
            )?;
            ensure(
                config.delivery.channels[1].effective_timeout_secs(30) == 10,
                "per-channel timeout should win over the default",
            )?;
            ensure(config.delivery.sender_name == "Dana Reyes", "sender name from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_POFLOW_MAIL_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("POFLOW_LOG_LEVEL", "warn");
        env::set_var("POFLOW_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["POFLOW_LOG_LEVEL", "POFLOW_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("POFLOW_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("POFLOW_ORDERS_DEFAULT_SHIPPING", "12.50");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("poflow.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[orders]
default_tax_rate = "0.08"
default_shipping = "5"

[events]
throttle_overrides = { order_approved = 1 }

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.orders.default_tax_rate == Decimal::new(8, 2),
                "file tax rate should replace the default",
            )?;
            ensure(
                config.orders.default_shipping == Decimal::new(1250, 2),
                "env shipping should win over file",
            )?;
            ensure(
                config.events.throttle_overrides.get("order_approved") == Some(&1),
                "throttle overrides should be read from file",
            )?;
            Ok(())
        })();

        clear_vars(&["POFLOW_DATABASE_URL", "POFLOW_ORDERS_DEFAULT_SHIPPING"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("POFLOW_ORDERS_DEFAULT_TAX_RATE", "10");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("orders.default_tax_rate")
            );
            ensure(has_message, "validation failure should mention orders.default_tax_rate")
        })();

        clear_vars(&["POFLOW_ORDERS_DEFAULT_TAX_RATE"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("POFLOW_NOTIFICATIONS_CAPACITY", "ten");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env parse failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "POFLOW_NOTIFICATIONS_CAPACITY"),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["POFLOW_NOTIFICATIONS_CAPACITY"]);
        result
    }

    #[test]
    fn duplicate_channel_names_are_rejected() -> Result<(), String> {
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("poflow.toml");
        fs::write(
            &path,
            r#"
[[delivery.channels]]
name = "mail"
endpoint = "https://a.example/send"

[[delivery.channels]]
name = "mail"
endpoint = "https://b.example/send"
"#,
        )
        .map_err(|err| err.to_string())?;

        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        let error = match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() }) {
            Ok(_) => return Err("duplicate channel names should fail validation".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("`mail`")),
            "validation failure should name the duplicated channel",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("poflow.toml");
        fs::write(
            &path,
            r#"
[[delivery.channels]]
name = "primary"
endpoint = "https://mail.internal/send"
api_key = "sk-very-secret-value"
"#,
        )
        .map_err(|err| err.to_string())?;

        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        let config =
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                .map_err(|err| format!("config load failed: {err}"))?;
        let debug = format!("{config:?}");

        ensure(!debug.contains("sk-very-secret-value"), "debug output should not contain api key")
    }

    #[test]
    fn missing_required_file_is_reported() -> Result<(), String> {
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("absent.toml");

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(path.clone()),
            require_file: true,
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected missing file error".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::MissingConfigFile(ref missing) if missing == &path),
            "missing file error should carry the requested path",
        )
    }
}
