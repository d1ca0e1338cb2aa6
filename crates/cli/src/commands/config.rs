use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use poflow_core::config::AppConfig;
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::load_config;

pub fn run() -> String {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure.output,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key: &str, env_key: Option<&str>| {
        field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in scalar_fields(&config) {
        lines.push(render_line(key, &value, source(key, Some(env_key))));
    }

    let channel_source = source("delivery.channels", None);
    for (index, channel) in config.delivery.channels.iter().enumerate() {
        let api_key = channel
            .api_key
            .as_ref()
            .map(|key| redact_token(key.expose_secret()))
            .unwrap_or_else(|| "<unset>".to_string());
        let timeout = channel.effective_timeout_secs(config.delivery.default_timeout_secs);
        lines.push(render_line(
            &format!("delivery.channels[{index}]"),
            &format!(
                "{} -> {} (timeout {timeout}s, api_key {api_key})",
                channel.name, channel.endpoint
            ),
            channel_source.clone(),
        ));
    }

    for (event_type, secs) in &config.events.throttle_overrides {
        lines.push(render_line(
            &format!("events.throttle_overrides.{event_type}"),
            &format!("{secs}s"),
            source("events.throttle_overrides", None),
        ));
    }

    lines.join("\n")
}

fn scalar_fields(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    let optional = |value: Option<String>| value.unwrap_or_else(|| "<unset>".to_string());
    vec![
        ("database.url", config.database.url.clone(), "POFLOW_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "POFLOW_DATABASE_MAX_CONNECTIONS",
        ),
        ("database.timeout_secs", config.database.timeout_secs.to_string(), "POFLOW_DATABASE_TIMEOUT_SECS"),
        ("server.bind_address", config.server.bind_address.clone(), "POFLOW_SERVER_BIND_ADDRESS"),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            "POFLOW_SERVER_HEALTH_CHECK_PORT",
        ),
        ("logging.level", config.logging.level.clone(), "POFLOW_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "POFLOW_LOGGING_FORMAT"),
        (
            "events.flush_interval_ms",
            config.events.flush_interval_ms.to_string(),
            "POFLOW_EVENTS_FLUSH_INTERVAL_MS",
        ),
        (
            "events.default_throttle_secs",
            config.events.default_throttle_secs.to_string(),
            "POFLOW_EVENTS_DEFAULT_THROTTLE_SECS",
        ),
        ("notifications.capacity", config.notifications.capacity.to_string(), "POFLOW_NOTIFICATIONS_CAPACITY"),
        ("notifications.ttl_secs", config.notifications.ttl_secs.to_string(), "POFLOW_NOTIFICATIONS_TTL_SECS"),
        (
            "artifacts.remote_base_url",
            optional(config.artifacts.remote_base_url.clone()),
            "POFLOW_ARTIFACTS_REMOTE_BASE_URL",
        ),
        (
            "artifacts.template_dir",
            optional(config.artifacts.template_dir.as_ref().map(|dir| dir.display().to_string())),
            "POFLOW_ARTIFACTS_TEMPLATE_DIR",
        ),
        (
            "delivery.default_timeout_secs",
            config.delivery.default_timeout_secs.to_string(),
            "POFLOW_DELIVERY_DEFAULT_TIMEOUT_SECS",
        ),
        ("delivery.sender_name", config.delivery.sender_name.clone(), "POFLOW_DELIVERY_SENDER_NAME"),
        ("delivery.company_name", config.delivery.company_name.clone(), "POFLOW_DELIVERY_COMPANY_NAME"),
        ("orders.default_tax_rate", config.orders.default_tax_rate.to_string(), "POFLOW_ORDERS_DEFAULT_TAX_RATE"),
        ("orders.default_shipping", config.orders.default_shipping.to_string(), "POFLOW_ORDERS_DEFAULT_SHIPPING"),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("poflow.toml"), PathBuf::from("config/poflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    let visible: String = trimmed.chars().take(4).collect();
    if trimmed.chars().count() > 8 {
        format!("{visible}***")
    } else {
        "<redacted>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_token};

    #[test]
    fn redaction_keeps_only_a_short_prefix() {
        assert_eq!(redact_token("mk_live_0123456789"), "mk_l***");
        assert_eq!(redact_token("short"), "<redacted>");
        assert_eq!(redact_token("   "), "<empty>");
    }

    #[test]
    fn dotted_paths_resolve_into_nested_tables() {
        let doc: Value = "[delivery]\nsender_name = \"Ops\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "delivery.sender_name"));
        assert!(!contains_path(&doc, "delivery.company_name"));
    }
}
