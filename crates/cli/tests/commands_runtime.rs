use std::env;
use std::sync::{Mutex, OnceLock};

use poflow_cli::commands::orders::OrderQuery;
use poflow_cli::commands::{config, migrate, orders, smoke};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("POFLOW_DATABASE_URL", "sqlite::memory:"), ("POFLOW_DATABASE_MAX_CONNECTIONS", "1")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["applied_versions"], serde_json::json!([1, 2]));
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_env() {
    with_env(&[("POFLOW_NOTIFICATIONS_CAPACITY", "ten")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn orders_lists_nothing_on_a_fresh_database() {
    with_env(&[("POFLOW_DATABASE_URL", "sqlite::memory:"), ("POFLOW_DATABASE_MAX_CONNECTIONS", "1")], || {
        let pending = orders::run(OrderQuery::Pending);
        assert_eq!(pending.exit_code, 0);
        let payload = parse_payload(&pending.output);
        assert_eq!(payload["command"], "orders");
        assert_eq!(payload["data"]["orders"], serde_json::json!([]));
        assert!(payload["message"].as_str().unwrap_or_default().contains("pending approval"));

        let by_site = orders::run(OrderQuery::Site("modesto"));
        let payload = parse_payload(&by_site.output);
        assert!(payload["message"].as_str().unwrap_or_default().contains("site `modesto`"));
    });
}

#[test]
fn orders_reports_unknown_id_as_not_found() {
    with_env(&[("POFLOW_DATABASE_URL", "sqlite::memory:"), ("POFLOW_DATABASE_MAX_CONNECTIONS", "1")], || {
        let result = orders::run(OrderQuery::Id("po-missing"));
        assert_eq!(result.exit_code, 8);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "not_found");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.starts_with("The requested purchase order does not exist."), "{message}");
        assert!(message.contains("purchase order `po-missing`"), "{message}");
        assert!(message.contains("correlation_id=cli-orders-"), "{message}");
    });
}

#[test]
fn config_reports_env_sources() {
    with_env(
        &[("POFLOW_DATABASE_URL", "sqlite::memory:"), ("POFLOW_DELIVERY_SENDER_NAME", "Ops Desk")],
        || {
            let output = config::run();
            assert!(output.contains("- database.url = sqlite::memory: (source: env (POFLOW_DATABASE_URL))"));
            assert!(output.contains("- delivery.sender_name = Ops Desk"));
            assert!(output.contains("- delivery.channels[0] = log -> log: (timeout 30s, api_key <unset>)"));
        },
    );
}

#[test]
fn smoke_returns_success_report_with_valid_env() {
    with_env(&[("POFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 0, "expected successful smoke report");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "pass");
        let names: Vec<&str> = payload["checks"]
            .as_array()
            .map(|checks| checks.iter().filter_map(|check| check["name"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(
            names,
            vec![
                "config_validation",
                "delivery_channels",
                "event_pipeline",
                "db_connectivity",
                "migration_visibility"
            ]
        );
    });
}

#[test]
fn smoke_returns_failure_when_config_invalid() {
    with_env(&[("POFLOW_ORDERS_DEFAULT_TAX_RATE", "3")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 6, "expected smoke failure code");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "fail");
        assert_eq!(payload["checks"][1]["status"], "skipped");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let keys = [
        "POFLOW_DATABASE_URL",
        "POFLOW_DATABASE_MAX_CONNECTIONS",
        "POFLOW_DATABASE_TIMEOUT_SECS",
        "POFLOW_SERVER_BIND_ADDRESS",
        "POFLOW_SERVER_HEALTH_CHECK_PORT",
        "POFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "POFLOW_LOGGING_LEVEL",
        "POFLOW_LOGGING_FORMAT",
        "POFLOW_LOG_LEVEL",
        "POFLOW_LOG_FORMAT",
        "POFLOW_EVENTS_FLUSH_INTERVAL_MS",
        "POFLOW_EVENTS_DEFAULT_THROTTLE_SECS",
        "POFLOW_NOTIFICATIONS_CAPACITY",
        "POFLOW_NOTIFICATIONS_TTL_SECS",
        "POFLOW_ARTIFACTS_REMOTE_BASE_URL",
        "POFLOW_ARTIFACTS_REMOTE_TIMEOUT_SECS",
        "POFLOW_ARTIFACTS_TEMPLATE_DIR",
        "POFLOW_DELIVERY_DEFAULT_TIMEOUT_SECS",
        "POFLOW_DELIVERY_SENDER_NAME",
        "POFLOW_DELIVERY_COMPANY_NAME",
        "POFLOW_ORDERS_DEFAULT_TAX_RATE",
        "POFLOW_ORDERS_DEFAULT_SHIPPING",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
