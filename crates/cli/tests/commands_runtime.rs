use std::env;
use std::sync::{Mutex, OnceLock};

use cartwatch_cli::commands::{detect, migrate, remind, score, seed, summary};
use serde_json::Value;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(Mutex::default)
}

fn with_env<T>(vars: &[(&str, &str)], body: impl FnOnce() -> T) -> T {
    let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let stale: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("CARTWATCH_"))
        .collect();
    for key in &stale {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    let result = body();

    for (key, _) in vars {
        env::remove_var(key);
    }
    result
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).unwrap_or_else(|error| {
        panic!("command output should be JSON, got `{output}`: {error}")
    })
}

// cache=shared keeps the whole pool on one in-memory database; the
// database itself is dropped when the command closes its pool.
const MEMORY_DB: &[(&str, &str)] =
    &[("CARTWATCH_DATABASE_URL", "sqlite::memory:?cache=shared")];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(MEMORY_DB, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_with_invalid_database_url() {
    with_env(&[("CARTWATCH_DATABASE_URL", "postgres://nope")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_reports_the_deterministic_dataset_counts() {
    with_env(MEMORY_DB, || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected successful seed run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("3 users"), "unexpected seed message: {message}");
        assert!(message.contains("6 carts"), "unexpected seed message: {message}");
        assert!(message.contains("3 abandonments"), "unexpected seed message: {message}");
    });
}

#[test]
fn detect_on_an_empty_database_flags_nothing() {
    with_env(MEMORY_DB, || {
        let result = detect::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "detect");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("flagged 0"), "unexpected detect message: {message}");
    });
}

#[test]
fn remind_on_an_empty_database_marks_nothing() {
    with_env(MEMORY_DB, || {
        let result = remind::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "remind");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("marked 0"), "unexpected remind message: {message}");
    });
}

#[test]
fn bulk_score_on_an_empty_database_creates_nothing() {
    with_env(MEMORY_DB, || {
        let result = score::run(None);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "score");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("0 created"), "unexpected score message: {message}");
    });
}

#[test]
fn summary_on_an_empty_database_is_valid_json() {
    with_env(MEMORY_DB, || {
        let result = summary::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "summary");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        let rollup: Value =
            serde_json::from_str(message).expect("summary message should be JSON");
        assert_eq!(rollup["scored_users"], 0);
    });
}
