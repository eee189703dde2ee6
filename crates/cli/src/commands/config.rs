use serde_json::json;

use cartwatch_core::config::{AppConfig, LoadOptions};

/// Prints the effective configuration after file, environment, and
/// default layering. There are no secret-bearing values to redact.
pub fn run() -> String {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let payload = json!({
                "database": {
                    "url": config.database.url,
                    "max_connections": config.database.max_connections,
                    "timeout_secs": config.database.timeout_secs,
                },
                "detector": {
                    "threshold_hours": config.detector.threshold_hours,
                    "interval_secs": config.detector.interval_secs,
                },
                "reminder": {
                    "threshold_hours": config.reminder.threshold_hours,
                    "interval_secs": config.reminder.interval_secs,
                },
                "scoring": {
                    "interval_secs": config.scoring.interval_secs,
                    "max_runtime_secs": config.scoring.max_runtime_secs,
                },
                "server": {
                    "bind_address": config.server.bind_address,
                    "health_check_port": config.server.health_check_port,
                    "graceful_shutdown_secs": config.server.graceful_shutdown_secs,
                },
                "logging": {
                    "level": config.logging.level,
                    "format": config.logging.format,
                },
            });
            serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|error| format!("config serialization failed: {error}"))
        }
        Err(error) => format!("configuration issue: {error}"),
    }
}
