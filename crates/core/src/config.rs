use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub detector: DetectorConfig,
    pub reminder: ReminderConfig,
    pub scoring: ScoringConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// A cart untouched for this long with at least one item is flagged.
    pub threshold_hours: u64,
    pub interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ReminderConfig {
    /// Reminder eligibility is measured from the abandonment detection
    /// timestamp, not from the sweep schedule.
    pub threshold_hours: u64,
    pub interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ScoringConfig {
    pub interval_secs: u64,
    /// Wall-clock budget for one bulk recompute. The run stops cleanly
    /// when exhausted and the next run picks up the remainder.
    pub max_runtime_secs: u64,
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
    pub detector_threshold_hours: Option<u64>,
    pub reminder_threshold_hours: Option<u64>,
    pub scoring_max_runtime_secs: Option<u64>,
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
                url: "sqlite://cartwatch.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            detector: DetectorConfig { threshold_hours: 24, interval_secs: 3_600 },
            reminder: ReminderConfig { threshold_hours: 48, interval_secs: 86_400 },
            scoring: ScoringConfig { interval_secs: 86_400, max_runtime_secs: 300 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cartwatch.toml"));
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

        if let Some(detector) = patch.detector {
            if let Some(threshold_hours) = detector.threshold_hours {
                self.detector.threshold_hours = threshold_hours;
            }
            if let Some(interval_secs) = detector.interval_secs {
                self.detector.interval_secs = interval_secs;
            }
        }

        if let Some(reminder) = patch.reminder {
            if let Some(threshold_hours) = reminder.threshold_hours {
                self.reminder.threshold_hours = threshold_hours;
            }
            if let Some(interval_secs) = reminder.interval_secs {
                self.reminder.interval_secs = interval_secs;
            }
        }

        if let Some(scoring) = patch.scoring {
            if let Some(interval_secs) = scoring.interval_secs {
                self.scoring.interval_secs = interval_secs;
            }
            if let Some(max_runtime_secs) = scoring.max_runtime_secs {
                self.scoring.max_runtime_secs = max_runtime_secs;
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
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CARTWATCH_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CARTWATCH_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CARTWATCH_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CARTWATCH_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CARTWATCH_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CARTWATCH_DETECTOR_THRESHOLD_HOURS") {
            self.detector.threshold_hours =
                parse_u64("CARTWATCH_DETECTOR_THRESHOLD_HOURS", &value)?;
        }
        if let Some(value) = read_env("CARTWATCH_DETECTOR_INTERVAL_SECS") {
            self.detector.interval_secs = parse_u64("CARTWATCH_DETECTOR_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("CARTWATCH_REMINDER_THRESHOLD_HOURS") {
            self.reminder.threshold_hours =
                parse_u64("CARTWATCH_REMINDER_THRESHOLD_HOURS", &value)?;
        }
        if let Some(value) = read_env("CARTWATCH_REMINDER_INTERVAL_SECS") {
            self.reminder.interval_secs = parse_u64("CARTWATCH_REMINDER_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("CARTWATCH_SCORING_INTERVAL_SECS") {
            self.scoring.interval_secs = parse_u64("CARTWATCH_SCORING_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("CARTWATCH_SCORING_MAX_RUNTIME_SECS") {
            self.scoring.max_runtime_secs =
                parse_u64("CARTWATCH_SCORING_MAX_RUNTIME_SECS", &value)?;
        }

        if let Some(value) = read_env("CARTWATCH_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CARTWATCH_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("CARTWATCH_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("CARTWATCH_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CARTWATCH_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("CARTWATCH_LOGGING_LEVEL").or_else(|| read_env("CARTWATCH_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CARTWATCH_LOGGING_FORMAT").or_else(|| read_env("CARTWATCH_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
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
        if let Some(threshold_hours) = overrides.detector_threshold_hours {
            self.detector.threshold_hours = threshold_hours;
        }
        if let Some(threshold_hours) = overrides.reminder_threshold_hours {
            self.reminder.threshold_hours = threshold_hours;
        }
        if let Some(max_runtime_secs) = overrides.scoring_max_runtime_secs {
            self.scoring.max_runtime_secs = max_runtime_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_detector(&self.detector)?;
        validate_reminder(&self.reminder)?;
        validate_scoring(&self.scoring)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cartwatch.toml"), PathBuf::from("config/cartwatch.toml")]
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

fn validate_detector(detector: &DetectorConfig) -> Result<(), ConfigError> {
    if detector.threshold_hours == 0 {
        return Err(ConfigError::Validation(
            "detector.threshold_hours must be greater than zero".to_string(),
        ));
    }

    if detector.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "detector.interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_reminder(reminder: &ReminderConfig) -> Result<(), ConfigError> {
    if reminder.threshold_hours == 0 {
        return Err(ConfigError::Validation(
            "reminder.threshold_hours must be greater than zero".to_string(),
        ));
    }

    if reminder.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "reminder.interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_scoring(scoring: &ScoringConfig) -> Result<(), ConfigError> {
    if scoring.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "scoring.interval_secs must be greater than zero".to_string(),
        ));
    }

    if scoring.max_runtime_secs == 0 || scoring.max_runtime_secs > 3_600 {
        return Err(ConfigError::Validation(
            "scoring.max_runtime_secs must be in range 1..=3600".to_string(),
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

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    detector: Option<DetectorPatch>,
    reminder: Option<ReminderPatch>,
    scoring: Option<ScoringPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DetectorPatch {
    threshold_hours: Option<u64>,
    interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReminderPatch {
    threshold_hours: Option<u64>,
    interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ScoringPatch {
    interval_secs: Option<u64>,
    max_runtime_secs: Option<u64>,
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

#[cfg(test)]
mod tests {
    use std::env;
    use std::io::Write;
    use std::sync::{Mutex, OnceLock};

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(Mutex::default)
    }

    fn with_clean_env<T>(vars: &[(&str, &str)], body: impl FnOnce() -> T) -> T {
        let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let all_keys: Vec<String> = env::vars()
            .map(|(key, _)| key)
            .filter(|key| key.starts_with("CARTWATCH_"))
            .collect();
        for key in &all_keys {
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

    #[test]
    fn defaults_pass_validation() {
        with_clean_env(&[], || {
            let config = AppConfig::load(LoadOptions::default()).expect("load defaults");
            assert_eq!(config.detector.threshold_hours, 24);
            assert_eq!(config.reminder.threshold_hours, 48);
            assert_eq!(config.scoring.max_runtime_secs, 300);
            assert_eq!(config.logging.format, LogFormat::Compact);
        });
    }

    #[test]
    fn file_patch_overrides_defaults() {
        with_clean_env(&[], || {
            let mut file = tempfile::Builder::new()
                .suffix(".toml")
                .tempfile()
                .expect("create temp config");
            writeln!(
                file,
                "[detector]\nthreshold_hours = 12\n\n[logging]\nlevel = \"debug\"\nformat = \"json\""
            )
            .expect("write temp config");

            let config = AppConfig::load(LoadOptions {
                config_path: Some(file.path().to_path_buf()),
                ..LoadOptions::default()
            })
            .expect("load patched config");

            assert_eq!(config.detector.threshold_hours, 12);
            assert_eq!(config.logging.level, "debug");
            assert_eq!(config.logging.format, LogFormat::Json);
        });
    }

    #[test]
    fn env_overrides_beat_file_values() {
        with_clean_env(&[("CARTWATCH_DETECTOR_THRESHOLD_HOURS", "6")], || {
            let mut file = tempfile::Builder::new()
                .suffix(".toml")
                .tempfile()
                .expect("create temp config");
            writeln!(file, "[detector]\nthreshold_hours = 12").expect("write temp config");

            let config = AppConfig::load(LoadOptions {
                config_path: Some(file.path().to_path_buf()),
                ..LoadOptions::default()
            })
            .expect("load config");

            assert_eq!(config.detector.threshold_hours, 6);
        });
    }

    #[test]
    fn interpolation_reads_environment_variables() {
        with_clean_env(&[("CARTWATCH_TEST_DB_PATH", "sqlite::memory:")], || {
            let mut file = tempfile::Builder::new()
                .suffix(".toml")
                .tempfile()
                .expect("create temp config");
            writeln!(file, "[database]\nurl = \"${{CARTWATCH_TEST_DB_PATH}}\"")
                .expect("write temp config");

            let config = AppConfig::load(LoadOptions {
                config_path: Some(file.path().to_path_buf()),
                ..LoadOptions::default()
            })
            .expect("load config");

            assert_eq!(config.database.url, "sqlite::memory:");
        });
    }

    #[test]
    fn missing_interpolation_variable_is_an_error() {
        with_clean_env(&[], || {
            let mut file = tempfile::Builder::new()
                .suffix(".toml")
                .tempfile()
                .expect("create temp config");
            writeln!(file, "[database]\nurl = \"${{CARTWATCH_NO_SUCH_VAR}}\"")
                .expect("write temp config");

            let error = AppConfig::load(LoadOptions {
                config_path: Some(file.path().to_path_buf()),
                ..LoadOptions::default()
            })
            .expect_err("interpolation should fail");

            assert!(matches!(error, ConfigError::MissingEnvInterpolation { .. }));
        });
    }

    #[test]
    fn programmatic_overrides_win_over_everything() {
        with_clean_env(&[("CARTWATCH_SCORING_MAX_RUNTIME_SECS", "100")], || {
            let config = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    scoring_max_runtime_secs: Some(45),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .expect("load config");

            assert_eq!(config.scoring.max_runtime_secs, 45);
        });
    }

    #[test]
    fn non_sqlite_database_url_fails_validation() {
        with_clean_env(&[("CARTWATCH_DATABASE_URL", "postgres://localhost/cartwatch")], || {
            let error = AppConfig::load(LoadOptions::default()).expect_err("should reject url");
            assert!(matches!(error, ConfigError::Validation(_)));
        });
    }

    #[test]
    fn zero_threshold_fails_validation() {
        with_clean_env(&[("CARTWATCH_DETECTOR_THRESHOLD_HOURS", "0")], || {
            let error = AppConfig::load(LoadOptions::default()).expect_err("should reject zero");
            let message = error.to_string();
            assert!(message.contains("detector.threshold_hours"));
        });
    }

    #[test]
    fn invalid_log_format_env_is_rejected() {
        with_clean_env(&[("CARTWATCH_LOGGING_FORMAT", "yaml")], || {
            let error = AppConfig::load(LoadOptions::default()).expect_err("should reject format");
            assert!(error.to_string().contains("unsupported log format"));
        });
    }

    #[test]
    fn require_file_without_file_is_an_error() {
        with_clean_env(&[], || {
            let error = AppConfig::load(LoadOptions {
                config_path: Some("does-not-exist.toml".into()),
                require_file: true,
                ..LoadOptions::default()
            })
            .expect_err("missing required file");

            assert!(matches!(error, ConfigError::MissingConfigFile(_)));
        });
    }
}
