//! Configuration management via environment variables
//!
//! Provides helper functions for reading environment variables with fallback
//! to deprecated variable names with warning logs, and the [`EdcConfig`]
//! assembled from them.

use std::path::PathBuf;
use std::time::Duration;

/// Default SQLite URL
pub const DEFAULT_DATABASE_URL: &str = "sqlite:data/edc.db";

/// Get an environment variable with fallback to a deprecated name
///
/// If the new variable name is set, returns its value.
/// If only the old (deprecated) variable name is set, returns its value
/// and logs a deprecation warning.
///
/// # Example
/// ```
/// use edc::config::get_env_with_fallback;
///
/// let url = get_env_with_fallback("EDC_DATABASE_URL", "DATABASE_URL");
/// ```
pub fn get_env_with_fallback(new_name: &str, old_name: &str) -> Option<String> {
    if let Ok(val) = std::env::var(new_name) {
        return Some(val);
    }
    if let Ok(val) = std::env::var(old_name) {
        tracing::warn!(
            "Environment variable '{}' is deprecated, use '{}' instead",
            old_name,
            new_name
        );
        return Some(val);
    }
    None
}

/// Get an environment variable with fallback and default value
pub fn get_env_with_fallback_or(new_name: &str, old_name: &str, default: &str) -> String {
    get_env_with_fallback(new_name, old_name).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable with fallback, parsing to a specific type
///
/// Returns `default` if neither variable is set or parsing fails.
pub fn get_env_with_fallback_parse<T: std::str::FromStr>(
    new_name: &str,
    old_name: &str,
    default: T,
) -> T {
    get_env_with_fallback(new_name, old_name)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdcConfig {
    /// SQLite URL for the audit log and record store
    pub database_url: String,
    /// Upper bound on waiting for the audit append lock
    pub audit_lock_timeout: Duration,
    /// Compare-and-append retries after a tail conflict
    pub audit_append_retries: u32,
    /// Rows fetched per page by audit queries and verification
    pub audit_query_page_size: u32,
    /// tracing filter directive
    pub log_level: String,
    /// Directory for daily-rolling log files (stderr only when unset)
    pub log_dir: Option<PathBuf>,
}

impl Default for EdcConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            audit_lock_timeout: Duration::from_millis(5000),
            audit_append_retries: 3,
            audit_query_page_size: 256,
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl EdcConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let database_url =
            get_env_with_fallback_or("EDC_DATABASE_URL", "DATABASE_URL", DEFAULT_DATABASE_URL);
        let lock_timeout_ms = get_env_with_fallback_parse(
            "EDC_AUDIT_LOCK_TIMEOUT_MS",
            "AUDIT_LOCK_TIMEOUT_MS",
            5000u64,
        );
        let audit_append_retries =
            get_env_with_fallback_parse("EDC_AUDIT_APPEND_RETRIES", "AUDIT_APPEND_RETRIES", 3u32);
        let audit_query_page_size = get_env_with_fallback_parse(
            "EDC_AUDIT_QUERY_PAGE_SIZE",
            "AUDIT_QUERY_PAGE_SIZE",
            256u32,
        )
        .max(1);
        let log_level = get_env_with_fallback_or("EDC_LOG_LEVEL", "LOG_LEVEL", "info");
        let log_dir = std::env::var("EDC_LOG_DIR")
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        Self {
            database_url,
            audit_lock_timeout: Duration::from_millis(lock_timeout_ms),
            audit_append_retries,
            audit_query_page_size,
            log_level,
            log_dir,
        }
    }

    /// Override the database URL (CLI flag)
    pub fn with_database_url(mut self, database_url: Option<String>) -> Self {
        if let Some(url) = database_url {
            self.database_url = url;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: [&str; 11] = [
        "EDC_DATABASE_URL",
        "DATABASE_URL",
        "EDC_AUDIT_LOCK_TIMEOUT_MS",
        "AUDIT_LOCK_TIMEOUT_MS",
        "EDC_AUDIT_APPEND_RETRIES",
        "AUDIT_APPEND_RETRIES",
        "EDC_AUDIT_QUERY_PAGE_SIZE",
        "AUDIT_QUERY_PAGE_SIZE",
        "EDC_LOG_LEVEL",
        "LOG_LEVEL",
        "EDC_LOG_DIR",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_get_env_with_fallback_new_name() {
        std::env::set_var("TEST_NEW_VAR", "new_value");
        std::env::remove_var("TEST_OLD_VAR");

        let result = get_env_with_fallback("TEST_NEW_VAR", "TEST_OLD_VAR");
        assert_eq!(result, Some("new_value".to_string()));

        std::env::remove_var("TEST_NEW_VAR");
    }

    #[test]
    #[serial]
    fn test_get_env_with_fallback_old_name() {
        std::env::remove_var("TEST_NEW_VAR2");
        std::env::set_var("TEST_OLD_VAR2", "old_value");

        let result = get_env_with_fallback("TEST_NEW_VAR2", "TEST_OLD_VAR2");
        assert_eq!(result, Some("old_value".to_string()));

        std::env::remove_var("TEST_OLD_VAR2");
    }

    #[test]
    #[serial]
    fn test_get_env_with_fallback_new_takes_precedence() {
        std::env::set_var("TEST_NEW_VAR4", "new_value");
        std::env::set_var("TEST_OLD_VAR4", "old_value");

        let result = get_env_with_fallback("TEST_NEW_VAR4", "TEST_OLD_VAR4");
        assert_eq!(result, Some("new_value".to_string()));

        std::env::remove_var("TEST_NEW_VAR4");
        std::env::remove_var("TEST_OLD_VAR4");
    }

    #[test]
    #[serial]
    fn test_get_env_with_fallback_parse_invalid_uses_default() {
        std::env::set_var("TEST_NEW_VAR6", "not-a-number");
        std::env::remove_var("TEST_OLD_VAR6");

        let result: u32 = get_env_with_fallback_parse("TEST_NEW_VAR6", "TEST_OLD_VAR6", 7);
        assert_eq!(result, 7);

        std::env::remove_var("TEST_NEW_VAR6");
    }

    #[test]
    #[serial]
    fn test_edc_config_defaults() {
        clear_env();
        assert_eq!(EdcConfig::from_env(), EdcConfig::default());
    }

    #[test]
    #[serial]
    fn test_edc_config_from_env() {
        clear_env();
        std::env::set_var("EDC_DATABASE_URL", "sqlite::memory:");
        std::env::set_var("AUDIT_LOCK_TIMEOUT_MS", "250");
        std::env::set_var("EDC_AUDIT_APPEND_RETRIES", "0");
        std::env::set_var("EDC_AUDIT_QUERY_PAGE_SIZE", "0");
        std::env::set_var("EDC_LOG_DIR", "/var/log/edc");

        let config = EdcConfig::from_env();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.audit_lock_timeout, Duration::from_millis(250));
        assert_eq!(config.audit_append_retries, 0);
        assert_eq!(config.audit_query_page_size, 1);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/edc")));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_database_url_override() {
        clear_env();
        let config = EdcConfig::from_env().with_database_url(Some("sqlite:/tmp/x.db".to_string()));
        assert_eq!(config.database_url, "sqlite:/tmp/x.db");
        let config = config.with_database_url(None);
        assert_eq!(config.database_url, "sqlite:/tmp/x.db");
    }
}
