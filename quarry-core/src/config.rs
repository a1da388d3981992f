use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, Result};

/// Connection settings.
///
/// Loaded from the environment (and a `.env` file when present) by
/// [`DatabaseConfig::from_env`], or built directly in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite` or `mysql`.
    pub driver: String,
    pub url: String,
    /// Prepended to every table name.
    pub prefix: String,
    /// Enforce foreign keys (SQLite only).
    pub foreign_keys: bool,
    /// Start with the in-memory query log enabled.
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_owned(),
            url: "sqlite::memory:".to_owned(),
            prefix: String::new(),
            foreign_keys: true,
            log_queries: false,
        }
    }
}

impl DatabaseConfig {
    pub fn sqlite(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn mysql(url: impl Into<String>) -> Self {
        Self {
            driver: "mysql".to_owned(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_query_log(mut self) -> Self {
        self.log_queries = true;
        self
    }

    /// Reads `DB_CONNECTION`, `DATABASE_URL`, `DB_PREFIX`, `DB_FOREIGN_KEYS`
    /// and `DB_LOG_QUERIES`, loading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| QuarryError::Config("DATABASE_URL is not set".to_owned()))?;
        let driver = match lookup("DB_CONNECTION") {
            Some(driver) => driver.trim().to_ascii_lowercase(),
            None => driver_from_url(&url)?.to_owned(),
        };
        let defaults = Self::default();
        Ok(Self {
            driver,
            url,
            prefix: lookup("DB_PREFIX").unwrap_or_default(),
            foreign_keys: lookup("DB_FOREIGN_KEYS")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.foreign_keys),
            log_queries: lookup("DB_LOG_QUERIES")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.log_queries),
        })
    }
}

fn driver_from_url(url: &str) -> Result<&'static str> {
    let scheme = url.split(':').next().unwrap_or_default();
    match scheme {
        "sqlite" => Ok("sqlite"),
        "mysql" | "mariadb" => Ok("mysql"),
        other => Err(QuarryError::UnsupportedDriver(other.to_owned())),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn driver_is_inferred_from_url_scheme() {
        let config =
            DatabaseConfig::from_lookup(lookup(&[("DATABASE_URL", "mysql://root@localhost/app")]))
                .unwrap();
        assert_eq!(config.driver, "mysql");
        assert!(config.foreign_keys);
        assert!(!config.log_queries);
    }

    #[test]
    fn explicit_connection_and_flags_win() {
        let config = DatabaseConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite://app.db"),
            ("DB_CONNECTION", "SQLite"),
            ("DB_PREFIX", "app_"),
            ("DB_FOREIGN_KEYS", "off"),
            ("DB_LOG_QUERIES", "1"),
        ]))
        .unwrap();
        assert_eq!(config.driver, "sqlite");
        assert_eq!(config.prefix, "app_");
        assert!(!config.foreign_keys);
        assert!(config.log_queries);
    }

    #[test]
    fn missing_url_is_a_config_error() {
        let err = DatabaseConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, QuarryError::Config(_)));
    }

    #[test]
    fn unknown_scheme_is_unsupported() {
        let err = DatabaseConfig::from_lookup(lookup(&[("DATABASE_URL", "oracle://x")])).unwrap_err();
        assert!(matches!(err, QuarryError::UnsupportedDriver(name) if name == "oracle"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: DatabaseConfig = serde_json::from_str(r#"{"prefix":"t_"}"#).unwrap();
        assert_eq!(config.driver, "sqlite");
        assert_eq!(config.prefix, "t_");
    }
}
