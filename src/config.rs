use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::state::parse_datetime;
use crate::window::MAX_SPAN_DAYS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    pub sync: SyncConfig,
    #[serde(default)]
    pub state: Option<StateConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Comma-separated site identifiers (URL prefixes or `sc-domain:` properties).
    pub site_urls: String,
    pub start_date: String,
    #[serde(default = "default_attribution_days")]
    pub attribution_days: i64,
    #[serde(default = "default_date_window_size")]
    pub date_window_size: i64,
    #[serde(default)]
    pub request_timeout: Option<f64>,
}

fn default_attribution_days() -> i64 {
    4
}
fn default_date_window_size() -> i64 {
    30
}

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    pub db_path: PathBuf,
}

impl SyncConfig {
    /// Configured sites in order, whitespace stripped, empty entries dropped.
    pub fn sites(&self) -> Vec<String> {
        self.site_urls
            .split(',')
            .map(|s| s.chars().filter(|c| !c.is_whitespace()).collect::<String>())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn start_datetime(&self) -> Result<DateTime<Utc>> {
        parse_datetime(&self.start_date)
            .with_context(|| format!("sync.start_date is not a valid date: '{}'", self.start_date))
    }

    /// Request timeout; missing, zero or negative values fall back to 300s.
    pub fn request_timeout(&self) -> Duration {
        match self.request_timeout {
            Some(secs) if secs > 0.0 && secs.is_finite() => Duration::from_secs_f64(secs),
            _ => Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl AuthConfig {
    /// Resolve a credential from config, falling back to an environment variable.
    pub fn resolve(value: &Option<String>, env_key: &str) -> Result<String> {
        match value {
            Some(v) if !v.is_empty() => Ok(v.clone()),
            _ => std::env::var(env_key).with_context(|| {
                format!("credential missing: set it in [auth] or the {env_key} environment variable")
            }),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.sync.sites().is_empty() {
        anyhow::bail!("sync.site_urls must name at least one site");
    }

    config.sync.start_datetime()?;

    if !(0..=MAX_SPAN_DAYS).contains(&config.sync.attribution_days) {
        anyhow::bail!("sync.attribution_days must be between 0 and {MAX_SPAN_DAYS}");
    }

    if !(1..=MAX_SPAN_DAYS).contains(&config.sync.date_window_size) {
        anyhow::bail!("sync.date_window_size must be between 1 and {MAX_SPAN_DAYS}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn defaults_applied() {
        let cfg = parse(
            r#"
[sync]
site_urls = "https://example.com"
start_date = "2024-01-01"
"#,
        )
        .unwrap();
        assert_eq!(cfg.sync.attribution_days, 4);
        assert_eq!(cfg.sync.date_window_size, 30);
        assert_eq!(cfg.sync.request_timeout(), Duration::from_secs(300));
        assert!(cfg.state.is_none());
    }

    #[test]
    fn sites_split_and_trimmed() {
        let cfg = parse(
            r#"
[sync]
site_urls = "https://example.com, sc-domain:example.com ,,http://www.example.com"
start_date = "2024-01-01T00:00:00Z"
"#,
        )
        .unwrap();
        assert_eq!(
            cfg.sync.sites(),
            vec![
                "https://example.com",
                "sc-domain:example.com",
                "http://www.example.com"
            ]
        );
    }

    #[test]
    fn request_timeout_zero_uses_default() {
        let cfg = parse(
            r#"
[sync]
site_urls = "https://example.com"
start_date = "2024-01-01"
request_timeout = 0
"#,
        )
        .unwrap();
        assert_eq!(cfg.sync.request_timeout(), Duration::from_secs(300));

        let cfg = parse(
            r#"
[sync]
site_urls = "https://example.com"
start_date = "2024-01-01"
request_timeout = 100.5
"#,
        )
        .unwrap();
        assert_eq!(cfg.sync.request_timeout(), Duration::from_secs_f64(100.5));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(
            r#"
[sync]
site_urls = " , "
start_date = "2024-01-01"
"#
        )
        .is_err());
        assert!(parse(
            r#"
[sync]
site_urls = "https://example.com"
start_date = "yesterday"
"#
        )
        .is_err());
        assert!(parse(
            r#"
[sync]
site_urls = "https://example.com"
start_date = "2024-01-01"
date_window_size = 0
"#
        )
        .is_err());
    }

    #[test]
    fn rejects_oversized_spans() {
        let err = parse(
            r#"
[sync]
site_urls = "https://example.com"
start_date = "2024-01-01"
date_window_size = 1000000000
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("date_window_size"), "{}", err);

        let err = parse(
            r#"
[sync]
site_urls = "https://example.com"
start_date = "2024-01-01"
attribution_days = 1000000000
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("attribution_days"), "{}", err);

        let cfg = parse(
            r#"
[sync]
site_urls = "https://example.com"
start_date = "2024-01-01"
attribution_days = 3650
date_window_size = 3650
"#,
        )
        .unwrap();
        assert_eq!(cfg.sync.date_window_size, MAX_SPAN_DAYS);
    }
}
