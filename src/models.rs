//! Core data types shared by the extraction pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};

use crate::config::Config;

/// A flat output record: snake_case field names to JSON values.
pub type Record = Map<String, Value>;

/// Source of "now" for window planning and extraction timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a single instant, for deterministic runs.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Engine settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub sites: Vec<String>,
    /// Default watermark when no bookmark exists yet.
    pub start_date: DateTime<Utc>,
    pub attribution_days: i64,
    pub window_size_days: i64,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            sites: config.sync.sites(),
            start_date: config.sync.start_datetime()?,
            attribution_days: config.sync.attribution_days,
            window_size_days: config.sync.date_window_size,
        })
    }
}
