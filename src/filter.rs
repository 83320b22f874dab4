//! Record filter and bookmark advancer.
//!
//! Every transformed record first has its primary key validated (a missing
//! key aborts the stream). Incremental records are then admitted when their
//! replication value is at or after the floor captured when the window
//! started, while the running maximum follows every value seen.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::TapError;
use crate::models::Record;
use crate::state::{format_bookmark, parse_datetime};

/// Fail unless every key field is present, non-null and non-empty.
pub fn validate_primary_key(stream: &str, record: &Record, keys: &[String]) -> Result<(), TapError> {
    let missing: Vec<String> = keys
        .iter()
        .filter(|k| match record.get(k.as_str()) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        })
        .cloned()
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    let present: Map<String, Value> = keys
        .iter()
        .filter(|k| !missing.contains(k))
        .filter_map(|k| record.get(k.as_str()).map(|v| (k.clone(), v.clone())))
        .collect();

    Err(TapError::MissingPrimaryKey {
        stream: stream.to_string(),
        missing,
        present: Value::Object(present),
    })
}

/// Parse a record's replication value.
pub fn replication_value(
    stream: &str,
    record: &Record,
    field: &str,
) -> Result<DateTime<Utc>, TapError> {
    let invalid = |value: String| TapError::InvalidReplicationValue {
        stream: stream.to_string(),
        field: field.to_string(),
        value,
    };
    match record.get(field) {
        Some(Value::String(s)) => parse_datetime(s).map_err(|_| invalid(format!("'{}'", s))),
        Some(other) => Err(invalid(other.to_string())),
        None => Err(invalid("<absent>".to_string())),
    }
}

/// Admission rule: `(value >= floor, max(running_max, value))`.
pub fn admit(
    value: DateTime<Utc>,
    running_max: DateTime<Utc>,
    floor: DateTime<Utc>,
) -> (bool, DateTime<Utc>) {
    (value >= floor, running_max.max(value))
}

/// Per-(stream, site, sub-type) admission state for one window.
#[derive(Debug, Clone)]
pub struct BookmarkTracker {
    floor: DateTime<Utc>,
    running_max: DateTime<Utc>,
}

impl BookmarkTracker {
    /// Start from the stored watermark, which is both the admission floor and
    /// the initial running maximum.
    pub fn new(watermark: DateTime<Utc>) -> Self {
        Self {
            floor: watermark,
            running_max: watermark,
        }
    }

    /// Validate and admit one page of records, returning those to emit in
    /// arrival order.
    pub fn filter_page(
        &mut self,
        stream: &str,
        keys: &[String],
        replication_key: &str,
        records: Vec<Record>,
    ) -> Result<Vec<Record>> {
        let mut admitted = Vec::with_capacity(records.len());
        for record in records {
            validate_primary_key(stream, &record, keys)?;
            let value = replication_value(stream, &record, replication_key)?;
            let (ok, running_max) = admit(value, self.running_max, self.floor);
            self.running_max = running_max;
            if ok {
                admitted.push(record);
            }
        }
        Ok(admitted)
    }

    pub fn running_max(&self) -> DateTime<Utc> {
        self.running_max
    }

    /// The running maximum in bookmark format.
    pub fn bookmark(&self) -> String {
        format_bookmark(self.running_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_key_reports_what_was_present() {
        let record = rec(json!({"site_url": "s", "search_type": "", "clicks": 1}));
        let err = validate_primary_key(
            "performance_report_date",
            &record,
            &keys(&["site_url", "search_type", "date"]),
        )
        .unwrap_err();
        match err {
            TapError::MissingPrimaryKey {
                stream,
                missing,
                present,
            } => {
                assert_eq!(stream, "performance_report_date");
                assert_eq!(missing, vec!["search_type", "date"]);
                assert_eq!(present, json!({"site_url": "s"}));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn null_key_is_missing() {
        let record = rec(json!({"site_url": null}));
        assert!(validate_primary_key("sites", &record, &keys(&["site_url"])).is_err());
        let record = rec(json!({"site_url": "https://example.com/"}));
        assert!(validate_primary_key("sites", &record, &keys(&["site_url"])).is_ok());
    }

    #[test]
    fn admission_is_inclusive_and_max_never_regresses() {
        let floor = parse_datetime("2024-01-05").unwrap();
        let (ok, max) = admit(floor, floor, floor);
        assert!(ok);
        assert_eq!(max, floor);

        let below = parse_datetime("2024-01-04").unwrap();
        let (ok, max) = admit(below, floor, floor);
        assert!(!ok);
        assert_eq!(max, floor);

        let above = parse_datetime("2024-01-08").unwrap();
        let (ok, max) = admit(above, floor, floor);
        assert!(ok);
        assert_eq!(max, above);
    }

    #[test]
    fn tracker_filters_against_window_floor() {
        let mut tracker = BookmarkTracker::new(parse_datetime("2024-01-05").unwrap());
        let k = keys(&["site_url", "date"]);
        let page = vec![
            rec(json!({"site_url": "s", "date": "2024-01-07"})),
            rec(json!({"site_url": "s", "date": "2024-01-04"})),
            rec(json!({"site_url": "s", "date": "2024-01-05"})),
        ];
        let out = tracker.filter_page("r", &k, "date", page).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["date"], "2024-01-07");
        assert_eq!(out[1]["date"], "2024-01-05");
        assert_eq!(tracker.bookmark(), "2024-01-07T00:00:00.000000Z");

        // A later page below the running max but above the floor still passes.
        let page = vec![rec(json!({"site_url": "s", "date": "2024-01-06"}))];
        let out = tracker.filter_page("r", &k, "date", page).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(tracker.bookmark(), "2024-01-07T00:00:00.000000Z");
    }

    #[test]
    fn unparseable_replication_value_is_fatal() {
        let mut tracker = BookmarkTracker::new(parse_datetime("2024-01-05").unwrap());
        let page = vec![rec(json!({"site_url": "s", "date": "soon"}))];
        let err = tracker
            .filter_page("r", &keys(&["site_url"]), "date", page)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TapError>(),
            Some(TapError::InvalidReplicationValue { .. })
        ));
    }
}
