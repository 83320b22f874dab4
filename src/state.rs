//! Persisted state snapshot and the watermark store built on it.
//!
//! The snapshot layout is a hard external contract:
//!
//! ```json
//! {"currently_syncing": "performance_report_date",
//!  "bookmarks": {"<stream>": {"<site>": {"<sub_type>": "2024-01-05T00:00:00.000000Z"}}}}
//! ```
//!
//! Reads are tolerant of any missing or malformed level. Every write is
//! followed by a whole-snapshot flush through the [`Sink`].

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::sink::Sink;

const BOOKMARKS: &str = "bookmarks";
const CURRENTLY_SYNCING: &str = "currently_syncing";

/// Format used for bookmark values.
pub const BOOKMARK_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// The full state snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State(Map<String, Value>);

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a parsed JSON document; anything but an object becomes empty state.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => State(map),
            _ => State::default(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(State::default());
        }
        Ok(State::from_value(serde_json::from_str(text)?))
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn currently_syncing(&self) -> Option<&str> {
        self.0.get(CURRENTLY_SYNCING).and_then(Value::as_str)
    }

    pub fn set_currently_syncing(&mut self, stream: Option<&str>) {
        let value = match stream {
            Some(s) => Value::String(s.to_string()),
            None => Value::Null,
        };
        self.0.insert(CURRENTLY_SYNCING.to_string(), value);
    }

    pub fn bookmark(&self, stream: &str, site: &str, sub_type: &str) -> Option<&str> {
        self.0
            .get(BOOKMARKS)?
            .get(stream)?
            .get(site)?
            .get(sub_type)?
            .as_str()
    }

    /// Write a bookmark, creating (or replacing non-object) intermediate levels.
    pub fn set_bookmark(&mut self, stream: &str, site: &str, sub_type: &str, value: &str) {
        let bookmarks = object_entry(&mut self.0, BOOKMARKS);
        let sites = object_entry(bookmarks, stream);
        let sub_types = object_entry(sites, site);
        sub_types.insert(sub_type.to_string(), Value::String(value.to_string()));
    }
}

fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let slot = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(inner) => inner,
        _ => unreachable!("slot was just made an object"),
    }
}

/// Keyed access to per-(stream, site, sub-type) watermarks.
///
/// Owns the state snapshot for the whole run; the orchestrator is its only
/// writer.
#[derive(Debug, Default)]
pub struct WatermarkStore {
    state: State,
}

impl WatermarkStore {
    pub fn new(state: State) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn into_state(self) -> State {
        self.state
    }

    /// Stored watermark, or `default` when any level is absent.
    pub fn get(&self, stream: &str, site: &str, sub_type: &str, default: &str) -> String {
        self.state
            .bookmark(stream, site, sub_type)
            .unwrap_or(default)
            .to_string()
    }

    /// Store a watermark and flush the whole snapshot.
    pub async fn set(
        &mut self,
        sink: &mut dyn Sink,
        stream: &str,
        site: &str,
        sub_type: &str,
        value: &str,
    ) -> Result<()> {
        self.state.set_bookmark(stream, site, sub_type, value);
        sink.persist_state(&self.state).await
    }

    /// Record which stream is mid-flight and flush the snapshot.
    pub async fn set_currently_syncing(
        &mut self,
        sink: &mut dyn Sink,
        stream: Option<&str>,
    ) -> Result<()> {
        self.state.set_currently_syncing(stream);
        sink.persist_state(&self.state).await
    }
}

/// Parse a bookmark or record date: RFC 3339, `YYYY-MM-DDTHH:MM:SS[.f]Z`,
/// or a bare `YYYY-MM-DD` taken as midnight UTC.
pub fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.fZ") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    bail!("unrecognised date-time value: '{}'", value)
}

pub fn format_bookmark(value: DateTime<Utc>) -> String {
    value.format(BOOKMARK_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use serde_json::json;

    #[test]
    fn get_defaults_on_any_missing_level() {
        let store = WatermarkStore::new(State::new());
        assert_eq!(store.get("s", "site", "web", "2024-01-01"), "2024-01-01");

        let state = State::from_value(json!({"bookmarks": {"s": {"site": "not-an-object"}}}));
        let store = WatermarkStore::new(state);
        assert_eq!(store.get("s", "site", "web", "d"), "d");

        let state = State::from_value(json!({"bookmarks": {"s": {"site": {"image": "x"}}}}));
        let store = WatermarkStore::new(state);
        assert_eq!(store.get("s", "site", "web", "d"), "d");
        assert_eq!(store.get("s", "site", "image", "d"), "x");
        assert_eq!(store.get("other", "site", "image", "d"), "d");
    }

    #[tokio::test]
    async fn set_creates_levels_and_flushes_whole_snapshot() {
        let mut sink = MemorySink::default();
        let mut store = WatermarkStore::new(State::from_value(json!({"currently_syncing": "a"})));

        store
            .set(&mut sink, "a", "https://example.com", "web", "2024-01-05T00:00:00.000000Z")
            .await
            .unwrap();
        store
            .set(&mut sink, "b", "https://example.com", "image", "2024-01-06T00:00:00.000000Z")
            .await
            .unwrap();

        assert_eq!(sink.states.len(), 2);
        let last = sink.states.last().unwrap().to_value();
        assert_eq!(
            last,
            json!({
                "currently_syncing": "a",
                "bookmarks": {
                    "a": {"https://example.com": {"web": "2024-01-05T00:00:00.000000Z"}},
                    "b": {"https://example.com": {"image": "2024-01-06T00:00:00.000000Z"}}
                }
            })
        );
    }

    #[tokio::test]
    async fn running_max_writes_are_non_decreasing() {
        let mut sink = MemorySink::default();
        let mut store = WatermarkStore::new(State::new());
        let mut running = parse_datetime("2024-01-01").unwrap();

        for v in ["2024-01-03", "2024-01-02", "2024-01-07", "2024-01-05"] {
            running = running.max(parse_datetime(v).unwrap());
            store
                .set(&mut sink, "s", "site", "web", &format_bookmark(running))
                .await
                .unwrap();
        }

        let stored: Vec<_> = sink
            .states
            .iter()
            .map(|s| parse_datetime(s.bookmark("s", "site", "web").unwrap()).unwrap())
            .collect();
        assert!(stored.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(format_bookmark(*stored.last().unwrap()), "2024-01-07T00:00:00.000000Z");
    }

    #[test]
    fn parses_bookmark_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        for v in [
            "2024-01-05",
            "2024-01-05T00:00:00Z",
            "2024-01-05T00:00:00.000000Z",
            "2024-01-05T00:00:00+00:00",
        ] {
            assert_eq!(parse_datetime(v).unwrap(), expected, "{}", v);
        }
        assert!(parse_datetime("05/01/2024").is_err());
        assert_eq!(format_bookmark(expected), "2024-01-05T00:00:00.000000Z");
    }

    #[test]
    fn currently_syncing_round_trip() {
        let mut state = State::parse("").unwrap();
        assert_eq!(state.currently_syncing(), None);
        state.set_currently_syncing(Some("sites"));
        assert_eq!(state.currently_syncing(), Some("sites"));
        state.set_currently_syncing(None);
        assert_eq!(state.to_value()["currently_syncing"], Value::Null);
    }
}
