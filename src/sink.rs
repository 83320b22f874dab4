//! Output sinks for schemas, records and state snapshots.
//!
//! - **[`SingerSink`]** writes Singer messages, one JSON object per line.
//! - **[`CheckpointSink`]** decorates another sink and also stores every
//!   state snapshot in SQLite.
//! - **[`MemorySink`]** collects everything in memory.
//!
//! Calls are ordered and complete before returning: a returned
//! `persist_state` means the snapshot has been written.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::io::Write;

use crate::checkpoint;
use crate::models::Record;
use crate::schema::conform_record;
use crate::state::State;
use crate::transform::select_fields;

#[async_trait]
pub trait Sink: Send {
    /// Announce a stream's schema. Called once per stream before any record.
    async fn write_schema(
        &mut self,
        stream: &str,
        schema: &Value,
        key_properties: &[String],
        replication_key: Option<&str>,
    ) -> Result<()>;

    async fn write_record(
        &mut self,
        stream: &str,
        record: &Record,
        time_extracted: DateTime<Utc>,
    ) -> Result<()>;

    async fn persist_state(&mut self, state: &State) -> Result<()>;
}

/// Singer message writer.
///
/// Records are projected onto the properties of the schema announced for
/// their stream, which is how field selection reaches the output, and then
/// conformed to that schema.
pub struct SingerSink<W: Write + Send> {
    out: W,
    schemas: HashMap<String, (Value, Vec<String>)>,
}

impl SingerSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> SingerSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            schemas: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, message: &Value) -> Result<()> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> Sink for SingerSink<W> {
    async fn write_schema(
        &mut self,
        stream: &str,
        schema: &Value,
        key_properties: &[String],
        replication_key: Option<&str>,
    ) -> Result<()> {
        let fields = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default();
        self.schemas
            .insert(stream.to_string(), (schema.clone(), fields));

        let mut message = json!({
            "type": "SCHEMA",
            "stream": stream,
            "schema": schema,
            "key_properties": key_properties,
        });
        if let Some(rk) = replication_key {
            message["bookmark_properties"] = json!([rk]);
        }
        self.emit(&message)
    }

    async fn write_record(
        &mut self,
        stream: &str,
        record: &Record,
        time_extracted: DateTime<Utc>,
    ) -> Result<()> {
        let projected = match self.schemas.get(stream) {
            Some((schema, fields)) => conform_record(schema, &select_fields(record, fields))
                .with_context(|| format!("stream '{}': record does not match schema", stream))?,
            None => record.clone(),
        };
        let message = json!({
            "type": "RECORD",
            "stream": stream,
            "record": projected,
            "time_extracted": time_extracted.to_rfc3339_opts(SecondsFormat::Micros, true),
        });
        self.emit(&message)
    }

    async fn persist_state(&mut self, state: &State) -> Result<()> {
        self.emit(&json!({ "type": "STATE", "value": state.to_value() }))
    }
}

/// Stores each snapshot in the SQLite `checkpoints` table, then forwards to
/// the inner sink.
pub struct CheckpointSink<S: Sink> {
    inner: S,
    pool: SqlitePool,
    tap: String,
}

impl<S: Sink> CheckpointSink<S> {
    pub fn new(inner: S, pool: SqlitePool, tap: impl Into<String>) -> Self {
        Self {
            inner,
            pool,
            tap: tap.into(),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: Sink> Sink for CheckpointSink<S> {
    async fn write_schema(
        &mut self,
        stream: &str,
        schema: &Value,
        key_properties: &[String],
        replication_key: Option<&str>,
    ) -> Result<()> {
        self.inner
            .write_schema(stream, schema, key_properties, replication_key)
            .await
    }

    async fn write_record(
        &mut self,
        stream: &str,
        record: &Record,
        time_extracted: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.write_record(stream, record, time_extracted).await
    }

    async fn persist_state(&mut self, state: &State) -> Result<()> {
        checkpoint::save_state(&self.pool, &self.tap, state).await?;
        self.inner.persist_state(state).await
    }
}

/// A schema announcement captured by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct SchemaMessage {
    pub stream: String,
    pub schema: Value,
    pub key_properties: Vec<String>,
    pub replication_key: Option<String>,
}

/// Collects every message in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub schemas: Vec<SchemaMessage>,
    pub records: Vec<(String, Record)>,
    pub states: Vec<State>,
}

impl MemorySink {
    pub fn records_for(&self, stream: &str) -> Vec<&Record> {
        self.records
            .iter()
            .filter(|(s, _)| s == stream)
            .map(|(_, r)| r)
            .collect()
    }

    pub fn last_state(&self) -> Option<&State> {
        self.states.last()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write_schema(
        &mut self,
        stream: &str,
        schema: &Value,
        key_properties: &[String],
        replication_key: Option<&str>,
    ) -> Result<()> {
        self.schemas.push(SchemaMessage {
            stream: stream.to_string(),
            schema: schema.clone(),
            key_properties: key_properties.to_vec(),
            replication_key: replication_key.map(str::to_string),
        });
        Ok(())
    }

    async fn write_record(
        &mut self,
        stream: &str,
        record: &Record,
        _time_extracted: DateTime<Utc>,
    ) -> Result<()> {
        self.records.push((stream.to_string(), record.clone()));
        Ok(())
    }

    async fn persist_state(&mut self, state: &State) -> Result<()> {
        self.states.push(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lines(sink: SingerSink<Vec<u8>>) -> Vec<Value> {
        String::from_utf8(sink.into_inner())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn singer_messages_and_field_projection() {
        let mut sink = SingerSink::new(Vec::new());
        let schema = json!({"type": "object", "properties": {
            "site_url": {"type": ["null", "string"]},
            "date": {"type": ["null", "string"], "format": "date-time"},
            "clicks": {"type": ["null", "integer"]}
        }});
        sink.write_schema(
            "performance_report_date",
            &schema,
            &["site_url".to_string(), "date".to_string()],
            Some("date"),
        )
        .await
        .unwrap();

        let record = json!({"site_url": "s", "date": "2024-01-05", "clicks": 3.0, "ctr": 0.5})
            .as_object()
            .unwrap()
            .clone();
        let ts = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        sink.write_record("performance_report_date", &record, ts)
            .await
            .unwrap();

        let mut state = State::new();
        state.set_bookmark("performance_report_date", "s", "web", "2024-01-05T00:00:00.000000Z");
        sink.persist_state(&state).await.unwrap();

        let messages = lines(sink);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["type"], "SCHEMA");
        assert_eq!(messages[0]["bookmark_properties"], json!(["date"]));
        assert_eq!(messages[1]["type"], "RECORD");
        assert_eq!(
            messages[1]["record"],
            json!({"site_url": "s", "date": "2024-01-05T00:00:00.000000Z", "clicks": 3})
        );
        assert_eq!(messages[1]["time_extracted"], "2024-01-10T12:00:00.000000Z");
        assert_eq!(messages[2]["type"], "STATE");
        assert_eq!(
            messages[2]["value"]["bookmarks"]["performance_report_date"]["s"]["web"],
            "2024-01-05T00:00:00.000000Z"
        );
    }

    #[tokio::test]
    async fn record_failing_schema_is_an_error() {
        let mut sink = SingerSink::new(Vec::new());
        let schema = json!({"properties": {"date": {"type": ["null", "string"], "format": "date-time"}}});
        sink.write_schema("performance_report_date", &schema, &[], Some("date"))
            .await
            .unwrap();

        let record = json!({"date": "soon"}).as_object().unwrap().clone();
        let ts = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        assert!(sink
            .write_record("performance_report_date", &record, ts)
            .await
            .is_err());
        assert_eq!(lines(sink).len(), 1);
    }

    #[tokio::test]
    async fn full_table_schema_has_no_bookmark_properties() {
        let mut sink = SingerSink::new(Vec::new());
        sink.write_schema("sites", &json!({"properties": {}}), &["site_url".to_string()], None)
            .await
            .unwrap();
        let messages = lines(sink);
        assert!(messages[0].get("bookmark_properties").is_none());
    }
}
