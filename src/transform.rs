//! Transform engine: raw API pages into flat output records.
//!
//! Pure functions only. Every mapping key in the page is rewritten from
//! camelCase to snake_case, then the stream-specific shaping runs:
//!
//! - report rows have their `keys` array zipped against the requested
//!   dimension list into named fields, get `site_url` and `search_type`,
//!   and (for the dynamic-dimension stream) a `dimensions_hash_key`;
//! - sitemaps and sites get `site_url`.

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::models::Record;
use crate::streams::{StreamDescriptor, StreamKind};

fn word_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("static regex"))
}

fn lower_upper_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").expect("static regex"))
}

/// Convert a camelCase (or PascalCase) identifier to snake_case.
///
/// `isSitemapsIndex` -> `is_sitemaps_index`, `TestCamelCase` -> `test_camel_case`.
pub fn to_snake_case(name: &str) -> String {
    let first = word_boundary().replace_all(name, "${1}_${2}");
    lower_upper_boundary()
        .replace_all(&first, "${1}_${2}")
        .to_lowercase()
}

/// Recursively rewrite every object key to snake_case, returning a new value.
pub fn convert_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (to_snake_case(k), convert_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(convert_keys).collect()),
        other => other.clone(),
    }
}

/// Stable content hash over an ordered list of dimension values.
///
/// Each value is rendered as JSON and the renderings are joined with the
/// ASCII unit separator before hashing with SHA-256.
pub fn dimensions_hash(values: &[Value]) -> String {
    let joined = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\u{1f}");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

/// Turn one raw page into output records.
///
/// `dimensions` must be the dimension list actually sent in the request,
/// since the API returns `keys` in that order. A missing records path yields
/// no records.
pub fn transform_page(
    page: &Value,
    stream: &StreamDescriptor,
    site: &str,
    sub_type: &str,
    dimensions: &[String],
) -> Vec<Record> {
    let converted = convert_keys(page);

    let rows: Vec<Record> = match stream.records_path {
        Some(path) => match converted.get(path) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect(),
            Some(Value::Object(obj)) => vec![obj.clone()],
            _ => Vec::new(),
        },
        None => match converted {
            Value::Object(obj) if !obj.is_empty() => vec![obj],
            _ => Vec::new(),
        },
    };

    match stream.kind {
        StreamKind::FullTable => rows
            .into_iter()
            .map(|mut row| {
                row.insert("site_url".into(), Value::String(site.to_string()));
                row
            })
            .collect(),
        StreamKind::IncrementalFixed | StreamKind::IncrementalDynamic => rows
            .into_iter()
            .map(|row| denest_row(row, stream.kind, site, sub_type, dimensions))
            .collect(),
    }
}

fn denest_row(
    mut row: Record,
    kind: StreamKind,
    site: &str,
    sub_type: &str,
    dimensions: &[String],
) -> Record {
    if let Some(Value::Array(keys)) = row.remove("keys") {
        if kind == StreamKind::IncrementalDynamic {
            row.insert(
                "dimensions_hash_key".into(),
                Value::String(dimensions_hash(&keys)),
            );
        }
        for (dimension, value) in dimensions.iter().zip(keys) {
            row.insert(dimension.clone(), value);
        }
    }
    row.insert("site_url".into(), Value::String(site.to_string()));
    row.insert("search_type".into(), Value::String(sub_type.to_string()));
    row
}

/// Project a record onto a set of fields, dropping everything else.
pub fn select_fields(record: &Record, fields: &[String]) -> Record {
    let mut out = Map::new();
    for field in fields {
        if let Some(v) = record.get(field) {
            out.insert(field.clone(), v.clone());
        }
    }
    out
}
