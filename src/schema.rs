//! JSON schemas and discovery metadata for each stream.

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Number, Value};

use crate::models::Record;
use crate::state::{format_bookmark, parse_datetime};
use crate::streams::{StreamDescriptor, StreamKind};

fn nullable(types: &[&str]) -> Value {
    let mut all = vec!["null"];
    all.extend_from_slice(types);
    json!({ "type": all })
}

fn date_time() -> Value {
    json!({ "type": ["null", "string"], "format": "date-time" })
}

fn object(properties: Map<String, Value>) -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": properties,
    })
}

fn report_metrics(props: &mut Map<String, Value>) {
    props.insert("clicks".into(), nullable(&["integer"]));
    props.insert("impressions".into(), nullable(&["integer"]));
    props.insert("ctr".into(), nullable(&["number"]));
    props.insert("position".into(), nullable(&["number"]));
}

/// Build the JSON schema for a stream.
pub fn schema_for(stream: &StreamDescriptor) -> Value {
    let mut props = Map::new();
    props.insert("site_url".into(), nullable(&["string"]));

    match stream.id {
        "sites" => {
            props.insert("permission_level".into(), nullable(&["string"]));
        }
        "sitemaps" => {
            props.insert("path".into(), nullable(&["string"]));
            props.insert("last_submitted".into(), date_time());
            props.insert("is_pending".into(), nullable(&["boolean"]));
            props.insert("is_sitemaps_index".into(), nullable(&["boolean"]));
            props.insert("type".into(), nullable(&["string"]));
            props.insert("last_downloaded".into(), date_time());
            props.insert("warnings".into(), nullable(&["integer", "string"]));
            props.insert("errors".into(), nullable(&["integer", "string"]));
            props.insert(
                "contents".into(),
                json!({
                    "type": ["null", "array"],
                    "items": {
                        "type": ["null", "object"],
                        "additionalProperties": false,
                        "properties": {
                            "type": { "type": ["null", "string"] },
                            "submitted": { "type": ["null", "integer", "string"] },
                            "indexed": { "type": ["null", "integer", "string"] }
                        }
                    }
                }),
            );
        }
        _ => {
            props.insert("search_type".into(), nullable(&["string"]));
            props.insert("date".into(), date_time());
            for dim in stream.dimensions.iter().filter(|d| **d != "date") {
                props.insert((*dim).into(), nullable(&["string"]));
            }
            if stream.kind == StreamKind::IncrementalDynamic {
                props.insert("dimensions_hash_key".into(), nullable(&["string"]));
            }
            report_metrics(&mut props);
        }
    }

    object(props)
}

/// Discovery metadata in Singer's breadcrumb form.
///
/// Key properties and the replication key are `automatic`; every other
/// property is `available` and selected by default.
pub fn metadata_for(stream: &StreamDescriptor, schema: &Value) -> Vec<Value> {
    let mut root = json!({
        "table-key-properties": stream.key_properties,
        "forced-replication-method": stream.kind.replication_method(),
    });
    if let Some(rk) = stream.replication_key {
        root["valid-replication-keys"] = json!([rk]);
        root["replication-key"] = json!(rk);
    }

    let mut entries = vec![json!({ "breadcrumb": [], "metadata": root })];

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for name in props.keys() {
            let automatic = stream.key_properties.contains(&name.as_str())
                || stream.replication_key == Some(name.as_str());
            entries.push(json!({
                "breadcrumb": ["properties", name],
                "metadata": {
                    "inclusion": if automatic { "automatic" } else { "available" },
                    "selected-by-default": true,
                }
            }));
        }
    }

    entries
}

/// Conform a record to its schema: date-time strings are rewritten in the
/// bookmark format and scalars are coerced to the first declared type that
/// accepts them. Properties the schema does not describe pass through.
pub fn conform_record(schema: &Value, record: &Record) -> Result<Record> {
    let props = schema.get("properties").and_then(Value::as_object);
    let mut out = Map::new();
    for (name, value) in record {
        let conformed = match props.and_then(|p| p.get(name)) {
            Some(prop) => conform_value(prop, value)
                .with_context(|| format!("field '{}' does not match its schema", name))?,
            None => value.clone(),
        };
        out.insert(name.clone(), conformed);
    }
    Ok(out)
}

fn declared_types(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn conform_value(schema: &Value, value: &Value) -> Result<Value> {
    let types = declared_types(schema);
    if types.is_empty() {
        return Ok(value.clone());
    }
    if value.is_null() {
        if types.contains(&"null") {
            return Ok(Value::Null);
        }
        bail!("null is not allowed");
    }

    for ty in types.iter().filter(|t| **t != "null") {
        let converted = match *ty {
            "string" => as_string(schema, value)?,
            "integer" => as_integer(value),
            "number" => as_number(value),
            "boolean" => as_boolean(value),
            "object" => match value {
                Value::Object(map) => Some(Value::Object(conform_record(schema, map)?)),
                _ => None,
            },
            "array" => match (value, schema.get("items")) {
                (Value::Array(items), Some(item_schema)) => Some(Value::Array(
                    items
                        .iter()
                        .map(|item| conform_value(item_schema, item))
                        .collect::<Result<_>>()?,
                )),
                (Value::Array(_), None) => Some(value.clone()),
                _ => None,
            },
            _ => None,
        };
        if let Some(v) = converted {
            return Ok(v);
        }
    }
    bail!("{} is not one of {:?}", value, types)
}

fn as_string(schema: &Value, value: &Value) -> Result<Option<Value>> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return Ok(None),
    };
    if schema.get("format").and_then(Value::as_str) == Some("date-time") {
        return Ok(Some(Value::String(format_bookmark(parse_datetime(&text)?))));
    }
    Ok(Some(Value::String(text)))
}

fn as_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| Value::from(f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

fn as_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
        _ => None,
    }
}
