//! Singer catalog: discovery output, field selection and stream ordering.
//!
//! The catalog is the contract between `discover` and `sync`. Discovery
//! emits every stream with its schema and breadcrumb metadata; the operator
//! marks streams and fields as selected and hands the catalog back to `sync`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::schema::{metadata_for, schema_for};
use crate::streams::STREAMS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub tap_stream_id: String,
    #[serde(default)]
    pub stream: String,
    pub schema: Value,
    #[serde(default)]
    pub key_properties: Vec<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub breadcrumb: Vec<String>,
    pub metadata: Map<String, Value>,
}

/// What the engine needs to know about one selected stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSelection {
    /// Selected output fields, in schema order.
    pub fields: Vec<String>,
    pub key_properties: Vec<String>,
    pub replication_key: Option<String>,
}

impl Catalog {
    /// Catalog for every known stream, nothing selected.
    pub fn discover() -> Self {
        let streams = STREAMS
            .iter()
            .map(|stream| {
                let schema = schema_for(stream);
                let metadata = metadata_for(stream, &schema)
                    .into_iter()
                    .filter_map(|m| serde_json::from_value(m).ok())
                    .collect();
                CatalogEntry {
                    tap_stream_id: stream.id.to_string(),
                    stream: stream.id.to_string(),
                    schema,
                    key_properties: stream.key_properties.iter().map(|k| k.to_string()).collect(),
                    metadata,
                }
            })
            .collect();
        Catalog { streams }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse catalog file: {}", path.display()))
    }

    /// Mark every stream selected at the root breadcrumb.
    pub fn select_all(mut self) -> Self {
        for entry in &mut self.streams {
            entry.set_selected(true);
        }
        self
    }

    /// Selected streams in catalog order, rotated so that an interrupted
    /// stream resumes first, followed by the streams after it and then the
    /// streams before it.
    pub fn selected_streams(&self, currently_syncing: Option<&str>) -> Vec<&CatalogEntry> {
        let selected: Vec<&CatalogEntry> =
            self.streams.iter().filter(|e| e.is_selected()).collect();

        let resume_at = currently_syncing
            .and_then(|id| selected.iter().position(|e| e.tap_stream_id == id));

        match resume_at {
            Some(idx) => selected[idx..]
                .iter()
                .chain(selected[..idx].iter())
                .copied()
                .collect(),
            None => selected,
        }
    }
}

impl CatalogEntry {
    fn root_metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata
            .iter()
            .find(|m| m.breadcrumb.is_empty())
            .map(|m| &m.metadata)
    }

    fn property_metadata(&self, field: &str) -> Option<&Map<String, Value>> {
        self.metadata
            .iter()
            .find(|m| m.breadcrumb.len() == 2 && m.breadcrumb[0] == "properties" && m.breadcrumb[1] == field)
            .map(|m| &m.metadata)
    }

    pub fn set_selected(&mut self, selected: bool) {
        match self.metadata.iter_mut().find(|m| m.breadcrumb.is_empty()) {
            Some(root) => {
                root.metadata.insert("selected".into(), Value::Bool(selected));
            }
            None => {
                let mut metadata = Map::new();
                metadata.insert("selected".into(), Value::Bool(selected));
                self.metadata.insert(
                    0,
                    MetadataEntry {
                        breadcrumb: Vec::new(),
                        metadata,
                    },
                );
            }
        }
    }

    pub fn is_selected(&self) -> bool {
        self.root_metadata()
            .and_then(|m| m.get("selected"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_field_selected(&self, field: &str) -> bool {
        let Some(meta) = self.property_metadata(field) else {
            return true;
        };
        if meta.get("inclusion").and_then(Value::as_str) == Some("automatic") {
            return true;
        }
        if meta.get("inclusion").and_then(Value::as_str) == Some("unsupported") {
            return false;
        }
        match meta.get("selected").and_then(Value::as_bool) {
            Some(selected) => selected,
            None => meta
                .get("selected-by-default")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    pub fn replication_key(&self) -> Option<String> {
        self.root_metadata()
            .and_then(|m| m.get("replication-key"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn selection(&self) -> StreamSelection {
        let fields = self
            .schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .keys()
                    .filter(|name| self.is_field_selected(name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let key_properties = match self
            .root_metadata()
            .and_then(|m| m.get("table-key-properties"))
            .and_then(Value::as_array)
        {
            Some(keys) => keys
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => self.key_properties.clone(),
        };

        StreamSelection {
            fields,
            key_properties,
            replication_key: self.replication_key(),
        }
    }

    /// The schema restricted to the selected properties.
    pub fn selected_schema(&self) -> Value {
        let mut schema = self.schema.clone();
        if let Some(props) = schema.get_mut("properties").and_then(Value::as_object_mut) {
            props.retain(|name, _| self.is_field_selected(name));
        }
        schema
    }
}
