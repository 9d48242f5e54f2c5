//! Embedded JSON templates for data points and dataset metadata.
//!
//! Templates ship inside the binary and are validated once when loaded, so
//! a malformed template fails at startup rather than mid-upload.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{Result, SeedError};

/// Bumped whenever an embedded template changes shape.
pub const TEMPLATE_VERSION: u32 = 2;

const CBG_JSON: &str = include_str!("../data/cbg.json");
const SMBG_JSON: &str = include_str!("../data/smbg.json");
const DATASET_JSON: &str = include_str!("../data/dataset.json");
const RECORDED_DATASET_JSON: &str = include_str!("../data/recorded_dataset.json");

fn parse_object(name: &str, raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SeedError::Template(format!("{} template is not a JSON object", name))),
        Err(e) => Err(SeedError::Template(format!("{} template: {}", name, e))),
    }
}

/// A reading template; every generated point is a copy with `time` and
/// `value` overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPointTemplate {
    fields: Map<String, Value>,
}

impl DataPointTemplate {
    pub fn from_map(name: &str, fields: Map<String, Value>) -> Result<Self> {
        match fields.get("type") {
            Some(Value::String(t)) if !t.is_empty() => {}
            _ => return Err(SeedError::Template(format!("{} template needs a non-empty \"type\"", name))),
        }
        if !fields.contains_key("units") {
            return Err(SeedError::Template(format!("{} template needs \"units\"", name)));
        }
        Ok(Self { fields })
    }

    pub fn parse(name: &str, raw: &str) -> Result<Self> {
        Self::from_map(name, parse_object(name, raw)?)
    }

    pub fn kind(&self) -> &str {
        self.fields.get("type").and_then(Value::as_str).unwrap_or_default()
    }

    /// Copy of the template with the reading's time and value.
    pub fn instantiate(&self, time: DateTime<Utc>, value: f64) -> Value {
        let mut point = self.fields.clone();
        point.insert(
            "time".to_string(),
            Value::String(time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        point.insert("value".to_string(), serde_json::json!(value));
        Value::Object(point)
    }
}

/// Metadata sent when a dataset is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetTemplate {
    fields: Map<String, Value>,
}

impl DatasetTemplate {
    pub fn from_map(fields: Map<String, Value>) -> Result<Self> {
        if fields.get("type").and_then(Value::as_str) != Some("upload") {
            return Err(SeedError::Template("dataset template must have \"type\": \"upload\"".into()));
        }
        Ok(Self { fields })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Self::from_map(parse_object("dataset", raw)?)
    }

    /// Fill the per-session fields: blob id (only when `client.private`
    /// exists), local `computerTime`, UTC `time`, and `deviceTime` mirrored
    /// from `computerTime` when the template carries one.
    pub fn stamp(&self, blob_id: &str, computer_time: NaiveDateTime, time: DateTime<Utc>) -> Value {
        let mut meta = self.fields.clone();
        if let Some(private) = meta
            .get_mut("client")
            .and_then(|c| c.get_mut("private"))
            .and_then(Value::as_object_mut)
        {
            private.insert("blobId".to_string(), Value::String(blob_id.to_string()));
        }
        let computer = computer_time.format("%Y-%m-%dT%H:%M:%S").to_string();
        if meta.contains_key("deviceTime") {
            meta.insert("deviceTime".to_string(), Value::String(computer.clone()));
        }
        meta.insert("computerTime".to_string(), Value::String(computer));
        meta.insert(
            "time".to_string(),
            Value::String(time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Value::Object(meta)
    }
}

/// All templates a run needs.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    pub version: u32,
    pub cbg: DataPointTemplate,
    pub smbg: DataPointTemplate,
    pub dataset: DatasetTemplate,
    /// Metadata for replayed device recordings, which come from a
    /// different device than the generated readings.
    pub recorded_dataset: DatasetTemplate,
}

impl TemplateSet {
    pub fn embedded() -> Result<Self> {
        Self::from_strs(CBG_JSON, SMBG_JSON, DATASET_JSON, RECORDED_DATASET_JSON)
    }

    pub fn from_strs(cbg: &str, smbg: &str, dataset: &str, recorded_dataset: &str) -> Result<Self> {
        let set = Self {
            version: TEMPLATE_VERSION,
            cbg: DataPointTemplate::parse("cbg", cbg)?,
            smbg: DataPointTemplate::parse("smbg", smbg)?,
            dataset: DatasetTemplate::parse(dataset)?,
            recorded_dataset: DatasetTemplate::parse(recorded_dataset)?,
        };
        if set.cbg.kind() != "cbg" || set.smbg.kind() != "smbg" {
            return Err(SeedError::Template("cbg/smbg templates have mismatched types".into()));
        }
        Ok(set)
    }
}
