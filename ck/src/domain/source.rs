//! Source files and parameter maps

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

/// Parameter values keyed by parameter name
pub type Parameters = Map<String, Value>;

/// A CAD source file as submitted for computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path of the file relative to the project root (also the capability cache key)
    pub filename: String,

    /// Raw file content; text for script engines, bytes for mesh imports
    pub content: Vec<u8>,
}

impl SourceFile {
    /// Create a source file from a name and content
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }

    /// Read a file from disk, keeping `filename` as given
    pub async fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        debug!(?path, "SourceFile::load: called");
        let content = tokio::fs::read(path).await?;
        Ok(Self::new(path.to_string_lossy(), content))
    }

    /// Content as UTF-8 text, if it is text
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    /// Lowercased file extension without the dot
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    /// File name without directories or extension
    pub fn stem(&self) -> String {
        Path::new(&self.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string())
    }

    /// Final path component
    pub fn basename(&self) -> String {
        Path::new(&self.filename)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.filename.clone())
    }

    /// Directory part of `filename`, empty for top-level files
    pub fn directory(&self) -> String {
        Path::new(&self.filename)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Parameters an engine reports for a source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedParameters {
    #[serde(rename = "default-parameters")]
    pub default_parameters: Parameters,

    #[serde(rename = "json-schema")]
    pub json_schema: Value,
}

impl ExtractedParameters {
    /// Empty defaults with an empty object schema
    pub fn empty() -> Self {
        Self {
            default_parameters: Parameters::new(),
            json_schema: empty_schema(),
        }
    }

    /// Build from defaults alone, inferring the schema
    pub fn from_defaults(defaults: Parameters) -> Self {
        let json_schema = schema_from_defaults(&defaults);
        Self {
            default_parameters: defaults,
            json_schema,
        }
    }
}

/// `{"type": "object", "properties": {}}`
pub fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Infer a JSON schema describing a defaults map
pub fn schema_from_defaults(defaults: &Parameters) -> Value {
    let properties: Map<String, Value> = defaults
        .iter()
        .map(|(name, value)| (name.clone(), schema_for_value(value)))
        .collect();
    json!({"type": "object", "properties": properties})
}

fn schema_for_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({"type": "null"}),
        Value::Bool(b) => json!({"type": "boolean", "default": b}),
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({"type": "integer", "default": n}),
        Value::Number(n) => json!({"type": "number", "default": n}),
        Value::String(s) => json!({"type": "string", "default": s}),
        Value::Array(items) => {
            let item_schema = items.first().map(schema_for_value).unwrap_or_else(|| json!({}));
            json!({"type": "array", "items": item_schema, "default": items})
        }
        Value::Object(map) => {
            let mut schema = schema_from_defaults(map);
            schema["default"] = Value::Object(map.clone());
            schema
        }
    }
}

/// Deep-merge user overrides onto engine defaults.
///
/// Overrides win on every conflicting key. Nested objects present on both sides
/// are merged recursively; any other conflict takes the override value whole.
pub fn merge_parameters(defaults: &Parameters, overrides: &Parameters) -> Parameters {
    debug!(
        defaults = defaults.len(),
        overrides = overrides.len(),
        "merge_parameters: called"
    );
    let mut merged = defaults.clone();
    for (key, value) in overrides {
        let next = match (merged.get(key), value) {
            (Some(Value::Object(base)), Value::Object(over)) => Value::Object(merge_parameters(base, over)),
            _ => value.clone(),
        };
        merged.insert(key.clone(), next);
    }
    merged
}
