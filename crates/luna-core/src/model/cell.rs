//! Typed representation of a notebook cell.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::patch::Patch;
use super::timestamp::{now, serde_utc};
use crate::error::{Error, Result};

/// Open string-keyed metadata map.
pub type Metadata = serde_json::Map<String, Value>;

/// Current document schema version.
pub const SCHEMA_VERSION: u32 = 1;

pub(crate) fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Kind of cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    #[default]
    Code,
    Markdown,
    Raw,
}

impl CellType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Markdown => "markdown",
            Self::Raw => "raw",
        }
    }

    /// Value of the `language` metadata key for fresh cells of this type.
    pub fn default_language(&self) -> &'static str {
        match self {
            Self::Code => "luna",
            Self::Markdown => "markdown",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CellType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "code" => Ok(Self::Code),
            "markdown" => Ok(Self::Markdown),
            "raw" => Ok(Self::Raw),
            other => Err(Error::Deserialization(format!("unknown cell type {:?}", other))),
        }
    }
}

/// Which stream a text output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// One recorded result of running a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum CellOutput {
    /// Captured stdout or stderr text.
    Stream { name: StreamName, text: String },

    /// Rich data keyed by MIME type, e.g. base64 `image/png`.
    DisplayData {
        data: serde_json::Map<String, Value>,
        #[serde(default)]
        metadata: Metadata,
    },

    /// A failed run.
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

/// Immutable view of a persisted notebook cell.
///
/// Mutation goes through [`Cell::copy_with`], which returns a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    cell_id: String,
    #[serde(default)]
    cell_type: CellType,
    #[serde(default)]
    content: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    outputs: Vec<CellOutput>,
    #[serde(default)]
    execution_count: Option<i64>,
    #[serde(with = "serde_utc")]
    created_at: DateTime<Utc>,
    #[serde(with = "serde_utc")]
    modified_at: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    schema_version: u32,
    #[serde(default, with = "serde_utc::option")]
    deleted_at: Option<DateTime<Utc>>,
}

/// Everything needed to build a fresh [`Cell`].
#[derive(Debug, Clone)]
pub struct CellDraft {
    pub cell_id: String,
    pub cell_type: CellType,
    pub content: String,
    pub metadata: Metadata,
    pub outputs: Vec<CellOutput>,
    pub execution_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl CellDraft {
    /// A draft with empty content and both timestamps set to now.
    pub fn new(cell_id: impl Into<String>, cell_type: CellType) -> Self {
        let ts = now();
        Self {
            cell_id: cell_id.into(),
            cell_type,
            content: String::new(),
            metadata: Metadata::new(),
            outputs: Vec::new(),
            execution_count: None,
            created_at: ts,
            modified_at: ts,
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Field replacements for [`Cell::copy_with`].
#[derive(Debug, Clone, Default)]
pub struct CellPatch {
    pub cell_type: Patch<CellType>,
    pub content: Patch<String>,
    pub metadata: Patch<Metadata>,
    pub outputs: Patch<Vec<CellOutput>>,
    pub execution_count: Patch<Option<i64>>,
    pub modified_at: Patch<DateTime<Utc>>,
    pub deleted_at: Patch<Option<DateTime<Utc>>>,
}

impl Cell {
    pub fn new(draft: CellDraft) -> Self {
        Self {
            cell_id: draft.cell_id,
            cell_type: draft.cell_type,
            content: draft.content,
            metadata: draft.metadata,
            outputs: draft.outputs,
            execution_count: draft.execution_count,
            created_at: draft.created_at,
            modified_at: draft.modified_at,
            schema_version: SCHEMA_VERSION,
            deleted_at: None,
        }
    }

    /// Decode a stored document, defaulting missing optional fields.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let cell = Self::deserialize(payload).map_err(|e| Error::Deserialization(e.to_string()))?;
        if cell.cell_id.trim().is_empty() {
            return Err(Error::MissingId("cell_id"));
        }
        Ok(cell)
    }

    /// Encode as a document; the exact inverse of [`Cell::from_payload`].
    pub fn to_payload(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// A new cell with the patched fields replaced. Identity, creation time
    /// and schema version are never changed.
    pub fn copy_with(&self, patch: CellPatch) -> Self {
        Self {
            cell_id: self.cell_id.clone(),
            cell_type: patch.cell_type.apply(self.cell_type),
            content: patch.content.apply_with(|| self.content.clone()),
            metadata: patch.metadata.apply_with(|| self.metadata.clone()),
            outputs: patch.outputs.apply_with(|| self.outputs.clone()),
            execution_count: patch.execution_count.apply(self.execution_count),
            created_at: self.created_at,
            modified_at: patch.modified_at.apply(self.modified_at),
            schema_version: self.schema_version,
            deleted_at: patch.deleted_at.apply(self.deleted_at),
        }
    }

    pub fn cell_id(&self) -> &str {
        &self.cell_id
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn outputs(&self) -> &[CellOutput] {
        &self.outputs
    }

    pub fn execution_count(&self) -> Option<i64> {
        self.execution_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Whether the cell carries a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The `language` metadata value, if any.
    pub fn language(&self) -> Option<&str> {
        self.metadata.get("language").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Cell {
        let mut metadata = Metadata::new();
        metadata.insert("language".into(), json!("luna"));
        metadata.insert("tags".into(), json!(["a"]));
        Cell::new(
            CellDraft::new("c1", CellType::Code)
                .content("x = 1")
                .metadata(metadata),
        )
    }

    #[test]
    fn test_payload_round_trip() {
        let cell = sample().copy_with(CellPatch {
            outputs: Patch::Set(vec![CellOutput::Stream {
                name: StreamName::Stdout,
                text: "1\n".into(),
            }]),
            execution_count: Patch::Set(Some(3)),
            ..Default::default()
        });

        let payload = cell.to_payload().unwrap();
        assert_eq!(payload["cell_type"], "code");
        assert_eq!(payload["outputs"][0]["output_type"], "stream");
        assert_eq!(payload["deleted_at"], Value::Null);
        assert_eq!(Cell::from_payload(&payload).unwrap(), cell);
    }

    #[test]
    fn test_from_payload_defaults_optional_fields() {
        let payload = json!({
            "cell_id": "c2",
            "created_at": "2024-01-01T00:00:00Z",
            "modified_at": "2024-01-01T00:00:00",
        });

        let cell = Cell::from_payload(&payload).unwrap();
        assert_eq!(cell.cell_type(), CellType::Code);
        assert_eq!(cell.content(), "");
        assert!(cell.outputs().is_empty());
        assert_eq!(cell.execution_count(), None);
        assert_eq!(cell.schema_version(), SCHEMA_VERSION);
        assert!(!cell.is_deleted());
    }

    #[test]
    fn test_from_payload_rejects_missing_timestamps() {
        assert!(Cell::from_payload(&json!({"cell_id": "c3"})).is_err());
        assert!(Cell::from_payload(&json!({"content": "no id"})).is_err());
    }

    #[test]
    fn test_copy_with_leaves_original_untouched() {
        let original = sample().copy_with(CellPatch {
            execution_count: Patch::Set(Some(1)),
            ..Default::default()
        });

        let cleared = original.copy_with(CellPatch {
            content: Patch::Set("y = 2".into()),
            execution_count: Patch::Set(None),
            ..Default::default()
        });
        let kept = original.copy_with(CellPatch::default());

        assert_eq!(original.content(), "x = 1");
        assert_eq!(original.execution_count(), Some(1));
        assert_eq!(cleared.content(), "y = 2");
        assert_eq!(cleared.execution_count(), None);
        assert_eq!(kept, original);
    }

    #[test]
    fn test_cell_type_parsing() {
        assert_eq!("markdown".parse::<CellType>().unwrap(), CellType::Markdown);
        assert!("python".parse::<CellType>().is_err());
        assert_eq!(CellType::Raw.to_string(), "raw");
    }
}
