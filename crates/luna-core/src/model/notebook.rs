//! Typed representation of a notebook and its metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use super::cell::{Metadata, SCHEMA_VERSION, default_schema_version};
use super::patch::Patch;
use super::timestamp::{now, serde_utc};
use crate::error::{Error, Result};

/// Title used when none (or a blank one) is given.
pub const DEFAULT_TITLE: &str = "Untitled";

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

/// Blank titles decode as the default title.
fn non_blank_title<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    let title = String::deserialize(d)?;
    if title.trim().is_empty() {
        Ok(default_title())
    } else {
        Ok(title)
    }
}

/// Metadata given to notebooks created without any.
pub fn default_notebook_metadata() -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("kernel".into(), json!("luna"));
    metadata.insert("language".into(), json!("luna"));
    metadata.insert("author".into(), json!(""));
    metadata.insert("tags".into(), json!([]));
    metadata
}

/// Immutable description of a notebook document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    notebook_id: String,
    #[serde(default = "default_title", deserialize_with = "non_blank_title")]
    title: String,
    #[serde(default)]
    cell_ids: Vec<String>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(with = "serde_utc")]
    created_at: DateTime<Utc>,
    #[serde(with = "serde_utc")]
    modified_at: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    schema_version: u32,
}

/// Field replacements for [`Notebook::copy_with`].
#[derive(Debug, Clone, Default)]
pub struct NotebookPatch {
    pub title: Patch<String>,
    pub cell_ids: Patch<Vec<String>>,
    pub metadata: Patch<Metadata>,
    pub modified_at: Patch<DateTime<Utc>>,
}

impl NotebookPatch {
    /// A patch that only re-stamps `modified_at`.
    pub fn touch() -> Self {
        Self {
            modified_at: Patch::Set(now()),
            ..Default::default()
        }
    }

    /// Replace the ordering and re-stamp `modified_at`.
    pub fn reorder(cell_ids: Vec<String>) -> Self {
        Self {
            cell_ids: Patch::Set(cell_ids),
            ..Self::touch()
        }
    }
}

impl Notebook {
    /// A new, empty notebook stamped with `created_at` for both timestamps.
    pub fn new(
        notebook_id: impl Into<String>,
        title: impl Into<String>,
        metadata: Metadata,
        created_at: DateTime<Utc>,
    ) -> Self {
        let title = title.into();
        Self {
            notebook_id: notebook_id.into(),
            title: if title.trim().is_empty() { default_title() } else { title },
            cell_ids: Vec::new(),
            metadata,
            created_at,
            modified_at: created_at,
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn from_payload(payload: &Value) -> Result<Self> {
        let notebook =
            Self::deserialize(payload).map_err(|e| Error::Deserialization(e.to_string()))?;
        if notebook.notebook_id.trim().is_empty() {
            return Err(Error::MissingId("notebook_id"));
        }
        Ok(notebook)
    }

    pub fn to_payload(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn copy_with(&self, patch: NotebookPatch) -> Self {
        Self {
            notebook_id: self.notebook_id.clone(),
            title: patch.title.apply_with(|| self.title.clone()),
            cell_ids: patch.cell_ids.apply_with(|| self.cell_ids.clone()),
            metadata: patch.metadata.apply_with(|| self.metadata.clone()),
            created_at: self.created_at,
            modified_at: patch.modified_at.apply(self.modified_at),
            schema_version: self.schema_version,
        }
    }

    pub fn notebook_id(&self) -> &str {
        &self.notebook_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Cell ids in presentation order.
    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
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

    pub fn contains_cell(&self, cell_id: &str) -> bool {
        self.cell_ids.iter().any(|id| id == cell_id)
    }

    pub fn position_of(&self, cell_id: &str) -> Option<usize> {
        self.cell_ids.iter().position(|id| id == cell_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Notebook {
        Notebook::new("nb1", "Demo", default_notebook_metadata(), now()).copy_with(NotebookPatch {
            cell_ids: Patch::Set(vec!["a".into(), "b".into()]),
            ..Default::default()
        })
    }

    #[test]
    fn test_payload_round_trip() {
        let notebook = sample();
        let payload = notebook.to_payload().unwrap();

        assert_eq!(payload["cell_ids"][1], "b");
        assert_eq!(payload["metadata"]["kernel"], "luna");
        assert_eq!(Notebook::from_payload(&payload).unwrap(), notebook);
    }

    #[test]
    fn test_blank_titles_become_default() {
        let notebook = Notebook::new("nb2", "   ", Metadata::new(), now());
        assert_eq!(notebook.title(), DEFAULT_TITLE);

        let payload = serde_json::json!({
            "notebook_id": "nb3",
            "title": "",
            "created_at": "2024-01-01T00:00:00Z",
            "modified_at": "2024-01-01T00:00:00Z",
        });
        let loaded = Notebook::from_payload(&payload).unwrap();
        assert_eq!(loaded.title(), DEFAULT_TITLE);
        assert!(loaded.cell_ids().is_empty());
    }

    #[test]
    fn test_reorder_patch_restamps() {
        let notebook = sample();
        let reordered = notebook.copy_with(NotebookPatch::reorder(vec!["b".into(), "a".into()]));

        assert_eq!(reordered.cell_ids(), ["b".to_string(), "a".to_string()]);
        assert!(reordered.modified_at() >= notebook.modified_at());
        assert_eq!(reordered.created_at(), notebook.created_at());
        assert_eq!(notebook.position_of("b"), Some(1));
    }
}
