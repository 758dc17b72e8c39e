//! Cell lifecycle on top of the document store.

use std::sync::Arc;

use chrono::Duration;
use serde_json::{Value, json};

use crate::error::Result;
use crate::events::CellEvents;
use crate::execute::{ExecutionResult, outputs_from_result};
use crate::model::{Cell, CellDraft, CellOutput, CellPatch, CellType, Metadata, Patch, now};
use crate::store::{DataStore, DocumentKind};

/// Changes for [`CellManager::update`]. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct CellUpdate {
    pub content: Patch<String>,
    /// Overlaid onto the existing metadata key by key.
    pub metadata: Patch<Metadata>,
    pub outputs: Patch<Vec<CellOutput>>,
    pub execution_count: Patch<Option<i64>>,
}

impl CellUpdate {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Patch::Set(content.into()),
            ..Default::default()
        }
    }

    pub fn metadata(metadata: Metadata) -> Self {
        Self {
            metadata: Patch::Set(metadata),
            ..Default::default()
        }
    }
}

/// Create, read, update and soft-delete cells.
///
/// Deleting a cell writes a tombstone (`deleted_at`) instead of removing the
/// document. Tombstoned cells can still be read with [`CellManager::get`] but
/// every mutating operation treats them as absent. Clones share the store and
/// the event hooks.
#[derive(Debug, Clone)]
pub struct CellManager {
    store: DataStore,
    events: Arc<CellEvents>,
}

impl CellManager {
    pub fn new(store: DataStore) -> Self {
        Self {
            store,
            events: Arc::new(CellEvents::default()),
        }
    }

    pub fn events(&self) -> &CellEvents {
        &self.events
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    /// Create and persist a cell with a fresh id.
    ///
    /// Missing metadata keys are filled with the defaults for `cell_type`;
    /// keys supplied by the caller win.
    pub fn create(
        &self,
        cell_type: CellType,
        content: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Result<Cell> {
        let mut metadata = metadata.unwrap_or_default();
        apply_type_defaults(&mut metadata, cell_type);

        let cell = Cell::new(
            CellDraft::new(uuid::Uuid::new_v4().to_string(), cell_type)
                .content(content)
                .metadata(metadata),
        );
        self.store.save(DocumentKind::Cell, &cell.to_payload()?)?;

        tracing::debug!("Created {} cell {}", cell_type, cell.cell_id());
        self.events.created.emit(&cell);
        Ok(cell)
    }

    /// Load a cell, tombstoned or not.
    pub fn get(&self, cell_id: &str) -> Option<Cell> {
        let payload = self.store.load(DocumentKind::Cell, cell_id)?;
        match Cell::from_payload(&payload) {
            Ok(cell) => Some(cell),
            Err(e) => {
                tracing::warn!("Ignoring unreadable cell {}: {}", cell_id, e);
                None
            }
        }
    }

    /// Load a cell unless it is missing or tombstoned.
    pub fn get_live(&self, cell_id: &str) -> Option<Cell> {
        self.get(cell_id).filter(|cell| !cell.is_deleted())
    }

    /// Apply `update`, re-stamp `modified_at`, persist and emit `updated`.
    pub fn update(&self, cell_id: &str, update: CellUpdate) -> Option<Cell> {
        let cell = self.get_live(cell_id)?;

        let mut metadata = cell.metadata().clone();
        if let Patch::Set(overlay) = update.metadata {
            metadata.extend(overlay);
        }
        // The metadata mirror of the count follows the field on code cells.
        if let Some(count) = update.execution_count.as_set()
            && cell.cell_type() == CellType::Code
        {
            metadata.insert("execution_count".into(), json!(count));
        }

        let updated = cell.copy_with(CellPatch {
            content: update.content,
            metadata: Patch::Set(metadata),
            outputs: update.outputs,
            execution_count: update.execution_count,
            modified_at: Patch::Set(now()),
            ..Default::default()
        });

        if !self.persist(&updated) {
            return None;
        }
        self.events.updated.emit(&updated);
        Some(updated)
    }

    /// Store the outputs and count of a finished or failed run.
    pub fn record_execution(&self, result: &ExecutionResult) -> Option<Cell> {
        self.update(
            &result.cell_id,
            CellUpdate {
                outputs: Patch::Set(outputs_from_result(result)),
                execution_count: Patch::Set(Some(result.execution_count)),
                ..Default::default()
            },
        )
    }

    /// Tombstone a cell.
    ///
    /// Returns `false` only for unknown ids or a failed write. Deleting an
    /// already tombstoned cell succeeds and re-emits `deleted` without
    /// touching the stored document.
    pub fn delete(&self, cell_id: &str) -> bool {
        let Some(cell) = self.get(cell_id) else {
            return false;
        };

        if cell.is_deleted() {
            self.events.deleted.emit(&cell_id.to_string());
            return true;
        }

        let ts = now();
        let tombstone = cell.copy_with(CellPatch {
            deleted_at: Patch::Set(Some(ts)),
            modified_at: Patch::Set(ts),
            ..Default::default()
        });
        if !self.persist(&tombstone) {
            return false;
        }

        tracing::debug!("Tombstoned cell {}", cell_id);
        self.events.deleted.emit(&cell_id.to_string());
        true
    }

    /// Change a cell's type, rewriting type-specific metadata.
    ///
    /// Leaving `code` clears outputs and the execution count. Converting to
    /// the current type returns the cell unchanged without emitting.
    pub fn convert_type(&self, cell_id: &str, new_type: CellType) -> Option<Cell> {
        let cell = self.get_live(cell_id)?;
        if cell.cell_type() == new_type {
            return Some(cell);
        }

        let mut metadata = cell.metadata().clone();
        metadata.insert("language".into(), json!(new_type.default_language()));

        let mut patch = CellPatch {
            cell_type: Patch::Set(new_type),
            modified_at: Patch::Set(now()),
            ..Default::default()
        };
        if new_type == CellType::Code {
            metadata.entry("execution_count").or_insert(Value::Null);
        } else {
            metadata.remove("execution_count");
            patch.execution_count = Patch::Set(None);
            if cell.cell_type() == CellType::Code {
                patch.outputs = Patch::Set(Vec::new());
            }
        }
        patch.metadata = Patch::Set(metadata);

        let converted = cell.copy_with(patch);
        if !self.persist(&converted) {
            return None;
        }

        tracing::debug!("Converted cell {} to {}", cell_id, new_type);
        self.events.converted.emit(&converted);
        Some(converted)
    }

    /// Copy type, content and metadata into a new cell. Emits `created`.
    pub fn duplicate(&self, cell_id: &str) -> Option<Cell> {
        let source = self.get_live(cell_id)?;
        match self.create(
            source.cell_type(),
            source.content(),
            Some(source.metadata().clone()),
        ) {
            Ok(cell) => Some(cell),
            Err(e) => {
                tracing::warn!("Failed to duplicate cell {}: {}", cell_id, e);
                None
            }
        }
    }

    /// Every readable cell, sorted by id.
    pub fn list_cells(&self, include_deleted: bool) -> Vec<Cell> {
        self.store
            .list(DocumentKind::Cell)
            .iter()
            .filter_map(|payload| Cell::from_payload(payload).ok())
            .filter(|cell| include_deleted || !cell.is_deleted())
            .collect()
    }

    /// Physically remove tombstones older than `older_than`. Returns how many
    /// documents were removed.
    pub fn purge_deleted(&self, older_than: Duration) -> usize {
        let cutoff = now() - older_than;
        let mut purged = 0;

        for cell in self.list_cells(true) {
            let Some(deleted_at) = cell.deleted_at() else {
                continue;
            };
            if deleted_at > cutoff {
                continue;
            }
            match self.store.delete(DocumentKind::Cell, cell.cell_id()) {
                Ok(true) => purged += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to purge cell {}: {}", cell.cell_id(), e),
            }
        }

        if purged > 0 {
            tracing::debug!("Purged {} tombstoned cells", purged);
        }
        purged
    }

    fn persist(&self, cell: &Cell) -> bool {
        let saved = cell
            .to_payload()
            .and_then(|payload| self.store.save(DocumentKind::Cell, &payload));
        match saved {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to save cell {}: {}", cell.cell_id(), e);
                false
            }
        }
    }
}

fn apply_type_defaults(metadata: &mut Metadata, cell_type: CellType) {
    if cell_type == CellType::Code {
        metadata.entry("execution_count").or_insert(Value::Null);
    }
    metadata
        .entry("language")
        .or_insert_with(|| json!(cell_type.default_language()));
    metadata.entry("collapsed").or_insert(json!(false));
    metadata.entry("tags").or_insert_with(|| json!([]));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn manager() -> (TempDir, CellManager) {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = DataStore::at(temp.path()).expect("Failed to open store");
        (temp, CellManager::new(store))
    }

    #[test]
    fn test_create_fills_type_defaults() {
        let (_temp, cells) = manager();

        let code = cells.create(CellType::Code, "x = 1", None).unwrap();
        assert_eq!(code.language(), Some("luna"));
        assert_eq!(code.metadata()["execution_count"], Value::Null);
        assert_eq!(code.metadata()["collapsed"], json!(false));
        assert_eq!(code.metadata()["tags"], json!([]));

        let mut custom = Metadata::new();
        custom.insert("tags".into(), json!(["keep"]));
        let markdown = cells.create(CellType::Markdown, "# T", Some(custom)).unwrap();
        assert_eq!(markdown.language(), Some("markdown"));
        assert_eq!(markdown.metadata()["tags"], json!(["keep"]));
        assert!(!markdown.metadata().contains_key("execution_count"));

        assert_eq!(cells.get(code.cell_id()), Some(code));
    }

    #[test]
    fn test_update_overlays_metadata() {
        let (_temp, cells) = manager();
        let cell = cells.create(CellType::Code, "", None).unwrap();

        let mut overlay = Metadata::new();
        overlay.insert("collapsed".into(), json!(true));
        let updated = cells
            .update(
                cell.cell_id(),
                CellUpdate {
                    content: Patch::Set("y = 2".into()),
                    metadata: Patch::Set(overlay),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.content(), "y = 2");
        assert_eq!(updated.metadata()["collapsed"], json!(true));
        assert_eq!(updated.language(), Some("luna"));
        assert!(updated.modified_at() >= cell.modified_at());
        assert!(cells.update("missing", CellUpdate::content("z")).is_none());
    }

    #[test]
    fn test_execution_count_can_be_cleared() {
        let (_temp, cells) = manager();
        let cell = cells.create(CellType::Code, "", None).unwrap();

        let counted = cells
            .update(
                cell.cell_id(),
                CellUpdate {
                    execution_count: Patch::Set(Some(4)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(counted.execution_count(), Some(4));
        assert_eq!(counted.metadata()["execution_count"], json!(4));

        let untouched = cells.update(cell.cell_id(), CellUpdate::content("a")).unwrap();
        assert_eq!(untouched.execution_count(), Some(4));

        let cleared = cells
            .update(
                cell.cell_id(),
                CellUpdate {
                    execution_count: Patch::Set(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(cleared.execution_count(), None);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_temp, cells) = manager();
        let cell = cells.create(CellType::Code, "", None).unwrap();
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&deleted);
        cells
            .events()
            .deleted
            .connect(move |id: &String| sink.lock().unwrap().push(id.clone()));

        assert!(cells.delete(cell.cell_id()));
        let first = cells.get(cell.cell_id()).unwrap();
        assert!(cells.delete(cell.cell_id()));
        let second = cells.get(cell.cell_id()).unwrap();

        assert!(first.is_deleted());
        assert_eq!(first, second);
        assert_eq!(deleted.lock().unwrap().len(), 2);
        assert!(!cells.delete("missing"));
    }

    #[test]
    fn test_tombstoned_cells_reject_mutation() {
        let (_temp, cells) = manager();
        let cell = cells.create(CellType::Code, "", None).unwrap();
        cells.delete(cell.cell_id());

        assert!(cells.update(cell.cell_id(), CellUpdate::content("x")).is_none());
        assert!(cells.convert_type(cell.cell_id(), CellType::Raw).is_none());
        assert!(cells.duplicate(cell.cell_id()).is_none());
        assert!(cells.get_live(cell.cell_id()).is_none());
    }

    #[test]
    fn test_convert_leaving_code_clears_outputs() {
        let (_temp, cells) = manager();
        let cell = cells.create(CellType::Code, "print(1)", None).unwrap();
        cells.update(
            cell.cell_id(),
            CellUpdate {
                outputs: Patch::Set(vec![CellOutput::Stream {
                    name: crate::model::StreamName::Stdout,
                    text: "1\n".into(),
                }]),
                execution_count: Patch::Set(Some(1)),
                ..Default::default()
            },
        );

        let markdown = cells.convert_type(cell.cell_id(), CellType::Markdown).unwrap();
        assert_eq!(markdown.cell_type(), CellType::Markdown);
        assert!(markdown.outputs().is_empty());
        assert_eq!(markdown.execution_count(), None);
        assert_eq!(markdown.language(), Some("markdown"));
        assert!(!markdown.metadata().contains_key("execution_count"));

        let code = cells.convert_type(cell.cell_id(), CellType::Code).unwrap();
        assert_eq!(code.language(), Some("luna"));
        assert_eq!(code.metadata()["execution_count"], Value::Null);
    }

    #[test]
    fn test_convert_to_same_type_is_noop() {
        let (_temp, cells) = manager();
        let cell = cells.create(CellType::Raw, "raw", None).unwrap();
        let converted = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&converted);
        cells
            .events()
            .converted
            .connect(move |_: &Cell| *counter.lock().unwrap() += 1);

        assert_eq!(cells.convert_type(cell.cell_id(), CellType::Raw), Some(cell));
        assert_eq!(*converted.lock().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_gets_new_identity() {
        let (_temp, cells) = manager();
        let cell = cells.create(CellType::Markdown, "# Title", None).unwrap();

        let copy = cells.duplicate(cell.cell_id()).unwrap();
        assert_ne!(copy.cell_id(), cell.cell_id());
        assert_eq!(copy.content(), "# Title");
        assert_eq!(copy.metadata(), cell.metadata());
    }

    #[test]
    fn test_record_execution_stores_outputs() {
        let (_temp, cells) = manager();
        let cell = cells.create(CellType::Code, "print(x)", None).unwrap();

        let result = ExecutionResult {
            cell_id: cell.cell_id().to_string(),
            execution_count: 2,
            stdout: "1\n".into(),
            ..Default::default()
        };
        let recorded = cells.record_execution(&result).unwrap();

        assert_eq!(recorded.execution_count(), Some(2));
        assert_eq!(recorded.outputs().len(), 1);
    }

    #[test]
    fn test_purge_removes_old_tombstones_only() {
        let (_temp, cells) = manager();
        let live = cells.create(CellType::Code, "", None).unwrap();
        let gone = cells.create(CellType::Code, "", None).unwrap();
        cells.delete(gone.cell_id());

        assert_eq!(cells.purge_deleted(Duration::days(1)), 0);
        assert_eq!(cells.list_cells(true).len(), 2);

        assert_eq!(cells.purge_deleted(Duration::zero()), 1);
        assert!(cells.get(gone.cell_id()).is_none());
        assert!(cells.get(live.cell_id()).is_some());
        assert_eq!(cells.list_cells(false).len(), 1);
    }
}
