//! Cached, in-memory view of a notebook and its cells.

use rustc_hash::FxHashMap;

use super::cell::Cell;
use super::notebook::Notebook;

/// A notebook record plus the cells currently resolved for it.
///
/// Never persisted; rebuilt from the store on first access.
#[derive(Debug, Clone, PartialEq)]
pub struct NotebookState {
    pub notebook: Notebook,
    pub cells: FxHashMap<String, Cell>,
    pub active_cell_id: Option<String>,
}

impl NotebookState {
    pub fn new(notebook: Notebook) -> Self {
        Self {
            notebook,
            cells: FxHashMap::default(),
            active_cell_id: None,
        }
    }

    pub fn notebook_id(&self) -> &str {
        self.notebook.notebook_id()
    }

    pub fn cell_order(&self) -> &[String] {
        self.notebook.cell_ids()
    }

    pub fn get_cell(&self, cell_id: &str) -> Option<&Cell> {
        self.cells.get(cell_id)
    }

    pub fn contains_cell(&self, cell_id: &str) -> bool {
        self.cells.contains_key(cell_id)
    }

    /// Cells in presentation order, skipping ids not resolved in the cache.
    pub fn iter_cells(&self) -> impl Iterator<Item = &Cell> {
        self.notebook
            .cell_ids()
            .iter()
            .filter_map(|id| self.cells.get(id))
    }

    pub fn set_notebook(&mut self, notebook: Notebook) {
        self.notebook = notebook;
    }

    pub fn set_cell(&mut self, cell: Cell) {
        self.cells.insert(cell.cell_id().to_string(), cell);
    }

    /// Drop a cell from the cache, clearing the active cell if it was this one.
    pub fn remove_cell(&mut self, cell_id: &str) -> Option<Cell> {
        if self.active_cell_id.as_deref() == Some(cell_id) {
            self.active_cell_id = None;
        }
        self.cells.remove(cell_id)
    }

    pub fn update_cells(&mut self, cells: impl IntoIterator<Item = Cell>) {
        for cell in cells {
            self.set_cell(cell);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellDraft, CellType, Metadata, Patch, NotebookPatch, now};

    #[test]
    fn test_iter_cells_follows_order_and_skips_missing() {
        let notebook = Notebook::new("nb", "T", Metadata::new(), now()).copy_with(NotebookPatch {
            cell_ids: Patch::Set(vec!["b".into(), "missing".into(), "a".into()]),
            ..Default::default()
        });
        let mut state = NotebookState::new(notebook);
        state.update_cells([
            Cell::new(CellDraft::new("a", CellType::Code)),
            Cell::new(CellDraft::new("b", CellType::Markdown)),
        ]);

        let ids: Vec<&str> = state.iter_cells().map(Cell::cell_id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_remove_active_cell_clears_selection() {
        let mut state = NotebookState::new(Notebook::new("nb", "T", Metadata::new(), now()));
        state.set_cell(Cell::new(CellDraft::new("a", CellType::Code)));
        state.active_cell_id = Some("a".into());

        assert!(state.remove_cell("a").is_some());
        assert_eq!(state.active_cell_id, None);
        assert!(!state.contains_cell("a"));
    }
}
