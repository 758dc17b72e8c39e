//! Notebook lifecycle, cell ordering and the in-memory notebook cache.
//!
//! The store is the ground truth. Each notebook touched through the manager
//! is cached as a [`NotebookState`], and the cache follows cell changes by
//! listening to the cell manager's events. Events are always emitted after
//! the cache lock is released, so listeners may call back into the manager.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::events::{CellAdded, CellMoved, CellRemoved, ListenerId, NotebookEvents};
use crate::manager::CellManager;
use crate::model::{
    Cell, Notebook, NotebookPatch, NotebookState, Patch, default_notebook_metadata, now,
};
use crate::store::DocumentKind;

#[derive(Debug, Default)]
struct Cache {
    states: FxHashMap<String, NotebookState>,
    active_notebook_id: Option<String>,
}

#[derive(Debug)]
struct Shared {
    cells: CellManager,
    cache: Mutex<Cache>,
    events: NotebookEvents,
}

/// Listener registrations on the cell manager, released on drop.
#[derive(Debug)]
struct Subscriptions {
    updated: ListenerId,
    converted: ListenerId,
    deleted: ListenerId,
}

/// Manages notebooks and their ordered cell lists.
pub struct NotebookManager {
    shared: Arc<Shared>,
    subscriptions: Subscriptions,
}

impl NotebookManager {
    /// Create a manager sharing `cells`' store and subscribing to its events.
    pub fn new(cells: CellManager) -> Self {
        let shared = Arc::new(Shared {
            cells,
            cache: Mutex::new(Cache::default()),
            events: NotebookEvents::default(),
        });

        let cell_events = shared.cells.events();
        let weak = Arc::downgrade(&shared);
        let updated = cell_events.updated.connect(refresh_listener(weak.clone()));
        let converted = cell_events.converted.connect(refresh_listener(weak.clone()));
        let deleted = cell_events.deleted.connect(move |cell_id: &String| {
            if let Some(shared) = weak.upgrade() {
                shared.on_cell_deleted(cell_id);
            }
        });

        Self {
            shared,
            subscriptions: Subscriptions {
                updated,
                converted,
                deleted,
            },
        }
    }

    pub fn events(&self) -> &NotebookEvents {
        &self.shared.events
    }

    pub fn cells(&self) -> &CellManager {
        &self.shared.cells
    }

    /// Create and cache an empty notebook. A blank title becomes "Untitled".
    pub fn create(&self, title: &str) -> Result<Notebook> {
        let notebook = Notebook::new(
            uuid::Uuid::new_v4().to_string(),
            title.trim(),
            default_notebook_metadata(),
            now(),
        );
        self.shared
            .cells
            .store()
            .save(DocumentKind::Notebook, &notebook.to_payload()?)?;

        let state = NotebookState::new(notebook.clone());
        self.shared
            .cache()
            .states
            .insert(notebook.notebook_id().to_string(), state.clone());

        tracing::debug!("Created notebook {} ({:?})", notebook.notebook_id(), notebook.title());
        self.shared.events.notebook_created.emit(&notebook);
        self.shared.events.state_updated.emit(&state);
        Ok(notebook)
    }

    /// Open a notebook and make it the active one.
    ///
    /// A cached state is returned as is. Otherwise the notebook is loaded,
    /// every cell id is resolved, and ids of missing or tombstoned cells are
    /// pruned from the ordering (the correction is persisted).
    pub fn open(&self, notebook_id: &str) -> Option<NotebookState> {
        let state = {
            let mut cache = self.shared.cache();
            let state = self.shared.state_mut(&mut cache, notebook_id)?.clone();
            cache.active_notebook_id = Some(notebook_id.to_string());
            state
        };

        self.shared.events.notebook_opened.emit(&state);
        Some(state)
    }

    /// Evict a notebook from the cache, saving it first when `save` is set.
    /// Returns whether it was open.
    pub fn close(&self, notebook_id: &str, save: bool) -> bool {
        if save && self.is_open(notebook_id) {
            self.save(notebook_id);
        }

        let was_open = {
            let mut cache = self.shared.cache();
            if cache.active_notebook_id.as_deref() == Some(notebook_id) {
                cache.active_notebook_id = None;
            }
            cache.states.remove(notebook_id).is_some()
        };

        if was_open {
            self.shared.events.notebook_closed.emit(&notebook_id.to_string());
        }
        was_open
    }

    /// Persist the notebook document with a fresh `modified_at`. Cell
    /// documents are saved independently by the cell manager.
    pub fn save(&self, notebook_id: &str) -> bool {
        let mut cache = self.shared.cache();
        let Some(state) = self.shared.state_mut(&mut cache, notebook_id) else {
            return false;
        };

        let notebook = state.notebook.copy_with(NotebookPatch::touch());
        if !self.shared.persist(&notebook) {
            return false;
        }
        state.set_notebook(notebook);
        true
    }

    /// Insert `cell` into the ordering at `position` (clamped to the end;
    /// `None` appends).
    ///
    /// Tombstoned or unknown cells and cells already in the notebook are
    /// rejected.
    pub fn add_cell(
        &self,
        notebook_id: &str,
        cell: &Cell,
        position: Option<usize>,
    ) -> Option<NotebookState> {
        let Some(cell) = self.shared.cells.get_live(cell.cell_id()) else {
            tracing::warn!("Refusing to add missing or deleted cell {}", cell.cell_id());
            return None;
        };

        let (snapshot, position) = {
            let mut cache = self.shared.cache();
            let state = self.shared.state_mut(&mut cache, notebook_id)?;
            if state.notebook.contains_cell(cell.cell_id()) {
                tracing::warn!("Cell {} is already in notebook {}", cell.cell_id(), notebook_id);
                return None;
            }

            let mut ids = state.cell_order().to_vec();
            let position = position.unwrap_or(ids.len()).min(ids.len());
            ids.insert(position, cell.cell_id().to_string());

            let notebook = state.notebook.copy_with(NotebookPatch::reorder(ids));
            if !self.shared.persist(&notebook) {
                return None;
            }
            state.set_notebook(notebook);
            state.set_cell(cell.clone());
            (state.clone(), position)
        };

        self.shared.events.cell_added.emit(&CellAdded {
            notebook_id: notebook_id.to_string(),
            cell,
            position,
        });
        self.shared.events.state_updated.emit(&snapshot);
        Some(snapshot)
    }

    /// Take a cell out of the ordering. The cell document itself is kept.
    pub fn remove_cell(&self, notebook_id: &str, cell_id: &str) -> Option<NotebookState> {
        let snapshot = {
            let mut cache = self.shared.cache();
            let state = self.shared.state_mut(&mut cache, notebook_id)?;
            if !state.notebook.contains_cell(cell_id) {
                return None;
            }

            let ids: Vec<String> = state
                .cell_order()
                .iter()
                .filter(|id| *id != cell_id)
                .cloned()
                .collect();
            let notebook = state.notebook.copy_with(NotebookPatch::reorder(ids));
            if !self.shared.persist(&notebook) {
                return None;
            }
            state.set_notebook(notebook);
            state.remove_cell(cell_id);
            state.clone()
        };

        self.shared.events.cell_removed.emit(&CellRemoved {
            notebook_id: notebook_id.to_string(),
            cell_id: cell_id.to_string(),
        });
        self.shared.events.state_updated.emit(&snapshot);
        Some(snapshot)
    }

    /// Move a cell to `new_position`. The cell is removed first and the
    /// position is clamped against the shortened ordering, so any position
    /// in `[0, len)` leaves the cell exactly there.
    pub fn move_cell(
        &self,
        notebook_id: &str,
        cell_id: &str,
        new_position: usize,
    ) -> Option<NotebookState> {
        let (snapshot, from, to) = {
            let mut cache = self.shared.cache();
            let state = self.shared.state_mut(&mut cache, notebook_id)?;
            let from = state.notebook.position_of(cell_id)?;

            let mut ids = state.cell_order().to_vec();
            let moved = ids.remove(from);
            let to = new_position.min(ids.len());
            if to == from {
                return Some(state.clone());
            }
            ids.insert(to, moved);

            let notebook = state.notebook.copy_with(NotebookPatch::reorder(ids));
            if !self.shared.persist(&notebook) {
                return None;
            }
            state.set_notebook(notebook);
            (state.clone(), from, to)
        };

        self.shared.events.cell_moved.emit(&CellMoved {
            notebook_id: notebook_id.to_string(),
            cell_id: cell_id.to_string(),
            from,
            to,
        });
        self.shared.events.state_updated.emit(&snapshot);
        Some(snapshot)
    }

    /// Change the title. Titles that are blank after trimming are rejected
    /// and nothing is written.
    pub fn rename(&self, notebook_id: &str, new_title: &str) -> Option<Notebook> {
        let title = new_title.trim();
        if title.is_empty() {
            return None;
        }

        let (notebook, snapshot) = {
            let mut cache = self.shared.cache();
            let state = self.shared.state_mut(&mut cache, notebook_id)?;
            let notebook = state.notebook.copy_with(NotebookPatch {
                title: Patch::Set(title.to_string()),
                ..NotebookPatch::touch()
            });
            if !self.shared.persist(&notebook) {
                return None;
            }
            state.set_notebook(notebook.clone());
            (notebook, state.clone())
        };

        self.shared.events.notebook_renamed.emit(&notebook);
        self.shared.events.state_updated.emit(&snapshot);
        Some(notebook)
    }

    /// Remove the notebook document for good. Its cells are left alone.
    pub fn delete(&self, notebook_id: &str) -> bool {
        let removed = match self
            .shared
            .cells
            .store()
            .delete(DocumentKind::Notebook, notebook_id)
        {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("Failed to delete notebook {}: {}", notebook_id, e);
                return false;
            }
        };

        {
            let mut cache = self.shared.cache();
            cache.states.remove(notebook_id);
            if cache.active_notebook_id.as_deref() == Some(notebook_id) {
                cache.active_notebook_id = None;
            }
        }

        if removed {
            tracing::debug!("Deleted notebook {}", notebook_id);
            self.shared
                .events
                .notebook_deleted
                .emit(&notebook_id.to_string());
        }
        removed
    }

    /// The cached state, without loading anything.
    pub fn state(&self, notebook_id: &str) -> Option<NotebookState> {
        self.shared.cache().states.get(notebook_id).cloned()
    }

    pub fn is_open(&self, notebook_id: &str) -> bool {
        self.shared.cache().states.contains_key(notebook_id)
    }

    pub fn get_cell_order(&self, notebook_id: &str) -> Option<Vec<String>> {
        let mut cache = self.shared.cache();
        let state = self.shared.state_mut(&mut cache, notebook_id)?;
        Some(state.cell_order().to_vec())
    }

    /// Every readable stored notebook, sorted by id.
    pub fn list_notebooks(&self) -> Vec<Notebook> {
        self.shared
            .cells
            .store()
            .list(DocumentKind::Notebook)
            .iter()
            .filter_map(|payload| Notebook::from_payload(payload).ok())
            .collect()
    }

    pub fn active_notebook_id(&self) -> Option<String> {
        self.shared.cache().active_notebook_id.clone()
    }

    /// Select a cell (or clear the selection). The cell must be in the
    /// notebook's ordering.
    pub fn set_active_cell(&self, notebook_id: &str, cell_id: Option<&str>) -> bool {
        let snapshot = {
            let mut cache = self.shared.cache();
            let Some(state) = self.shared.state_mut(&mut cache, notebook_id) else {
                return false;
            };
            if let Some(cell_id) = cell_id
                && !state.notebook.contains_cell(cell_id)
            {
                return false;
            }
            state.active_cell_id = cell_id.map(str::to_string);
            state.clone()
        };

        self.shared.events.state_updated.emit(&snapshot);
        true
    }
}

impl Drop for NotebookManager {
    fn drop(&mut self) {
        let events = self.shared.cells.events();
        events.updated.disconnect(self.subscriptions.updated);
        events.converted.disconnect(self.subscriptions.converted);
        events.deleted.disconnect(self.subscriptions.deleted);
    }
}

impl std::fmt::Debug for NotebookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotebookManager")
            .field("open", &self.shared.cache().states.len())
            .field("active", &self.active_notebook_id())
            .finish()
    }
}

fn refresh_listener(weak: Weak<Shared>) -> impl Fn(&Cell) + Send + Sync + 'static {
    move |cell: &Cell| {
        if let Some(shared) = weak.upgrade() {
            shared.on_cell_changed(cell);
        }
    }
}

impl Shared {
    fn cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached state for `notebook_id`, loading it on a miss.
    fn state_mut<'a>(
        &self,
        cache: &'a mut Cache,
        notebook_id: &str,
    ) -> Option<&'a mut NotebookState> {
        if !cache.states.contains_key(notebook_id) {
            let state = self.load_state(notebook_id)?;
            cache.states.insert(notebook_id.to_string(), state);
        }
        cache.states.get_mut(notebook_id)
    }

    fn load_state(&self, notebook_id: &str) -> Option<NotebookState> {
        let payload = self.cells.store().load(DocumentKind::Notebook, notebook_id)?;
        let notebook = match Notebook::from_payload(&payload) {
            Ok(notebook) => notebook,
            Err(e) => {
                tracing::warn!("Ignoring unreadable notebook {}: {}", notebook_id, e);
                return None;
            }
        };

        let mut cells = Vec::new();
        let mut kept = Vec::new();
        for cell_id in notebook.cell_ids() {
            if kept.contains(cell_id) {
                continue;
            }
            if let Some(cell) = self.cells.get_live(cell_id) {
                kept.push(cell_id.clone());
                cells.push(cell);
            }
        }

        let notebook = if kept.len() != notebook.cell_ids().len() {
            tracing::debug!(
                "Pruning {} stale cell references from notebook {}",
                notebook.cell_ids().len() - kept.len(),
                notebook_id
            );
            let pruned = notebook.copy_with(NotebookPatch::reorder(kept));
            self.persist(&pruned);
            pruned
        } else {
            notebook
        };

        let mut state = NotebookState::new(notebook);
        state.update_cells(cells);
        Some(state)
    }

    fn persist(&self, notebook: &Notebook) -> bool {
        let saved = notebook
            .to_payload()
            .and_then(|payload| self.cells.store().save(DocumentKind::Notebook, &payload));
        match saved {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to save notebook {}: {}", notebook.notebook_id(), e);
                false
            }
        }
    }

    /// Refresh a changed cell in every cached notebook that holds it.
    fn on_cell_changed(&self, cell: &Cell) {
        let snapshots: Vec<NotebookState> = {
            let mut cache = self.cache();
            cache
                .states
                .values_mut()
                .filter(|state| state.notebook.contains_cell(cell.cell_id()))
                .map(|state| {
                    state.set_cell(cell.clone());
                    state.clone()
                })
                .collect()
        };

        for snapshot in &snapshots {
            self.events.state_updated.emit(snapshot);
        }
    }

    /// Drop a tombstoned cell from every cached notebook that references it.
    fn on_cell_deleted(&self, cell_id: &str) {
        let snapshots: Vec<NotebookState> = {
            let mut cache = self.cache();
            let mut snapshots = Vec::new();
            for state in cache.states.values_mut() {
                if !state.notebook.contains_cell(cell_id) {
                    state.remove_cell(cell_id);
                    continue;
                }

                let ids: Vec<String> = state
                    .cell_order()
                    .iter()
                    .filter(|id| *id != cell_id)
                    .cloned()
                    .collect();
                let notebook = state.notebook.copy_with(NotebookPatch::reorder(ids));
                // The cache follows even if the write fails; the next load
                // prunes the stale reference again.
                self.persist(&notebook);
                state.set_notebook(notebook);
                state.remove_cell(cell_id);
                snapshots.push(state.clone());
            }
            snapshots
        };

        for snapshot in &snapshots {
            self.events.cell_removed.emit(&CellRemoved {
                notebook_id: snapshot.notebook_id().to_string(),
                cell_id: cell_id.to_string(),
            });
            self.events.state_updated.emit(snapshot);
        }
    }
}
