//! Integration tests for the cell and notebook managers.
//!
//! Covers persistence round trips, ordering, tombstones and how the notebook
//! cache follows cell changes.

use std::fs;
use std::sync::{Arc, Mutex};

use luna_core::{
    Cell, CellManager, CellType, CellUpdate, DataStore, DocumentKind, Notebook, NotebookManager,
    NotebookState,
};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

struct Fixture {
    temp: TempDir,
    cells: CellManager,
    notebooks: NotebookManager,
}

fn fixture() -> Fixture {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = DataStore::at(temp.path()).expect("Failed to open store");
    let cells = CellManager::new(store);
    let notebooks = NotebookManager::new(cells.clone());
    Fixture {
        temp,
        cells,
        notebooks,
    }
}

/// A fresh manager pair over the same data root, with an empty cache.
fn reopen(fx: &Fixture) -> (CellManager, NotebookManager) {
    let store = DataStore::at(fx.temp.path()).expect("Failed to open store");
    let cells = CellManager::new(store);
    let notebooks = NotebookManager::new(cells.clone());
    (cells, notebooks)
}

fn code_cell(fx: &Fixture, content: &str) -> Cell {
    fx.cells
        .create(CellType::Code, content, None)
        .expect("Failed to create cell")
}

/// Record every `state_updated` payload.
fn watch_states(notebooks: &NotebookManager) -> Arc<Mutex<Vec<NotebookState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    notebooks
        .events()
        .state_updated
        .connect(move |state: &NotebookState| sink.lock().unwrap().push(state.clone()));
    seen
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_documents_land_in_separate_directories() {
    let fx = fixture();
    let notebook = fx.notebooks.create("Demo").unwrap();
    let cell = code_cell(&fx, "x = 1");

    assert!(
        fx.temp
            .path()
            .join("notebooks")
            .join(format!("{}.json", notebook.notebook_id()))
            .is_file()
    );
    assert!(
        fx.temp
            .path()
            .join("cells")
            .join(format!("{}.json", cell.cell_id()))
            .is_file()
    );
}

#[test]
fn test_stored_documents_round_trip() {
    let fx = fixture();
    let notebook = fx.notebooks.create("Demo").unwrap();
    let cell = code_cell(&fx, "x = 1");
    let state = fx.notebooks.add_cell(notebook.notebook_id(), &cell, None).unwrap();

    let (cells, _notebooks) = reopen(&fx);
    let payload = cells
        .store()
        .load(DocumentKind::Notebook, notebook.notebook_id())
        .unwrap();
    let loaded = Notebook::from_payload(&payload).unwrap();

    assert_eq!(loaded, state.notebook);
    assert_eq!(cells.get(cell.cell_id()), Some(cell));
}

#[test]
fn test_list_notebooks_reflects_new_entries() {
    let fx = fixture();
    let first = fx.notebooks.create("One").unwrap();
    let second = fx.notebooks.create("Two").unwrap();

    let mut ids: Vec<String> = fx
        .notebooks
        .list_notebooks()
        .iter()
        .map(|nb| nb.notebook_id().to_string())
        .collect();
    ids.sort();
    let mut expected = vec![
        first.notebook_id().to_string(),
        second.notebook_id().to_string(),
    ];
    expected.sort();

    assert_eq!(ids, expected);
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_add_cell_clamps_position() {
    let fx = fixture();
    let nb = fx.notebooks.create("Order").unwrap();
    let id = nb.notebook_id();
    let a = code_cell(&fx, "a");
    let b = code_cell(&fx, "b");
    let c = code_cell(&fx, "c");

    fx.notebooks.add_cell(id, &a, None).unwrap();
    fx.notebooks.add_cell(id, &b, Some(99)).unwrap();
    fx.notebooks.add_cell(id, &c, Some(0)).unwrap();

    let order = fx.notebooks.get_cell_order(id).unwrap();
    assert_eq!(order, vec![c.cell_id(), a.cell_id(), b.cell_id()]);

    // Already present.
    assert!(fx.notebooks.add_cell(id, &a, None).is_none());
}

#[test]
fn test_move_cell_lands_at_every_position() {
    let fx = fixture();
    let nb = fx.notebooks.create("Moves").unwrap();
    let id = nb.notebook_id();
    let cells: Vec<Cell> = (0..4).map(|i| code_cell(&fx, &format!("c{}", i))).collect();
    for cell in &cells {
        fx.notebooks.add_cell(id, cell, None).unwrap();
    }

    for moved in 0..cells.len() {
        for target in 0..cells.len() {
            let before = fx.notebooks.get_cell_order(id).unwrap();
            let cell_id = cells[moved].cell_id();

            let state = fx.notebooks.move_cell(id, cell_id, target).unwrap();
            let after = state.cell_order().to_vec();

            assert_eq!(after[target], cell_id);
            let others_before: Vec<&String> = before.iter().filter(|c| *c != cell_id).collect();
            let others_after: Vec<&String> = after.iter().filter(|c| *c != cell_id).collect();
            assert_eq!(others_before, others_after);
        }
    }
}

#[test]
fn test_ordering_mutations_emit_events() {
    let fx = fixture();
    let nb = fx.notebooks.create("Events").unwrap();
    let id = nb.notebook_id();
    let a = code_cell(&fx, "a");
    let b = code_cell(&fx, "b");

    let log = Arc::new(Mutex::new(Vec::new()));
    let events = fx.notebooks.events();
    let sink = Arc::clone(&log);
    events
        .cell_added
        .connect(move |e| sink.lock().unwrap().push(format!("added {}", e.position)));
    let sink = Arc::clone(&log);
    events
        .cell_moved
        .connect(move |e| sink.lock().unwrap().push(format!("moved {}->{}", e.from, e.to)));
    let sink = Arc::clone(&log);
    events
        .cell_removed
        .connect(move |_| sink.lock().unwrap().push("removed".to_string()));
    let sink = Arc::clone(&log);
    events
        .state_updated
        .connect(move |_| sink.lock().unwrap().push("state".to_string()));

    fx.notebooks.add_cell(id, &a, None).unwrap();
    fx.notebooks.add_cell(id, &b, None).unwrap();
    fx.notebooks.move_cell(id, b.cell_id(), 0).unwrap();
    fx.notebooks.remove_cell(id, a.cell_id()).unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "added 0", "state", "added 1", "state", "moved 1->0", "state", "removed", "state"
        ]
    );
    assert_eq!(fx.notebooks.get_cell_order(id).unwrap(), vec![b.cell_id()]);
    assert!(fx.cells.get_live(a.cell_id()).is_some());
}

#[test]
fn test_unknown_references_are_absent() {
    let fx = fixture();
    let nb = fx.notebooks.create("Absent").unwrap();
    let cell = code_cell(&fx, "x");

    assert!(fx.notebooks.add_cell("missing", &cell, None).is_none());
    assert!(fx.notebooks.remove_cell(nb.notebook_id(), cell.cell_id()).is_none());
    assert!(fx.notebooks.move_cell(nb.notebook_id(), cell.cell_id(), 0).is_none());
    assert!(fx.notebooks.open("missing").is_none());
    assert!(!fx.notebooks.delete("missing"));
}

// =============================================================================
// Tombstone and Reconciliation Tests
// =============================================================================

#[test]
fn test_idempotent_delete_keeps_tombstone() {
    let fx = fixture();
    let cell = code_cell(&fx, "x = 1");

    assert!(fx.cells.delete(cell.cell_id()));
    let first = fx.cells.get(cell.cell_id()).unwrap();
    assert!(fx.cells.delete(cell.cell_id()));
    let second = fx.cells.get(cell.cell_id()).unwrap();

    assert!(first.deleted_at().is_some());
    assert_eq!(first.deleted_at(), second.deleted_at());
    assert_eq!(first.modified_at(), second.modified_at());
}

#[test]
fn test_deleting_cached_cell_reconciles_notebook() {
    let fx = fixture();
    let nb = fx.notebooks.create("Reconcile").unwrap();
    let id = nb.notebook_id();
    let keep = code_cell(&fx, "keep");
    let gone = code_cell(&fx, "gone");
    fx.notebooks.add_cell(id, &keep, None).unwrap();
    fx.notebooks.add_cell(id, &gone, None).unwrap();

    let states = watch_states(&fx.notebooks);
    assert!(fx.cells.delete(gone.cell_id()));

    let last = states.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.cell_order(), [keep.cell_id().to_string()]);
    assert!(!last.contains_cell(gone.cell_id()));

    // The correction is on disk too.
    let (_cells, fresh) = reopen(&fx);
    assert_eq!(fresh.get_cell_order(id).unwrap(), vec![keep.cell_id()]);
}

#[test]
fn test_open_prunes_stale_references() {
    let fx = fixture();
    let nb = fx.notebooks.create("Prune").unwrap();
    let id = nb.notebook_id().to_string();
    let keep = code_cell(&fx, "keep");
    let tomb = code_cell(&fx, "tomb");
    let vanish = code_cell(&fx, "vanish");
    for cell in [&keep, &tomb, &vanish] {
        fx.notebooks.add_cell(&id, cell, None).unwrap();
    }

    // Change cells behind the manager's back.
    let (cells, notebooks) = reopen(&fx);
    drop(notebooks);
    cells.delete(tomb.cell_id());
    fs::remove_file(
        fx.temp
            .path()
            .join("cells")
            .join(format!("{}.json", vanish.cell_id())),
    )
    .unwrap();

    let (_cells, fresh) = reopen(&fx);
    let state = fresh.open(&id).unwrap();
    assert_eq!(state.cell_order(), [keep.cell_id().to_string()]);
    assert_eq!(state.cells.len(), 1);
    assert_eq!(fresh.active_notebook_id().as_deref(), Some(id.as_str()));

    let stored = fresh.list_notebooks();
    assert_eq!(stored[0].cell_ids(), [keep.cell_id().to_string()]);
}

#[test]
fn test_cell_updates_refresh_cache() {
    let fx = fixture();
    let nb = fx.notebooks.create("Refresh").unwrap();
    let cell = code_cell(&fx, "x = 1");
    fx.notebooks.add_cell(nb.notebook_id(), &cell, None).unwrap();

    let states = watch_states(&fx.notebooks);
    fx.cells
        .update(cell.cell_id(), CellUpdate::content("x = 2"))
        .unwrap();
    fx.cells.convert_type(cell.cell_id(), CellType::Markdown).unwrap();

    assert_eq!(states.lock().unwrap().len(), 2);
    let cached = fx.notebooks.state(nb.notebook_id()).unwrap();
    let cached_cell = cached.get_cell(cell.cell_id()).unwrap();
    assert_eq!(cached_cell.content(), "x = 2");
    assert_eq!(cached_cell.cell_type(), CellType::Markdown);
}

#[test]
fn test_add_cell_rejects_tombstoned_cell() {
    let fx = fixture();
    let nb = fx.notebooks.create("Tomb").unwrap();
    let cell = code_cell(&fx, "x");
    fx.cells.delete(cell.cell_id());

    assert!(fx.notebooks.add_cell(nb.notebook_id(), &cell, None).is_none());
}

#[test]
fn test_dropped_manager_releases_subscriptions() {
    let fx = fixture();
    assert_eq!(fx.cells.events().deleted.listener_count(), 1);

    let extra = NotebookManager::new(fx.cells.clone());
    assert_eq!(fx.cells.events().deleted.listener_count(), 2);
    drop(extra);
    assert_eq!(fx.cells.events().deleted.listener_count(), 1);
    assert_eq!(fx.cells.events().updated.listener_count(), 1);
}

// =============================================================================
// Notebook Lifecycle Tests
// =============================================================================

#[test]
fn test_blank_rename_is_rejected() {
    let fx = fixture();
    let nb = fx.notebooks.create("Demo").unwrap();

    assert!(fx.notebooks.rename(nb.notebook_id(), "   ").is_none());

    let (_cells, fresh) = reopen(&fx);
    assert_eq!(fresh.open(nb.notebook_id()).unwrap().notebook.title(), "Demo");
}

#[test]
fn test_rename_trims_and_persists() {
    let fx = fixture();
    let nb = fx.notebooks.create("Demo").unwrap();

    let renamed = fx.notebooks.rename(nb.notebook_id(), "  Renamed ").unwrap();
    assert_eq!(renamed.title(), "Renamed");

    let (_cells, fresh) = reopen(&fx);
    assert_eq!(fresh.list_notebooks()[0].title(), "Renamed");
}

#[test]
fn test_blank_create_title_defaults() {
    let fx = fixture();
    let nb = fx.notebooks.create("  ").unwrap();
    assert_eq!(nb.title(), "Untitled");
    assert_eq!(nb.metadata()["kernel"], "luna");
}

#[test]
fn test_open_close_and_active_notebook() {
    let fx = fixture();
    let nb = fx.notebooks.create("Demo").unwrap();
    let id = nb.notebook_id();

    let opened = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&opened);
    fx.notebooks
        .events()
        .notebook_opened
        .connect(move |_| *counter.lock().unwrap() += 1);

    fx.notebooks.open(id).unwrap();
    fx.notebooks.open(id).unwrap();
    assert_eq!(*opened.lock().unwrap(), 2);
    assert_eq!(fx.notebooks.active_notebook_id().as_deref(), Some(id));

    assert!(fx.notebooks.close(id, true));
    assert_eq!(fx.notebooks.active_notebook_id(), None);
    assert!(fx.notebooks.state(id).is_none());
    assert!(!fx.notebooks.close(id, true));
}

#[test]
fn test_set_active_cell_requires_membership() {
    let fx = fixture();
    let nb = fx.notebooks.create("Active").unwrap();
    let id = nb.notebook_id();
    let member = code_cell(&fx, "m");
    let outsider = code_cell(&fx, "o");
    fx.notebooks.add_cell(id, &member, None).unwrap();

    assert!(fx.notebooks.set_active_cell(id, Some(member.cell_id())));
    assert!(!fx.notebooks.set_active_cell(id, Some(outsider.cell_id())));
    assert_eq!(
        fx.notebooks.state(id).unwrap().active_cell_id.as_deref(),
        Some(member.cell_id())
    );

    fx.notebooks.remove_cell(id, member.cell_id()).unwrap();
    assert_eq!(fx.notebooks.state(id).unwrap().active_cell_id, None);
}

#[test]
fn test_delete_notebook_evicts_and_clears_active() {
    let fx = fixture();
    let nb = fx.notebooks.create("Doomed").unwrap();
    let id = nb.notebook_id();
    let cell = code_cell(&fx, "x");
    fx.notebooks.add_cell(id, &cell, None).unwrap();
    fx.notebooks.open(id).unwrap();

    assert!(fx.notebooks.delete(id));
    assert!(fx.notebooks.state(id).is_none());
    assert_eq!(fx.notebooks.active_notebook_id(), None);
    assert!(fx.notebooks.open(id).is_none());
    assert!(!fx.notebooks.delete(id));

    // Cells outlive their notebook.
    assert!(fx.cells.get_live(cell.cell_id()).is_some());
}
