//! Callback-based event hooks for the managers.
//!
//! Listeners run synchronously on the emitting thread, in connection order.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::execute::{ExecutionRequest, ExecutionResult};
use crate::model::{Cell, Notebook, NotebookState};

/// Token returned by [`EventHook::connect`], used to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A named event with any number of listeners.
pub struct EventHook<T> {
    name: &'static str,
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T> EventHook<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a listener. The same closure may be connected more than once.
    pub fn connect(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not connected.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Invoke every listener with `payload`.
    ///
    /// The listener list is snapshotted first, so listeners may connect or
    /// disconnect while being called. A panicking listener is logged and
    /// skipped; the rest still run.
    pub fn emit(&self, payload: &T) {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| listener(payload)));
            if let Err(e) = result {
                let message = e
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| e.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                tracing::error!("Listener for {} panicked: {}", self.name, message);
            }
        }
    }
}

impl<T> std::fmt::Debug for EventHook<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHook")
            .field("name", &self.name)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Events raised by [`CellManager`](crate::CellManager).
#[derive(Debug)]
pub struct CellEvents {
    pub created: EventHook<Cell>,
    pub updated: EventHook<Cell>,
    /// Payload is the cell id.
    pub deleted: EventHook<String>,
    pub converted: EventHook<Cell>,
}

impl Default for CellEvents {
    fn default() -> Self {
        Self {
            created: EventHook::new("cell.created"),
            updated: EventHook::new("cell.updated"),
            deleted: EventHook::new("cell.deleted"),
            converted: EventHook::new("cell.converted"),
        }
    }
}

/// A cell was inserted into a notebook's ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct CellAdded {
    pub notebook_id: String,
    pub cell: Cell,
    pub position: usize,
}

/// A cell left a notebook's ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRemoved {
    pub notebook_id: String,
    pub cell_id: String,
}

/// A cell changed position within a notebook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellMoved {
    pub notebook_id: String,
    pub cell_id: String,
    pub from: usize,
    pub to: usize,
}

/// Events raised by [`NotebookManager`](crate::NotebookManager).
#[derive(Debug)]
pub struct NotebookEvents {
    pub notebook_created: EventHook<Notebook>,
    pub notebook_opened: EventHook<NotebookState>,
    /// Payload is the notebook id.
    pub notebook_closed: EventHook<String>,
    pub notebook_renamed: EventHook<Notebook>,
    /// Payload is the notebook id.
    pub notebook_deleted: EventHook<String>,

    pub cell_added: EventHook<CellAdded>,
    pub cell_removed: EventHook<CellRemoved>,
    pub cell_moved: EventHook<CellMoved>,

    pub state_updated: EventHook<NotebookState>,
}

impl Default for NotebookEvents {
    fn default() -> Self {
        Self {
            notebook_created: EventHook::new("notebook.created"),
            notebook_opened: EventHook::new("notebook.opened"),
            notebook_closed: EventHook::new("notebook.closed"),
            notebook_renamed: EventHook::new("notebook.renamed"),
            notebook_deleted: EventHook::new("notebook.deleted"),
            cell_added: EventHook::new("notebook.cell_added"),
            cell_removed: EventHook::new("notebook.cell_removed"),
            cell_moved: EventHook::new("notebook.cell_moved"),
            state_updated: EventHook::new("notebook.state_updated"),
        }
    }
}

/// Events raised by [`ExecutionManager`](crate::ExecutionManager).
///
/// Emitted on worker threads; listeners that own thread-affine state must
/// hand the payload over to their own thread.
#[derive(Debug)]
pub struct ExecutionEvents {
    pub started: EventHook<ExecutionRequest>,
    pub finished: EventHook<ExecutionResult>,
    pub failed: EventHook<ExecutionResult>,
}

impl Default for ExecutionEvents {
    fn default() -> Self {
        Self {
            started: EventHook::new("execution.started"),
            finished: EventHook::new("execution.finished"),
            failed: EventHook::new("execution.failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listeners_run_in_connection_order() {
        let hook: EventHook<i32> = EventHook::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            hook.connect(move |value: &i32| seen.lock().unwrap().push((tag, *value)));
        }
        hook.emit(&7);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let hook: EventHook<()> = EventHook::new("test");
        let calls = Arc::new(AtomicU64::new(0));

        hook.connect(|_| panic!("listener failure"));
        let counter = Arc::clone(&calls);
        hook.connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        hook.emit(&());
        hook.emit(&());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(hook.listener_count(), 2);
    }

    #[test]
    fn test_disconnect() {
        let hook: EventHook<()> = EventHook::new("test");
        let id = hook.connect(|_| {});

        assert!(hook.disconnect(id));
        assert!(!hook.disconnect(id));
        assert_eq!(hook.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_disconnect_itself_during_emit() {
        let hook = Arc::new(EventHook::<()>::new("test"));
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let weak_hook = Arc::downgrade(&hook);
        let own_id = Arc::clone(&slot);
        let id = hook.connect(move |_| {
            if let (Some(hook), Some(id)) = (weak_hook.upgrade(), *own_id.lock().unwrap()) {
                hook.disconnect(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        hook.emit(&());
        assert_eq!(hook.listener_count(), 0);
    }
}
