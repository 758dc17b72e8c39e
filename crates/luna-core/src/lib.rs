//! Core engine for the Luna notebook application.
//!
//! This crate provides:
//! - Durable JSON document store with atomic writes
//! - Immutable cell and notebook records
//! - Synchronous event hooks
//! - Cell and notebook managers with a live notebook cache
//! - Background execution of code cells, one worker per notebook

pub mod error;
pub mod events;
pub mod execute;
pub mod manager;
pub mod model;
pub mod paths;
pub mod store;

pub use error::{Error, Result};
pub use events::{
    CellAdded, CellEvents, CellMoved, CellRemoved, EventHook, ExecutionEvents, ListenerId,
    NotebookEvents,
};
pub use execute::{
    ExecutionConfig, ExecutionEvent, ExecutionManager, ExecutionRequest, ExecutionResult,
    outputs_from_result,
};
pub use manager::{CellManager, CellUpdate, NotebookManager};
pub use model::{
    Cell, CellDraft, CellOutput, CellPatch, CellType, Metadata, Notebook, NotebookPatch,
    NotebookState, Patch, StreamName,
};
pub use paths::DataDirs;
pub use store::{DataStore, DocumentKind};

pub use luna_kernel::PlotStyle;
