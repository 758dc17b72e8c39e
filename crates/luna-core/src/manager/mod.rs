//! Synchronous managers for cells and notebooks.

mod cell;
mod notebook;

pub use cell::{CellManager, CellUpdate};
pub use notebook::NotebookManager;
