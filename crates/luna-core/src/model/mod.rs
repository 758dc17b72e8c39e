//! Domain model: immutable cell and notebook records plus the cached view.

mod cell;
mod notebook;
mod patch;
mod state;
mod timestamp;

pub use cell::{Cell, CellDraft, CellOutput, CellPatch, CellType, Metadata, SCHEMA_VERSION, StreamName};
pub use notebook::{DEFAULT_TITLE, Notebook, NotebookPatch, default_notebook_metadata};
pub use patch::Patch;
pub use state::NotebookState;
pub use timestamp::{format_timestamp, now, parse_timestamp};
