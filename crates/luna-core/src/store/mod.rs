//! Durable JSON document store.
//!
//! Every document is a JSON object stored as `<id>.json` in the directory of
//! its kind. Writes go to a temp file in the same directory which is then
//! renamed over the target, so readers see either the old or the new document.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::paths::DataDirs;

/// The two document namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Cell,
    Notebook,
}

impl DocumentKind {
    /// Payload field holding the document id.
    pub fn id_field(&self) -> &'static str {
        match self {
            Self::Cell => "cell_id",
            Self::Notebook => "notebook_id",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Cell => "cell",
            Self::Notebook => "notebook",
        }
    }
}

/// File-backed store for cell and notebook documents.
#[derive(Debug, Clone)]
pub struct DataStore {
    dirs: DataDirs,
}

impl DataStore {
    /// Open a store over an existing directory layout.
    pub fn open(dirs: DataDirs) -> Result<Self> {
        fs::create_dir_all(&dirs.notebooks_dir)?;
        fs::create_dir_all(&dirs.cells_dir)?;
        Ok(Self { dirs })
    }

    /// Open a store rooted at `root`, creating the layout.
    pub fn at(root: impl AsRef<Path>) -> Result<Self> {
        Self::open(DataDirs::at(root)?)
    }

    pub fn root(&self) -> &Path {
        &self.dirs.root
    }

    pub fn dirs(&self) -> &DataDirs {
        &self.dirs
    }

    fn dir(&self, kind: DocumentKind) -> &Path {
        match kind {
            DocumentKind::Cell => &self.dirs.cells_dir,
            DocumentKind::Notebook => &self.dirs.notebooks_dir,
        }
    }

    fn path_for(&self, kind: DocumentKind, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir(kind).join(format!("{}.json", id)))
    }

    /// Persist `doc` under the id found in its id field.
    ///
    /// # Errors
    /// Fails on a missing or unusable id, or if the atomic write fails. On
    /// failure any previously stored document is left untouched.
    pub fn save(&self, kind: DocumentKind, doc: &Value) -> Result<()> {
        let id = doc
            .get(kind.id_field())
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .ok_or(Error::MissingId(kind.id_field()))?;
        let path = self.path_for(kind, id)?;

        let persist_error = |source: io::Error| Error::Persistence {
            path: path.display().to_string(),
            source,
        };

        // Dropping the temp file on any early return removes it.
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(self.dir(kind))
            .map_err(persist_error)?;
        serde_json::to_writer_pretty(&mut tmp, doc)?;
        tmp.write_all(b"\n").map_err(persist_error)?;
        tmp.as_file().sync_all().map_err(persist_error)?;
        tmp.persist(&path).map_err(|e| persist_error(e.error))?;

        tracing::trace!("Saved {} {}", kind.label(), id);
        Ok(())
    }

    /// Load a document. Missing and malformed documents are both `None`.
    pub fn load(&self, kind: DocumentKind, id: &str) -> Option<Value> {
        let path = self.path_for(kind, id).ok()?;
        read_document(&path)
    }

    pub fn exists(&self, kind: DocumentKind, id: &str) -> bool {
        self.path_for(kind, id).is_ok_and(|p| p.is_file())
    }

    /// Remove a document. Returns `false` if it did not exist.
    pub fn delete(&self, kind: DocumentKind, id: &str) -> Result<bool> {
        let path = self.path_for(kind, id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Deleted {} {}", kind.label(), id);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Ids of every stored document of `kind`, sorted.
    pub fn list_ids(&self, kind: DocumentKind) -> Vec<String> {
        let entries = match fs::read_dir(self.dir(kind)) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to list {} documents: {}", kind.label(), e);
                return Vec::new();
            }
        };

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .filter(|id| !id.starts_with('.') && validate_id(id).is_ok())
            .collect();
        ids.sort();
        ids
    }

    /// Every well-formed document of `kind`, sorted by id.
    pub fn list(&self, kind: DocumentKind) -> Vec<Value> {
        self.list_ids(kind)
            .iter()
            .filter_map(|id| self.load(kind, id))
            .collect()
    }
}

fn read_document(path: &Path) -> Option<Value> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) => {
            tracing::warn!("Ignoring {}: not a JSON object", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Ignoring malformed document {}: {}", path.display(), e);
            None
        }
    }
}

/// Ids become file names, so they must not escape the kind directory.
fn validate_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0')
        || id.contains("..");
    if bad {
        Err(Error::InvalidId(id.to_string()))
    } else {
        Ok(())
    }
}
