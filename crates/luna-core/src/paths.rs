//! Data directory management.
//!
//! Provides the on-disk layout shared by every store in a process:
//!
//! ```text
//! <root>/
//! ├── notebooks/  # <notebook_id>.json
//! └── cells/      # <cell_id>.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable overriding the data root.
pub const DATA_DIR_ENV: &str = "LUNA_DATA_DIR";

/// Directory name under the platform data directory.
const APP_DIR_NAME: &str = "LunaQt";

/// Fallback directory name under the home directory.
const HOME_DIR_NAME: &str = ".lunaqt";

/// Directory structure for Luna documents.
#[derive(Debug, Clone)]
pub struct DataDirs {
    /// The data root itself.
    pub root: PathBuf,

    /// Notebook documents.
    pub notebooks_dir: PathBuf,

    /// Cell documents.
    pub cells_dir: PathBuf,
}

impl DataDirs {
    /// Create the directory structure under `root`.
    ///
    /// Creates all necessary directories if they don't exist.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn at(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let notebooks_dir = root.join("notebooks");
        let cells_dir = root.join("cells");

        fs::create_dir_all(&notebooks_dir)?;
        fs::create_dir_all(&cells_dir)?;

        Ok(Self {
            root,
            notebooks_dir,
            cells_dir,
        })
    }

    /// Resolve the data root.
    ///
    /// Resolution order:
    /// 1. `explicit`, when given
    /// 2. `LUNA_DATA_DIR` environment variable
    /// 3. Platform data directory (`<data_dir>/LunaQt`)
    /// 4. `~/.lunaqt`
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(root) = explicit {
            return Self::at(root);
        }

        if let Ok(root) = std::env::var(DATA_DIR_ENV)
            && !root.trim().is_empty()
        {
            tracing::debug!("Using data root from {}: {}", DATA_DIR_ENV, root);
            return Self::at(root);
        }

        if let Some(data_dir) = dirs::data_dir() {
            return Self::at(data_dir.join(APP_DIR_NAME));
        }

        if let Some(home) = dirs::home_dir() {
            return Self::at(home.join(HOME_DIR_NAME));
        }

        Err(Error::Config(
            "could not determine a data directory; set LUNA_DATA_DIR".to_string(),
        ))
    }
}
