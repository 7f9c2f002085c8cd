//! Server-side persistence.
//!
//! The realtime tree and the account registry are stored as JSON in the
//! data directory:
//! ```text
//! <DATA_DIR>/
//!   tree.json
//!   accounts.json
//! ```
//!
//! Writes go to a temp file first and are renamed into place.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use grocr_core::{AccountStore, Tree};
use serde::de::DeserializeOwned;
use serde::Serialize;

const TREE_FILE: &str = "tree.json";
const ACCOUNTS_FILE: &str = "accounts.json";

/// Errors that can occur during server storage operations.
#[derive(Debug)]
pub enum ServerStorageError {
    /// I/O error reading or writing a file.
    IoError(PathBuf, io::Error),
    /// The file exists but is not valid JSON for its type.
    JsonError(PathBuf, serde_json::Error),
}

impl std::fmt::Display for ServerStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            ServerStorageError::JsonError(path, e) => {
                write!(f, "Failed to parse {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ServerStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerStorageError::IoError(_, e) => Some(e),
            ServerStorageError::JsonError(_, e) => Some(e),
        }
    }
}

/// JSON file storage rooted at the server's data directory.
#[derive(Debug, Clone)]
pub struct ServerStorage {
    data_dir: PathBuf,
}

impl ServerStorage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Loads the persisted tree. Returns `Ok(None)` if nothing was saved yet.
    pub fn load_tree(&self) -> Result<Option<Tree>, ServerStorageError> {
        let value = self.read_json::<serde_json::Value>(TREE_FILE)?;
        Ok(value.map(Tree::from_value))
    }

    pub fn save_tree(&self, tree: &Tree) -> Result<(), ServerStorageError> {
        self.write_json(TREE_FILE, &tree.to_value())
    }

    /// Loads the persisted accounts. Returns `Ok(None)` if nothing was saved yet.
    pub fn load_accounts(&self) -> Result<Option<AccountStore>, ServerStorageError> {
        self.read_json(ACCOUNTS_FILE)
    }

    pub fn save_accounts(&self, accounts: &AccountStore) -> Result<(), ServerStorageError> {
        self.write_json(ACCOUNTS_FILE, accounts)
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ServerStorageError> {
        let path = self.data_dir.join(name);

        match File::open(&path) {
            Ok(mut file) => {
                let mut contents = String::new();
                file.read_to_string(&mut contents)
                    .map_err(|e| ServerStorageError::IoError(path.clone(), e))?;

                let value = serde_json::from_str(&contents)
                    .map_err(|e| ServerStorageError::JsonError(path, e))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServerStorageError::IoError(path, e)),
        }
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), ServerStorageError> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| ServerStorageError::IoError(self.data_dir.clone(), e))?;

        let path = self.data_dir.join(name);
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| ServerStorageError::JsonError(path.clone(), e))?;

        // Write atomically using temp file + rename
        let temp_path = path.with_extension("json.tmp");

        let mut file = File::create(&temp_path)
            .map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;

        file.write_all(&bytes)
            .map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;

        file.sync_all()
            .map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;

        fs::rename(&temp_path, &path).map_err(|e| ServerStorageError::IoError(path, e))?;

        Ok(())
    }
}
