use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::warn;

/// The database holding users and roles, never restored over the target.
pub const ADMIN_DATABASE: &str = "admin";

/// A dump staged on disk, one directory per database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSet {
    /// The staging directory.
    pub root: PathBuf,

    /// The databases to restore, sorted by name, without the admin database.
    pub databases: Vec<String>,
}

impl BackupSet {
    /// Remove anything staged at `root`. Returns if something was removed.
    pub fn clear(root: &Path) -> Result<bool, StagingError> {
        let metadata = match fs::symlink_metadata(root) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(false),
            Err(error) => return Err(StagingError::Inspect(error, root.to_path_buf())),
        };

        if metadata.is_dir() {
            fs::remove_dir_all(root)
        } else {
            fs::remove_file(root)
        }
        .map_err(|error| StagingError::Remove(error, root.to_path_buf()))?;

        Ok(true)
    }

    /// Find the restorable databases staged at `root`.
    pub fn discover(root: &Path) -> Result<Self, StagingError> {
        let directory = fs::read_dir(root).map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                StagingError::Missing(root.to_path_buf())
            } else {
                StagingError::Read(error, root.to_path_buf())
            }
        })?;

        let mut databases = Vec::new();
        for entry in directory {
            let entry = entry.map_err(|error| StagingError::Read(error, root.to_path_buf()))?;
            let path = entry.path();

            let file_type = entry
                .file_type()
                .map_err(|error| StagingError::Read(error, path.clone()))?;
            if !file_type.is_dir() {
                continue;
            }

            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    warn!("Skipping staged directory with a non UTF-8 name: {name:?}");
                    continue;
                }
            };

            if name == ADMIN_DATABASE {
                continue;
            }

            databases.push(name);
        }

        databases.sort();

        Ok(Self {
            root: root.to_path_buf(),
            databases,
        })
    }

    /// The staged directory of a database.
    pub fn database_path(&self, database: &str) -> PathBuf {
        self.root.join(database)
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Failed to inspect {1:?}: {0}")]
    Inspect(#[source] io::Error, PathBuf),

    #[error("Failed to remove {1:?}: {0}")]
    Remove(#[source] io::Error, PathBuf),

    #[error("Failed to read {1:?}: {0}")]
    Read(#[source] io::Error, PathBuf),

    #[error("The backup directory {0:?} does not exist")]
    Missing(PathBuf),
}
