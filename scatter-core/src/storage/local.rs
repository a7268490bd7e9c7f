use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{StorageBackend, StorageError, StorageResult};

/// Stores each blob as a file under `root`.
pub struct LocalDirBackend {
    name: String,
    root: PathBuf,
}

impl LocalDirBackend {
    pub fn new(name: impl Into<String>, root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            name: name.into(),
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        // keys are flat names; refuse anything that could escape the root
        if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid object key '{key}'"),
            )));
        }
        Ok(self.root.join(key))
    }
}

impl StorageBackend for LocalDirBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let dst = self.object_path(key)?;
        // write-then-rename so a retried put never leaves a torn object
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dst).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let src = self.object_path(key)?;
        match fs::read(&src) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
