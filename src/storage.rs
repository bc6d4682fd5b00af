//! Published document storage.
//
// A document is only ever replaced whole: written to a temporary file in the
// target directory, flushed, then renamed over the previous version, so a
// concurrent reader sees either the old or the new calendar.

use log::info;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Which published document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentSlot {
    Merged,
    Translated,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
}

/// The persistence capability the sync pipeline hands documents to.
pub trait DocumentStore: Send + Sync {
    /// Atomically replace the document in `slot`.
    fn replace(&self, slot: DocumentSlot, contents: &str) -> Result<(), StorageError>;

    /// Current document in `slot`, if one was ever written.
    fn load(&self, slot: DocumentSlot) -> Result<Option<String>, StorageError>;
}

/// Stores documents as files in one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    merged_file: String,
    translated_file: String,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, merged_file: impl Into<String>, translated_file: impl Into<String>) -> Self {
        Self { dir: dir.into(), merged_file: merged_file.into(), translated_file: translated_file.into() }
    }

    pub fn path(&self, slot: DocumentSlot) -> PathBuf {
        match slot {
            DocumentSlot::Merged => self.dir.join(&self.merged_file),
            DocumentSlot::Translated => self.dir.join(&self.translated_file),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DocumentStore for FileStore {
    fn replace(&self, slot: DocumentSlot, contents: &str) -> Result<(), StorageError> {
        let path = self.path(slot);
        let write_err = |source| StorageError::Write { path: path.clone(), source };

        fs::create_dir_all(&self.dir).map_err(write_err)?;
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        tmp.write_all(contents.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        info!("Wrote {} ({} bytes)", path.display(), contents.len());
        Ok(())
    }

    fn load(&self, slot: DocumentSlot) -> Result<Option<String>, StorageError> {
        let path = self.path(slot);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Read { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_replace_then_load() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::new(dir.path().join("data"), "calendar.ics", "calendar-fr.ics");

        assert_eq!(store.load(DocumentSlot::Merged)?, None);
        store.replace(DocumentSlot::Merged, "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n")?;
        store.replace(DocumentSlot::Merged, "second")?;

        assert_eq!(store.load(DocumentSlot::Merged)?.as_deref(), Some("second"));
        assert_eq!(store.load(DocumentSlot::Translated)?, None);
        Ok(())
    }

    #[test]
    fn test_replace_leaves_no_temp_files() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::new(dir.path(), "calendar.ics", "calendar-fr.ics");
        store.replace(DocumentSlot::Translated, "x")?;

        let names: Vec<String> = fs::read_dir(dir.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["calendar-fr.ics"]);
        Ok(())
    }
}
