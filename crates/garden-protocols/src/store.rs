//! Persistence of the log as a single string blob.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Result;

/// Load/save contract for the persisted log.
pub trait Store {
    /// Read the blob. A store that has never been written loads as empty.
    fn load(&self) -> Result<String>;

    /// Replace the blob.
    fn save(&self, blob: &str) -> Result<()>;
}

/// Blob kept in a single file.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash mid-write leaves the previous blob intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Open a store at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Store for FileStore {
    fn load(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(blob) => Ok(blob),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, blob: &str) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory blob, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blob: Arc<Mutex<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing blob.
    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            blob: Arc::new(Mutex::new(blob.into())),
        }
    }

    /// Current contents.
    pub fn contents(&self) -> String {
        self.blob.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

impl Store for MemoryStore {
    fn load(&self) -> Result<String> {
        Ok(self.contents())
    }

    fn save(&self, blob: &str) -> Result<()> {
        if let Ok(mut current) = self.blob.lock() {
            *current = blob.to_string();
        }
        Ok(())
    }
}
