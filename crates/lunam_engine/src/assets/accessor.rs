//! Asset accessor
//!
//! The rendering core never touches the filesystem directly; shader sources and
//! binary blobs are read through an [`AssetAccessor`]. [`FileSystemAccessor`] is
//! the default implementation rooted at a base directory. Reads are serialized
//! through an internal lock so archive-backed implementations can share a
//! single reader.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Read access to engine assets
pub trait AssetAccessor: Send + Sync {
    /// Load a UTF-8 text asset
    fn load_txt_file(&self, path: &str) -> io::Result<String>;

    /// Load a binary asset
    fn load_bin_file(&self, path: &str) -> io::Result<Vec<u8>>;
}

/// Accessor reading assets from a directory on disk
pub struct FileSystemAccessor {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileSystemAccessor {
    /// Create an accessor resolving paths relative to `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    /// Root directory assets are resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn with_primary_lock<T>(&self, f: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f()
    }
}

impl Default for FileSystemAccessor {
    fn default() -> Self {
        Self::new(".")
    }
}

impl AssetAccessor for FileSystemAccessor {
    fn load_txt_file(&self, path: &str) -> io::Result<String> {
        let full = self.resolve(path);
        self.with_primary_lock(|| fs::read_to_string(&full))
    }

    fn load_bin_file(&self, path: &str) -> io::Result<Vec<u8>> {
        let full = self.resolve(path);
        self.with_primary_lock(|| fs::read(&full))
    }
}
