//! Path-addressable byte storage
//!
//! The store never touches the filesystem directly; it goes through a
//! [`Backend`]. Paths are `/`-separated and relative to the backend root.
//!
//! Two implementations are provided:
//! - [`LocalBackend`]: a directory on the local filesystem
//! - [`MemoryBackend`]: an in-process map, mostly useful for tests

use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Abstract path-addressable byte store
pub trait Backend: fmt::Debug + Send + Sync {
    /// Read the full contents of a file
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a file, replacing any previous contents
    fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Delete a single file
    fn delete(&self, path: &str) -> Result<()>;

    /// Recursively delete a directory tree
    fn delete_tree(&self, path: &str) -> Result<()>;

    /// Whether a file or directory exists at `path`
    fn exists(&self, path: &str) -> bool;

    /// Whether `path` is a directory
    fn is_dir(&self, path: &str) -> bool;

    /// List every file whose path starts with `prefix`
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Create a directory and all of its parents
    fn create_dir_all(&self, path: &str) -> Result<()>;

    /// Human readable location, for logs and errors
    fn describe(&self, path: &str) -> String;
}

/// A path inside a backend, handed to serializers as their source/destination
#[derive(Clone, Copy)]
pub struct Location<'a> {
    backend: &'a dyn Backend,
    path: &'a str,
}

impl<'a> Location<'a> {
    /// Point at `path` within `backend`
    #[must_use]
    pub fn new(backend: &'a dyn Backend, path: &'a str) -> Self {
        Self { backend, path }
    }

    /// The path relative to the backend root
    #[must_use]
    pub fn path(&self) -> &str {
        self.path
    }

    /// The backend holding this location
    #[must_use]
    pub fn backend(&self) -> &'a dyn Backend {
        self.backend
    }

    /// Read the file at this location
    pub fn read(&self) -> Result<Vec<u8>> {
        self.backend.read(self.path)
    }

    /// Write the file at this location
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.backend.write(self.path, data)
    }

    /// Path of a child entry, for directory-tree encodings
    #[must_use]
    pub fn child_path(&self, name: &str) -> String {
        join(self.path, name)
    }

    /// Read a child file
    pub fn read_child(&self, name: &str) -> Result<Vec<u8>> {
        self.backend.read(&self.child_path(name))
    }

    /// Write a child file
    pub fn write_child(&self, name: &str, data: &[u8]) -> Result<()> {
        self.backend.write(&self.child_path(name), data)
    }
}

impl fmt::Debug for Location<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({})", self.backend.describe(self.path))
    }
}

/// Join two `/`-separated path fragments
#[must_use]
pub fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

/// Parent of a `/`-separated path, if any
#[must_use]
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Local filesystem backend rooted at a directory
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`; the directory is created lazily
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute filesystem path for a backend path
    #[must_use]
    pub fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }
}

impl Backend for LocalBackend {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        fs::read(&full).map_err(|e| Error::io(e, &full, "read"))
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        let dir = full.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create_dir_all"))?;

        // Write to a sibling temp file and rename into place
        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| Error::io(e, &dir, "create"))?;
        tmp.write_all(data)
            .map_err(|e| Error::io(e, tmp.path(), "write"))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::io(e, tmp.path(), "sync"))?;
        tmp.persist(&full)
            .map_err(|e| Error::io(e.error, &full, "rename"))?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        fs::remove_file(&full).map_err(|e| Error::io(e, &full, "remove_file"))
    }

    fn delete_tree(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        fs::remove_dir_all(&full).map_err(|e| Error::io(e, &full, "remove_dir_all"))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).is_dir()
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut files = Vec::new();
        if !self.root.exists() {
            return Ok(files);
        }
        for entry in walkdir::WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf);
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                match path {
                    Some(p) => Error::io(source, p, "read_dir"),
                    None => Error::io_no_path(source, "read_dir"),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if rel.starts_with(prefix) {
                files.push(rel);
            }
        }
        files.sort();
        Ok(files)
    }

    fn create_dir_all(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        fs::create_dir_all(&full).map_err(|e| Error::io(e, &full, "create_dir_all"))
    }

    fn describe(&self, path: &str) -> String {
        self.resolve(path).display().to_string()
    }
}

/// In-memory backend; directories exist implicitly while they hold files
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files held
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Whether the backend holds no files
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    fn not_found(path: &str, operation: &str) -> Error {
        Error::io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such entry"),
            Path::new(path),
            operation,
        )
    }
}

impl Backend for MemoryBackend {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| Self::not_found(path, "read"))
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.files.write().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.files
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(path, "remove_file"))
    }

    fn delete_tree(&self, path: &str) -> Result<()> {
        let dir = format!("{}/", path.trim_end_matches('/'));
        let mut files = self.files.write();
        let before = files.len();
        files.retain(|k, _| !k.starts_with(&dir));
        if files.len() == before {
            return Err(Self::not_found(path, "remove_dir_all"));
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        let files = self.files.read();
        files.contains_key(path) || {
            let dir = format!("{}/", path.trim_end_matches('/'));
            files.keys().any(|k| k.starts_with(&dir))
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        let files = self.files.read();
        let dir = format!("{}/", path.trim_end_matches('/'));
        !files.contains_key(path) && files.keys().any(|k| k.starts_with(&dir))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .files
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn create_dir_all(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    fn describe(&self, path: &str) -> String {
        format!("memory://{path}")
    }
}
