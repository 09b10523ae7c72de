use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("script resource '{0}' not found")]
    NotFound(String),
    #[error("reading script resource '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Provides raw script text for a named resource.
pub trait ScriptLoader {
    fn load(&self, path: &str) -> Result<String, LoaderError>;

    /// Filesystem location backing `path`, if any. Used to map watcher events back to classes.
    fn resolve(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }
}

impl ScriptLoader for FsLoader {
    fn load(&self, path: &str) -> Result<String, LoaderError> {
        let full = self.full_path(path);
        match fs::read_to_string(&full) {
            Ok(source) => Ok(source),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(LoaderError::NotFound(path.to_string())),
            Err(source) => Err(LoaderError::Read { path: path.to_string(), source }),
        }
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let full = self.full_path(path);
        Some(fs::canonicalize(&full).unwrap_or(full))
    }
}

/// In-memory script store. Clones share the same sources so a host can edit scripts after handing
/// the loader to a runtime.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    sources: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.set(path, source);
        self
    }

    pub fn set(&self, path: impl Into<String>, source: impl Into<String>) {
        self.sources.borrow_mut().insert(path.into(), source.into());
    }

    pub fn remove(&self, path: &str) -> bool {
        self.sources.borrow_mut().remove(path).is_some()
    }
}

impl ScriptLoader for MemoryLoader {
    fn load(&self, path: &str) -> Result<String, LoaderError> {
        self.sources.borrow().get(path).cloned().ok_or_else(|| LoaderError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fs_loader_reads_relative_to_root() {
        let dir = tempdir().expect("temp dir");
        fs::write(dir.path().join("ping.rhai"), "fn OnPing() { 42 }").expect("write script");
        let loader = FsLoader::new(dir.path());
        assert_eq!(loader.load("ping.rhai").expect("load script"), "fn OnPing() { 42 }");
        assert!(loader.resolve("ping.rhai").expect("resolved path").ends_with("ping.rhai"));
    }

    #[test]
    fn fs_loader_reports_missing_files() {
        let dir = tempdir().expect("temp dir");
        let loader = FsLoader::new(dir.path());
        let err = loader.load("missing.rhai").unwrap_err();
        assert!(matches!(err, LoaderError::NotFound(ref path) if path == "missing.rhai"));
    }

    #[test]
    fn memory_loader_clones_share_sources() {
        let loader = MemoryLoader::new().with_script("a.rhai", "1");
        let shared = loader.clone();
        shared.set("a.rhai", "2");
        assert_eq!(loader.load("a.rhai").expect("load"), "2");
        assert!(shared.remove("a.rhai"));
        assert!(loader.load("a.rhai").is_err());
    }
}
