//! On-disk layout of the cache root.
//!
//! ```text
//! <cache dir>/version.<config hash>/<library file name>.<path hash>/
//! ```
//!
//! A compiler configuration change lands in a fresh `version.*` directory and
//! a moved library lands in a fresh library directory, so neither can reuse
//! stale data.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tessera_common::ContentHash;

use crate::error::CacheError;

/// The versioned cache root of one compiler configuration.
#[derive(Debug, Clone)]
pub struct CacheRoot {
    dir: PathBuf,
}

impl CacheRoot {
    /// Locates the root for `config_hash` under `cache_dir`. Nothing is created.
    pub fn new(cache_dir: &Path, config_hash: &ContentHash) -> Self {
        Self {
            dir: cache_dir.join(format!("version.{}", config_hash.to_base36())),
        }
    }

    /// The versioned root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name of the cache directory for the library at `path`.
    pub fn library_dir_name(path: &Path) -> String {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path_hash = ContentHash::from_bytes(path.to_string_lossy().as_bytes());
        format!("{file_name}.{}", path_hash.to_base36())
    }

    /// Cache directory of the library at `path`.
    pub fn library_dir(&self, path: &Path) -> PathBuf {
        self.dir.join(Self::library_dir_name(path))
    }

    /// Names of the library directories currently on disk, sorted.
    pub fn existing_library_dirs(&self) -> BTreeSet<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return BTreeSet::new();
        };
        entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Wipes the whole root if the library directories on disk differ from
    /// `expected`. Returns `true` if a wipe happened.
    pub fn wipe_if_library_set_changed(
        &self,
        expected: &BTreeSet<String>,
    ) -> Result<bool, CacheError> {
        let existing = self.existing_library_dirs();
        if existing.is_empty() || existing == *expected {
            return Ok(false);
        }
        tracing::warn!(
            root = %self.dir.display(),
            cached = existing.len(),
            resolved = expected.len(),
            "library set changed, wiping cache root"
        );
        std::fs::remove_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        Ok(true)
    }

    /// Library directories on disk that belong to none of the `live` names.
    pub fn stale_library_dirs(&self, live: &BTreeSet<String>) -> Vec<PathBuf> {
        self.existing_library_dirs()
            .into_iter()
            .filter(|name| !live.contains(name))
            .map(|name| self.dir.join(name))
            .collect()
    }
}

/// Removes the directory tree of a library cache that is no longer used.
pub fn remove_library_dir(dir: &Path) -> Result<(), CacheError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(dir, e)),
    }
}
