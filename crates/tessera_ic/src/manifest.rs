//! What a library cache directory persists between runs.
//!
//! `manifest.json` records the library identity and, per source file, its
//! fingerprint, the key of its compiled fragment and the signatures it
//! declares. The per-file dependency metadata is larger and lives in a
//! binary blob next to it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessera_common::{ContentHash, Interner};

use crate::error::CacheError;
use crate::model::{FileMetadata, LibraryFile, Signature, SrcFile};

/// Name of the manifest file within a library cache directory.
const MANIFEST_FILE: &str = "manifest.json";

/// Bump when the manifest layout changes.
const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Per-library cache manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryManifest {
    /// Layout version; other versions load as a cache miss.
    pub format_version: u32,
    /// Canonical path of the library when the cache was written.
    pub library_path: PathBuf,
    /// Module name of the library.
    pub module_name: String,
    /// Per-source-file state, keyed by source file name.
    pub files: BTreeMap<String, FileEntry>,
}

/// Cached state of one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Fingerprint observed when the file was last cached.
    pub fingerprint: ContentHash,
    /// Key of the compiled fragment, once one has been committed.
    pub fragment_key: Option<String>,
    /// Signatures declared by the file; the position is the signature index.
    #[serde(default)]
    pub signatures: Vec<String>,
}

impl LibraryManifest {
    /// Creates an empty manifest.
    pub fn new(library_path: &Path, module_name: &str) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            library_path: library_path.to_path_buf(),
            module_name: module_name.to_string(),
            files: BTreeMap::new(),
        }
    }

    /// Loads the manifest from `cache_dir`.
    ///
    /// Returns `None` if it is missing, unreadable or of another format
    /// version.
    pub fn load(cache_dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(cache_dir.join(MANIFEST_FILE)).ok()?;
        let manifest: Self = serde_json::from_str(&content).ok()?;
        (manifest.format_version == MANIFEST_FORMAT_VERSION).then_some(manifest)
    }

    /// Saves the manifest, creating `cache_dir` if needed.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::io(cache_dir, e))?;
        let path = cache_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        std::fs::write(&path, json).map_err(|e| CacheError::io(&path, e))
    }
}

/// Dependency metadata of every file of a library, in string-keyed form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedMetadata {
    /// Per source file name.
    pub files: BTreeMap<String, PersistedFileMetadata>,
}

/// String-keyed form of [`FileMetadata`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedFileMetadata {
    /// library -> file -> signature -> hash
    pub direct: BTreeMap<String, BTreeMap<String, BTreeMap<String, ContentHash>>>,
    /// library -> file -> signatures
    pub inverse: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl PersistedFileMetadata {
    /// Converts interned metadata into its persisted form.
    pub fn from_metadata(metadata: &FileMetadata, interner: &Interner) -> Self {
        let mut direct: BTreeMap<String, BTreeMap<String, BTreeMap<String, ContentHash>>> =
            BTreeMap::new();
        for (lib, src, sigs) in metadata.direct_dependencies.iter() {
            let entry = direct
                .entry(lib.resolve(interner).to_string())
                .or_default()
                .entry(src.resolve(interner).to_string())
                .or_default();
            for (sig, hash) in sigs {
                entry.insert(sig.resolve(interner).to_string(), *hash);
            }
        }

        let mut inverse: BTreeMap<String, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();
        for (lib, src, sigs) in metadata.inverse_dependencies.iter() {
            inverse
                .entry(lib.resolve(interner).to_string())
                .or_default()
                .entry(src.resolve(interner).to_string())
                .or_default()
                .extend(sigs.iter().map(|sig| sig.resolve(interner).to_string()));
        }

        Self { direct, inverse }
    }

    /// Interns the persisted form back into [`FileMetadata`].
    pub fn into_metadata(self, interner: &Interner) -> FileMetadata {
        let mut metadata = FileMetadata::default();
        for (lib, files) in self.direct {
            let lib = LibraryFile::intern(interner, &lib);
            for (src, sigs) in files {
                let src = SrcFile::intern(interner, &src);
                let entry = metadata
                    .direct_dependencies
                    .get_or_insert_with(lib, src, BTreeMap::new);
                for (sig, hash) in sigs {
                    entry.insert(Signature::intern(interner, &sig), hash);
                }
            }
        }
        for (lib, files) in self.inverse {
            let lib = LibraryFile::intern(interner, &lib);
            for (src, sigs) in files {
                let src = SrcFile::intern(interner, &src);
                metadata
                    .inverse_dependencies
                    .get_or_insert_with(lib, src, BTreeSet::new)
                    .extend(sigs.iter().map(|sig| Signature::intern(interner, sig)));
            }
        }
        metadata
    }
}

impl PersistedMetadata {
    /// Encodes the metadata with bincode.
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard()).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })
    }

    /// Decodes bincode-encoded metadata. Returns `None` on malformed input.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .ok()
            .map(|(metadata, _)| metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata(interner: &Interner) -> FileMetadata {
        let lib = LibraryFile::intern(interner, "/libs/b.klib");
        let src = SrcFile::intern(interner, "b.kt");
        let sig = Signature::intern(interner, "foo#v1");
        let mut metadata = FileMetadata::default();
        metadata.add_direct_dependency(lib, src, sig, ContentHash::from_bytes(b"foo"));
        metadata.add_inverse_dependency(lib, src, Signature::intern(interner, "bar"));
        metadata
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = LibraryManifest::new(Path::new("/libs/a.klib"), "a");
        manifest.files.insert(
            "a.kt".to_string(),
            FileEntry {
                fingerprint: ContentHash::from_bytes(b"a.kt"),
                fragment_key: Some("abc".to_string()),
                signatures: vec!["foo".to_string()],
            },
        );
        manifest.save(dir.path()).unwrap();
        let loaded = LibraryManifest::load(dir.path()).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn load_missing_or_corrupt_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LibraryManifest::load(dir.path()).is_none());
        std::fs::write(dir.path().join(MANIFEST_FILE), "{ not json").unwrap();
        assert!(LibraryManifest::load(dir.path()).is_none());
    }

    #[test]
    fn other_format_version_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = LibraryManifest::new(Path::new("/libs/a.klib"), "a");
        manifest.format_version = MANIFEST_FORMAT_VERSION + 1;
        manifest.save(dir.path()).unwrap();
        assert!(LibraryManifest::load(dir.path()).is_none());
    }

    #[test]
    fn save_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("version.x").join("a.klib.1");
        LibraryManifest::new(Path::new("/libs/a.klib"), "a")
            .save(&nested)
            .unwrap();
        assert!(nested.join(MANIFEST_FILE).exists());
    }

    #[test]
    fn metadata_survives_a_fresh_interner() {
        let interner = Interner::new();
        let metadata = sample_metadata(&interner);
        let mut persisted = PersistedMetadata::default();
        persisted.files.insert(
            "a.kt".to_string(),
            PersistedFileMetadata::from_metadata(&metadata, &interner),
        );
        let bytes = persisted.encode().unwrap();

        let fresh = Interner::new();
        fresh.get_or_intern("unrelated");
        let decoded = PersistedMetadata::decode(&bytes).unwrap();
        let back = decoded.files["a.kt"].clone().into_metadata(&fresh);
        let lib = LibraryFile::intern(&fresh, "/libs/b.klib");
        let src = SrcFile::intern(&fresh, "b.kt");
        let sig = Signature::intern(&fresh, "foo#v1");
        assert_eq!(
            back.direct_dependencies.get(lib, src).unwrap()[&sig],
            ContentHash::from_bytes(b"foo")
        );
        assert!(back.exported_signatures().contains(&Signature::intern(&fresh, "bar")));
    }

    #[test]
    fn decode_garbage_is_none() {
        assert!(PersistedMetadata::decode(&[0xff, 0xff, 0xff]).is_none());
    }
}
