//! Per-library cache store.
//!
//! An [`IncrementalCache`] owns one library cache directory for the length
//! of a run. It keeps two metadata generations: `stored`, as loaded from
//! disk, and `updated`, built during the run. Nothing is written until
//! [`IncrementalCache::commit`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tessera_common::{ContentHash, Interner};

use crate::artifact::BlobStore;
use crate::error::{not_found_ic_error, IcError};
use crate::graph::{LibraryGraph, LibraryNode};
use crate::layout::{remove_library_dir, CacheRoot};
use crate::manifest::{FileEntry, LibraryManifest, PersistedFileMetadata, PersistedMetadata};
use crate::model::{FileMetadata, LibraryFile, Signature, SrcFile};

const METADATA_SUBDIR: &str = "metadata";
const METADATA_KEY: &str = "files";
const METADATA_EXT: &str = "bin";
const FRAGMENT_SUBDIR: &str = "fragments";
const FRAGMENT_EXT: &str = "frag";

/// Files of one library as classified against its cache.
#[derive(Debug, Default)]
pub struct ModifiedFiles {
    /// Not cached before.
    pub added: Vec<SrcFile>,
    /// Gone now, with the metadata they had.
    pub removed: BTreeMap<SrcFile, FileMetadata>,
    /// Changed, with the metadata they had.
    pub modified: BTreeMap<SrcFile, FileMetadata>,
    /// Unchanged.
    pub unmodified: Vec<SrcFile>,
    /// Forced names that match no current file.
    pub unknown_forced: Vec<SrcFile>,
}

/// Cache of one library.
#[derive(Debug)]
pub struct IncrementalCache {
    library: LibraryFile,
    library_path: PathBuf,
    module_name: String,
    dir: PathBuf,
    blobs: BlobStore,
    current: BTreeMap<SrcFile, ContentHash>,
    entries: BTreeMap<SrcFile, FileEntry>,
    stored: BTreeMap<SrcFile, FileMetadata>,
    updated: BTreeMap<SrcFile, FileMetadata>,
}

impl IncrementalCache {
    /// Opens the cache of a resolved library. A missing or unreadable cache
    /// opens empty.
    pub fn open(node: &LibraryNode, dir: PathBuf, interner: &Interner) -> Self {
        let blobs = BlobStore::new(&dir);
        let loaded = LibraryManifest::load(&dir)
            .filter(|manifest| manifest.library_path == node.path)
            .and_then(|manifest| Some((load_metadata(&blobs, interner)?, manifest)));
        let (stored, entries) = match loaded {
            Some((stored, manifest)) => (stored, intern_entries(manifest, interner)),
            None => (BTreeMap::new(), BTreeMap::new()),
        };
        Self {
            library: node.file,
            library_path: node.path.clone(),
            module_name: node.module_name.clone(),
            dir,
            blobs,
            current: node.fingerprints.clone(),
            entries,
            stored,
            updated: BTreeMap::new(),
        }
    }

    /// Opens the cache of a library that is no longer part of the graph.
    ///
    /// Every cached file of such a library is removed. Returns `None` if the
    /// cache is unreadable.
    pub fn open_removed(dir: PathBuf, interner: &Interner) -> Option<Self> {
        let blobs = BlobStore::new(&dir);
        let manifest = LibraryManifest::load(&dir)?;
        let stored = load_metadata(&blobs, interner)?;
        Some(Self {
            library: LibraryFile::intern(interner, &manifest.library_path.to_string_lossy()),
            library_path: manifest.library_path.clone(),
            module_name: manifest.module_name.clone(),
            dir,
            blobs,
            current: BTreeMap::new(),
            entries: intern_entries(manifest, interner),
            stored,
            updated: BTreeMap::new(),
        })
    }

    /// The library this cache belongs to.
    pub fn library(&self) -> LibraryFile {
        self.library
    }

    /// Module name of the library.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns `true` if the file is part of the library now.
    pub fn has_file(&self, src: SrcFile) -> bool {
        self.current.contains_key(&src)
    }

    /// Classifies the library's files against the cache.
    ///
    /// Metadata of removed files is dropped from the stored generation, so
    /// later fetches return empty metadata for them.
    pub fn collect_modified_files(&mut self, forced: Option<&BTreeSet<SrcFile>>) -> ModifiedFiles {
        let stored_fingerprints: BTreeMap<SrcFile, ContentHash> = self
            .entries
            .iter()
            .map(|(src, entry)| (*src, entry.fingerprint))
            .collect();
        let changes = crate::detector::detect_changes(&self.current, &stored_fingerprints, forced);

        let removed = changes
            .removed
            .iter()
            .map(|src| (*src, self.stored.remove(src).unwrap_or_default()))
            .collect();
        let modified = changes
            .modified
            .iter()
            .map(|src| (*src, self.fetch_full_metadata(*src)))
            .collect();

        ModifiedFiles {
            added: changes.added,
            removed,
            modified,
            unmodified: changes.unmodified,
            unknown_forced: changes.unknown_forced,
        }
    }

    /// The newest metadata generation of a file; empty if it has none.
    pub fn fetch_full_metadata(&self, src: SrcFile) -> FileMetadata {
        self.updated
            .get(&src)
            .or_else(|| self.stored.get(&src))
            .cloned()
            .unwrap_or_default()
    }

    /// Replaces the metadata of a file for the rest of the run.
    pub fn update_metadata(&mut self, src: SrcFile, metadata: FileMetadata) {
        self.updated.insert(src, metadata);
    }

    /// Describes the library's compiled output before anything is compiled.
    ///
    /// `signatures` lists the declarations of every loaded file in order;
    /// files missing from it keep their cached list. Every file outside
    /// `dirty` must have a cached fragment.
    pub fn build_artifact(
        &self,
        signatures: &BTreeMap<SrcFile, Vec<Signature>>,
        dirty: &BTreeSet<SrcFile>,
        interner: &Interner,
    ) -> Result<CacheArtifact, IcError> {
        let mut files = BTreeMap::new();
        for src in self.current.keys() {
            let entry = self.entries.get(src);
            let signatures = match signatures.get(src) {
                Some(sigs) => sigs.iter().map(|s| s.resolve(interner).to_string()).collect(),
                None => entry.map(|e| e.signatures.clone()).unwrap_or_default(),
            };
            let cached_fragment = if dirty.contains(src) {
                None
            } else {
                let key = entry
                    .and_then(|e| e.fragment_key.clone())
                    .filter(|key| self.blobs.blob_path(FRAGMENT_SUBDIR, key, FRAGMENT_EXT).is_file())
                    .ok_or_else(|| {
                        not_found_ic_error(interner, "cached fragment", Some(self.library), Some(*src))
                    })?;
                Some(key)
            };
            files.insert(
                *src,
                ArtifactFile {
                    signatures,
                    cached_fragment,
                },
            );
        }
        Ok(CacheArtifact {
            library: self.library,
            files,
        })
    }

    /// Writes fragments, metadata and manifest, then collects unreferenced
    /// fragments.
    pub fn commit(
        &self,
        artifact: CacheArtifact,
        mut rebuilt: BTreeMap<SrcFile, Vec<u8>>,
        interner: &Interner,
    ) -> Result<ModuleArtifact, IcError> {
        let mut manifest = LibraryManifest::new(&self.library_path, &self.module_name);
        let mut live = BTreeSet::new();
        let mut files = Vec::with_capacity(artifact.files.len());

        for (src, file) in artifact.files {
            let name = src.resolve(interner).to_string();
            let (key, was_rebuilt) = match (rebuilt.remove(&src), file.cached_fragment) {
                (Some(data), _) => (
                    self.blobs
                        .write_content_addressed(FRAGMENT_SUBDIR, FRAGMENT_EXT, &data)?,
                    true,
                ),
                (None, Some(key)) => (key, false),
                (None, None) => {
                    return Err(not_found_ic_error(
                        interner,
                        "compiled fragment",
                        Some(self.library),
                        Some(src),
                    ))
                }
            };
            let fingerprint = self.current.get(&src).copied().ok_or_else(|| {
                not_found_ic_error(interner, "fingerprint", Some(self.library), Some(src))
            })?;

            files.push(FileArtifact {
                name: name.clone(),
                fragment_path: self.blobs.blob_path(FRAGMENT_SUBDIR, &key, FRAGMENT_EXT),
                rebuilt: was_rebuilt,
                signature_index: file
                    .signatures
                    .iter()
                    .enumerate()
                    .map(|(i, sig)| (sig.clone(), i as u32))
                    .collect(),
            });
            manifest.files.insert(
                name,
                FileEntry {
                    fingerprint,
                    fragment_key: Some(key.clone()),
                    signatures: file.signatures,
                },
            );
            live.insert(key);
        }

        if let Some(src) = rebuilt.keys().next() {
            return Err(crate::error::ic_error(
                interner,
                "compiled fragment for a file unknown to the cache",
                Some(self.library),
                Some(*src),
            ));
        }

        let mut persisted = PersistedMetadata::default();
        for src in self.current.keys() {
            let Some(metadata) = self.updated.get(src).or_else(|| self.stored.get(src)) else {
                continue;
            };
            if !metadata.is_empty() {
                persisted.files.insert(
                    src.resolve(interner).to_string(),
                    PersistedFileMetadata::from_metadata(metadata, interner),
                );
            }
        }
        self.blobs
            .write(METADATA_SUBDIR, METADATA_KEY, METADATA_EXT, &persisted.encode()?)?;
        manifest.save(&self.dir)?;

        let collected = self.blobs.gc(FRAGMENT_SUBDIR, FRAGMENT_EXT, &live)?;
        tracing::debug!(
            library = %self.module_name,
            files = files.len(),
            collected,
            "committed library cache"
        );

        Ok(ModuleArtifact {
            library_path: self.library_path.clone(),
            module_name: self.module_name.clone(),
            files,
        })
    }
}

fn load_metadata(blobs: &BlobStore, interner: &Interner) -> Option<BTreeMap<SrcFile, FileMetadata>> {
    let bytes = blobs.read(METADATA_SUBDIR, METADATA_KEY, METADATA_EXT)?;
    let persisted = PersistedMetadata::decode(&bytes)?;
    Some(
        persisted
            .files
            .into_iter()
            .map(|(name, metadata)| (SrcFile::intern(interner, &name), metadata.into_metadata(interner)))
            .collect(),
    )
}

fn intern_entries(manifest: LibraryManifest, interner: &Interner) -> BTreeMap<SrcFile, FileEntry> {
    manifest
        .files
        .into_iter()
        .map(|(name, entry)| (SrcFile::intern(interner, &name), entry))
        .collect()
}

/// One file of a [`CacheArtifact`].
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    /// Declared signatures; the position is the signature index.
    pub signatures: Vec<String>,
    /// Key of the reusable fragment, `None` for files being recompiled.
    pub cached_fragment: Option<String>,
}

/// What a library's module artifact will consist of.
#[derive(Debug, Clone)]
pub struct CacheArtifact {
    /// The library.
    pub library: LibraryFile,
    /// Every current file of the library.
    pub files: BTreeMap<SrcFile, ArtifactFile>,
}

impl CacheArtifact {
    /// Source files known to the cache.
    pub fn source_files(&self) -> impl Iterator<Item = SrcFile> + '_ {
        self.files.keys().copied()
    }

    /// Returns `true` if the cache knows the file.
    pub fn contains(&self, src: SrcFile) -> bool {
        self.files.contains_key(&src)
    }
}

/// One compiled file of a [`ModuleArtifact`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FileArtifact {
    /// Source file name.
    pub name: String,
    /// Location of the committed fragment blob.
    pub fragment_path: PathBuf,
    /// `true` if the fragment was produced by this run.
    pub rebuilt: bool,
    /// Signature to index mapping of the file's declarations.
    pub signature_index: BTreeMap<String, u32>,
}

/// The linkable output of one library.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ModuleArtifact {
    /// Canonical library path.
    pub library_path: PathBuf,
    /// Module name.
    pub module_name: String,
    /// Every file, sorted by interned key.
    pub files: Vec<FileArtifact>,
}

impl ModuleArtifact {
    /// Looks up a file by name.
    pub fn file(&self, name: &str) -> Option<&FileArtifact> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Names of the files compiled by this run, sorted.
    pub fn rebuilt_files(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .files
            .iter()
            .filter(|f| f.rebuilt)
            .map(|f| f.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Every cache of a run: one per resolved library plus the caches of
/// libraries that disappeared.
#[derive(Debug)]
pub struct CacheSet {
    live: BTreeMap<LibraryFile, IncrementalCache>,
    removed: Vec<IncrementalCache>,
    stale_dirs: Vec<PathBuf>,
}

impl CacheSet {
    /// Opens a cache per library of `graph`. With `keep_stale`, library
    /// directories on disk that match no resolved library are opened as
    /// removed libraries.
    pub fn open(
        graph: &LibraryGraph,
        root: &CacheRoot,
        keep_stale: bool,
        interner: &Interner,
    ) -> Self {
        let live = graph
            .libraries()
            .iter()
            .map(|node| {
                let dir = root.library_dir(&node.path);
                (node.file, IncrementalCache::open(node, dir, interner))
            })
            .collect();

        let mut removed = Vec::new();
        let mut stale_dirs = Vec::new();
        if keep_stale {
            let names: BTreeSet<String> = graph
                .libraries()
                .iter()
                .map(|node| CacheRoot::library_dir_name(&node.path))
                .collect();
            for dir in root.stale_library_dirs(&names) {
                match IncrementalCache::open_removed(dir.clone(), interner) {
                    Some(cache) => removed.push(cache),
                    None => tracing::debug!(dir = %dir.display(), "unreadable stale library cache"),
                }
                stale_dirs.push(dir);
            }
        }

        Self {
            live,
            removed,
            stale_dirs,
        }
    }

    /// Cache of a resolved library.
    pub fn get(&self, lib: LibraryFile) -> Option<&IncrementalCache> {
        self.live.get(&lib)
    }

    /// Cache of a resolved library, failing if there is none.
    pub fn require(&self, lib: LibraryFile, interner: &Interner) -> Result<&IncrementalCache, IcError> {
        self.live
            .get(&lib)
            .ok_or_else(|| not_found_ic_error(interner, "incremental cache", Some(lib), None))
    }

    /// Mutable cache of a resolved library, failing if there is none.
    pub fn require_mut(
        &mut self,
        lib: LibraryFile,
        interner: &Interner,
    ) -> Result<&mut IncrementalCache, IcError> {
        self.live
            .get_mut(&lib)
            .ok_or_else(|| not_found_ic_error(interner, "incremental cache", Some(lib), None))
    }

    /// Caches of resolved libraries.
    pub fn live_mut(&mut self) -> impl Iterator<Item = &mut IncrementalCache> {
        self.live.values_mut()
    }

    /// Caches of removed libraries.
    pub fn removed_mut(&mut self) -> impl Iterator<Item = &mut IncrementalCache> {
        self.removed.iter_mut()
    }

    /// Deletes the directories of removed libraries.
    pub fn delete_stale(&self) -> Result<(), IcError> {
        for dir in &self.stale_dirs {
            tracing::debug!(dir = %dir.display(), "deleting removed library cache");
            remove_library_dir(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(interner: &Interner, files: &[(&str, &str)]) -> LibraryNode {
        LibraryNode {
            file: LibraryFile::intern(interner, "/libs/a.klib"),
            path: PathBuf::from("/libs/a.klib"),
            module_name: "a".to_string(),
            dependencies: Vec::new(),
            fingerprints: files
                .iter()
                .map(|(name, content)| {
                    (
                        SrcFile::intern(interner, name),
                        ContentHash::from_bytes(content.as_bytes()),
                    )
                })
                .collect(),
        }
    }

    fn commit_all(cache: &IncrementalCache, interner: &Interner) -> ModuleArtifact {
        let dirty: BTreeSet<SrcFile> = cache.current.keys().copied().collect();
        let artifact = cache
            .build_artifact(&BTreeMap::new(), &dirty, interner)
            .unwrap();
        let fragments = dirty
            .iter()
            .map(|src| (*src, src.resolve(interner).as_bytes().to_vec()))
            .collect();
        cache.commit(artifact, fragments, interner).unwrap()
    }

    #[test]
    fn cold_cache_adds_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let interner = Interner::new();
        let mut cache = IncrementalCache::open(
            &node(&interner, &[("x.kt", "x"), ("y.kt", "y")]),
            dir.path().join("a"),
            &interner,
        );
        let modified = cache.collect_modified_files(None);
        assert_eq!(modified.added.len(), 2);
        assert!(modified.modified.is_empty());
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn committed_metadata_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let interner = Interner::new();
        let lib_node = node(&interner, &[("x.kt", "x"), ("y.kt", "y")]);
        let x = SrcFile::intern(&interner, "x.kt");
        let y = SrcFile::intern(&interner, "y.kt");
        let sig = Signature::intern(&interner, "foo");

        let mut cache = IncrementalCache::open(&lib_node, dir.path().join("a"), &interner);
        let mut metadata = FileMetadata::default();
        metadata.add_inverse_dependency(lib_node.file, y, sig);
        cache.update_metadata(x, metadata.clone());
        let module = commit_all(&cache, &interner);
        assert_eq!(module.rebuilt_files(), vec!["x.kt", "y.kt"]);

        let mut reopened = IncrementalCache::open(&lib_node, dir.path().join("a"), &interner);
        assert_eq!(reopened.fetch_full_metadata(x), metadata);
        assert!(reopened.fetch_full_metadata(y).is_empty());
        let modified = reopened.collect_modified_files(None);
        assert_eq!(modified.unmodified.len(), 2);
    }

    #[test]
    fn unchanged_files_reuse_their_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let interner = Interner::new();
        let lib_node = node(&interner, &[("x.kt", "x")]);
        let x = SrcFile::intern(&interner, "x.kt");
        let first = commit_all(
            &IncrementalCache::open(&lib_node, dir.path().join("a"), &interner),
            &interner,
        );

        let cache = IncrementalCache::open(&lib_node, dir.path().join("a"), &interner);
        let signatures = BTreeMap::from([(x, vec![Signature::intern(&interner, "foo")])]);
        let artifact = cache
            .build_artifact(&signatures, &BTreeSet::new(), &interner)
            .unwrap();
        let module = cache.commit(artifact, BTreeMap::new(), &interner).unwrap();
        assert!(module.rebuilt_files().is_empty());
        let file = module.file("x.kt").unwrap();
        assert_eq!(file.fragment_path, first.files[0].fragment_path);
        assert_eq!(file.signature_index["foo"], 0);
    }

    #[test]
    fn missing_fragment_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let interner = Interner::new();
        let lib_node = node(&interner, &[("x.kt", "x")]);
        let first = commit_all(
            &IncrementalCache::open(&lib_node, dir.path().join("a"), &interner),
            &interner,
        );
        std::fs::remove_file(&first.files[0].fragment_path).unwrap();

        let cache = IncrementalCache::open(&lib_node, dir.path().join("a"), &interner);
        let err = cache
            .build_artifact(&BTreeMap::new(), &BTreeSet::new(), &interner)
            .unwrap_err();
        assert!(err.to_string().contains("can not find cached fragment"));
    }

    #[test]
    fn removed_files_lose_their_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let interner = Interner::new();
        let lib_node = node(&interner, &[("x.kt", "x"), ("y.kt", "y")]);
        let x = SrcFile::intern(&interner, "x.kt");
        let y = SrcFile::intern(&interner, "y.kt");

        let mut cache = IncrementalCache::open(&lib_node, dir.path().join("a"), &interner);
        let mut metadata = FileMetadata::default();
        metadata.add_inverse_dependency(lib_node.file, x, Signature::intern(&interner, "bar"));
        cache.update_metadata(y, metadata.clone());
        commit_all(&cache, &interner);

        let shrunk = node(&interner, &[("x.kt", "x")]);
        let mut cache = IncrementalCache::open(&shrunk, dir.path().join("a"), &interner);
        let modified = cache.collect_modified_files(None);
        assert_eq!(modified.removed.get(&y), Some(&metadata));
        assert!(cache.fetch_full_metadata(y).is_empty());
    }

    #[test]
    fn removed_library_cache_opens_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let interner = Interner::new();
        let lib_node = node(&interner, &[("x.kt", "x")]);
        commit_all(
            &IncrementalCache::open(&lib_node, dir.path().join("a"), &interner),
            &interner,
        );

        let mut removed = IncrementalCache::open_removed(dir.path().join("a"), &interner).unwrap();
        assert_eq!(removed.library(), lib_node.file);
        let modified = removed.collect_modified_files(None);
        assert_eq!(modified.removed.len(), 1);
        assert!(modified.added.is_empty() && modified.modified.is_empty());

        assert!(IncrementalCache::open_removed(Path::new("/nonexistent").to_path_buf(), &interner).is_none());
    }
}
