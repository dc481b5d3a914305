//! Dirty file detection.
//!
//! [`detect_changes`] classifies the files of one library by fingerprint.
//! [`load_modified_files`] runs it over every cache, enforces that removed
//! libraries only lose files, and seeds the initial dirty set with the
//! neighbours of removed files.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use tessera_common::{ContentHash, Interner};

use crate::error::{ic_error, IcError};
use crate::model::{FileMap, FileMetadata, LibraryFile, SrcFile};
use crate::report::{DirtyFileState, DirtyFileStats};
use crate::store::{CacheSet, IncrementalCache};

/// Fingerprint comparison result for one library. Every list is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Present now, not cached.
    pub added: Vec<SrcFile>,
    /// Present and cached with a different fingerprint.
    pub modified: Vec<SrcFile>,
    /// Cached, no longer present.
    pub removed: Vec<SrcFile>,
    /// Present and cached with the same fingerprint.
    pub unmodified: Vec<SrcFile>,
    /// Forced names that match no present file.
    pub unknown_forced: Vec<SrcFile>,
}

#[derive(Clone, Copy)]
enum FileChange {
    Added,
    Modified,
    Unmodified,
}

/// Compares current fingerprints with the cached ones.
///
/// With `forced`, fingerprints are ignored for present files: the named
/// files are dirty and every other cached file is unmodified.
pub fn detect_changes(
    current: &BTreeMap<SrcFile, ContentHash>,
    stored: &BTreeMap<SrcFile, ContentHash>,
    forced: Option<&BTreeSet<SrcFile>>,
) -> ChangeSet {
    let classified: Vec<(SrcFile, FileChange)> = current
        .par_iter()
        .map(|(src, fingerprint)| {
            let change = match (stored.get(src), forced) {
                (None, _) => FileChange::Added,
                (Some(_), Some(forced)) if forced.contains(src) => FileChange::Modified,
                (Some(_), Some(_)) => FileChange::Unmodified,
                (Some(old), None) if old == fingerprint => FileChange::Unmodified,
                (Some(_), None) => FileChange::Modified,
            };
            (*src, change)
        })
        .collect();

    let mut changes = ChangeSet::default();
    for (src, change) in classified {
        match change {
            FileChange::Added => changes.added.push(src),
            FileChange::Modified => changes.modified.push(src),
            FileChange::Unmodified => changes.unmodified.push(src),
        }
    }
    changes.removed = stored
        .keys()
        .filter(|src| !current.contains_key(src))
        .copied()
        .collect();

    if let Some(forced) = forced {
        changes.unknown_forced = forced
            .iter()
            .filter(|src| !current.contains_key(src))
            .copied()
            .collect();
    }

    changes.added.sort();
    changes.modified.sort();
    changes.unmodified.sort();
    changes
}

/// Collects the initial dirty set over all caches.
///
/// Returns, per dirty file, the metadata it had before this run (empty for
/// added files). `forced` applies to the given library only.
pub(crate) fn load_modified_files(
    caches: &mut CacheSet,
    forced: Option<(LibraryFile, &BTreeSet<SrcFile>)>,
    stats: &mut DirtyFileStats,
    interner: &Interner,
) -> Result<FileMap<FileMetadata>, IcError> {
    let mut removed_files = FileMap::new();

    for cache in caches.removed_mut() {
        let lib = cache.library();
        let dirty = collect_dirty_files(cache, None, stats, &mut removed_files, interner);
        if let Some(src) = dirty.keys().next() {
            return Err(ic_error(interner, "unexpected dirty file", Some(lib), Some(*src)));
        }
    }

    let mut dirty_files = FileMap::new();
    for cache in caches.live_mut() {
        let lib = cache.library();
        let forced = forced.and_then(|(forced_lib, files)| (forced_lib == lib).then_some(files));
        for (src, metadata) in collect_dirty_files(cache, forced, stats, &mut removed_files, interner) {
            dirty_files.insert(lib, src, metadata);
        }
    }

    let extra = files_with_removed_dependencies(caches, &dirty_files, &removed_files, stats);
    dirty_files.extend(extra);
    Ok(dirty_files)
}

fn collect_dirty_files(
    cache: &mut IncrementalCache,
    forced: Option<&BTreeSet<SrcFile>>,
    stats: &mut DirtyFileStats,
    removed_files: &mut FileMap<FileMetadata>,
    interner: &Interner,
) -> BTreeMap<SrcFile, FileMetadata> {
    let lib = cache.library();
    let modified = cache.collect_modified_files(forced);

    for src in &modified.unknown_forced {
        tracing::warn!(
            library = lib.resolve(interner),
            file = src.resolve(interner),
            "forced dirty file is not part of the library"
        );
    }

    for src in &modified.added {
        stats.add(lib, *src, DirtyFileState::Added);
    }
    for src in modified.removed.keys() {
        stats.add(lib, *src, DirtyFileState::Removed);
    }
    for src in modified.modified.keys() {
        stats.add(lib, *src, DirtyFileState::Modified);
    }
    for src in &modified.unmodified {
        stats.add(lib, *src, DirtyFileState::NonModified);
    }

    for (src, metadata) in modified.removed {
        removed_files.insert(lib, src, metadata);
    }

    let mut dirty = modified.modified;
    dirty.extend(modified.added.into_iter().map(|src| (src, FileMetadata::default())));
    dirty
}

/// Neighbours of removed files: what they imported from becomes dirty with
/// [`DirtyFileState::RemovedInverseDependency`], what imported from them
/// with [`DirtyFileState::RemovedDirectDependency`].
fn files_with_removed_dependencies(
    caches: &CacheSet,
    dirty_files: &FileMap<FileMetadata>,
    removed_files: &FileMap<FileMetadata>,
    stats: &mut DirtyFileStats,
) -> FileMap<FileMetadata> {
    let mut extra = FileMap::new();

    let mut add = |neighbours: Vec<(LibraryFile, SrcFile)>, state: DirtyFileState| {
        for (lib, src) in neighbours {
            let Some(cache) = caches.get(lib) else {
                continue;
            };
            if !cache.has_file(src)
                || dirty_files.contains(lib, src)
                || removed_files.contains(lib, src)
                || extra.contains(lib, src)
            {
                continue;
            }
            extra.insert(lib, src, cache.fetch_full_metadata(src));
            stats.add(lib, src, state);
        }
    };

    for (_, _, metadata) in removed_files.iter() {
        add(
            metadata.direct_dependencies.keys().collect(),
            DirtyFileState::RemovedInverseDependency,
        );
        add(
            metadata.inverse_dependencies.keys().collect(),
            DirtyFileState::RemovedDirectDependency,
        );
    }

    extra
}
