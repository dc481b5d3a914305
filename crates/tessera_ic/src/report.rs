//! Per-run dirty-state bookkeeping.
//!
//! States are attached to `(library, file)` pairs purely for diagnostics;
//! nothing in the update logic reads them back.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tessera_common::Interner;

use crate::model::{FileMap, LibraryFile, SrcFile};

/// Why a file showed up in the update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyFileState {
    /// The file has no cached state.
    Added,
    /// The file was cached but no longer exists.
    Removed,
    /// The fingerprint changed.
    Modified,
    /// The fingerprint is unchanged.
    NonModified,
    /// Signatures exported by the file changed for some dependent.
    UpdatedExports,
    /// Signatures imported by the file changed.
    UpdatedImports,
    /// A file this one imported from was removed.
    RemovedDirectDependency,
    /// A file that imported from this one was removed.
    RemovedInverseDependency,
}

impl DirtyFileState {
    /// Human-readable description.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added file",
            Self::Removed => "removed file",
            Self::Modified => "modified ir",
            Self::NonModified => "non modified ir",
            Self::UpdatedExports => "updated exports",
            Self::UpdatedImports => "updated imports",
            Self::RemovedDirectDependency => "removed direct depends",
            Self::RemovedInverseDependency => "removed inverse depends",
        }
    }
}

impl fmt::Display for DirtyFileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dirty states collected during one run, keyed by interned file.
#[derive(Debug, Clone, Default)]
pub struct DirtyFileStats {
    files: FileMap<BTreeSet<DirtyFileState>>,
}

impl DirtyFileStats {
    /// Records `state` for a file.
    pub fn add(&mut self, lib: LibraryFile, src: SrcFile, state: DirtyFileState) {
        self.files
            .get_or_insert_with(lib, src, BTreeSet::new)
            .insert(state);
    }

    /// States recorded for a file.
    pub fn states(&self, lib: LibraryFile, src: SrcFile) -> Option<&BTreeSet<DirtyFileState>> {
        self.files.get(lib, src)
    }

    /// Resolves the stats into a string-keyed report.
    pub fn to_report(&self, interner: &Interner) -> DirtyReport {
        let mut libraries: BTreeMap<String, BTreeMap<String, BTreeSet<DirtyFileState>>> =
            BTreeMap::new();
        for (lib, src, states) in self.files.iter() {
            libraries
                .entry(lib.resolve(interner).to_string())
                .or_default()
                .insert(src.resolve(interner).to_string(), states.clone());
        }
        DirtyReport { libraries }
    }
}

/// Dirty states of one run: library path -> file name -> states.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DirtyReport {
    /// Per library path.
    pub libraries: BTreeMap<String, BTreeMap<String, BTreeSet<DirtyFileState>>>,
}

impl DirtyReport {
    /// States recorded for a file.
    pub fn states(&self, library: &str, file: &str) -> Option<&BTreeSet<DirtyFileState>> {
        self.libraries.get(library)?.get(file)
    }

    /// Returns `true` if `state` was recorded for the file.
    pub fn has_state(&self, library: &str, file: &str, state: DirtyFileState) -> bool {
        self.states(library, file)
            .is_some_and(|states| states.contains(&state))
    }

    /// Every `(library, file)` pair tagged with `state`.
    pub fn files_with(&self, state: DirtyFileState) -> Vec<(&str, &str)> {
        self.libraries
            .iter()
            .flat_map(|(lib, files)| {
                files
                    .iter()
                    .filter(move |(_, states)| states.contains(&state))
                    .map(move |(file, _)| (lib.as_str(), file.as_str()))
            })
            .collect()
    }
}
