//! Export/import propagation to a fixpoint.
//!
//! One iteration takes the files rebuilt in it (D), rebuilds their metadata
//! from the loaded IR, re-links the edges of their neighbours, and returns
//! the files that must be rebuilt next (D'). A file is rebuilt at most once
//! per run, so the loop terminates.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tessera_common::Interner;

use crate::error::{missing_hash_error, not_found_ic_error, IcError};
use crate::frontend::{LoadRequest, LoadedFile, LoadedFragment, LoadedIr};
use crate::model::{
    DirectDependencies, FileMap, FileMetadata, InverseDependencies, LibraryFile, Signature,
    SrcFile,
};
use crate::report::{DirtyFileState, DirtyFileStats};
use crate::signature_hash::{SignatureHashCalculator, SignatureSource};
use crate::store::CacheSet;

/// What a dirty file must keep exporting, per dependent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileExports {
    /// dependent file -> signatures it imports from this file
    pub inverse_dependencies: InverseDependencies,
}

impl FileExports {
    /// Every signature some dependent imports.
    pub fn exported_signatures(&self) -> BTreeSet<Signature> {
        self.inverse_dependencies
            .iter()
            .flat_map(|(_, _, sigs)| sigs.iter().copied())
            .collect()
    }
}

/// Dirty files with their required exports.
pub type DirtyFiles = FileMap<FileExports>;

/// Builds the loader request for a set of dirty files.
pub fn load_request(dirty: &DirtyFiles) -> LoadRequest {
    dirty.map_values(FileExports::exported_signatures)
}

/// Metadata of a file rebuilt in the current iteration.
#[derive(Debug, Clone, Default)]
pub struct DirtyFileMetadata {
    /// Referenced signatures the file does not declare itself.
    pub maybe_imported: BTreeSet<Signature>,
    /// Direct dependencies before the rebuild.
    pub old_direct_dependencies: DirectDependencies,
    /// The rebuilt generation.
    pub metadata: FileMetadata,
}

impl DirtyFileMetadata {
    pub(crate) fn new(file: &LoadedFile, old_direct_dependencies: DirectDependencies) -> Self {
        let declared: HashSet<Signature> = file.declarations.iter().map(|d| d.signature).collect();
        Self {
            maybe_imported: file
                .references
                .iter()
                .filter(|sig| !declared.contains(sig))
                .copied()
                .collect(),
            old_direct_dependencies,
            metadata: FileMetadata::default(),
        }
    }
}

/// How the imports of a neighbour of a dirty file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    /// Not classified yet.
    Unknown,
    /// Some imported hash changed; the file must be rebuilt.
    Modified,
    /// Only the imported signature set changed, hashes are the same.
    NonModified,
}

/// Patched metadata of a file next to a dirty file.
#[derive(Debug, Clone)]
pub struct UpdatedDependenciesMetadata {
    old_exported: BTreeSet<Signature>,
    /// Metadata with the patched edges.
    pub metadata: FileMetadata,
    /// Classification of the file's imports.
    pub import_state: ImportState,
}

impl UpdatedDependenciesMetadata {
    /// Starts from the file's current metadata.
    pub fn new(metadata: FileMetadata) -> Self {
        Self {
            old_exported: metadata.exported_signatures(),
            metadata,
            import_state: ImportState::Unknown,
        }
    }

    /// Returns `true` if the set of signatures the file exports changed.
    pub fn exports_updated(&self) -> bool {
        self.old_exported != self.metadata.exported_signatures()
    }
}

/// Indexes every declaration of the loaded program by signature.
pub(crate) fn collect_signature_sources(ir: &LoadedIr) -> HashMap<Signature, SignatureSource<'_>> {
    let mut sources = HashMap::new();
    for (lib, fragment) in &ir.fragments {
        add_fragment_sources(&mut sources, *lib, fragment);
    }
    sources
}

pub(crate) fn add_fragment_sources<'a>(
    sources: &mut HashMap<Signature, SignatureSource<'a>>,
    lib: LibraryFile,
    fragment: &'a LoadedFragment,
) {
    for file in &fragment.files {
        for declaration in &file.declarations {
            sources.insert(
                declaration.signature,
                SignatureSource {
                    lib,
                    src: file.src,
                    declaration,
                },
            );
        }
    }
}

/// Adds the enclosing declarations of imported members, as long as they
/// live outside the importing file.
pub(crate) fn with_parent_signatures(
    imported: &BTreeSet<Signature>,
    sources: &HashMap<Signature, SignatureSource<'_>>,
    lib: LibraryFile,
    src: SrcFile,
) -> BTreeSet<Signature> {
    let mut all = imported.clone();
    for sig in imported {
        let mut parent = sources.get(sig).and_then(|s| s.declaration.parent);
        while let Some(p) = parent {
            let Some(parent_source) = sources.get(&p) else {
                break;
            };
            if (parent_source.lib, parent_source.src) == (lib, src) || !all.insert(p) {
                break;
            }
            parent = parent_source.declaration.parent;
        }
    }
    all
}

/// The fixpoint engine of one run.
pub struct Propagator<'a> {
    caches: &'a mut CacheSet,
    stats: &'a mut DirtyFileStats,
    interner: &'a Interner,
    calculator: SignatureHashCalculator,
    dirty: DirtyFiles,
}

impl<'a> Propagator<'a> {
    /// Creates a propagator over the caches of one run.
    pub fn new(caches: &'a mut CacheSet, stats: &'a mut DirtyFileStats, interner: &'a Interner) -> Self {
        Self {
            caches,
            stats,
            interner,
            calculator: SignatureHashCalculator::new(),
            dirty: DirtyFiles::new(),
        }
    }

    /// Union of every dirty generation so far, with refreshed exports.
    pub fn dirty_files(&self) -> &DirtyFiles {
        &self.dirty
    }

    /// The run's signature hashes.
    pub fn calculator(&self) -> &SignatureHashCalculator {
        &self.calculator
    }

    pub(crate) fn calculator_mut(&mut self) -> &mut SignatureHashCalculator {
        &mut self.calculator
    }

    pub(crate) fn caches(&self) -> &CacheSet {
        &*self.caches
    }

    pub(crate) fn caches_mut(&mut self) -> &mut CacheSet {
        &mut *self.caches
    }

    pub(crate) fn interner(&self) -> &'a Interner {
        self.interner
    }

    /// Turns the initial dirty set into the first dirty generation.
    ///
    /// The signatures that non-dirty dependents import from a dirty file, as
    /// recorded on the dependents' side, become its required exports.
    pub fn collect_exported_symbols(&mut self, dirty: &FileMap<FileMetadata>) -> DirtyFiles {
        let mut exports = DirtyFiles::new();
        for (lib, src, metadata) in dirty.iter() {
            let mut file_exports = FileExports::default();
            for (dependent_lib, dependent_src, _) in metadata.inverse_dependencies.iter() {
                let Some(dependent_cache) = self.caches.get(dependent_lib) else {
                    continue;
                };
                if dirty.contains(dependent_lib, dependent_src) {
                    continue;
                }
                let dependent = dependent_cache.fetch_full_metadata(dependent_src);
                if let Some(sigs) = dependent.direct_dependencies.get(lib, src) {
                    file_exports.inverse_dependencies.insert(
                        dependent_lib,
                        dependent_src,
                        sigs.keys().copied().collect(),
                    );
                }
            }
            exports.insert(lib, src, file_exports);
        }
        self.dirty.extend(exports.clone());
        exports
    }

    /// Rebuilds the metadata of every file in `dirty` from the loaded IR and
    /// stores it in the caches.
    pub fn rebuild_dirty_source_metadata(
        &mut self,
        ir: &LoadedIr,
        dirty: &DirtyFiles,
    ) -> Result<FileMap<DirtyFileMetadata>, IcError> {
        let sources = collect_signature_sources(ir);
        let mut updated = FileMap::new();
        for (lib, fragment) in &ir.fragments {
            let Some(dirty_files) = dirty.files(*lib) else {
                continue;
            };
            let cache = self.caches.require(*lib, self.interner)?;
            for file in fragment.files.iter().filter(|f| dirty_files.contains_key(&f.src)) {
                let old = cache.fetch_full_metadata(file.src).direct_dependencies;
                updated.insert(*lib, file.src, DirtyFileMetadata::new(file, old));
            }
        }

        self.calculator.add_all(&sources);

        for (lib, src, exports) in dirty.iter() {
            if !updated.contains(lib, src) {
                continue;
            }
            for (dependent_lib, dependent_src, sigs) in exports.inverse_dependencies.iter() {
                for sig in sigs {
                    // A signature may have moved to another dirty file.
                    let (owner_lib, owner_src) = sources
                        .get(sig)
                        .map_or((lib, src), |source| (source.lib, source.src));
                    if let Some(owner) = updated.get_mut(owner_lib, owner_src) {
                        owner
                            .metadata
                            .add_inverse_dependency(dependent_lib, dependent_src, *sig);
                    }
                }
            }
            self.set_all_dependencies(&mut updated, &sources, lib, src)?;
        }

        for (lib, src) in dirty.keys() {
            let file = updated
                .get(lib, src)
                .ok_or_else(|| not_found_ic_error(self.interner, "metadata", Some(lib), Some(src)))?;
            self.caches
                .require_mut(lib, self.interner)?
                .update_metadata(src, file.metadata.clone());
        }

        Ok(updated)
    }

    /// Records the direct dependencies of a rebuilt file and mirrors them on
    /// the dependencies rebuilt in the same pass.
    pub(crate) fn set_all_dependencies(
        &self,
        updated: &mut FileMap<DirtyFileMetadata>,
        sources: &HashMap<Signature, SignatureSource<'_>>,
        lib: LibraryFile,
        src: SrcFile,
    ) -> Result<(), IcError> {
        let Some(file) = updated.get(lib, src) else {
            return Ok(());
        };
        let imported = with_parent_signatures(&file.maybe_imported, sources, lib, src);

        let mut edges = Vec::with_capacity(imported.len());
        for sig in imported {
            let Some(source) = sources.get(&sig) else {
                continue;
            };
            if (source.lib, source.src) == (lib, src) {
                continue;
            }
            let hash = self
                .calculator
                .hash_of(sig)
                .ok_or_else(|| missing_hash_error(self.interner, sig, source.lib, source.src))?;
            edges.push((source.lib, source.src, sig, hash));
        }

        for (dependency_lib, dependency_src, sig, hash) in edges {
            if let Some(file) = updated.get_mut(lib, src) {
                file.metadata
                    .add_direct_dependency(dependency_lib, dependency_src, sig, hash);
            }
            if let Some(dependency) = updated.get_mut(dependency_lib, dependency_src) {
                dependency.metadata.add_inverse_dependency(lib, src, sig);
            }
        }
        Ok(())
    }

    /// Re-links the neighbours of the files rebuilt in this iteration.
    pub fn collect_files_with_modified_exports_and_imports(
        &mut self,
        dirty: &FileMap<DirtyFileMetadata>,
    ) -> Result<FileMap<UpdatedDependenciesMetadata>, IcError> {
        let mut updated = FileMap::new();
        for (lib, src, file) in dirty.iter() {
            self.add_dependencies_with_updated_signatures(&mut updated, lib, src, file)?;
            self.add_dependencies_with_removed_inverse_dependencies(&mut updated, lib, src, file);
            self.add_dependents_with_updated_imports(&mut updated, lib, src, file)?;
        }
        Ok(updated)
    }

    /// Dependencies whose inverse edge to the rebuilt file changed.
    fn add_dependencies_with_updated_signatures(
        &self,
        updated: &mut FileMap<UpdatedDependenciesMetadata>,
        lib: LibraryFile,
        src: SrcFile,
        file: &DirtyFileMetadata,
    ) -> Result<(), IcError> {
        for (dependency_lib, dependency_src, new_sigs) in file.metadata.direct_dependencies.iter() {
            let dependency = self
                .caches
                .require(dependency_lib, self.interner)?
                .fetch_full_metadata(dependency_src);
            let new_sigs: BTreeSet<Signature> = new_sigs.keys().copied().collect();
            if dependency.inverse_dependencies.get(lib, src) == Some(&new_sigs) {
                continue;
            }
            updated
                .get_or_insert_with(dependency_lib, dependency_src, || {
                    UpdatedDependenciesMetadata::new(dependency)
                })
                .metadata
                .inverse_dependencies
                .insert(lib, src, new_sigs);
        }
        Ok(())
    }

    /// Old dependencies the rebuilt file no longer imports from.
    fn add_dependencies_with_removed_inverse_dependencies(
        &self,
        updated: &mut FileMap<UpdatedDependenciesMetadata>,
        lib: LibraryFile,
        src: SrcFile,
        file: &DirtyFileMetadata,
    ) {
        for (dependency_lib, dependency_src, _) in file.old_direct_dependencies.iter() {
            let Some(dependency_cache) = self.caches.get(dependency_lib) else {
                continue;
            };
            if file
                .metadata
                .direct_dependencies
                .contains(dependency_lib, dependency_src)
            {
                continue;
            }
            let dependency = dependency_cache.fetch_full_metadata(dependency_src);
            if !dependency.inverse_dependencies.contains(lib, src) {
                continue;
            }
            updated
                .get_or_insert_with(dependency_lib, dependency_src, || {
                    UpdatedDependenciesMetadata::new(dependency)
                })
                .metadata
                .inverse_dependencies
                .remove(lib, src);
        }
    }

    /// Dependents of the rebuilt file, classified by how their imports changed.
    fn add_dependents_with_updated_imports(
        &mut self,
        updated: &mut FileMap<UpdatedDependenciesMetadata>,
        lib: LibraryFile,
        src: SrcFile,
        file: &DirtyFileMetadata,
    ) -> Result<(), IcError> {
        for (dependent_lib, dependent_src, new_sigs) in file.metadata.inverse_dependencies.iter() {
            let Some(dependent_cache) = self.caches.get(dependent_lib) else {
                continue;
            };
            if self.dirty.contains(dependent_lib, dependent_src) {
                continue;
            }
            if updated
                .get(dependent_lib, dependent_src)
                .is_some_and(|u| u.import_state == ImportState::Modified)
            {
                continue;
            }

            let dependent = dependent_cache.fetch_full_metadata(dependent_src);
            let imported = dependent
                .direct_dependencies
                .get(lib, src)
                .cloned()
                .unwrap_or_default();

            let calculator = &self.calculator;
            if imported
                .iter()
                .any(|(sig, hash)| calculator.hash_of(*sig) != Some(*hash))
            {
                updated
                    .get_or_insert_with(dependent_lib, dependent_src, || {
                        UpdatedDependenciesMetadata::new(dependent)
                    })
                    .import_state = ImportState::Modified;
                self.stats.add(lib, src, DirtyFileState::UpdatedExports);
                continue;
            }

            let imported_sigs: BTreeSet<Signature> = imported.keys().copied().collect();
            if imported_sigs == *new_sigs {
                continue;
            }

            // A hash that is not known in this run belongs to nothing loaded
            // and cannot have changed.
            let non_modified = dependent.direct_dependencies.all(|_, _, sigs| {
                sigs.iter().all(|(sig, hash)| {
                    calculator
                        .hash_of(*sig)
                        .map_or(true, |new_hash| new_hash == *hash)
                })
            });
            let entry = updated.get_or_insert_with(dependent_lib, dependent_src, || {
                UpdatedDependenciesMetadata::new(dependent)
            });
            if entry.import_state == ImportState::Unknown {
                entry.import_state = if non_modified {
                    ImportState::NonModified
                } else {
                    ImportState::Modified
                };
            }
            if entry.import_state == ImportState::NonModified {
                let fresh = new_sigs
                    .iter()
                    .map(|sig| {
                        calculator
                            .hash_of(*sig)
                            .map(|hash| (*sig, hash))
                            .ok_or_else(|| missing_hash_error(self.interner, *sig, lib, src))
                    })
                    .collect::<Result<BTreeMap<_, _>, _>>()?;
                entry.metadata.direct_dependencies.insert(lib, src, fresh);
                // Signatures that moved here are no longer imported from their old owner.
                entry
                    .metadata
                    .direct_dependencies
                    .retain(|dependency_lib, dependency_src, sigs| {
                        if (dependency_lib, dependency_src) != (lib, src) {
                            sigs.retain(|sig, _| !new_sigs.contains(sig));
                        }
                        !sigs.is_empty()
                    });
            }
        }
        Ok(())
    }

    /// Picks the next dirty generation.
    ///
    /// A neighbour is rebuilt if its export set changed or its imports are
    /// [`ImportState::Modified`]; otherwise only its cached metadata is
    /// patched. Files rebuilt earlier in the run are patched too, and their
    /// required exports refreshed.
    pub fn collect_files_to_rebuild(
        &mut self,
        updated: FileMap<UpdatedDependenciesMetadata>,
    ) -> Result<DirtyFiles, IcError> {
        let mut to_rebuild = DirtyFiles::new();
        for (lib, src, entry) in updated.into_entries() {
            let exports_updated = entry.exports_updated();
            let imports_modified = entry.import_state == ImportState::Modified;
            let already_rebuilt = self.dirty.contains(lib, src);

            if (exports_updated || imports_modified) && !already_rebuilt {
                if exports_updated {
                    self.stats.add(lib, src, DirtyFileState::UpdatedExports);
                }
                if imports_modified {
                    self.stats.add(lib, src, DirtyFileState::UpdatedImports);
                }
                to_rebuild.insert(
                    lib,
                    src,
                    FileExports {
                        inverse_dependencies: entry.metadata.inverse_dependencies,
                    },
                );
                continue;
            }

            if exports_updated {
                self.stats.add(lib, src, DirtyFileState::UpdatedExports);
                self.dirty.insert(
                    lib,
                    src,
                    FileExports {
                        inverse_dependencies: entry.metadata.inverse_dependencies.clone(),
                    },
                );
            }
            self.caches
                .require_mut(lib, self.interner)?
                .update_metadata(src, entry.metadata);
        }
        self.dirty.extend(to_rebuild.clone());
        Ok(to_rebuild)
    }
}
