//! Dependency refresh for the intrinsics library.
//!
//! Code generation may reference intrinsics without going through recorded
//! imports, so after propagation the dirty files of the intrinsics library
//! are re-examined against their own declarations only. Cached edges are
//! merged back in whenever the fresh ones are not already covered.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{ic_error, not_found_ic_error, IcError};
use crate::frontend::LoadedIr;
use crate::model::{FileMap, LibraryFile};
use crate::propagate::{add_fragment_sources, DirtyFileMetadata, Propagator};

impl Propagator<'_> {
    /// Re-validates the edges of the dirty files of `intrinsics`.
    pub fn update_intrinsic_dependencies(
        &mut self,
        ir: &LoadedIr,
        intrinsics: LibraryFile,
    ) -> Result<(), IcError> {
        let Some(dirty) = self.dirty_files().files(intrinsics) else {
            return Ok(());
        };
        let dirty: BTreeSet<_> = dirty.keys().copied().collect();
        let interner = self.interner();

        let fragment = ir.fragments.get(&intrinsics).ok_or_else(|| {
            not_found_ic_error(interner, "loaded fragment", Some(intrinsics), None)
        })?;
        let mut sources = HashMap::new();
        add_fragment_sources(&mut sources, intrinsics, fragment);

        let mut updated = FileMap::new();
        {
            let cache = self.caches().require(intrinsics, interner)?;
            for file in fragment.files.iter().filter(|f| dirty.contains(&f.src)) {
                let old = cache.fetch_full_metadata(file.src).direct_dependencies;
                updated.insert(intrinsics, file.src, DirtyFileMetadata::new(file, old));
            }
        }

        self.calculator_mut().add_all(&sources);
        let keys: Vec<_> = updated.keys().collect();
        for (lib, src) in keys {
            self.set_all_dependencies(&mut updated, &sources, lib, src)?;
        }

        let cache = self.caches_mut().require_mut(intrinsics, interner)?;
        for (lib, src, file) in updated.into_entries() {
            if lib != intrinsics {
                return Err(ic_error(
                    interner,
                    "unexpected library while refreshing intrinsics dependencies",
                    Some(lib),
                    Some(src),
                ));
            }
            let mut fresh = file.metadata;
            let cached = cache.fetch_full_metadata(src);

            let covered = fresh.direct_dependencies.all(|l, f, deps| {
                cached
                    .direct_dependencies
                    .get(l, f)
                    .map_or(deps.is_empty(), |c| deps.keys().all(|k| c.contains_key(k)))
            }) && fresh.inverse_dependencies.all(|l, f, inverse| {
                cached
                    .inverse_dependencies
                    .get(l, f)
                    .map_or(inverse.is_empty(), |c| inverse.is_subset(c))
            });
            if covered {
                continue;
            }

            for (l, f, deps) in cached.direct_dependencies.iter() {
                fresh
                    .direct_dependencies
                    .get_or_insert_with(l, f, BTreeMap::new)
                    .extend(deps.iter().map(|(sig, hash)| (*sig, *hash)));
            }
            for (l, f, inverse) in cached.inverse_dependencies.iter() {
                fresh
                    .inverse_dependencies
                    .get_or_insert_with(l, f, BTreeSet::new)
                    .extend(inverse.iter().copied());
            }
            tracing::debug!(file = src.resolve(interner), "merged intrinsics dependencies");
            cache.update_metadata(src, fresh);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use tessera_common::{ContentHash, Interner};

    use super::*;
    use crate::frontend::{Declaration, LoadedFile, LoadedFragment, ResolvedLibrary};
    use crate::graph::LibraryGraph;
    use crate::layout::CacheRoot;
    use crate::model::{FileMetadata, Signature, SrcFile};
    use crate::report::DirtyFileStats;
    use crate::store::CacheSet;

    const INTRINSICS: &str = "/virtual/intrinsics.klib";

    fn intrinsics_caches(interner: &Interner, dir: &Path) -> (LibraryFile, CacheSet) {
        let graph = LibraryGraph::from_resolved(
            vec![ResolvedLibrary {
                path: PathBuf::from(INTRINSICS),
                module_name: "intrinsics".to_string(),
                depends: Vec::new(),
                fingerprints: ["x.kt", "y.kt", "z.kt"]
                    .into_iter()
                    .map(|name| (name.to_string(), ContentHash::from_bytes(name.as_bytes())))
                    .collect(),
            }],
            interner,
            Path::new(INTRINSICS),
            &[],
        )
        .unwrap();
        let caches = CacheSet::open(
            &graph,
            &CacheRoot::new(dir, &ContentHash::from_bytes(b"")),
            false,
            interner,
        );
        (graph.main().file, caches)
    }

    #[test]
    fn uncovered_edges_are_merged_with_the_cached_ones() {
        let interner = Interner::new();
        let dir = tempfile::tempdir().unwrap();
        let (lib, mut caches) = intrinsics_caches(&interner, dir.path());
        let x = SrcFile::intern(&interner, "x.kt");
        let y = SrcFile::intern(&interner, "y.kt");
        let z = SrcFile::intern(&interner, "z.kt");
        let foo = Signature::intern(&interner, "foo");
        let bar = Signature::intern(&interner, "bar");
        let stale = ContentHash::from_bytes(b"bar#cached");

        // y.kt is cached as importing bar from z.kt but not foo from x.kt.
        let mut cached_y = FileMetadata::default();
        cached_y.add_direct_dependency(lib, z, bar, stale);
        caches.require_mut(lib, &interner).unwrap().update_metadata(y, cached_y);

        let ir = LoadedIr {
            fragments: BTreeMap::from([(
                lib,
                LoadedFragment {
                    module_name: "intrinsics".to_string(),
                    files: vec![
                        LoadedFile {
                            src: x,
                            declarations: vec![Declaration {
                                signature: foo,
                                body: b"foo#v1".to_vec(),
                                inline_callees: Vec::new(),
                                parent: None,
                            }],
                            references: Vec::new(),
                        },
                        LoadedFile {
                            src: y,
                            declarations: Vec::new(),
                            references: vec![foo],
                        },
                    ],
                },
            )]),
        };

        let mut stats = DirtyFileStats::default();
        let mut propagator = Propagator::new(&mut caches, &mut stats, &interner);
        let mut dirty = FileMap::new();
        dirty.insert(lib, x, FileMetadata::default());
        dirty.insert(lib, y, FileMetadata::default());
        propagator.collect_exported_symbols(&dirty);

        propagator.update_intrinsic_dependencies(&ir, lib).unwrap();
        let cache = propagator.caches().get(lib).unwrap();
        let merged_y = cache.fetch_full_metadata(y);
        let foo_hash = propagator.calculator().hash_of(foo).unwrap();
        assert_eq!(
            merged_y.direct_dependencies.get(lib, x),
            Some(&BTreeMap::from([(foo, foo_hash)]))
        );
        assert_eq!(
            merged_y.direct_dependencies.get(lib, z),
            Some(&BTreeMap::from([(bar, stale)]))
        );
        let merged_x = cache.fetch_full_metadata(x);
        assert_eq!(merged_x.inverse_dependencies.get(lib, y), Some(&BTreeSet::from([foo])));

        // A second pass finds everything covered and leaves the metadata alone.
        propagator.update_intrinsic_dependencies(&ir, lib).unwrap();
        let cache = propagator.caches().get(lib).unwrap();
        assert_eq!(cache.fetch_full_metadata(y), merged_y);
        assert_eq!(cache.fetch_full_metadata(x), merged_x);
    }
}
