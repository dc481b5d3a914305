//! Rebuild driver.
//!
//! [`CacheUpdater::actualize_caches`] runs one incremental update: resolve
//! the library graph, detect dirty files, propagate to a fixpoint, compile
//! the final dirty set and commit every library cache. All phases before the
//! commit only read from disk; a failure anywhere leaves the previous cache
//! generation untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tessera_common::{ContentHash, Interner};
use tracing::{debug, debug_span, info, info_span};

use crate::detector::load_modified_files;
use crate::error::{ic_error, not_found_ic_error, IcError};
use crate::frontend::{FragmentCompiler, IrLoader, LibraryResolver, LoadedIr};
use crate::graph::LibraryGraph;
use crate::layout::CacheRoot;
use crate::model::{LibraryFile, Signature, SrcFile};
use crate::propagate::{load_request, DirtyFiles, Propagator};
use crate::report::{DirtyFileStats, DirtyReport};
use crate::store::{CacheArtifact, CacheSet, ModuleArtifact};

/// Inputs of an update run.
#[derive(Debug, Clone)]
pub struct UpdaterOptions {
    /// The main library.
    pub main_library: PathBuf,
    /// Every library of the program.
    pub libraries: Vec<PathBuf>,
    /// Friend libraries of the main library.
    pub friends: Vec<PathBuf>,
    /// Directory holding the versioned cache roots.
    pub cache_dir: PathBuf,
    /// Compiler-configuration fingerprint; names the cache root.
    pub config_hash: ContentHash,
    /// Module name of the intrinsics library. Defaults to the first library
    /// in dependency order.
    pub intrinsics: Option<String>,
    /// Wipe the cache root when its library directories do not match the
    /// resolved libraries. Otherwise stale directories are treated as
    /// removed libraries.
    pub wipe_on_library_set_change: bool,
    /// Forces these main-library files dirty instead of comparing
    /// fingerprints.
    pub dirty_files: Option<Vec<String>>,
}

impl UpdaterOptions {
    /// Options with an empty configuration fingerprint and default policies.
    pub fn new(main_library: PathBuf, libraries: Vec<PathBuf>, cache_dir: PathBuf) -> Self {
        Self {
            main_library,
            libraries,
            friends: Vec::new(),
            cache_dir,
            config_hash: ContentHash::from_bytes(b""),
            intrinsics: None,
            wipe_on_library_set_change: true,
            dirty_files: None,
        }
    }
}

/// Result of an update run.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// One artifact per library, in dependency order.
    pub modules: Vec<ModuleArtifact>,
    /// Dirty states observed during the run.
    pub report: DirtyReport,
    /// Propagation iterations that produced more files to rebuild.
    pub iterations: usize,
}

impl UpdateOutcome {
    /// Looks up a module by name.
    pub fn module(&self, module_name: &str) -> Option<&ModuleArtifact> {
        self.modules.iter().find(|m| m.module_name == module_name)
    }

    /// `(module name, file name)` of every file compiled by the run.
    pub fn rebuilt_files(&self) -> Vec<(&str, &str)> {
        self.modules
            .iter()
            .flat_map(|m| {
                m.rebuilt_files()
                    .into_iter()
                    .map(move |file| (m.module_name.as_str(), file))
            })
            .collect()
    }
}

/// Incremental cache updater.
#[derive(Debug)]
pub struct CacheUpdater {
    options: UpdaterOptions,
    interner: Interner,
}

impl CacheUpdater {
    /// Creates an updater with its own interner.
    pub fn new(options: UpdaterOptions) -> Self {
        Self {
            options,
            interner: Interner::new(),
        }
    }

    /// The interner every key of this updater resolves through.
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// The run options.
    pub fn options(&self) -> &UpdaterOptions {
        &self.options
    }

    /// Brings every library cache up to date and returns the module
    /// artifacts.
    pub fn actualize_caches(
        &self,
        resolver: &dyn LibraryResolver,
        loader: &dyn IrLoader,
        compiler: &mut dyn FragmentCompiler,
    ) -> Result<UpdateOutcome, IcError> {
        let interner = &self.interner;
        let options = &self.options;
        let _run = info_span!("actualize_caches", main = %options.main_library.display()).entered();
        let mut stats = DirtyFileStats::default();

        let graph = LibraryGraph::load(
            resolver,
            interner,
            &options.main_library,
            &options.libraries,
            &options.friends,
        )?;
        debug!(libraries = graph.libraries().len(), "resolved library graph");

        let root = CacheRoot::new(&options.cache_dir, &options.config_hash);
        if options.wipe_on_library_set_change {
            let expected = graph
                .libraries()
                .iter()
                .map(|node| CacheRoot::library_dir_name(&node.path))
                .collect();
            root.wipe_if_library_set_changed(&expected)?;
        }
        let mut caches = CacheSet::open(
            &graph,
            &root,
            !options.wipe_on_library_set_change,
            interner,
        );

        let main = graph.main().file;
        let forced: Option<BTreeSet<SrcFile>> = options
            .dirty_files
            .as_ref()
            .map(|names| names.iter().map(|n| SrcFile::intern(interner, n)).collect());
        let modified = load_modified_files(
            &mut caches,
            forced.as_ref().map(|files| (main, files)),
            &mut stats,
            interner,
        )?;
        debug!(dirty = modified.len(), "collected modified files");

        let (ir, dirty, iterations) = {
            let mut propagator = Propagator::new(&mut caches, &mut stats, interner);
            let mut last = propagator.collect_exported_symbols(&modified);
            let mut ir = loader.load(&graph, &load_request(&last), interner)?;

            let mut iterations = 0;
            loop {
                let _step = debug_span!("propagation", iteration = iterations).entered();
                let rebuilt = propagator.rebuild_dirty_source_metadata(&ir, &last)?;
                let updated = propagator.collect_files_with_modified_exports_and_imports(&rebuilt)?;
                let next = propagator.collect_files_to_rebuild(updated)?;
                debug!(rebuilt = rebuilt.len(), next = next.len(), "propagation step");
                if next.is_empty() {
                    break;
                }
                ir = loader.load(&graph, &load_request(&next), interner)?;
                last = next;
                iterations += 1;
            }
            if iterations != 0 {
                ir = loader.load(&graph, &load_request(propagator.dirty_files()), interner)?;
            }

            if !ir.fragments.contains_key(&main) {
                return Err(not_found_ic_error(interner, "main module fragment", Some(main), None));
            }
            let intrinsics = self.intrinsics_library(&graph)?;
            propagator.update_intrinsic_dependencies(&ir, intrinsics)?;

            (ir, propagator.dirty_files().clone(), iterations)
        };

        let artifacts = build_cache_artifacts(&graph, &caches, &ir, &dirty, interner)?;

        let dirty_list = dirty_files_in_load_order(&graph, &ir, &dirty);
        let fragments = compiler.compile(&ir, &dirty_list)?;
        if fragments.len() != dirty_list.len() {
            return Err(IcError::Compile {
                reason: format!(
                    "expected {} fragments, got {}",
                    dirty_list.len(),
                    fragments.len()
                ),
            });
        }
        let mut rebuilt: BTreeMap<LibraryFile, BTreeMap<SrcFile, Vec<u8>>> = BTreeMap::new();
        for ((lib, src), fragment) in dirty_list.iter().zip(fragments) {
            rebuilt.entry(*lib).or_default().insert(*src, fragment);
        }

        caches.delete_stale()?;
        let mut modules = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let lib = artifact.library;
            let cache = caches.require(lib, interner)?;
            modules.push(cache.commit(artifact, rebuilt.remove(&lib).unwrap_or_default(), interner)?);
        }

        info!(
            libraries = modules.len(),
            rebuilt = dirty_list.len(),
            iterations,
            "incremental cache updated"
        );
        Ok(UpdateOutcome {
            modules,
            report: stats.to_report(interner),
            iterations,
        })
    }

    fn intrinsics_library(&self, graph: &LibraryGraph) -> Result<LibraryFile, IcError> {
        match &self.options.intrinsics {
            Some(name) => graph
                .by_module_name(name)
                .map(|node| node.file)
                .ok_or_else(|| IcError::Resolution {
                    reason: format!("intrinsics library '{name}' is not resolved"),
                }),
            None => Ok(graph.libraries()[0].file),
        }
    }
}

/// Describes every library's output and checks that the loaded program
/// consists of files the cache knows about.
fn build_cache_artifacts(
    graph: &LibraryGraph,
    caches: &CacheSet,
    ir: &LoadedIr,
    dirty: &DirtyFiles,
    interner: &Interner,
) -> Result<Vec<CacheArtifact>, IcError> {
    let mut artifacts = Vec::with_capacity(graph.libraries().len());
    for node in graph.libraries() {
        let lib = node.file;
        let cache = caches.require(lib, interner)?;
        let fragment = ir
            .fragments
            .get(&lib)
            .ok_or_else(|| not_found_ic_error(interner, "loaded fragment", Some(lib), None))?;

        let signatures: BTreeMap<SrcFile, Vec<Signature>> = fragment
            .files
            .iter()
            .map(|file| {
                (
                    file.src,
                    file.declarations.iter().map(|d| d.signature).collect(),
                )
            })
            .collect();
        let dirty_files: BTreeSet<SrcFile> = dirty
            .files(lib)
            .map(|files| files.keys().copied().collect())
            .unwrap_or_default();

        let artifact = cache.build_artifact(&signatures, &dirty_files, interner)?;
        for file in &fragment.files {
            if !artifact.contains(file.src) {
                return Err(ic_error(
                    interner,
                    format_args!(
                        "file {} is absent in incremental cache and library",
                        file.src.resolve(interner)
                    ),
                    Some(lib),
                    None,
                ));
            }
        }
        artifacts.push(artifact);
    }
    Ok(artifacts)
}

fn dirty_files_in_load_order(
    graph: &LibraryGraph,
    ir: &LoadedIr,
    dirty: &DirtyFiles,
) -> Vec<(LibraryFile, SrcFile)> {
    let mut list = Vec::with_capacity(dirty.len());
    for node in graph.libraries() {
        let (Some(files), Some(fragment)) = (dirty.files(node.file), ir.fragments.get(&node.file))
        else {
            continue;
        };
        list.extend(
            fragment
                .files
                .iter()
                .filter(|file| files.contains_key(&file.src))
                .map(|file| (node.file, file.src)),
        );
    }
    list
}
