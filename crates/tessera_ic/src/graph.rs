//! Dependency graph loader.
//!
//! Resolves the configured library paths, orders the libraries so that every
//! dependency precedes its dependents, and moves the main library to the end.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use petgraph::graph::DiGraph;
use tessera_common::{ContentHash, Interner};

use crate::error::IcError;
use crate::frontend::{LibraryResolver, ResolvedLibrary};
use crate::model::{LibraryFile, SrcFile};

/// One library of the resolved graph.
#[derive(Debug, Clone)]
pub struct LibraryNode {
    /// Interned canonical path.
    pub file: LibraryFile,
    /// Canonical path.
    pub path: PathBuf,
    /// Module name.
    pub module_name: String,
    /// Direct dependencies.
    pub dependencies: Vec<LibraryFile>,
    /// Current fingerprint of every source file.
    pub fingerprints: BTreeMap<SrcFile, ContentHash>,
}

/// The resolved libraries in topological order, main library last.
#[derive(Debug, Clone)]
pub struct LibraryGraph {
    nodes: Vec<LibraryNode>,
    index: HashMap<LibraryFile, usize>,
    friends: Vec<LibraryFile>,
}

impl LibraryGraph {
    /// Resolves `libraries` with `resolver` and builds the graph.
    pub fn load(
        resolver: &dyn LibraryResolver,
        interner: &Interner,
        main_library: &Path,
        libraries: &[PathBuf],
        friends: &[PathBuf],
    ) -> Result<Self, IcError> {
        let resolved = resolver.resolve(libraries)?;
        Self::from_resolved(resolved, interner, main_library, friends)
    }

    /// Builds the graph from already resolved library headers.
    ///
    /// Fails if a dependency name does not resolve, if the libraries form a
    /// cycle, or if the main library is not among them.
    pub fn from_resolved(
        resolved: Vec<ResolvedLibrary>,
        interner: &Interner,
        main_library: &Path,
        friends: &[PathBuf],
    ) -> Result<Self, IcError> {
        let main_path = canonical_path(main_library);

        let by_name: HashMap<&str, usize> = resolved
            .iter()
            .enumerate()
            .map(|(i, lib)| (lib.module_name.as_str(), i))
            .collect();

        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(resolved.len(), 0);
        let node_ids: Vec<_> = (0..resolved.len()).map(|i| graph.add_node(i)).collect();
        let mut dep_indices: Vec<Vec<usize>> = Vec::with_capacity(resolved.len());
        for (i, lib) in resolved.iter().enumerate() {
            let mut deps = Vec::with_capacity(lib.depends.len());
            for dep_name in &lib.depends {
                let &dep = by_name.get(dep_name.as_str()).ok_or_else(|| {
                    IcError::UnresolvedDependency {
                        library: lib.module_name.clone(),
                        dependency: dep_name.clone(),
                    }
                })?;
                graph.add_edge(node_ids[dep], node_ids[i], ());
                deps.push(dep);
            }
            dep_indices.push(deps);
        }

        let sorted = petgraph::algo::toposort(&graph, None).map_err(|cycle| {
            IcError::DependencyCycle {
                library: resolved[graph[cycle.node_id()]].module_name.clone(),
            }
        })?;
        let mut order: Vec<usize> = sorted.into_iter().map(|n| graph[n]).collect();

        let canonical: Vec<PathBuf> = resolved.iter().map(|lib| canonical_path(&lib.path)).collect();
        let main_pos = order
            .iter()
            .rposition(|&i| canonical[i] == main_path)
            .ok_or_else(|| IcError::MainLibraryMissing {
                path: main_path.clone(),
            })?;
        let main_index = order.remove(main_pos);
        order.push(main_index);

        let files: Vec<LibraryFile> = canonical
            .iter()
            .map(|path| LibraryFile::intern(interner, &path.to_string_lossy()))
            .collect();

        let mut slots: Vec<Option<ResolvedLibrary>> = resolved.into_iter().map(Some).collect();
        let mut nodes = Vec::with_capacity(order.len());
        for i in order {
            let Some(lib) = slots[i].take() else {
                continue;
            };
            nodes.push(LibraryNode {
                file: files[i],
                path: canonical[i].clone(),
                module_name: lib.module_name,
                dependencies: dep_indices[i].iter().map(|&d| files[d]).collect(),
                fingerprints: lib
                    .fingerprints
                    .into_iter()
                    .map(|(name, hash)| (SrcFile::intern(interner, &name), hash))
                    .collect(),
            });
        }

        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.file, i))
            .collect();

        let friend_paths: HashSet<PathBuf> = friends.iter().map(|p| canonical_path(p)).collect();
        let friends = nodes
            .iter()
            .filter(|node| friend_paths.contains(&node.path))
            .map(|node| node.file)
            .collect();

        Ok(Self {
            nodes,
            index,
            friends,
        })
    }

    /// Libraries in topological order, main library last.
    pub fn libraries(&self) -> &[LibraryNode] {
        &self.nodes
    }

    /// Looks up a library by key.
    pub fn node(&self, lib: LibraryFile) -> Option<&LibraryNode> {
        self.index.get(&lib).map(|&i| &self.nodes[i])
    }

    /// Returns `true` if the library is part of the graph.
    pub fn contains(&self, lib: LibraryFile) -> bool {
        self.index.contains_key(&lib)
    }

    /// Looks up a library by module name.
    pub fn by_module_name(&self, name: &str) -> Option<&LibraryNode> {
        self.nodes.iter().find(|node| node.module_name == name)
    }

    /// The main library.
    pub fn main(&self) -> &LibraryNode {
        // `from_resolved` always pushes the main library last.
        &self.nodes[self.nodes.len() - 1]
    }

    /// Libraries allowed to see internal declarations of the main library.
    pub fn friends(&self) -> &[LibraryFile] {
        &self.friends
    }
}

/// Canonicalizes a path, falling back to the path itself when it does not
/// exist on disk.
pub fn canonical_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(name: &str, depends: &[&str]) -> ResolvedLibrary {
        ResolvedLibrary {
            path: PathBuf::from(format!("/nonexistent/{name}.klib")),
            module_name: name.to_string(),
            depends: depends.iter().map(|d| d.to_string()).collect(),
            fingerprints: BTreeMap::from([(
                format!("{name}.kt"),
                ContentHash::from_bytes(name.as_bytes()),
            )]),
        }
    }

    fn names(graph: &LibraryGraph) -> Vec<&str> {
        graph
            .libraries()
            .iter()
            .map(|n| n.module_name.as_str())
            .collect()
    }

    fn position(graph: &LibraryGraph, name: &str) -> usize {
        names(graph).iter().position(|n| *n == name).unwrap()
    }

    #[test]
    fn dependencies_come_first() {
        let interner = Interner::new();
        let resolved = vec![
            lib("app", &["ktor", "stdlib"]),
            lib("ktor", &["stdlib"]),
            lib("stdlib", &[]),
        ];
        let graph = LibraryGraph::from_resolved(
            resolved,
            &interner,
            Path::new("/nonexistent/app.klib"),
            &[],
        )
        .unwrap();
        assert_eq!(names(&graph), vec!["stdlib", "ktor", "app"]);
        assert_eq!(graph.main().module_name, "app");
        let app = graph.main();
        assert_eq!(app.dependencies.len(), 2);
        assert_eq!(app.fingerprints.len(), 1);
    }

    #[test]
    fn main_library_is_moved_last() {
        let interner = Interner::new();
        let resolved = vec![
            lib("stdlib", &[]),
            lib("app", &["stdlib"]),
            lib("tooling", &["stdlib"]),
        ];
        let graph = LibraryGraph::from_resolved(
            resolved,
            &interner,
            Path::new("/nonexistent/app.klib"),
            &[],
        )
        .unwrap();
        assert_eq!(graph.main().module_name, "app");
        assert!(position(&graph, "stdlib") < position(&graph, "tooling"));
        assert_eq!(position(&graph, "app"), 2);
    }

    #[test]
    fn missing_main_library_errors() {
        let interner = Interner::new();
        let err = LibraryGraph::from_resolved(
            vec![lib("stdlib", &[])],
            &interner,
            Path::new("/nonexistent/app.klib"),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, IcError::MainLibraryMissing { .. }));
    }

    #[test]
    fn unresolved_dependency_errors() {
        let interner = Interner::new();
        let err = LibraryGraph::from_resolved(
            vec![lib("app", &["ktor"])],
            &interner,
            Path::new("/nonexistent/app.klib"),
            &[],
        )
        .unwrap_err();
        match err {
            IcError::UnresolvedDependency {
                library,
                dependency,
            } => {
                assert_eq!(library, "app");
                assert_eq!(dependency, "ktor");
            }
            other => panic!("expected UnresolvedDependency, got {other:?}"),
        }
    }

    #[test]
    fn cycle_is_detected() {
        let interner = Interner::new();
        let err = LibraryGraph::from_resolved(
            vec![lib("a", &["b"]), lib("b", &["a"]), lib("app", &["a"])],
            &interner,
            Path::new("/nonexistent/app.klib"),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, IcError::DependencyCycle { .. }));
    }

    #[test]
    fn friends_are_filtered_to_resolved_libraries() {
        let interner = Interner::new();
        let graph = LibraryGraph::from_resolved(
            vec![lib("stdlib", &[]), lib("tests", &["stdlib"]), lib("app", &["stdlib"])],
            &interner,
            Path::new("/nonexistent/app.klib"),
            &[
                PathBuf::from("/nonexistent/tests.klib"),
                PathBuf::from("/nonexistent/unknown.klib"),
            ],
        )
        .unwrap();
        assert_eq!(graph.friends().len(), 1);
        let friend = graph.node(graph.friends()[0]).unwrap();
        assert_eq!(friend.module_name, "tests");
        assert!(graph.by_module_name("stdlib").is_some());
    }
}
