//! Keys and per-file metadata of the incremental cache.
//!
//! Libraries, source files and signatures are interned keys. Dependency
//! edges are stored as two explicit adjacency maps keyed by `(library, file)`
//! pairs, one per direction, with signature sets on every edge.

use std::collections::{BTreeMap, BTreeSet};

use tessera_common::{ContentHash, Ident, Interner};

macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        pub struct $name(Ident);

        impl $name {
            /// Interns `name` and wraps the resulting identifier.
            pub fn intern(interner: &Interner, name: &str) -> Self {
                Self(interner.get_or_intern(name))
            }

            /// Resolves the key back to its string form.
            pub fn resolve(self, interner: &Interner) -> &str {
                interner.resolve(self.0)
            }

            /// Returns the underlying interned identifier.
            pub fn ident(self) -> Ident {
                self.0
            }
        }
    };
}

define_key!(
    /// A library, identified by its canonical path.
    LibraryFile
);

define_key!(
    /// A source file, identified by its path-derived key inside its library.
    SrcFile
);

define_key!(
    /// A declaration signature, stable across recompilations of unrelated code.
    Signature
);

/// A two-level map from `(library, source file)` to a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMap<V> {
    libs: BTreeMap<LibraryFile, BTreeMap<SrcFile, V>>,
}

impl<V> Default for FileMap<V> {
    fn default() -> Self {
        Self {
            libs: BTreeMap::new(),
        }
    }
}

impl<V> FileMap<V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored for a file.
    pub fn get(&self, lib: LibraryFile, src: SrcFile) -> Option<&V> {
        self.libs.get(&lib)?.get(&src)
    }

    /// Returns a mutable reference to the value stored for a file.
    pub fn get_mut(&mut self, lib: LibraryFile, src: SrcFile) -> Option<&mut V> {
        self.libs.get_mut(&lib)?.get_mut(&src)
    }

    /// Returns `true` if a value is stored for the file.
    pub fn contains(&self, lib: LibraryFile, src: SrcFile) -> bool {
        self.get(lib, src).is_some()
    }

    /// Stores a value for a file, returning the previous one.
    pub fn insert(&mut self, lib: LibraryFile, src: SrcFile, value: V) -> Option<V> {
        self.libs.entry(lib).or_default().insert(src, value)
    }

    /// Removes the value stored for a file.
    pub fn remove(&mut self, lib: LibraryFile, src: SrcFile) -> Option<V> {
        let files = self.libs.get_mut(&lib)?;
        let removed = files.remove(&src);
        if files.is_empty() {
            self.libs.remove(&lib);
        }
        removed
    }

    /// Returns the value for a file, inserting one built by `make` first if absent.
    pub fn get_or_insert_with(
        &mut self,
        lib: LibraryFile,
        src: SrcFile,
        make: impl FnOnce() -> V,
    ) -> &mut V {
        self.libs.entry(lib).or_default().entry(src).or_insert_with(make)
    }

    /// Returns all files stored for a library.
    pub fn files(&self, lib: LibraryFile) -> Option<&BTreeMap<SrcFile, V>> {
        self.libs.get(&lib)
    }

    /// Iterates over the libraries that have at least one file.
    pub fn libraries(&self) -> impl Iterator<Item = LibraryFile> + '_ {
        self.libs.keys().copied()
    }

    /// Iterates over every `(library, file, value)` entry.
    pub fn iter(&self) -> impl Iterator<Item = (LibraryFile, SrcFile, &V)> + '_ {
        self.libs
            .iter()
            .flat_map(|(lib, files)| files.iter().map(move |(src, v)| (*lib, *src, v)))
    }

    /// Iterates over every `(library, file)` key.
    pub fn keys(&self) -> impl Iterator<Item = (LibraryFile, SrcFile)> + '_ {
        self.iter().map(|(lib, src, _)| (lib, src))
    }

    /// Consumes the map, yielding every entry.
    pub fn into_entries(self) -> impl Iterator<Item = (LibraryFile, SrcFile, V)> {
        self.libs
            .into_iter()
            .flat_map(|(lib, files)| files.into_iter().map(move |(src, v)| (lib, src, v)))
    }

    /// Keeps only the entries for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(LibraryFile, SrcFile, &mut V) -> bool) {
        for (lib, files) in self.libs.iter_mut() {
            files.retain(|src, v| keep(*lib, *src, v));
        }
        self.libs.retain(|_, files| !files.is_empty());
    }

    /// Returns `true` if `pred` holds for every entry.
    pub fn all(&self, mut pred: impl FnMut(LibraryFile, SrcFile, &V) -> bool) -> bool {
        self.iter().all(|(lib, src, v)| pred(lib, src, v))
    }

    /// Number of files in the map.
    pub fn len(&self) -> usize {
        self.libs.values().map(BTreeMap::len).sum()
    }

    /// Returns `true` if the map holds no files.
    pub fn is_empty(&self) -> bool {
        self.libs.values().all(BTreeMap::is_empty)
    }

    /// Moves every entry of `other` into `self`, overwriting existing ones.
    pub fn extend(&mut self, other: FileMap<V>) {
        for (lib, src, v) in other.into_entries() {
            self.insert(lib, src, v);
        }
    }

    /// Maps every value, keeping the keys.
    pub fn map_values<W>(&self, mut f: impl FnMut(&V) -> W) -> FileMap<W> {
        let mut out = FileMap::new();
        for (lib, src, v) in self.iter() {
            out.insert(lib, src, f(v));
        }
        out
    }
}

/// Signatures a file imports, per dependency file, with the hash each
/// signature had when the import was recorded.
pub type DirectDependencies = FileMap<BTreeMap<Signature, ContentHash>>;

/// Signatures a file exports, per dependent file.
pub type InverseDependencies = FileMap<BTreeSet<Signature>>;

/// One generation of the cached metadata of a source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    /// What this file imports, and from where.
    pub direct_dependencies: DirectDependencies,
    /// Who imports what from this file.
    pub inverse_dependencies: InverseDependencies,
}

impl FileMetadata {
    /// The set of signatures this file makes visible to other files.
    pub fn exported_signatures(&self) -> BTreeSet<Signature> {
        self.inverse_dependencies
            .iter()
            .flat_map(|(_, _, sigs)| sigs.iter().copied())
            .collect()
    }

    /// Records that this file imports `signature` (with `hash`) from `lib`/`src`.
    pub fn add_direct_dependency(
        &mut self,
        lib: LibraryFile,
        src: SrcFile,
        signature: Signature,
        hash: ContentHash,
    ) {
        self.direct_dependencies
            .get_or_insert_with(lib, src, BTreeMap::new)
            .insert(signature, hash);
    }

    /// Records that `lib`/`src` imports `signature` from this file.
    pub fn add_inverse_dependency(&mut self, lib: LibraryFile, src: SrcFile, signature: Signature) {
        self.inverse_dependencies
            .get_or_insert_with(lib, src, BTreeSet::new)
            .insert(signature);
    }

    /// Returns `true` if the file has no recorded edges in either direction.
    pub fn is_empty(&self) -> bool {
        self.direct_dependencies.is_empty() && self.inverse_dependencies.is_empty()
    }
}
