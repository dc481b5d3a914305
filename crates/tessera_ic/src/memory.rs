//! In-memory frontend.
//!
//! Libraries are described as plain data: files with declarations,
//! references and free text. [`MemoryFrontend`] resolves and loads them and
//! [`MemoryCompiler`] turns each file into a JSON fragment. The CLI reads the
//! same descriptions from disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessera_common::{ContentHash, Interner};

use crate::error::IcError;
use crate::frontend::{
    Declaration, FragmentCompiler, IrLoader, LibraryResolver, LoadRequest, LoadedFile,
    LoadedFragment, LoadedIr, ResolvedLibrary,
};
use crate::graph::{canonical_path, LibraryGraph};
use crate::model::{LibraryFile, Signature, SrcFile};

/// A library described in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryLibrary {
    /// Library path.
    pub path: PathBuf,
    /// Unique module name.
    pub module_name: String,
    /// Module names of dependencies.
    #[serde(default)]
    pub depends: Vec<String>,
    /// Source files by name.
    #[serde(default)]
    pub files: BTreeMap<String, MemoryFile>,
}

impl MemoryLibrary {
    /// Creates a library without files or dependencies.
    pub fn new(path: impl Into<PathBuf>, module_name: &str) -> Self {
        Self {
            path: path.into(),
            module_name: module_name.to_string(),
            depends: Vec::new(),
            files: BTreeMap::new(),
        }
    }

    /// Adds a dependency by module name.
    pub fn depends_on(mut self, module_name: &str) -> Self {
        self.depends.push(module_name.to_string());
        self
    }

    /// Adds or replaces a file.
    pub fn with_file(mut self, name: &str, file: MemoryFile) -> Self {
        self.files.insert(name.to_string(), file);
        self
    }
}

/// A source file described in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFile {
    /// Text that affects the fingerprint but no declaration.
    #[serde(default)]
    pub text: String,
    /// Declarations implemented by the file.
    #[serde(default)]
    pub declarations: Vec<MemoryDeclaration>,
    /// Signatures referenced by the file.
    #[serde(default)]
    pub references: Vec<String>,
}

/// One declaration of a [`MemoryFile`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDeclaration {
    /// Signature.
    pub signature: String,
    /// Body; its hash is the declaration hash.
    #[serde(default)]
    pub body: String,
    /// Signatures inlined into this declaration.
    #[serde(default)]
    pub inline_callees: Vec<String>,
    /// Enclosing declaration.
    #[serde(default)]
    pub parent: Option<String>,
}

impl MemoryFile {
    /// Creates an empty file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the free text.
    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// Adds a declaration.
    pub fn declare(mut self, signature: &str, body: &str) -> Self {
        self.declarations.push(MemoryDeclaration {
            signature: signature.to_string(),
            body: body.to_string(),
            ..MemoryDeclaration::default()
        });
        self
    }

    /// Adds a declaration that inlines `callees`.
    pub fn declare_inline(mut self, signature: &str, body: &str, callees: &[&str]) -> Self {
        self.declarations.push(MemoryDeclaration {
            signature: signature.to_string(),
            body: body.to_string(),
            inline_callees: callees.iter().map(|c| c.to_string()).collect(),
            parent: None,
        });
        self
    }

    /// Adds a member declaration of `parent`.
    pub fn declare_member(mut self, signature: &str, body: &str, parent: &str) -> Self {
        self.declarations.push(MemoryDeclaration {
            signature: signature.to_string(),
            body: body.to_string(),
            inline_callees: Vec::new(),
            parent: Some(parent.to_string()),
        });
        self
    }

    /// Adds a reference.
    pub fn reference(mut self, signature: &str) -> Self {
        self.references.push(signature.to_string());
        self
    }

    /// Fingerprint over everything in the file.
    pub fn fingerprint(&self) -> ContentHash {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        ContentHash::from_bytes(&bytes)
    }

    fn load(&self, src: SrcFile, interner: &Interner) -> LoadedFile {
        LoadedFile {
            src,
            declarations: self
                .declarations
                .iter()
                .map(|d| Declaration {
                    signature: Signature::intern(interner, &d.signature),
                    body: d.body.as_bytes().to_vec(),
                    inline_callees: d
                        .inline_callees
                        .iter()
                        .map(|c| Signature::intern(interner, c))
                        .collect(),
                    parent: d.parent.as_deref().map(|p| Signature::intern(interner, p)),
                })
                .collect(),
            references: self
                .references
                .iter()
                .map(|r| Signature::intern(interner, r))
                .collect(),
        }
    }
}

/// Resolver and loader over in-memory libraries.
#[derive(Debug, Clone, Default)]
pub struct MemoryFrontend {
    libraries: Vec<MemoryLibrary>,
}

impl MemoryFrontend {
    /// Creates a frontend over `libraries`.
    pub fn new(libraries: Vec<MemoryLibrary>) -> Self {
        Self { libraries }
    }

    /// The described libraries.
    pub fn libraries(&self) -> &[MemoryLibrary] {
        &self.libraries
    }

    /// Paths of every described library.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.libraries.iter().map(|l| l.path.clone()).collect()
    }

    fn find(&self, path: &Path) -> Option<&MemoryLibrary> {
        let wanted = canonical_path(path);
        self.libraries
            .iter()
            .find(|lib| canonical_path(&lib.path) == wanted)
    }
}

impl LibraryResolver for MemoryFrontend {
    fn resolve(&self, paths: &[PathBuf]) -> Result<Vec<ResolvedLibrary>, IcError> {
        paths
            .iter()
            .map(|path| {
                let lib = self.find(path).ok_or_else(|| IcError::Resolution {
                    reason: format!("no library at {}", path.display()),
                })?;
                Ok(ResolvedLibrary {
                    path: canonical_path(&lib.path),
                    module_name: lib.module_name.clone(),
                    depends: lib.depends.clone(),
                    fingerprints: lib
                        .files
                        .iter()
                        .map(|(name, file)| (name.clone(), file.fingerprint()))
                        .collect(),
                })
            })
            .collect()
    }
}

impl IrLoader for MemoryFrontend {
    fn load(
        &self,
        graph: &LibraryGraph,
        request: &LoadRequest,
        interner: &Interner,
    ) -> Result<LoadedIr, IcError> {
        let mut ir = LoadedIr::default();
        for node in graph.libraries() {
            let lib = self.find(&node.path).ok_or_else(|| IcError::Load {
                reason: format!("no library at {}", node.path.display()),
            })?;
            let files = lib
                .files
                .iter()
                .map(|(name, file)| file.load(SrcFile::intern(interner, name), interner))
                .collect();
            ir.fragments.insert(
                node.file,
                LoadedFragment {
                    module_name: lib.module_name.clone(),
                    files,
                },
            );
        }

        for (lib, src) in request.keys() {
            let present = ir
                .fragments
                .get(&lib)
                .is_some_and(|f| f.files.iter().any(|file| file.src == src));
            if !present {
                return Err(IcError::Load {
                    reason: format!(
                        "requested file {} is not part of {}",
                        src.resolve(interner),
                        lib.resolve(interner)
                    ),
                });
            }
        }
        Ok(ir)
    }
}

#[derive(Serialize)]
struct JsonFragment<'a> {
    module: &'a str,
    file: &'a str,
    declarations: Vec<JsonDeclaration<'a>>,
}

#[derive(Serialize)]
struct JsonDeclaration<'a> {
    signature: &'a str,
    body: String,
}

/// Compiles every file into a JSON listing of its declarations and records
/// what it compiled.
#[derive(Debug)]
pub struct MemoryCompiler<'i> {
    interner: &'i Interner,
    compiled: Vec<(String, String)>,
}

impl<'i> MemoryCompiler<'i> {
    /// Creates a compiler resolving names with `interner`.
    pub fn new(interner: &'i Interner) -> Self {
        Self {
            interner,
            compiled: Vec::new(),
        }
    }

    /// `(library path, file name)` of every file compiled so far.
    pub fn compiled(&self) -> &[(String, String)] {
        &self.compiled
    }
}

impl FragmentCompiler for MemoryCompiler<'_> {
    fn compile(
        &mut self,
        ir: &LoadedIr,
        dirty_files: &[(LibraryFile, SrcFile)],
    ) -> Result<Vec<Vec<u8>>, IcError> {
        let mut fragments = Vec::with_capacity(dirty_files.len());
        for (lib, src) in dirty_files {
            let fragment = ir.fragments.get(lib).ok_or_else(|| IcError::Compile {
                reason: format!("library {} is not loaded", lib.resolve(self.interner)),
            })?;
            let file = fragment
                .files
                .iter()
                .find(|f| f.src == *src)
                .ok_or_else(|| IcError::Compile {
                    reason: format!("file {} is not loaded", src.resolve(self.interner)),
                })?;
            let json = JsonFragment {
                module: &fragment.module_name,
                file: src.resolve(self.interner),
                declarations: file
                    .declarations
                    .iter()
                    .map(|d| JsonDeclaration {
                        signature: d.signature.resolve(self.interner),
                        body: String::from_utf8_lossy(&d.body).into_owned(),
                    })
                    .collect(),
            };
            let bytes = serde_json::to_vec(&json).map_err(|e| IcError::Compile {
                reason: e.to_string(),
            })?;
            fragments.push(bytes);
            self.compiled.push((
                lib.resolve(self.interner).to_string(),
                src.resolve(self.interner).to_string(),
            ));
        }
        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontend() -> MemoryFrontend {
        MemoryFrontend::new(vec![
            MemoryLibrary::new("/virtual/base.klib", "base")
                .with_file("base.kt", MemoryFile::new().declare("foo", "1")),
            MemoryLibrary::new("/virtual/app.klib", "app")
                .depends_on("base")
                .with_file("main.kt", MemoryFile::new().reference("foo")),
        ])
    }

    #[test]
    fn resolves_headers_with_fingerprints() {
        let frontend = frontend();
        let resolved = frontend.resolve(&frontend.paths()).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[1].depends, vec!["base".to_string()]);
        assert!(resolved[0].fingerprints.contains_key("base.kt"));
    }

    #[test]
    fn unknown_path_fails_resolution() {
        let err = frontend()
            .resolve(&[PathBuf::from("/virtual/missing.klib")])
            .unwrap_err();
        assert!(matches!(err, IcError::Resolution { .. }));
    }

    #[test]
    fn text_changes_fingerprint_only() {
        let a = MemoryFile::new().declare("foo", "1");
        let b = a.clone().text("   ");
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.declarations, b.declarations);
    }

    #[test]
    fn loads_and_compiles_every_library() {
        let frontend = frontend();
        let interner = Interner::new();
        let graph = LibraryGraph::load(
            &frontend,
            &interner,
            Path::new("/virtual/app.klib"),
            &frontend.paths(),
            &[],
        )
        .unwrap();
        let ir = frontend.load(&graph, &LoadRequest::new(), &interner).unwrap();
        assert_eq!(ir.fragments.len(), 2);

        let main = graph.main().file;
        let main_kt = SrcFile::intern(&interner, "main.kt");
        let mut compiler = MemoryCompiler::new(&interner);
        let fragments = compiler.compile(&ir, &[(main, main_kt)]).unwrap();
        assert_eq!(fragments.len(), 1);
        let json: serde_json::Value = serde_json::from_slice(&fragments[0]).unwrap();
        assert_eq!(json["module"], "app");
        assert_eq!(compiler.compiled()[0].1, "main.kt");
    }
}
