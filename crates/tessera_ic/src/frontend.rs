//! Interfaces of the external collaborators: library resolution, IR
//! loading, and code generation.
//!
//! The incremental cache never parses sources or generates code itself. It
//! asks a [`LibraryResolver`] for library headers, an [`IrLoader`] for the
//! declaration tables of the loaded intermediate representation, and a
//! [`FragmentCompiler`] for the compiled output of every dirty file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tessera_common::{ContentHash, Interner};

use crate::error::IcError;
use crate::graph::LibraryGraph;
use crate::model::{FileMap, LibraryFile, Signature, SrcFile};

/// A library header as produced by the resolver.
#[derive(Debug, Clone)]
pub struct ResolvedLibrary {
    /// Canonical path of the library.
    pub path: PathBuf,
    /// Unique module name, referenced by other libraries' `depends` lists.
    pub module_name: String,
    /// Module names of the libraries this one depends on.
    pub depends: Vec<String>,
    /// Fingerprint of every source file in the library, keyed by file name.
    pub fingerprints: BTreeMap<String, ContentHash>,
}

/// Resolves library paths into library headers.
pub trait LibraryResolver {
    /// Resolves every path in `paths`. The order of the result is irrelevant.
    fn resolve(&self, paths: &[PathBuf]) -> Result<Vec<ResolvedLibrary>, IcError>;
}

/// One declaration of a loaded source file.
#[derive(Debug, Clone)]
pub struct Declaration {
    /// The declaration's signature.
    pub signature: Signature,
    /// Serialized shape of the declaration; the basis of its content hash.
    pub body: Vec<u8>,
    /// Signatures whose bodies are inlined into this declaration.
    pub inline_callees: Vec<Signature>,
    /// Enclosing declaration, if this is a member.
    pub parent: Option<Signature>,
}

/// The declaration table of one loaded source file.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    /// The source file.
    pub src: SrcFile,
    /// Declarations implemented by the file.
    pub declarations: Vec<Declaration>,
    /// Signatures the file references.
    pub references: Vec<Signature>,
}

/// The loaded intermediate representation of one library.
#[derive(Debug, Clone)]
pub struct LoadedFragment {
    /// Module name of the library.
    pub module_name: String,
    /// Every source file the loaded module consists of.
    pub files: Vec<LoadedFile>,
}

/// The loaded intermediate representation of the whole program.
#[derive(Debug, Clone, Default)]
pub struct LoadedIr {
    /// One fragment per library.
    pub fragments: BTreeMap<LibraryFile, LoadedFragment>,
}

/// Per dirty file, the signatures it must keep exporting to files that are
/// not reloaded.
pub type LoadRequest = FileMap<BTreeSet<Signature>>;

/// Loads and links the intermediate representation.
pub trait IrLoader {
    /// Loads the program with the files in `request` fully deserialized.
    fn load(
        &self,
        graph: &LibraryGraph,
        request: &LoadRequest,
        interner: &Interner,
    ) -> Result<LoadedIr, IcError>;
}

/// Compiles dirty files into binary program fragments.
pub trait FragmentCompiler {
    /// Returns one fragment per entry of `dirty_files`, in the same order.
    fn compile(
        &mut self,
        ir: &LoadedIr,
        dirty_files: &[(LibraryFile, SrcFile)],
    ) -> Result<Vec<Vec<u8>>, IcError>;
}

impl<F> FragmentCompiler for F
where
    F: FnMut(&LoadedIr, &[(LibraryFile, SrcFile)]) -> Result<Vec<Vec<u8>>, IcError>,
{
    fn compile(
        &mut self,
        ir: &LoadedIr,
        dirty_files: &[(LibraryFile, SrcFile)],
    ) -> Result<Vec<Vec<u8>>, IcError> {
        self(ir, dirty_files)
    }
}
