//! Incremental cross-module compilation cache.
//!
//! Each library of a program keeps a per-file cache of compiled fragments
//! together with the signature-level dependencies between files. On every
//! run [`CacheUpdater`] detects which files changed, propagates the changes
//! through the dependency graph until no more files are affected, recompiles
//! exactly the affected files and commits the new cache generation.
//!
//! The frontend is pluggable through [`LibraryResolver`], [`IrLoader`] and
//! [`FragmentCompiler`]; [`memory`] provides an in-memory implementation.

#![warn(missing_docs)]

pub mod artifact;
pub mod detector;
pub mod error;
pub mod frontend;
pub mod graph;
pub mod intrinsics;
pub mod layout;
pub mod manifest;
pub mod memory;
pub mod model;
pub mod propagate;
pub mod report;
pub mod signature_hash;
pub mod store;
pub mod updater;

pub use error::{CacheError, IcError};
pub use frontend::{
    Declaration, FragmentCompiler, IrLoader, LibraryResolver, LoadRequest, LoadedFile,
    LoadedFragment, LoadedIr, ResolvedLibrary,
};
pub use graph::{LibraryGraph, LibraryNode};
pub use model::{FileMap, FileMetadata, LibraryFile, Signature, SrcFile};
pub use report::{DirtyFileState, DirtyReport};
pub use store::{FileArtifact, ModuleArtifact};
pub use updater::{CacheUpdater, UpdateOutcome, UpdaterOptions};
