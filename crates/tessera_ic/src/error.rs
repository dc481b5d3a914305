//! Error types for cache storage and for the incremental update run.

use std::path::PathBuf;

use tessera_common::{Interner, InternalError};

use crate::model::{LibraryFile, Signature, SrcFile};

/// Errors that can occur while reading or writing the on-disk cache.
///
/// Reads are fail-safe and turn into cache misses; this enum mostly surfaces
/// from writes during the commit phase.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that abort an incremental cache update.
///
/// Nothing is committed when a run fails, so the previous cache generation
/// stays valid for the next run.
#[derive(Debug, thiserror::Error)]
pub enum IcError {
    /// The main library is not part of the resolved library set.
    #[error("main library {path} is absent from the resolved library set")]
    MainLibraryMissing {
        /// Canonical path of the main library.
        path: PathBuf,
    },

    /// A library names a dependency that was not resolved.
    #[error("library '{library}' depends on unresolved library '{dependency}'")]
    UnresolvedDependency {
        /// Module name of the depending library.
        library: String,
        /// Module name of the missing dependency.
        dependency: String,
    },

    /// The resolved libraries form a dependency cycle.
    #[error("dependency cycle through library '{library}'")]
    DependencyCycle {
        /// Module name of a library on the cycle.
        library: String,
    },

    /// The external resolver failed.
    #[error("library resolution failed: {reason}")]
    Resolution {
        /// Description from the resolver.
        reason: String,
    },

    /// The external IR loader failed.
    #[error("IR loading failed: {reason}")]
    Load {
        /// Description from the loader.
        reason: String,
    },

    /// The external fragment compiler failed.
    #[error("compilation failed: {reason}")]
    Compile {
        /// Description from the compiler.
        reason: String,
    },

    /// A cache invariant was violated.
    #[error(transparent)]
    Internal(#[from] InternalError),

    /// Writing the cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Builds an invariant-violation error naming the library and file involved.
pub(crate) fn ic_error(
    interner: &Interner,
    what: impl std::fmt::Display,
    lib: Option<LibraryFile>,
    src: Option<SrcFile>,
) -> IcError {
    IcError::Internal(InternalError::new(describe(interner, what, lib, src)))
}

/// Builds the error reported when something the cache relies on is missing.
pub(crate) fn not_found_ic_error(
    interner: &Interner,
    what: impl std::fmt::Display,
    lib: Option<LibraryFile>,
    src: Option<SrcFile>,
) -> IcError {
    IcError::Internal(InternalError::not_found(describe(interner, what, lib, src)))
}

/// Builds the error reported when a signature hash was expected but never computed.
pub(crate) fn missing_hash_error(
    interner: &Interner,
    signature: Signature,
    lib: LibraryFile,
    src: SrcFile,
) -> IcError {
    not_found_ic_error(
        interner,
        format_args!("signature {} hash", signature.resolve(interner)),
        Some(lib),
        Some(src),
    )
}

fn describe(
    interner: &Interner,
    what: impl std::fmt::Display,
    lib: Option<LibraryFile>,
    src: Option<SrcFile>,
) -> String {
    let mut message = what.to_string();
    if let Some(lib) = lib {
        message.push_str("; library: ");
        message.push_str(lib.resolve(interner));
    }
    if let Some(src) = src {
        message.push_str("; file: ");
        message.push_str(src.resolve(interner));
    }
    message
}
