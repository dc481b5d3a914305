//! Shared foundational types used across the tessera incremental cache.
//!
//! This crate provides content hashing, interned identifiers for libraries,
//! source files and declaration signatures, and the internal error type.

#![warn(missing_docs)]

pub mod hash;
pub mod ident;
pub mod result;

pub use hash::{ContentHash, ContentHasher};
pub use ident::{Ident, Interner};
pub use result::InternalError;
