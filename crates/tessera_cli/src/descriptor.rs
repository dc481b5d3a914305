//! JSON library descriptors.
//!
//! A descriptor (`*.klib.json`) lists the files of one library with their
//! declarations and references. The library path is the descriptor path
//! itself.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tessera_ic::memory::{MemoryFile, MemoryFrontend, MemoryLibrary};

/// On-disk form of a library.
#[derive(Debug, Deserialize)]
pub struct LibraryDescriptor {
    /// Unique module name.
    pub module_name: String,
    /// Module names of dependencies.
    #[serde(default)]
    pub depends: Vec<String>,
    /// Source files by name.
    #[serde(default)]
    pub files: BTreeMap<String, MemoryFile>,
}

impl LibraryDescriptor {
    /// Reads a descriptor from `path`.
    pub fn read(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read library {}: {e}", path.display()))?;
        let descriptor = serde_json::from_str(&content)
            .map_err(|e| format!("invalid library descriptor {}: {e}", path.display()))?;
        Ok(descriptor)
    }

    /// The library located at `path`.
    pub fn into_library(self, path: PathBuf) -> MemoryLibrary {
        MemoryLibrary {
            path,
            module_name: self.module_name,
            depends: self.depends,
            files: self.files,
        }
    }
}

/// Reads every descriptor and serves them as one frontend.
pub fn load_frontend(paths: &[PathBuf]) -> Result<MemoryFrontend, Box<dyn std::error::Error>> {
    let libraries = paths
        .iter()
        .map(|path| Ok(LibraryDescriptor::read(path)?.into_library(path.clone())))
        .collect::<Result<Vec<_>, Box<dyn std::error::Error>>>()?;
    Ok(MemoryFrontend::new(libraries))
}
