//! Configuration types deserialized from `tessera.toml`.

use serde::Deserialize;
use std::collections::BTreeMap;

/// The top-level configuration parsed from `tessera.toml`.
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    /// Where the incremental cache lives and how stale state is handled.
    #[serde(default)]
    pub cache: CacheConfig,
    /// The library set: main library, all libraries, friends.
    pub libraries: LibrariesConfig,
    /// Free-form compiler settings. Any change here lands the run in a fresh
    /// cache root, so every setting that affects generated code belongs here.
    #[serde(default)]
    pub compiler: BTreeMap<String, toml::Value>,
    /// Debugging overrides.
    #[serde(default)]
    pub debug: DebugConfig,
}

/// Cache location and staleness policy.
#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    /// Cache directory, relative to the project directory unless absolute.
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    /// Wipe the whole cache root when the set of per-library cache folders on
    /// disk differs from the resolved library set.
    #[serde(default = "default_true")]
    pub wipe_on_library_set_change: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            wipe_on_library_set_change: true,
        }
    }
}

/// The libraries taking part in the build.
#[derive(Debug, Deserialize)]
pub struct LibrariesConfig {
    /// Path of the main library. Always ordered last.
    pub main: String,
    /// Paths of every library, including the main one.
    #[serde(default)]
    pub all: Vec<String>,
    /// Paths of libraries allowed to see internal declarations of the main library.
    #[serde(default)]
    pub friends: Vec<String>,
    /// Module name of the library holding compiler intrinsics. Defaults to the
    /// first library in dependency order.
    #[serde(default)]
    pub intrinsics: Option<String>,
}

/// Debugging overrides.
#[derive(Debug, Default, Deserialize)]
pub struct DebugConfig {
    /// Source files of the main library to treat as modified regardless of
    /// their fingerprints.
    #[serde(default)]
    pub dirty_files: Option<Vec<String>>,
}

fn default_cache_dir() -> String {
    ".tessera-cache".to_string()
}

fn default_true() -> bool {
    true
}
