//! Resolution of a parsed configuration against its project directory.

use crate::error::ConfigError;
use crate::types::ProjectConfig;
use std::path::{Path, PathBuf};
use tessera_common::{ContentHash, ContentHasher};

/// A configuration with every path made absolute and the compiler settings
/// reduced to a fingerprint.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The main library.
    pub main_library: PathBuf,
    /// Every library, main included.
    pub libraries: Vec<PathBuf>,
    /// Friend libraries of the main library.
    pub friends: Vec<PathBuf>,
    /// Directory holding all cache roots.
    pub cache_dir: PathBuf,
    /// Module name of the intrinsics library, if configured.
    pub intrinsics: Option<String>,
    /// Whether a mismatched library set wipes the whole cache root.
    pub wipe_on_library_set_change: bool,
    /// Forced-dirty source files of the main library.
    pub dirty_files: Option<Vec<String>>,
    /// Fingerprint of the compiler settings; names the cache root.
    pub config_hash: ContentHash,
}

/// Resolves relative paths against `base_dir` and fingerprints the compiler settings.
///
/// The main library is appended to the library list when it is not already
/// part of it.
pub fn resolve_config(
    config: &ProjectConfig,
    base_dir: &Path,
) -> Result<ResolvedConfig, ConfigError> {
    let main_library = base_dir.join(&config.libraries.main);
    let mut libraries: Vec<PathBuf> = config
        .libraries
        .all
        .iter()
        .map(|lib| base_dir.join(lib))
        .collect();
    if !libraries.contains(&main_library) {
        libraries.push(main_library.clone());
    }
    let friends = config
        .libraries
        .friends
        .iter()
        .map(|lib| base_dir.join(lib))
        .collect();

    Ok(ResolvedConfig {
        main_library,
        libraries,
        friends,
        cache_dir: base_dir.join(&config.cache.dir),
        intrinsics: config.libraries.intrinsics.clone(),
        wipe_on_library_set_change: config.cache.wipe_on_library_set_change,
        dirty_files: config.debug.dirty_files.clone(),
        config_hash: config_fingerprint(config)?,
    })
}

/// Computes the compiler-configuration fingerprint.
///
/// The `[compiler]` table is serialized to canonical JSON (keys are sorted)
/// and hashed together with the tessera version, so both a settings change
/// and a tool upgrade land in a fresh cache root.
pub fn config_fingerprint(config: &ProjectConfig) -> Result<ContentHash, ConfigError> {
    let json = serde_json::to_vec(&config.compiler)
        .map_err(|e| ConfigError::ValidationError(format!("unhashable compiler settings: {e}")))?;
    Ok(ContentHasher::new()
        .write_str(env!("CARGO_PKG_VERSION"))
        .write_bytes(&json)
        .finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    const BASE: &str = r#"
[libraries]
main = "build/app.klib.json"
all = ["libs/stdlib.klib.json"]
friends = ["build/friend.klib.json"]

[compiler]
target = "es2015"
"#;

    #[test]
    fn paths_are_joined_to_base_dir() {
        let config = load_config_from_str(BASE).unwrap();
        let resolved = resolve_config(&config, Path::new("/work")).unwrap();
        assert_eq!(resolved.main_library, PathBuf::from("/work/build/app.klib.json"));
        assert_eq!(resolved.cache_dir, PathBuf::from("/work/.tessera-cache"));
        assert_eq!(resolved.friends, vec![PathBuf::from("/work/build/friend.klib.json")]);
    }

    #[test]
    fn main_library_is_appended() {
        let config = load_config_from_str(BASE).unwrap();
        let resolved = resolve_config(&config, Path::new("/work")).unwrap();
        assert_eq!(
            resolved.libraries,
            vec![
                PathBuf::from("/work/libs/stdlib.klib.json"),
                PathBuf::from("/work/build/app.klib.json"),
            ]
        );
    }

    #[test]
    fn fingerprint_tracks_compiler_settings() {
        let a = load_config_from_str(BASE).unwrap();
        let b = load_config_from_str(&BASE.replace("es2015", "es5")).unwrap();
        assert_ne!(config_fingerprint(&a).unwrap(), config_fingerprint(&b).unwrap());
    }

    #[test]
    fn fingerprint_ignores_library_paths() {
        let a = load_config_from_str(BASE).unwrap();
        let b = load_config_from_str(&BASE.replace("libs/stdlib", "vendor/stdlib")).unwrap();
        assert_eq!(config_fingerprint(&a).unwrap(), config_fingerprint(&b).unwrap());
    }
}
