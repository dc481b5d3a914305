//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::ProjectConfig;
use std::path::Path;

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// Loads and validates `tessera.toml` from a project directory.
pub fn load_config(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    load_config_file(&project_dir.join(CONFIG_FILE_NAME))
}

/// Loads and validates a configuration file at an explicit path.
pub fn load_config_file(path: &Path) -> Result<ProjectConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parses and validates a configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that required fields are present and the library set is consistent.
fn validate_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    if config.libraries.main.is_empty() {
        return Err(ConfigError::MissingField("libraries.main".to_string()));
    }
    if config.cache.dir.is_empty() {
        return Err(ConfigError::MissingField("cache.dir".to_string()));
    }
    let mut seen = std::collections::BTreeSet::new();
    for lib in &config.libraries.all {
        if !seen.insert(lib.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "library '{lib}' is listed more than once"
            )));
        }
    }
    if let Some(dirty) = &config.debug.dirty_files {
        if dirty.iter().any(String::is_empty) {
            return Err(ConfigError::ValidationError(
                "debug.dirty_files contains an empty file name".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
[libraries]
main = "build/app.klib.json"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.libraries.main, "build/app.klib.json");
        assert!(config.libraries.all.is_empty());
        assert_eq!(config.cache.dir, ".tessera-cache");
        assert!(config.cache.wipe_on_library_set_change);
        assert!(config.compiler.is_empty());
        assert!(config.debug.dirty_files.is_none());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[cache]
dir = "out/ic"
wipe_on_library_set_change = false

[libraries]
main = "build/app.klib.json"
all = ["libs/stdlib.klib.json", "libs/coroutines.klib.json", "build/app.klib.json"]
friends = ["build/app-test.klib.json"]
intrinsics = "stdlib"

[compiler]
target = "es2015"
granularity = "per-file"
source_maps = true

[debug]
dirty_files = ["main.kt"]
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.cache.dir, "out/ic");
        assert!(!config.cache.wipe_on_library_set_change);
        assert_eq!(config.libraries.all.len(), 3);
        assert_eq!(config.libraries.friends, vec!["build/app-test.klib.json"]);
        assert_eq!(config.libraries.intrinsics.as_deref(), Some("stdlib"));
        assert_eq!(config.compiler.len(), 3);
        assert_eq!(
            config.debug.dirty_files.as_deref(),
            Some(&["main.kt".to_string()][..])
        );
    }

    #[test]
    fn missing_main_errors() {
        let toml = r#"
[libraries]
main = ""
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn missing_libraries_table_errors() {
        let err = load_config_from_str("[cache]\ndir = \"c\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn duplicate_library_errors() {
        let toml = r#"
[libraries]
main = "a.klib.json"
all = ["a.klib.json", "a.klib.json"]
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn empty_dirty_file_errors() {
        let toml = r#"
[libraries]
main = "a.klib.json"

[debug]
dirty_files = [""]
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn load_from_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[libraries]\nmain = \"app.klib.json\"\n",
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.libraries.main, "app.klib.json");
    }

    #[test]
    fn io_error_from_nonexistent_dir() {
        let err = load_config(Path::new("/nonexistent/dir")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
