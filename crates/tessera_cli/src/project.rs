//! Project root discovery and configuration loading shared by the commands.

use std::path::{Path, PathBuf};

use tessera_config::{ResolvedConfig, CONFIG_FILE_NAME};

use crate::GlobalArgs;

/// Walks up from `start` looking for the nearest directory containing `tessera.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE_NAME).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(format!(
                "no {CONFIG_FILE_NAME} found in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Loads and resolves the project configuration.
///
/// `--config` may name either the file itself or the directory holding it;
/// without it the project root is searched from the current directory.
pub fn load_project(global: &GlobalArgs) -> Result<ResolvedConfig, Box<dyn std::error::Error>> {
    let (base_dir, config) = match global.config.as_deref().map(PathBuf::from) {
        Some(path) if path.is_file() => {
            let base_dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (base_dir, tessera_config::load_config_file(&path)?)
        }
        Some(dir) => {
            let config = tessera_config::load_config(&dir)?;
            (dir, config)
        }
        None => {
            let root = find_project_root(&std::env::current_dir()?)?;
            let config = tessera_config::load_config(&root)?;
            (root, config)
        }
    };
    tracing::debug!(root = %base_dir.display(), "loaded project configuration");
    Ok(tessera_config::resolve_config(&config, &base_dir)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = "[libraries]\nmain = \"app.klib.json\"\n";

    fn global(config: Option<&Path>) -> GlobalArgs {
        GlobalArgs {
            quiet: true,
            verbose: false,
            config: config.map(|p| p.to_string_lossy().into_owned()),
        }
    }

    #[test]
    fn finds_root_in_parent() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE_NAME), CONFIG).unwrap();
        let nested = tmp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested).unwrap(), tmp.path());
    }

    #[test]
    fn load_from_config_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, CONFIG).unwrap();
        let resolved = load_project(&global(Some(&path))).unwrap();
        assert_eq!(resolved.main_library, tmp.path().join("app.klib.json"));
        assert_eq!(resolved.cache_dir, tmp.path().join(".tessera-cache"));
    }

    #[test]
    fn load_from_config_dir() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE_NAME), CONFIG).unwrap();
        let resolved = load_project(&global(Some(tmp.path()))).unwrap();
        assert_eq!(resolved.libraries, vec![tmp.path().join("app.klib.json")]);
    }

    #[test]
    fn missing_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(load_project(&global(Some(tmp.path()))).is_err());
    }
}
