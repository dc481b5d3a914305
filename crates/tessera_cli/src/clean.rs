//! `tessera clean`: removes the cache directory of the project.

use crate::project::load_project;
use crate::GlobalArgs;

/// Runs the `tessera clean` command.
pub fn run(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = load_project(global)?;
    let dir = &config.cache_dir;
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {
            if !global.quiet {
                eprintln!("   Removed {}", dir.display());
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(format!("cannot remove {}: {e}", dir.display()).into()),
    }
    Ok(0)
}
