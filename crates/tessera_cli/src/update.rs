//! `tessera update`: brings the incremental cache of a project up to date.
//!
//! Loads `tessera.toml`, reads the library descriptors, runs the updater with
//! the descriptor compiler and prints what was rebuilt.

use serde::Serialize;
use tessera_config::ResolvedConfig;
use tessera_ic::memory::MemoryCompiler;
use tessera_ic::{CacheUpdater, DirtyReport, ModuleArtifact, UpdateOutcome, UpdaterOptions};

use crate::descriptor::load_frontend;
use crate::project::load_project;
use crate::{GlobalArgs, ReportFormat, UpdateArgs};

#[derive(Serialize)]
struct JsonSummary<'a> {
    iterations: usize,
    modules: &'a [ModuleArtifact],
    report: &'a DirtyReport,
}

/// Runs the `tessera update` command.
pub fn run(args: &UpdateArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = load_project(global)?;
    let outcome = update(&config, args)?;

    match args.format {
        ReportFormat::Json => {
            let summary = JsonSummary {
                iterations: outcome.iterations,
                modules: &outcome.modules,
                report: &outcome.report,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        ReportFormat::Text => {
            if !global.quiet {
                print_summary(&outcome, global.verbose);
            }
        }
    }
    Ok(0)
}

/// Runs the updater for a resolved configuration.
pub fn update(
    config: &ResolvedConfig,
    args: &UpdateArgs,
) -> Result<UpdateOutcome, Box<dyn std::error::Error>> {
    let frontend = load_frontend(&config.libraries)?;
    let updater = CacheUpdater::new(updater_options(config, args));
    let mut compiler = MemoryCompiler::new(updater.interner());
    Ok(updater.actualize_caches(&frontend, &frontend, &mut compiler)?)
}

fn updater_options(config: &ResolvedConfig, args: &UpdateArgs) -> UpdaterOptions {
    let dirty_files = if args.dirty.is_empty() {
        config.dirty_files.clone()
    } else {
        Some(args.dirty.clone())
    };
    UpdaterOptions {
        main_library: config.main_library.clone(),
        libraries: config.libraries.clone(),
        friends: config.friends.clone(),
        cache_dir: config.cache_dir.clone(),
        config_hash: config.config_hash,
        intrinsics: config.intrinsics.clone(),
        wipe_on_library_set_change: config.wipe_on_library_set_change,
        dirty_files,
    }
}

fn print_summary(outcome: &UpdateOutcome, verbose: bool) {
    for module in &outcome.modules {
        let rebuilt = module.rebuilt_files();
        eprintln!(
            "   Updated {} ({} files, {} rebuilt)",
            module.module_name,
            module.files.len(),
            rebuilt.len()
        );
        if verbose {
            for name in rebuilt {
                eprintln!("      {name}");
            }
        }
    }
    if verbose {
        for (library, files) in &outcome.report.libraries {
            for (file, states) in files {
                let states: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
                eprintln!("   {library}/{file}: {}", states.join(", "));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_project(dir: &Path, foo_body: &str) {
        fs::write(
            dir.join("tessera.toml"),
            r#"
[libraries]
main = "app.klib.json"
all = ["base.klib.json", "app.klib.json"]

[compiler]
opt = "speed"
"#,
        )
        .unwrap();
        fs::write(
            dir.join("base.klib.json"),
            format!(
                r#"{{"module_name": "base", "files": {{"base.kt": {{"declarations": [{{"signature": "foo", "body": "{foo_body}"}}]}}}}}}"#
            ),
        )
        .unwrap();
        fs::write(
            dir.join("app.klib.json"),
            r#"{"module_name": "app", "depends": ["base"], "files": {
                "main.kt": {"references": ["foo"]},
                "util.kt": {"declarations": [{"signature": "util", "body": "u"}]}
            }}"#,
        )
        .unwrap();
    }

    fn config(dir: &Path) -> ResolvedConfig {
        let global = GlobalArgs {
            quiet: true,
            verbose: false,
            config: Some(dir.to_string_lossy().into_owned()),
        };
        load_project(&global).unwrap()
    }

    fn args(dirty: &[&str]) -> UpdateArgs {
        UpdateArgs {
            dirty: dirty.iter().map(|s| s.to_string()).collect(),
            format: ReportFormat::Text,
        }
    }

    #[test]
    fn second_update_only_rebuilds_importers() {
        let tmp = TempDir::new().unwrap();
        write_project(tmp.path(), "1");
        let first = update(&config(tmp.path()), &args(&[])).unwrap();
        assert_eq!(first.rebuilt_files().len(), 3);

        write_project(tmp.path(), "2");
        let second = update(&config(tmp.path()), &args(&[])).unwrap();
        assert_eq!(
            second.rebuilt_files(),
            vec![("base", "base.kt"), ("app", "main.kt")]
        );
    }

    #[test]
    fn dirty_flag_overrides_config() {
        let tmp = TempDir::new().unwrap();
        write_project(tmp.path(), "1");
        update(&config(tmp.path()), &args(&[])).unwrap();

        let outcome = update(&config(tmp.path()), &args(&["util.kt"])).unwrap();
        assert_eq!(outcome.rebuilt_files(), vec![("app", "util.kt")]);
    }

    #[test]
    fn json_summary_lists_modules() {
        let tmp = TempDir::new().unwrap();
        write_project(tmp.path(), "1");
        let outcome = update(&config(tmp.path()), &args(&[])).unwrap();
        let summary = JsonSummary {
            iterations: outcome.iterations,
            modules: &outcome.modules,
            report: &outcome.report,
        };
        let json: serde_json::Value =
            serde_json::to_value(&summary).unwrap();
        assert_eq!(json["modules"][0]["module_name"], "base");
        assert_eq!(json["modules"][1]["module_name"], "app");
    }
}
