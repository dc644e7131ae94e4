// Config and data file locations

use std::path::PathBuf;

use directories::ProjectDirs;

const CONFIG_FILE: &str = "sluice.toml";
const HISTORY_FILE: &str = "history.db";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "sluice", "sluice")
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// `--config` / `SLUICE_CONFIG` when given, else the per-user config file if
/// it exists
pub fn config_file(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand(path));
    }
    project_dirs()
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
        .filter(|path| path.exists())
}

/// SQLite URL of the run history
pub fn history_url(configured: Option<&str>) -> anyhow::Result<String> {
    let path = match configured {
        Some(path) => expand(path),
        None => {
            let dirs = project_dirs()
                .ok_or_else(|| anyhow::anyhow!("no home directory for the run history"))?;
            std::fs::create_dir_all(dirs.data_dir())?;
            dirs.data_dir().join(HISTORY_FILE)
        }
    };
    Ok(format!("sqlite://{}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_config_is_expanded() {
        let path = config_file(Some("~/imports/sluice.toml")).unwrap();
        assert!(path.ends_with("imports/sluice.toml"));

        let path = config_file(Some("/etc/sluice/prod.toml")).unwrap();
        assert_eq!(path, PathBuf::from("/etc/sluice/prod.toml"));
    }

    #[test]
    fn test_configured_history_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let url = history_url(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(url, format!("sqlite://{}", path.display()));
    }
}
