//! Default locations and path normalization.

use std::env;
use std::path::{Component, Path, PathBuf};

/// `$HOME`, or `/tmp` with a warning when unset.
pub fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[GJ-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

/// Directory holding the state database, journal, and meal export.
pub fn default_data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("gutj")
}

/// Default TOML config location.
pub fn default_config_file() -> PathBuf {
    home_dir().join(".config").join("gutj").join("config.toml")
}

/// Expand a leading `~/` and make the path absolute.
///
/// Existing paths are canonicalized; missing ones are made absolute against
/// the CWD and `..`/`.` are resolved syntactically.
pub fn resolve_user_path(path: &Path) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        env::current_dir().map_or_else(|_| expanded.clone(), |cwd| cwd.join(&expanded))
    };

    std::fs::canonicalize(&absolute).unwrap_or_else(|_| normalize_syntactic(&absolute))
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_live_under_gutj_dirs() {
        assert!(default_data_dir().ends_with(".local/share/gutj"));
        assert!(default_config_file().ends_with(".config/gutj/config.toml"));
    }

    #[cfg(unix)]
    #[test]
    fn normalizes_missing_path_syntactically() {
        let input = Path::new("/nonexistent-gutj/meals/../export.json");
        assert!(std::fs::canonicalize(input).is_err());
        assert_eq!(
            resolve_user_path(input),
            PathBuf::from("/nonexistent-gutj/export.json")
        );
    }

    #[test]
    fn tilde_expands_to_home() {
        let resolved = resolve_user_path(Path::new("~/gutj-test-nonexistent/meals.json"));
        assert!(resolved.starts_with(normalize_syntactic(&home_dir())));
        assert!(resolved.ends_with("gutj-test-nonexistent/meals.json"));
    }
}
