//! Path resolution for keel
//!
//! # Environment Variables
//!
//! - `KEEL_CONFIG_DIR` - Override the user config directory
//! - `KEEL_PROJECT_DIR` - Directory holding the declaration files
//! - `KEEL_STATE` - Override the state file location
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `KEEL_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/keel` (if set)
//! 3. `~/.config/keel`
//!
//! For state_file():
//! 1. `--state` flag
//! 2. `KEEL_STATE` environment variable
//! 3. `<project>/.keel/state.json`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "KEEL_CONFIG_DIR";

/// Environment variable for project directory override
pub const ENV_PROJECT_DIR: &str = "KEEL_PROJECT_DIR";

/// Environment variable for state file override
pub const ENV_STATE: &str = "KEEL_STATE";

/// Directory inside a project that holds keel's own files
pub const PROJECT_DATA_DIR: &str = ".keel";

/// Get the keel config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("keel");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("keel");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// User defaults file
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Directory the declarations are loaded from
///
/// Priority: `-C` flag, `KEEL_PROJECT_DIR`, current directory.
pub fn project_dir(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(expand(&dir.to_string_lossy()));
    }

    if let Ok(dir) = std::env::var(ENV_PROJECT_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using project dir from {}: {}",
            ENV_PROJECT_DIR,
            path.display()
        );
        return Ok(path);
    }

    std::env::current_dir().context("Could not determine current directory")
}

/// State file location for a project
pub fn state_file(project: &Path, flag: Option<&Path>) -> PathBuf {
    if let Some(file) = flag {
        return expand(&file.to_string_lossy());
    }

    if let Ok(file) = std::env::var(ENV_STATE) {
        let path = expand(&file);
        log::debug!("Using state file from {}: {}", ENV_STATE, path.display());
        return path;
    }

    project.join(PROJECT_DATA_DIR).join("state.json")
}

/// Expand ~ and environment variables in a path string.
///
/// # Examples
///
/// ```ignore
/// let home_path = paths::expand("~/infra");
/// let var_path = paths::expand("$HOME/infra/state.json");
/// ```
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Run `f` with `key` set, restoring the previous value afterwards
    ///
    /// # Safety
    /// Uses env::set_var/remove_var; each test touches its own variable.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: no other test reads this variable
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: as above
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_config_dir_env_override() {
        with_env_var(ENV_CONFIG_DIR, "/custom/keel", || {
            assert_eq!(config_dir().unwrap(), PathBuf::from("/custom/keel"));
            assert_eq!(
                config_file().unwrap(),
                PathBuf::from("/custom/keel/config.toml")
            );
        });
    }

    #[test]
    fn test_project_dir_flag_wins() {
        let dir = project_dir(Some(Path::new("/srv/infra"))).unwrap();
        assert_eq!(dir, PathBuf::from("/srv/infra"));
    }

    #[test]
    fn test_state_file_resolution() {
        let project = Path::new("/srv/infra");
        assert_eq!(
            state_file(project, Some(Path::new("/tmp/other.json"))),
            PathBuf::from("/tmp/other.json")
        );

        with_env_var(ENV_STATE, "/var/lib/keel/state.json", || {
            assert_eq!(
                state_file(project, None),
                PathBuf::from("/var/lib/keel/state.json")
            );
        });
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand("~/infra");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with("infra"));
    }

    #[test]
    fn test_expand_absolute_is_unchanged() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
    }
}
