//! Config file discovery and path expansion
//!
//! # Config Resolution Priority
//!
//! 1. `--config PATH` (or `STACKUP_CONFIG`, wired through clap)
//! 2. `./stackup.toml`
//! 3. `/etc/stackup/stackup.toml`
//! 4. `XDG_CONFIG_HOME/stackup/stackup.toml` (platform config dir)
//!
//! A missing file is not an error: the built-in defaults apply.

use std::path::{Path, PathBuf};

/// Config file name looked up in every candidate directory
pub const CONFIG_FILE: &str = "stackup.toml";

/// System-wide config directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/stackup";

/// Candidate config paths in priority order
pub fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![
        PathBuf::from(CONFIG_FILE),
        Path::new(SYSTEM_CONFIG_DIR).join(CONFIG_FILE),
    ];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("stackup").join(CONFIG_FILE));
    }
    candidates
}

/// Resolve the config file to load, if any
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand(&path.to_string_lossy()));
    }
    let found = config_candidates().into_iter().find(|p| p.is_file());
    match &found {
        Some(path) => log::debug!("Using config file {}", path.display()),
        None => log::debug!("No config file found, using defaults"),
    }
    found
}

/// Expand `~` and environment variables in a path.
///
/// All config paths go through this so `~/...` and `$HOME/...` behave
/// the same everywhere.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let found = find_config(Some(Path::new("/tmp/custom.toml")));
        assert_eq!(found, Some(PathBuf::from("/tmp/custom.toml")));
    }

    #[test]
    fn candidates_start_with_working_directory() {
        let candidates = config_candidates();
        assert_eq!(candidates[0], PathBuf::from("stackup.toml"));
        assert_eq!(candidates[1], PathBuf::from("/etc/stackup/stackup.toml"));
    }

    #[test]
    fn expand_leaves_absolute_paths_alone() {
        assert_eq!(expand("/srv/app"), PathBuf::from("/srv/app"));
    }

    #[test]
    fn expand_unknown_var_is_left_as_is() {
        let p = expand("$STACKUP_SURELY_UNSET_VAR/app");
        assert_eq!(p, PathBuf::from("$STACKUP_SURELY_UNSET_VAR/app"));
    }
}
