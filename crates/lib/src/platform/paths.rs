//! Directories derived from the captured environment.
//!
//! Unlike most path helpers these never read the live process environment;
//! they take the [`EnvironmentSet`] captured at the start of the run.

use std::path::{Path, PathBuf};

use crate::consts::APP_NAME;
use crate::env::EnvironmentSet;

/// Root of the checked-out workspace.
///
/// `GITHUB_WORKSPACE` when set, otherwise `fallback` (normally the current directory).
pub fn workspace_dir(env: &EnvironmentSet, fallback: &Path) -> PathBuf {
  env
    .non_empty("GITHUB_WORKSPACE")
    .map(PathBuf::from)
    .unwrap_or_else(|| fallback.to_path_buf())
}

/// Scratch directory for generated scripts.
pub fn temp_dir(env: &EnvironmentSet) -> PathBuf {
  env
    .non_empty("RUNNER_TEMP")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir(env: &EnvironmentSet) -> Option<PathBuf> {
  env.non_empty("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir(env: &EnvironmentSet) -> Option<PathBuf> {
  env.non_empty("HOME").map(PathBuf::from)
}

/// Returns the directory for cached downloads
#[cfg(windows)]
pub fn cache_dir(env: &EnvironmentSet) -> PathBuf {
  env
    .non_empty("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|| temp_dir(env))
    .join(APP_NAME)
    .join("cache")
}

/// Returns the directory for cached downloads
#[cfg(not(windows))]
pub fn cache_dir(env: &EnvironmentSet) -> PathBuf {
  let cache_home = env
    .non_empty("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir(env).map(|h| h.join(".cache")))
    .unwrap_or_else(|| temp_dir(env));
  cache_home.join(APP_NAME)
}
