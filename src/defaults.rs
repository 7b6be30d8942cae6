//! Default locations for config-repo state.
//!
//! Both directories can be overridden in the settings file, with the
//! `--working-dir` / `--data-dir` flags or the `CONFIG_REPO_WORKING_DIR` /
//! `CONFIG_REPO_DATA_DIR` environment variables.

use std::path::PathBuf;

/// Name of the settings file looked up in the current directory.
pub const SETTINGS_FILE: &str = "config-repo.yaml";

/// Returns the default directory for working copies.
///
/// Uses the platform cache directory (`~/.cache/config-repo/working` on
/// Linux) and falls back to `.config-repo/working` in the current directory.
pub fn default_working_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("config-repo"))
        .unwrap_or_else(|| PathBuf::from(".config-repo"))
        .join("working")
}

/// Returns the default directory for persisted update records.
///
/// Uses the platform data directory (`~/.local/share/config-repo` on Linux)
/// and falls back to `.config-repo/data` in the current directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("config-repo"))
        .unwrap_or_else(|| PathBuf::from(".config-repo").join("data"))
}
