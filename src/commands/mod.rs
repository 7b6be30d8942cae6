//! # CLI Command Implementations
//!
//! One module per `config-repo` subcommand. Each defines an `Args` struct
//! derived with `clap` and an `execute` function that calls into the
//! `config_repo` library.

pub mod fingerprint;
pub mod status;
pub mod sync;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use config_repo::config::{self, Settings};
use config_repo::defaults::SETTINGS_FILE;

/// Arguments shared by commands that read the settings file.
#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
    /// Path to the settings file.
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = SETTINGS_FILE,
        env = "CONFIG_REPO_CONFIG"
    )]
    pub config: PathBuf,

    /// Directory for working copies. Overrides `working_dir` in the settings.
    #[arg(long, value_name = "DIR", env = "CONFIG_REPO_WORKING_DIR")]
    pub working_dir: Option<PathBuf>,

    /// Directory for update records. Overrides `data_dir` in the settings.
    #[arg(long, value_name = "DIR", env = "CONFIG_REPO_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

impl SettingsArgs {
    /// Load the settings file and apply directory overrides.
    pub fn load(&self) -> Result<Settings> {
        let mut settings = load_settings(&self.config)?;
        if let Some(dir) = &self.working_dir {
            settings.working_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.data_dir {
            settings.data_dir = Some(dir.clone());
        }
        Ok(settings)
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    config::from_file(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}
