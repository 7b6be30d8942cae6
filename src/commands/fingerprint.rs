//! # Fingerprint Command Implementation
//!
//! Prints the fingerprint and masked URL of each declared config repository,
//! which is how they are named in health messages and update records. With
//! `--full` the working-copy folder is shown too; its name embeds the full
//! fingerprint.

use anyhow::Result;
use clap::Args;

use config_repo::output::{highlight, OutputConfig};

use super::SettingsArgs;

/// Print the fingerprint of each declared config repository
#[derive(Args, Debug)]
pub struct FingerprintArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Print the full 64-character fingerprint and the working-copy folder.
    #[arg(long)]
    pub full: bool,
}

/// Execute the `fingerprint` command.
pub fn execute(args: FingerprintArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let settings = args.settings.load()?;

    if settings.config_repos.is_empty() {
        println!("No config repos declared in {}", args.settings.config.display());
        return Ok(());
    }

    for repo in &settings.config_repos {
        let fingerprint = repo.material.fingerprint();
        let shown = if args.full {
            fingerprint.as_str()
        } else {
            fingerprint.short()
        };
        println!(
            "{}  {}  {}",
            highlight(&out, shown),
            repo.id,
            repo.material.long_description()
        );
        if args.full {
            println!("    folder: {}", repo.material.folder_name());
        }
    }
    Ok(())
}
