//! # Sync Command Implementation
//!
//! Runs one update cycle for each declared config repository, in parallel,
//! then prints the merged pipelines and any health problems. Repositories
//! whose new revision is rejected keep their last accepted configuration;
//! the command still exits non-zero so schedulers notice.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Args;
use log::debug;

use config_repo::checkout::WorkingCopyManager;
use config_repo::engine::{CycleOutcome, FileRecordStore, MergeEngine};
use config_repo::health::{HealthStateRegistry, Severity};
use config_repo::material::{Fingerprint, MaterialIdentity};
use config_repo::output::{highlight, marker, Marker, OutputConfig};

use super::SettingsArgs;

/// Update config repositories and merge their fragments
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Only update the config repo with this id. May be repeated.
    #[arg(long, value_name = "ID")]
    pub only: Vec<String>,

    /// Re-parse repositories even when their revision has not changed.
    #[arg(long)]
    pub force: bool,
}

/// Execute the `sync` command.
pub fn execute(args: SyncArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let settings = args.settings.load()?;

    let mut selected: Vec<(&str, MaterialIdentity)> = Vec::new();
    for id in &args.only {
        if settings.find(id).is_none() {
            return Err(anyhow!("No config repo with id '{}' in {}", id, args.settings.config.display()));
        }
    }
    for repo in &settings.config_repos {
        if args.only.is_empty() || args.only.contains(&repo.id) {
            selected.push((repo.id.as_str(), repo.material.clone()));
        }
    }

    let health = Arc::new(HealthStateRegistry::new());
    let engine = MergeEngine::new(
        WorkingCopyManager::new(settings.working_dir()),
        Box::new(FileRecordStore::new(&settings.data_dir())),
        settings.local.clone(),
        Arc::clone(&health),
    )?;

    println!(
        "{} Updating {} config repositories",
        marker(&out, Marker::Scan),
        selected.len()
    );

    let materials: Vec<MaterialIdentity> = selected.iter().map(|(_, m)| m.clone()).collect();
    let results: Vec<(Fingerprint, config_repo::error::Result<CycleOutcome>)> = if args.force {
        materials
            .iter()
            .map(|m| (m.fingerprint(), engine.update(m)))
            .collect()
    } else {
        engine.update_all(&materials)
    };

    let mut failures = 0;
    for ((id, _), (fingerprint, result)) in selected.iter().zip(results) {
        debug!("Cycle for {} ({}) finished", id, fingerprint.short());
        match result {
            Ok(CycleOutcome::Merged { revision }) => println!(
                "{} {}: merged revision {}",
                marker(&out, Marker::Ok),
                id,
                highlight(&out, &revision)
            ),
            Ok(CycleOutcome::Unchanged { revision }) => println!(
                "{} {}: unchanged at revision {}",
                marker(&out, Marker::Ok),
                id,
                highlight(&out, &revision)
            ),
            Ok(CycleOutcome::AlreadyInProgress) => println!(
                "{} {}: update already in progress",
                marker(&out, Marker::Warn),
                id
            ),
            Ok(CycleOutcome::CheckoutFailed { message }) => {
                failures += 1;
                println!("{} {}: checkout failed: {}", marker(&out, Marker::Err), id, message);
            }
            Ok(CycleOutcome::Faulted { revision, message }) => {
                failures += 1;
                println!(
                    "{} {}: revision {} rejected, keeping previous configuration\n   {}",
                    marker(&out, Marker::Err),
                    id,
                    revision,
                    message
                );
            }
            Err(e) => {
                failures += 1;
                println!("{} {}: {}", marker(&out, Marker::Err), id, e);
            }
        }
    }

    let merged = engine.merged_config();
    println!("\n{} Merged configuration:", marker(&out, Marker::Info));
    for group in merged.groups() {
        println!("   {}", group.name);
        for pipeline in &group.pipelines {
            let source = if pipeline.is_local() { "local" } else { "config repo" };
            println!("     - {} ({})", highlight(&out, pipeline.name.as_str()), source);
        }
    }
    for environment in merged.environments() {
        println!(
            "   environment {}: {} pipelines",
            environment.name,
            environment.pipelines.len()
        );
    }

    let problems = health.all();
    if !problems.is_empty() {
        println!("\n{} Health:", marker(&out, Marker::Warn));
        for entry in problems {
            let level = match entry.severity {
                Severity::Error => marker(&out, Marker::Err),
                Severity::Warning => marker(&out, Marker::Warn),
            };
            println!("   {} [{}] {}: {}", level, entry.scope, entry.message, entry.description);
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} config repositories failed to update", failures));
    }
    Ok(())
}
