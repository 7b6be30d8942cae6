//! # Status Command Implementation
//!
//! Reads the persisted update records and reports, for each declared config
//! repository, the last processed revision, how many pipelines it currently
//! contributes and the last fault, if any. Read-only; no checkout is made.

use std::collections::HashMap;

use anyhow::Result;
use clap::Args;

use config_repo::engine::{FileRecordStore, RecordedFault, RepositoryUpdateRecord, UpdateRecordStore};
use config_repo::material::Fingerprint;
use config_repo::output::{highlight, marker, Marker, OutputConfig};

use super::SettingsArgs;

/// Show the persisted update state of each config repository
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Print the raw update records as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the `status` command.
pub fn execute(args: StatusArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let settings = args.settings.load()?;
    let store = FileRecordStore::new(&settings.data_dir());
    let records: HashMap<Fingerprint, RepositoryUpdateRecord> = store
        .load_all()?
        .into_iter()
        .map(|r| (r.repository_key.clone(), r))
        .collect();

    if args.json {
        let mut ordered: Vec<&RepositoryUpdateRecord> = records.values().collect();
        ordered.sort_by(|a, b| a.repository_key.cmp(&b.repository_key));
        println!("{}", serde_json::to_string_pretty(&ordered)?);
        return Ok(());
    }

    for repo in &settings.config_repos {
        let fingerprint = repo.material.fingerprint();
        println!(
            "{} ({}) {}",
            highlight(&out, &repo.id),
            fingerprint.short(),
            repo.material.masked_url()
        );
        let Some(record) = records.get(&fingerprint) else {
            println!("   {} never updated", marker(&out, Marker::Info));
            continue;
        };

        println!(
            "   last revision: {}",
            record.last_attempted_revision.as_deref().unwrap_or("-")
        );
        match &record.last_merged {
            Some(partial) => println!(
                "   merged revision: {} ({} pipelines)",
                partial.origin.revision,
                partial.pipelines().count()
            ),
            None => println!("   merged revision: -"),
        }
        let faults: Vec<&RecordedFault> = record
            .last_checkout_fault
            .iter()
            .chain(record.last_fault.iter())
            .collect();
        if faults.is_empty() {
            println!("   {} healthy", marker(&out, Marker::Ok));
        }
        for fault in faults {
            println!(
                "   {} {} at {}\n     {}",
                marker(&out, Marker::Err),
                fault.message,
                fault.at.format("%Y-%m-%d %H:%M:%S UTC"),
                fault.description
            );
        }
    }
    Ok(())
}
