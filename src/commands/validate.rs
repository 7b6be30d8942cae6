//! # Validate Command Implementation
//!
//! Parses and validates the `*.gocd.xml` fragments of a local directory the
//! same way an update cycle would, without touching any working copy or
//! update record. Useful as a pre-commit check in a config repository.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Args;
use log::debug;

use config_repo::fragment::FragmentParser;
use config_repo::material::MaterialIdentity;
use config_repo::output::{highlight, marker, Marker, OutputConfig};

/// Validate the configuration fragments in a directory
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Directory holding the fragments, usually a working copy.
    #[arg(value_name = "DIR", default_value = ".")]
    pub dir: PathBuf,

    /// Ignore pattern to apply, as a config repo filter would. May be repeated.
    #[arg(long, value_name = "GLOB")]
    pub ignore: Vec<String>,
}

/// Execute the `validate` command.
pub fn execute(args: ValidateArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let dir = &args.dir;
    println!(
        "{} Validating fragments in {}",
        marker(&out, Marker::Scan),
        dir.display()
    );
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", dir.display()));
    }

    let material = MaterialIdentity::git(format!("file://{}", dir.display()))
        .with_filter(args.ignore.clone());
    let parser = FragmentParser::new();
    let files = parser.discover(dir, Some(&material))?;
    println!("   Fragment files: {}", files.len());

    let partial = match parser.parse_for(&material, dir, "working copy") {
        Ok(partial) => partial,
        Err(e) => {
            println!("{} {}", marker(&out, Marker::Err), e);
            return Err(anyhow!("Fragment validation failed"));
        }
    };
    debug!("Parsed fragments from {}", partial.origin);

    println!("{} Fragments are valid", marker(&out, Marker::Ok));
    println!("\n{} Contents:", marker(&out, Marker::Info));
    for group in &partial.groups {
        println!("   group {}", group.name);
        for pipeline in &group.pipelines {
            println!(
                "     - {} ({} stages, {} materials)",
                highlight(&out, pipeline.name.as_str()),
                pipeline.stages.len(),
                pipeline.materials.len()
            );
        }
    }
    for environment in &partial.environments {
        let names: Vec<&str> = environment.pipelines.iter().map(|p| p.as_str()).collect();
        println!("   environment {}: {}", environment.name, names.join(", "));
    }
    if partial.is_empty() {
        println!("   (no pipelines or environments)");
    }
    Ok(())
}
