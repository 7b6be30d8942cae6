//! Combining local configuration and accepted partials into one
//! [`CruiseConfig`].
//!
//! Groups with the same name are combined. Environments with the same name
//! are combined too, as long as they agree on variable values. A pipeline may
//! be defined only once across all sources and may belong to at most one
//! environment; environments may only reference defined pipelines.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{CaseInsensitiveName, CruiseConfig, EnvironmentConfig, PartialConfig, PipelineGroup};
use crate::error::{Error, Result};
use crate::material::Fingerprint;

/// Configuration defined on the server itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default)]
    pub groups: Vec<PipelineGroup>,
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
}

const LOCAL_SOURCE: &str = "the local configuration";

fn conflict(subject: String, message: String) -> Error {
    Error::MergeConflict { subject, message }
}

struct Merger {
    groups: Vec<PipelineGroup>,
    environments: Vec<EnvironmentConfig>,
    pipeline_sources: HashMap<CaseInsensitiveName, String>,
    environment_of: HashMap<CaseInsensitiveName, CaseInsensitiveName>,
}

impl Merger {
    fn add_groups(&mut self, groups: &[PipelineGroup], source: &str) -> Result<()> {
        for group in groups {
            for pipeline in &group.pipelines {
                if let Some(previous) = self.pipeline_sources.get(&pipeline.name) {
                    return Err(conflict(
                        format!("pipeline '{}'", pipeline.name),
                        format!("defined in both {} and {}", previous, source),
                    ));
                }
                self.pipeline_sources
                    .insert(pipeline.name.clone(), source.to_string());
            }
            match self.groups.iter_mut().find(|g| g.name == group.name) {
                Some(existing) => existing.pipelines.extend(group.pipelines.iter().cloned()),
                None => self.groups.push(group.clone()),
            }
        }
        Ok(())
    }

    fn add_environments(&mut self, environments: &[EnvironmentConfig]) -> Result<()> {
        for environment in environments {
            let subject = format!("environment '{}'", environment.name);
            for pipeline in &environment.pipelines {
                match self.environment_of.get(pipeline) {
                    Some(other) if *other != environment.name => {
                        return Err(conflict(
                            format!("pipeline '{}'", pipeline),
                            format!(
                                "associated with both environment '{}' and '{}'",
                                other, environment.name
                            ),
                        ))
                    }
                    _ => {
                        self.environment_of
                            .insert(pipeline.clone(), environment.name.clone());
                    }
                }
            }

            let Some(existing) = self
                .environments
                .iter_mut()
                .find(|e| e.name == environment.name)
            else {
                self.environments.push(environment.clone());
                continue;
            };
            for pipeline in &environment.pipelines {
                if !existing.pipelines.contains(pipeline) {
                    existing.pipelines.push(pipeline.clone());
                }
            }
            for (name, value) in &environment.variables {
                match existing.variables.iter().find(|(n, _)| n == name) {
                    Some((_, current)) if current != value => {
                        return Err(conflict(
                            subject,
                            format!(
                                "variable '{}' is defined with different values '{}' and '{}'",
                                name, current, value
                            ),
                        ))
                    }
                    Some(_) => {}
                    None => existing.variables.push((name.clone(), value.clone())),
                }
            }
        }
        Ok(())
    }

    fn check_environment_references(&self) -> Result<()> {
        for environment in &self.environments {
            if let Some(unknown) = environment
                .pipelines
                .iter()
                .find(|p| !self.pipeline_sources.contains_key(*p))
            {
                return Err(conflict(
                    format!("environment '{}'", environment.name),
                    format!("references unknown pipeline '{}'", unknown),
                ));
            }
        }
        Ok(())
    }
}

/// Merge the local configuration with every partial, in fingerprint order.
pub fn merge(
    local: &LocalConfig,
    partials: &BTreeMap<Fingerprint, Arc<PartialConfig>>,
) -> Result<CruiseConfig> {
    let mut merger = Merger {
        groups: Vec::new(),
        environments: Vec::new(),
        pipeline_sources: HashMap::new(),
        environment_of: HashMap::new(),
    };

    merger.add_groups(&local.groups, LOCAL_SOURCE)?;
    merger.add_environments(&local.environments)?;
    for partial in partials.values() {
        let source = format!("config repo {}", partial.origin.url);
        merger.add_groups(&partial.groups, &source)?;
        merger.add_environments(&partial.environments)?;
    }
    merger.check_environment_references()?;

    Ok(CruiseConfig::new(
        merger.groups,
        merger.environments,
        partials.clone(),
    ))
}
