//! # Configuration Model
//!
//! Types describing pipelines, groups and environments, both as contributed
//! by a single config repository ([`PartialConfig`]) and as merged into the
//! authoritative runtime configuration ([`CruiseConfig`]).
//!
//! Partial configurations are immutable once parsed. The merge engine shares
//! them as `Arc<PartialConfig>` and replaces them wholesale.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::material::{Fingerprint, MaterialIdentity};

/// A pipeline, stage or environment name. Comparison ignores ASCII case.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseInsensitiveName(String);

impl CaseInsensitiveName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn folded(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl PartialEq for CaseInsensitiveName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for CaseInsensitiveName {}

impl PartialEq<str> for CaseInsensitiveName {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq<&str> for CaseInsensitiveName {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Hash for CaseInsensitiveName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded().hash(state);
    }
}

impl PartialOrd for CaseInsensitiveName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CaseInsensitiveName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(&other.folded())
    }
}

impl fmt::Debug for CaseInsensitiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for CaseInsensitiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CaseInsensitiveName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CaseInsensitiveName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// When a pipeline takes and releases its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockBehavior {
    LockOnFailure,
    UnlockWhenFinished,
    #[default]
    None,
}

impl LockBehavior {
    /// Parse the `lockBehavior` attribute value.
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "lockOnFailure" => Some(LockBehavior::LockOnFailure),
            "unlockWhenFinished" => Some(LockBehavior::UnlockWhenFinished),
            "none" => Some(LockBehavior::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockBehavior::LockOnFailure => "lockOnFailure",
            LockBehavior::UnlockWhenFinished => "unlockWhenFinished",
            LockBehavior::None => "none",
        }
    }
}

/// Stage approval: automatic on upstream success, or manual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Approval {
    #[default]
    Success,
    Manual,
}

impl Approval {
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Approval::Success),
            "manual" => Some(Approval::Manual),
            _ => None,
        }
    }
}

/// Where a pipeline definition came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConfigOrigin {
    /// The server's own configuration file.
    #[default]
    Local,
    /// A config repository.
    Repo(RepoConfigOrigin),
}

impl ConfigOrigin {
    pub fn is_local(&self) -> bool {
        matches!(self, ConfigOrigin::Local)
    }
}

/// Identifies the config repository and revision a partial was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfigOrigin {
    pub fingerprint: Fingerprint,
    /// Masked URL; never carries a password.
    pub url: String,
    pub revision: String,
}

impl RepoConfigOrigin {
    pub fn new(material: &MaterialIdentity, revision: impl Into<String>) -> Self {
        Self {
            fingerprint: material.fingerprint(),
            url: material.masked_url(),
            revision: revision.into(),
        }
    }
}

impl fmt::Display for RepoConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at revision {}", self.url, self.revision)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Element name of the task, e.g. `exec` or `ant`.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: CaseInsensitiveName,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: CaseInsensitiveName,
    #[serde(default)]
    pub approval: Approval,
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: CaseInsensitiveName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_template: Option<String>,
    #[serde(default)]
    pub lock_behavior: LockBehavior,
    #[serde(default)]
    pub materials: Vec<MaterialIdentity>,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub origin: ConfigOrigin,
}

impl PipelineConfig {
    /// A minimal locally defined pipeline.
    pub fn local(name: impl Into<CaseInsensitiveName>) -> Self {
        Self {
            name: name.into(),
            label_template: None,
            lock_behavior: LockBehavior::None,
            materials: Vec::new(),
            stages: Vec::new(),
            origin: ConfigOrigin::Local,
        }
    }

    pub fn is_lockable(&self) -> bool {
        self.lock_behavior != LockBehavior::None
    }

    /// Pipelines from config repositories cannot be edited on the server.
    pub fn is_local(&self) -> bool {
        self.origin.is_local()
    }

    pub fn first_stage(&self) -> Option<&StageConfig> {
        self.stages.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineGroup {
    pub name: String,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

impl PipelineGroup {
    pub fn new(name: impl Into<String>, pipelines: Vec<PipelineConfig>) -> Self {
        Self {
            name: name.into(),
            pipelines,
        }
    }

    pub fn find_pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: CaseInsensitiveName,
    #[serde(default)]
    pub pipelines: Vec<CaseInsensitiveName>,
    /// Environment variables in declaration order.
    #[serde(default)]
    pub variables: Vec<(String, String)>,
}

impl EnvironmentConfig {
    pub fn contains_pipeline(&self, name: &str) -> bool {
        self.pipelines.iter().any(|p| p == name)
    }
}

/// Configuration contributed by one config repository at one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialConfig {
    pub origin: RepoConfigOrigin,
    pub groups: Vec<PipelineGroup>,
    pub environments: Vec<EnvironmentConfig>,
}

impl PartialConfig {
    pub fn empty(origin: RepoConfigOrigin) -> Self {
        Self {
            origin,
            groups: Vec::new(),
            environments: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.pipelines.is_empty()) && self.environments.is_empty()
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &PipelineConfig> {
        self.groups.iter().flat_map(|g| g.pipelines.iter())
    }

    pub fn pipeline_named(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines().find(|p| p.name == name)
    }
}

/// One node of a configuration walk.
#[derive(Debug, Clone, Copy)]
pub enum ConfigNode<'a> {
    Group(&'a PipelineGroup),
    Pipeline {
        group: &'a PipelineGroup,
        pipeline: &'a PipelineConfig,
    },
}

/// The merged runtime configuration: local definitions plus every accepted
/// partial, in that order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CruiseConfig {
    groups: Vec<PipelineGroup>,
    environments: Vec<EnvironmentConfig>,
    partials: BTreeMap<Fingerprint, Arc<PartialConfig>>,
}

impl CruiseConfig {
    pub fn new(
        groups: Vec<PipelineGroup>,
        environments: Vec<EnvironmentConfig>,
        partials: BTreeMap<Fingerprint, Arc<PartialConfig>>,
    ) -> Self {
        Self {
            groups,
            environments,
            partials,
        }
    }

    pub fn groups(&self) -> &[PipelineGroup] {
        &self.groups
    }

    pub fn environments(&self) -> &[EnvironmentConfig] {
        &self.environments
    }

    pub fn partials(&self) -> &BTreeMap<Fingerprint, Arc<PartialConfig>> {
        &self.partials
    }

    pub fn partial_for(&self, fingerprint: &Fingerprint) -> Option<&Arc<PartialConfig>> {
        self.partials.get(fingerprint)
    }

    pub fn all_pipelines(&self) -> impl Iterator<Item = &PipelineConfig> {
        self.groups.iter().flat_map(|g| g.pipelines.iter())
    }

    pub fn all_pipeline_names(&self) -> Vec<CaseInsensitiveName> {
        self.all_pipelines().map(|p| p.name.clone()).collect()
    }

    pub fn has_pipeline_named(&self, name: &str) -> bool {
        self.pipeline_config_named(name).is_some()
    }

    pub fn pipeline_config_named(&self, name: &str) -> Option<&PipelineConfig> {
        self.all_pipelines().find(|p| p.name == name)
    }

    /// Name of the group holding the named pipeline.
    pub fn group_of(&self, pipeline: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|g| g.find_pipeline(pipeline).is_some())
            .map(|g| g.name.as_str())
    }

    pub fn environment_named(&self, name: &str) -> Option<&EnvironmentConfig> {
        self.environments.iter().find(|e| e.name == name)
    }

    /// Visit every group, followed by its pipelines, in declaration order.
    pub fn walk(&self) -> impl Iterator<Item = ConfigNode<'_>> {
        self.groups.iter().flat_map(|group| {
            std::iter::once(ConfigNode::Group(group)).chain(
                group
                    .pipelines
                    .iter()
                    .map(move |pipeline| ConfigNode::Pipeline { group, pipeline }),
            )
        })
    }
}
