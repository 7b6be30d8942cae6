//! # Dashboard State
//!
//! Builds the per-pipeline view a dashboard renders from the merged
//! configuration and a set of runtime collaborators (history, locks, pause
//! state, permissions).
//!
//! Every declared pipeline gets at least one instance: its real history if
//! it has run, a "preparing to schedule" placeholder if a run was just
//! triggered, and an empty placeholder otherwise. Missing permissions fail
//! closed: nobody may view or operate the pipeline.

pub mod filter;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::trace;
use serde::Serialize;

use crate::domain::{CaseInsensitiveName, ConfigNode, CruiseConfig, PipelineConfig};

pub use filter::{DashboardFilter, StateFilter};

/// A set of users holding a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "users", rename_all = "snake_case")]
pub enum Users {
    NoOne,
    Everyone,
    Named(BTreeSet<String>),
}

impl Users {
    pub fn named<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Users::Named(users.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, user: &str) -> bool {
        match self {
            Users::NoOne => false,
            Users::Everyone => true,
            Users::Named(users) => users.contains(user),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permissions {
    pub viewers: Users,
    pub operators: Users,
    pub admins: Users,
    pub pipeline_operators: Users,
}

impl Permissions {
    /// Nobody holds any permission.
    pub fn no_one() -> Self {
        Self {
            viewers: Users::NoOne,
            operators: Users::NoOne,
            admins: Users::NoOne,
            pipeline_operators: Users::NoOne,
        }
    }

    pub fn everyone() -> Self {
        Self {
            viewers: Users::Everyone,
            operators: Users::Everyone,
            admins: Users::Everyone,
            pipeline_operators: Users::Everyone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Building,
    /// Still building, but a job already failed.
    Failing,
    Passed,
    Failed,
    Cancelled,
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageInstance {
    pub name: String,
    pub counter: u32,
    pub status: StageStatus,
}

impl StageInstance {
    pub fn new(name: impl Into<String>, counter: u32, status: StageStatus) -> Self {
        Self {
            name: name.into(),
            counter,
            status,
        }
    }

    fn not_run(name: &CaseInsensitiveName) -> Self {
        Self::new(name.as_str(), 0, StageStatus::NotRun)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    pub is_lockable: bool,
    pub is_currently_locked: bool,
    pub can_unlock: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    /// A real run.
    Run,
    /// Triggered, not yet scheduled.
    PreparingToSchedule,
    /// Never run.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineInstance {
    pub pipeline: String,
    pub kind: InstanceKind,
    pub counter: Option<u32>,
    pub label: Option<String>,
    pub stages: Vec<StageInstance>,
    pub lock_status: LockStatus,
}

impl PipelineInstance {
    pub fn run(pipeline: impl Into<String>, counter: u32, label: impl Into<String>, stages: Vec<StageInstance>) -> Self {
        Self {
            pipeline: pipeline.into(),
            kind: InstanceKind::Run,
            counter: Some(counter),
            label: Some(label.into()),
            stages,
            lock_status: LockStatus::default(),
        }
    }

    fn placeholder(config: &PipelineConfig, kind: InstanceKind) -> Self {
        Self {
            pipeline: config.name.to_string(),
            kind,
            counter: None,
            label: None,
            stages: config.stages.iter().map(|s| StageInstance::not_run(&s.name)).collect(),
            lock_status: LockStatus::default(),
        }
    }

    pub fn preparing_to_schedule(config: &PipelineConfig) -> Self {
        Self::placeholder(config, InstanceKind::PreparingToSchedule)
    }

    pub fn empty(config: &PipelineConfig) -> Self {
        Self::placeholder(config, InstanceKind::Empty)
    }

    /// Append configured stages this instance has no record of.
    fn fill_unrun_stages(&mut self, config: &PipelineConfig) {
        for stage in &config.stages {
            if !self.stages.iter().any(|s| stage.name == s.name.as_str()) {
                self.stages.push(StageInstance::not_run(&stage.name));
            }
        }
    }

    /// The last stage that has run.
    pub fn latest_stage(&self) -> Option<&StageInstance> {
        self.stages
            .iter()
            .rev()
            .find(|s| s.status != StageStatus::NotRun)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PauseInfo {
    pub paused: bool,
    pub paused_by: Option<String>,
    pub cause: Option<String>,
}

impl PauseInfo {
    pub fn not_paused() -> Self {
        Self::default()
    }

    pub fn paused(by: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            paused: true,
            paused_by: Some(by.into()),
            cause: Some(cause.into()),
        }
    }
}

/// Everything a dashboard shows about one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardPipeline {
    pub name: String,
    pub group: String,
    pub can_be_forced: bool,
    /// Defined on the server, so administrable there.
    pub is_local: bool,
    pub pause_info: PauseInfo,
    /// Most recent first.
    pub instances: Vec<PipelineInstance>,
    pub permissions: Permissions,
}

impl DashboardPipeline {
    pub fn latest_instance(&self) -> Option<&PipelineInstance> {
        self.instances.first()
    }

    pub fn latest_stage(&self) -> Option<&StageInstance> {
        self.latest_instance().and_then(PipelineInstance::latest_stage)
    }
}

/// Recent runs of a pipeline, most recent first.
pub trait PipelineHistory: Send + Sync {
    fn latest_instances(&self, pipeline: &str) -> Vec<PipelineInstance>;

    /// Recent runs of many pipelines in one lookup. Pipelines that never ran
    /// may be left out.
    fn history_for_dashboard(
        &self,
        pipelines: &[CaseInsensitiveName],
    ) -> HashMap<CaseInsensitiveName, Vec<PipelineInstance>> {
        pipelines
            .iter()
            .map(|name| (name.clone(), self.latest_instances(name.as_str())))
            .collect()
    }
}

pub trait TriggerMonitor: Send + Sync {
    /// Whether a run was triggered but not yet scheduled.
    fn is_already_triggered(&self, pipeline: &str) -> bool;
}

pub trait PipelineLockService: Send + Sync {
    fn is_locked(&self, pipeline: &str) -> bool;
}

pub trait PipelineUnlockService: Send + Sync {
    fn can_unlock(&self, pipeline: &str) -> bool;
}

pub trait PipelinePauseService: Send + Sync {
    fn pause_info(&self, pipeline: &str) -> PauseInfo;
}

pub trait SchedulingChecker: Send + Sync {
    fn can_manually_trigger(&self, pipeline: &PipelineConfig) -> bool;
}

pub trait PermissionsAuthority: Send + Sync {
    /// Permissions of every pipeline the authority knows about.
    fn pipelines_and_their_permissions(&self) -> HashMap<CaseInsensitiveName, Permissions>;

    fn permissions_for_pipeline(&self, pipeline: &str) -> Option<Permissions>;
}

/// The runtime services the dashboard reads from.
#[derive(Clone)]
pub struct DashboardServices {
    pub history: Arc<dyn PipelineHistory>,
    pub trigger_monitor: Arc<dyn TriggerMonitor>,
    pub lock_service: Arc<dyn PipelineLockService>,
    pub unlock_service: Arc<dyn PipelineUnlockService>,
    pub pause_service: Arc<dyn PipelinePauseService>,
    pub scheduling_checker: Arc<dyn SchedulingChecker>,
    pub permissions: Arc<dyn PermissionsAuthority>,
}

/// Builds [`DashboardPipeline`]s.
pub struct DashboardStateLoader {
    services: DashboardServices,
}

impl DashboardStateLoader {
    pub fn new(services: DashboardServices) -> Self {
        Self { services }
    }

    /// Dashboard entries for every pipeline, in configuration order.
    pub fn all_pipelines(&self, config: &CruiseConfig) -> Vec<DashboardPipeline> {
        let permissions = self.services.permissions.pipelines_and_their_permissions();
        let mut history = self
            .services
            .history
            .history_for_dashboard(&config.all_pipeline_names());
        let mut pipelines = Vec::new();
        for node in config.walk() {
            match node {
                ConfigNode::Group(group) => {
                    trace!("Loading dashboard for group {}", group.name);
                }
                ConfigNode::Pipeline { group, pipeline } => {
                    let permissions = permissions.get(&pipeline.name).cloned();
                    let instances = history.remove(&pipeline.name).unwrap_or_default();
                    pipelines.push(self.build(pipeline, &group.name, permissions, instances));
                }
            }
        }
        pipelines
    }

    /// Dashboard entry for one pipeline.
    pub fn pipeline_for(&self, pipeline: &PipelineConfig, group: &str) -> DashboardPipeline {
        let permissions = self
            .services
            .permissions
            .permissions_for_pipeline(pipeline.name.as_str());
        let instances = self.services.history.latest_instances(pipeline.name.as_str());
        self.build(pipeline, group, permissions, instances)
    }

    fn build(
        &self,
        pipeline: &PipelineConfig,
        group: &str,
        permissions: Option<Permissions>,
        mut instances: Vec<PipelineInstance>,
    ) -> DashboardPipeline {
        let name = pipeline.name.as_str();
        let services = &self.services;
        let lock_status = LockStatus {
            is_lockable: pipeline.is_lockable(),
            is_currently_locked: services.lock_service.is_locked(name),
            can_unlock: services.unlock_service.can_unlock(name),
        };

        if instances.is_empty() {
            instances.push(if services.trigger_monitor.is_already_triggered(name) {
                PipelineInstance::preparing_to_schedule(pipeline)
            } else {
                PipelineInstance::empty(pipeline)
            });
        }
        for instance in &mut instances {
            instance.lock_status = lock_status;
            instance.fill_unrun_stages(pipeline);
        }

        DashboardPipeline {
            name: name.to_string(),
            group: group.to_string(),
            can_be_forced: services.scheduling_checker.can_manually_trigger(pipeline),
            is_local: pipeline.is_local(),
            pause_info: services.pause_service.pause_info(name),
            instances,
            permissions: permissions.unwrap_or_else(Permissions::no_one),
        }
    }
}
