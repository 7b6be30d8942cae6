//! Dashboard state filters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{DashboardPipeline, StageStatus};

/// A pipeline state a dashboard view can be narrowed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    Paused,
    Building,
    Failing,
    Cancelled,
}

impl FromStr for StateFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "paused" => Ok(StateFilter::Paused),
            "building" => Ok(StateFilter::Building),
            "failing" => Ok(StateFilter::Failing),
            "cancelled" => Ok(StateFilter::Cancelled),
            other => Err(format!(
                "unknown state '{}', expected one of paused, building, failing, cancelled",
                other
            )),
        }
    }
}

impl fmt::Display for StateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateFilter::Paused => "paused",
            StateFilter::Building => "building",
            StateFilter::Failing => "failing",
            StateFilter::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Selects pipelines by state. No states selects every pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardFilter {
    #[serde(default)]
    pub states: Vec<StateFilter>,
}

impl DashboardFilter {
    pub fn new(states: Vec<StateFilter>) -> Self {
        Self { states }
    }

    fn wants(&self, state: StateFilter) -> bool {
        self.states.contains(&state)
    }

    pub fn accepts(&self, pipeline: &DashboardPipeline) -> bool {
        if self.states.is_empty() {
            return true;
        }
        if pipeline.pause_info.paused && self.wants(StateFilter::Paused) {
            return true;
        }
        let Some(stage) = pipeline.latest_stage() else {
            return false;
        };
        match stage.status {
            StageStatus::Building | StageStatus::Failing => self.wants(StateFilter::Building),
            StageStatus::Failed => self.wants(StateFilter::Failing),
            StageStatus::Cancelled => self.wants(StateFilter::Cancelled),
            StageStatus::Passed | StageStatus::NotRun => false,
        }
    }

    /// Keep the pipelines this filter accepts.
    pub fn apply<'a>(&self, pipelines: &'a [DashboardPipeline]) -> Vec<&'a DashboardPipeline> {
        pipelines.iter().filter(|p| self.accepts(p)).collect()
    }
}
