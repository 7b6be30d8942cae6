//! Conversion of validated fragment documents into the configuration model.
//!
//! These functions assume the document passed schema validation; elements
//! missing required attributes are skipped rather than reported.

use super::document::XmlElement;
use crate::domain::{
    Approval, CaseInsensitiveName, ConfigOrigin, EnvironmentConfig, JobConfig, LockBehavior,
    PipelineConfig, PipelineGroup, RepoConfigOrigin, StageConfig, TaskConfig,
};
use crate::material::MaterialIdentity;

/// Build a material from an `svn`, `hg`, `git` or `dependency` element.
pub fn material_from_element(element: &XmlElement) -> Option<MaterialIdentity> {
    let mut material = match element.name.as_str() {
        "svn" => MaterialIdentity::svn(element.attribute("url")?),
        "hg" => MaterialIdentity::hg(element.attribute("url")?),
        "git" => MaterialIdentity::git(element.attribute("url")?),
        "dependency" => MaterialIdentity::dependency(
            element.attribute("pipeline")?,
            element.attribute("stage")?,
        ),
        _ => return None,
    };
    if let Some(username) = element.attribute("username") {
        material = material.with_username(username);
    }
    if let Some(password) = element.attribute("password") {
        material = material.with_password(password);
    }
    if let Some(branch) = element.attribute("branch") {
        material = material.with_branch(branch);
    }
    if let Some(dest) = element.attribute("dest") {
        material = material.with_destination(dest);
    }
    material.check_externals = element.attribute("checkexternals") == Some("true");
    if let Some(filter) = element.child("filter") {
        material.filter = filter
            .children_named("ignore")
            .filter_map(|ignore| ignore.attribute("pattern"))
            .map(str::to_string)
            .collect();
    }
    Some(material)
}

fn task_from_element(element: &XmlElement) -> TaskConfig {
    let mut args: Vec<String> = element
        .attribute("args")
        .map(|a| a.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    args.extend(
        element
            .children_named("arg")
            .filter_map(|arg| arg.text.clone()),
    );
    TaskConfig {
        kind: element.name.clone(),
        command: element
            .attribute("command")
            .or_else(|| element.attribute("target"))
            .map(str::to_string),
        args,
    }
}

fn job_from_element(element: &XmlElement) -> Option<JobConfig> {
    Some(JobConfig {
        name: CaseInsensitiveName::new(element.attribute("name")?),
        tasks: element
            .child("tasks")
            .map(|tasks| tasks.children.iter().map(task_from_element).collect())
            .unwrap_or_default(),
    })
}

fn stage_from_element(element: &XmlElement) -> Option<StageConfig> {
    let approval = element
        .child("approval")
        .and_then(|a| a.attribute("type"))
        .and_then(Approval::from_attribute)
        .unwrap_or_default();
    Some(StageConfig {
        name: CaseInsensitiveName::new(element.attribute("name")?),
        approval,
        jobs: element
            .child("jobs")
            .map(|jobs| jobs.children_named("job").filter_map(job_from_element).collect())
            .unwrap_or_default(),
    })
}

fn pipeline_from_element(element: &XmlElement, origin: &RepoConfigOrigin) -> Option<PipelineConfig> {
    Some(PipelineConfig {
        name: CaseInsensitiveName::new(element.attribute("name")?),
        label_template: element.attribute("labeltemplate").map(str::to_string),
        lock_behavior: element
            .attribute("lockBehavior")
            .and_then(LockBehavior::from_attribute)
            .unwrap_or_default(),
        materials: element
            .child("materials")
            .map(|m| m.children.iter().filter_map(material_from_element).collect())
            .unwrap_or_default(),
        stages: element
            .children_named("stage")
            .filter_map(stage_from_element)
            .collect(),
        origin: ConfigOrigin::Repo(origin.clone()),
    })
}

fn environment_from_element(element: &XmlElement) -> Option<EnvironmentConfig> {
    let variables = element
        .child("environmentvariables")
        .map(|section| {
            section
                .children_named("variable")
                .filter_map(|variable| {
                    let name = variable.attribute("name")?.to_string();
                    let value = variable
                        .child("value")
                        .and_then(|v| v.text.clone())
                        .or_else(|| variable.text.clone())
                        .unwrap_or_default();
                    Some((name, value))
                })
                .collect()
        })
        .unwrap_or_default();
    let pipelines = element
        .child("pipelines")
        .map(|section| {
            section
                .children_named("pipeline")
                .filter_map(|p| p.attribute("name"))
                .map(CaseInsensitiveName::new)
                .collect()
        })
        .unwrap_or_default();
    Some(EnvironmentConfig {
        name: CaseInsensitiveName::new(element.attribute("name")?),
        pipelines,
        variables,
    })
}

/// Groups and environments declared by one fragment document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub groups: Vec<PipelineGroup>,
    pub environments: Vec<EnvironmentConfig>,
}

/// Convert a validated `cruise` document.
pub fn fragment_from_document(root: &XmlElement, origin: &RepoConfigOrigin) -> Fragment {
    let groups = root
        .children_named("pipelines")
        .filter_map(|group| {
            Some(PipelineGroup::new(
                group.attribute("group")?,
                group
                    .children_named("pipeline")
                    .filter_map(|p| pipeline_from_element(p, origin))
                    .collect(),
            ))
        })
        .collect();
    let environments = root
        .children_named("environments")
        .flat_map(|section| section.children_named("environment"))
        .filter_map(environment_from_element)
        .collect();
    Fragment {
        groups,
        environments,
    }
}
