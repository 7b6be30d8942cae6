//! Structural validation of configuration fragments.
//!
//! [`SchemaValidator`] is the seam the parser validates through;
//! [`CruiseSchema`] is the built-in rule set. Violations name the element
//! path of the offending node, e.g.
//! `/cruise/pipelines[@group='first']/pipeline[@name='up42']`.

use std::collections::HashSet;
use std::path::Path;

use super::convert::material_from_element;
use super::document::XmlElement;
use crate::domain::{Approval, LockBehavior};
use crate::error::{Error, Result};

/// Highest `schemaVersion` fragments may declare.
pub const SUPPORTED_SCHEMA_VERSION: u32 = 139;

const MAX_NAME_LENGTH: usize = 255;
const MATERIAL_ELEMENTS: &[&str] = &["svn", "hg", "git", "dependency"];

/// Validates a well-formed fragment document.
pub trait SchemaValidator {
    fn validate(&self, file: &Path, document: &XmlElement) -> Result<()>;
}

/// Whether `name` is a valid pipeline, stage, job, group or environment
/// name: `[a-zA-Z0-9_\-][a-zA-Z0-9_\-.]*`, at most 255 characters.
pub fn is_valid_name(name: &str) -> bool {
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if allowed(first) => {
            name.len() <= MAX_NAME_LENGTH && chars.all(|c| allowed(c) || c == '.')
        }
        _ => false,
    }
}

/// The built-in fragment schema.
#[derive(Debug, Clone)]
pub struct CruiseSchema {
    pub supported_version: u32,
}

impl Default for CruiseSchema {
    fn default() -> Self {
        Self {
            supported_version: SUPPORTED_SCHEMA_VERSION,
        }
    }
}

impl SchemaValidator for CruiseSchema {
    fn validate(&self, file: &Path, document: &XmlElement) -> Result<()> {
        Checker {
            file,
            supported_version: self.supported_version,
        }
        .cruise(document)
    }
}

struct Checker<'a> {
    file: &'a Path,
    supported_version: u32,
}

impl Checker<'_> {
    fn violation(&self, path: &str, message: impl Into<String>) -> Error {
        Error::SchemaViolation {
            file: self.file.to_path_buf(),
            path: path.to_string(),
            message: message.into(),
        }
    }

    fn only_children(&self, path: &str, element: &XmlElement, allowed: &[&str]) -> Result<()> {
        match element
            .children
            .iter()
            .find(|c| !allowed.contains(&c.name.as_str()))
        {
            Some(child) => Err(self.violation(
                path,
                format!("element '{}' is not allowed in '{}'", child.name, element.name),
            )),
            None => Ok(()),
        }
    }

    fn required_name<'e>(
        &self,
        path: &str,
        element: &'e XmlElement,
        attribute: &str,
    ) -> Result<&'e str> {
        let value = element.attribute(attribute).ok_or_else(|| {
            self.violation(
                path,
                format!("attribute '{}' is required on '{}'", attribute, element.name),
            )
        })?;
        if !is_valid_name(value) {
            return Err(self.violation(
                path,
                format!(
                    "'{}' is not a valid {}; names may contain letters, digits, '_', '-' and '.', \
                     must not start with '.' and are limited to {} characters",
                    value, attribute, MAX_NAME_LENGTH
                ),
            ));
        }
        Ok(value)
    }

    fn unique(&self, path: &str, seen: &mut HashSet<String>, kind: &str, name: &str) -> Result<()> {
        if seen.insert(name.to_ascii_lowercase()) {
            Ok(())
        } else {
            Err(self.violation(path, format!("duplicate {} name '{}'", kind, name)))
        }
    }

    fn cruise(&self, root: &XmlElement) -> Result<()> {
        let path = format!("/{}", root.name);
        if root.name != "cruise" {
            return Err(self.violation(
                &path,
                format!("root element must be 'cruise', found '{}'", root.name),
            ));
        }
        if let Some(version) = root.attribute("schemaVersion") {
            match version.parse::<u32>() {
                Ok(v) if v > 0 && v <= self.supported_version => {}
                Ok(v) if v > self.supported_version => {
                    return Err(self.violation(
                        &path,
                        format!(
                            "schemaVersion {} is newer than the supported version {}",
                            v, self.supported_version
                        ),
                    ))
                }
                _ => {
                    return Err(self.violation(
                        &path,
                        format!("schemaVersion '{}' is not a positive integer", version),
                    ))
                }
            }
        }
        self.only_children(&path, root, &["pipelines", "environments"])?;

        for group in root.children_named("pipelines") {
            self.group(&path, group)?;
        }
        let mut environments = HashSet::new();
        for section in root.children_named("environments") {
            let section_path = format!("{}/{}", path, section.segment());
            self.only_children(&section_path, section, &["environment"])?;
            for environment in &section.children {
                self.environment(&section_path, environment, &mut environments)?;
            }
        }
        Ok(())
    }

    fn group(&self, parent: &str, group: &XmlElement) -> Result<()> {
        let path = format!("{}/{}", parent, group.segment());
        self.required_name(&path, group, "group")?;
        self.only_children(&path, group, &["pipeline"])?;
        for pipeline in &group.children {
            self.pipeline(&path, pipeline)?;
        }
        Ok(())
    }

    fn pipeline(&self, parent: &str, pipeline: &XmlElement) -> Result<()> {
        let path = format!("{}/{}", parent, pipeline.segment());
        self.required_name(&path, pipeline, "name")?;
        if let Some(lock) = pipeline.attribute("lockBehavior") {
            if LockBehavior::from_attribute(lock).is_none() {
                return Err(self.violation(
                    &path,
                    format!(
                        "lockBehavior '{}' must be one of lockOnFailure, unlockWhenFinished, none",
                        lock
                    ),
                ));
            }
        }
        self.only_children(&path, pipeline, &["materials", "stage"])?;

        let mut materials = pipeline.children_named("materials");
        let section = match (materials.next(), materials.next()) {
            (Some(section), None) => section,
            (None, _) => return Err(self.violation(&path, "pipeline must declare 'materials'")),
            (Some(_), Some(_)) => {
                return Err(self.violation(&path, "pipeline must declare 'materials' only once"))
            }
        };
        self.materials(&path, section)?;

        let mut stages = HashSet::new();
        for stage in pipeline.children_named("stage") {
            self.stage(&path, stage, &mut stages)?;
        }
        if stages.is_empty() {
            return Err(self.violation(&path, "pipeline must declare at least one stage"));
        }
        Ok(())
    }

    fn materials(&self, parent: &str, section: &XmlElement) -> Result<()> {
        let path = format!("{}/materials", parent);
        self.only_children(&path, section, MATERIAL_ELEMENTS)?;
        if section.children.is_empty() {
            return Err(self.violation(&path, "at least one material is required"));
        }

        let mut seen = HashSet::new();
        for material in &section.children {
            let material_path = format!("{}/{}", path, material.name);
            let required: &[&str] = match material.name.as_str() {
                "dependency" => &["pipeline", "stage"],
                _ => &["url"],
            };
            for attribute in required {
                if material.attribute(attribute).is_none() {
                    return Err(self.violation(
                        &material_path,
                        format!("attribute '{}' is required on '{}'", attribute, material.name),
                    ));
                }
            }
            if let Some(filter) = material.child("filter") {
                if let Some(ignore) = filter
                    .children
                    .iter()
                    .find(|c| c.name != "ignore" || c.attribute("pattern").is_none())
                {
                    return Err(self.violation(
                        &format!("{}/filter/{}", material_path, ignore.name),
                        "filter entries must be 'ignore' elements with a 'pattern'",
                    ));
                }
            }
            if let Some(identity) = material_from_element(material) {
                if !seen.insert(identity.pipeline_unique_fingerprint()) {
                    return Err(self.violation(
                        &material_path,
                        format!("duplicate material {}", identity),
                    ));
                }
            }
        }
        Ok(())
    }

    fn stage(&self, parent: &str, stage: &XmlElement, seen: &mut HashSet<String>) -> Result<()> {
        let path = format!("{}/{}", parent, stage.segment());
        let name = self.required_name(&path, stage, "name")?;
        self.unique(&path, seen, "stage", name)?;
        self.only_children(&path, stage, &["approval", "jobs"])?;

        if let Some(approval) = stage.child("approval") {
            let kind = approval.attribute("type").unwrap_or("success");
            if Approval::from_attribute(kind).is_none() {
                return Err(self.violation(
                    &format!("{}/approval", path),
                    format!("approval type '{}' must be one of success, manual", kind),
                ));
            }
        }

        let jobs_path = format!("{}/jobs", path);
        let jobs = stage
            .child("jobs")
            .ok_or_else(|| self.violation(&path, "stage must declare 'jobs'"))?;
        self.only_children(&jobs_path, jobs, &["job"])?;
        let mut job_names = HashSet::new();
        for job in &jobs.children {
            let job_path = format!("{}/{}", jobs_path, job.segment());
            let name = self.required_name(&job_path, job, "name")?;
            self.unique(&job_path, &mut job_names, "job", name)?;
        }
        if job_names.is_empty() {
            return Err(self.violation(&jobs_path, "stage must declare at least one job"));
        }
        Ok(())
    }

    fn environment(
        &self,
        parent: &str,
        environment: &XmlElement,
        seen: &mut HashSet<String>,
    ) -> Result<()> {
        let path = format!("{}/{}", parent, environment.segment());
        let name = self.required_name(&path, environment, "name")?;
        self.unique(&path, seen, "environment", name)?;
        self.only_children(&path, environment, &["environmentvariables", "pipelines"])?;

        if let Some(variables) = environment.child("environmentvariables") {
            let variables_path = format!("{}/environmentvariables", path);
            self.only_children(&variables_path, variables, &["variable"])?;
            for variable in &variables.children {
                if variable.attribute("name").is_none() {
                    return Err(self.violation(
                        &format!("{}/variable", variables_path),
                        "attribute 'name' is required on 'variable'",
                    ));
                }
            }
        }
        if let Some(pipelines) = environment.child("pipelines") {
            let pipelines_path = format!("{}/pipelines", path);
            self.only_children(&pipelines_path, pipelines, &["pipeline"])?;
            for pipeline in &pipelines.children {
                self.required_name(&pipelines_path, pipeline, "name")?;
            }
        }
        Ok(())
    }
}
