//! # Configuration Fragments
//!
//! A config repository declares its pipelines in `*.gocd.xml` files anywhere
//! in the working copy. [`FragmentParser`] finds them, checks that each one
//! is well-formed and schema-valid, and combines them into a single
//! [`PartialConfig`].
//!
//! Parsing is all or nothing: the first failing fragment fails the whole
//! repository, so a half-valid repository never replaces a good partial.
//!
//! ## Order of checks
//!
//! 1. Markup well-formedness ([`Error::MalformedDocument`]).
//! 2. Schema rules ([`Error::SchemaViolation`]), through the pluggable
//!    [`SchemaValidator`].
//! 3. Cross-file rules: pipeline names are unique across all fragments of a
//!    repository. Groups with the same name are combined in first-seen order.

pub mod convert;
pub mod document;
pub mod schema;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use walkdir::WalkDir;

use crate::domain::{CaseInsensitiveName, PartialConfig, RepoConfigOrigin};
use crate::error::{Error, Result};
use crate::material::MaterialIdentity;
use crate::path::is_fragment_file;

pub use convert::Fragment;
pub use document::{load_document, XmlElement};
pub use schema::{is_valid_name, CruiseSchema, SchemaValidator, SUPPORTED_SCHEMA_VERSION};

/// Version-control metadata directories never searched for fragments.
const VCS_DIRECTORIES: &[&str] = &[".git", ".hg", ".svn"];

/// Parses and validates the fragments of a working copy.
pub struct FragmentParser {
    validator: Box<dyn SchemaValidator + Send + Sync>,
}

impl Default for FragmentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentParser {
    pub fn new() -> Self {
        Self::with_validator(Box::new(CruiseSchema::default()))
    }

    pub fn with_validator(validator: Box<dyn SchemaValidator + Send + Sync>) -> Self {
        Self { validator }
    }

    /// Fragment files under `dir`, in sorted path order, skipping VCS
    /// metadata and anything the material's filter ignores.
    pub fn discover(&self, dir: &Path, material: Option<&MaterialIdentity>) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(dir).sort_by_file_name().into_iter().filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| VCS_DIRECTORIES.contains(&name)))
        });
        for entry in walker {
            let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
            if !entry.file_type().is_file() || !is_fragment_file(entry.path()) {
                continue;
            }
            let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            if material.is_some_and(|m| m.is_ignored(relative)) {
                debug!("Skipping filtered fragment {}", relative.display());
                continue;
            }
            files.push(entry.path().to_path_buf());
        }
        Ok(files)
    }

    /// Load and validate one fragment.
    pub fn parse_fragment(&self, file: &Path, text: &str, origin: &RepoConfigOrigin) -> Result<Fragment> {
        let document = load_document(file, text)?;
        self.validator.validate(file, &document)?;
        Ok(convert::fragment_from_document(&document, origin))
    }

    /// Parse every fragment of the working copy at `dir`.
    pub fn parse(&self, dir: &Path, origin: RepoConfigOrigin) -> Result<PartialConfig> {
        self.parse_files(dir, self.discover(dir, None)?, origin)
    }

    /// Parse the working copy of `material` checked out at `revision`,
    /// honouring the material's ignore filter.
    pub fn parse_for(
        &self,
        material: &MaterialIdentity,
        dir: &Path,
        revision: &str,
    ) -> Result<PartialConfig> {
        let files = self.discover(dir, Some(material))?;
        self.parse_files(dir, files, RepoConfigOrigin::new(material, revision))
    }

    fn parse_files(
        &self,
        dir: &Path,
        files: Vec<PathBuf>,
        origin: RepoConfigOrigin,
    ) -> Result<PartialConfig> {
        let mut partial = PartialConfig::empty(origin);
        let mut defined_in: HashMap<CaseInsensitiveName, PathBuf> = HashMap::new();

        for file in files {
            let relative = file.strip_prefix(dir).unwrap_or(&file).to_path_buf();
            trace!("Parsing fragment {}", relative.display());
            let text = fs::read_to_string(&file)?;
            let fragment = self.parse_fragment(&relative, &text, &partial.origin)?;

            for group in fragment.groups {
                for pipeline in &group.pipelines {
                    if let Some(previous) = defined_in.get(&pipeline.name) {
                        return Err(Error::SchemaViolation {
                            file: relative.clone(),
                            path: format!(
                                "/cruise/pipelines[@group='{}']/pipeline[@name='{}']",
                                group.name, pipeline.name
                            ),
                            message: format!(
                                "pipeline '{}' is already defined in {}",
                                pipeline.name,
                                previous.display()
                            ),
                        });
                    }
                    defined_in.insert(pipeline.name.clone(), relative.clone());
                }
                match partial.groups.iter_mut().find(|g| g.name == group.name) {
                    Some(existing) => existing.pipelines.extend(group.pipelines),
                    None => partial.groups.push(group),
                }
            }

            for environment in fragment.environments {
                if partial.environments.iter().any(|e| e.name == environment.name) {
                    return Err(Error::SchemaViolation {
                        file: relative.clone(),
                        path: format!("/cruise/environments/environment[@name='{}']", environment.name),
                        message: format!("environment '{}' is already defined", environment.name),
                    });
                }
                partial.environments.push(environment);
            }
        }

        debug!(
            "Parsed {} pipelines and {} environments from {}",
            defined_in.len(),
            partial.environments.len(),
            partial.origin
        );
        Ok(partial)
    }
}
