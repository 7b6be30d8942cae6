//! # Material Identity
//!
//! A material is a versioned source a pipeline consumes: a Subversion,
//! Mercurial or Git repository, or the output of an upstream pipeline stage.
//! Config repositories are materials that additionally declare configuration
//! fragments.
//!
//! ## Fingerprints
//!
//! Every material has a stable fingerprint: the lowercase hex SHA-256 digest
//! of an ordered `key=value` projection of a whitelisted attribute subset,
//! joined with `<|>`. For example an svn material hashes
//!
//! ```text
//! type=SvnMaterial<|>url=url<|>username=username<|>checkExternals=true
//! ```
//!
//! The password is never part of the projection, so two materials that only
//! differ in credentials share a fingerprint and are interchangeable for
//! locking and caching. The pipeline-unique fingerprint appends the
//! destination folder (`<|>dest=folder`).
//!
//! Passwords are never serialized and never shown by `Display` or `Debug`.
//! Credentials embedded in a URL are masked as `******`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::Result;
use crate::path::{encode_url_path, glob_match, to_filter_path};

/// Branch assumed for git materials that do not name one.
pub const DEFAULT_GIT_BRANCH: &str = "master";

const CRITERIA_SEPARATOR: &str = "<|>";
const MASK: &str = "******";

/// The kind of versioned source a material points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialKind {
    Svn,
    Hg,
    Git,
    /// Output of an upstream pipeline stage.
    Dependency,
}

impl MaterialKind {
    /// Short lowercase name used in settings files and attribute maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialKind::Svn => "svn",
            MaterialKind::Hg => "hg",
            MaterialKind::Git => "git",
            MaterialKind::Dependency => "dependency",
        }
    }

    /// Type tag that leads the fingerprint projection.
    pub fn type_name(&self) -> &'static str {
        match self {
            MaterialKind::Svn => "SvnMaterial",
            MaterialKind::Hg => "HgMaterial",
            MaterialKind::Git => "GitMaterial",
            MaterialKind::Dependency => "DependencyMaterial",
        }
    }

    /// Whether materials of this kind have a working copy that can be
    /// checked out.
    pub fn is_scm(&self) -> bool {
        !matches!(self, MaterialKind::Dependency)
    }
}

impl fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable content-based identity of a material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already computed fingerprint, e.g. one read back from disk.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve characters, enough to tell materials apart in logs.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }

    fn of(criteria: &[(&'static str, String)]) -> Self {
        let projection = criteria
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(CRITERIA_SEPARATOR);
        Self(hex::encode(Sha256::digest(projection.as_bytes())))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Immutable description of a versioned configuration source.
///
/// Equality and hashing follow the whitelisted identity attributes plus the
/// destination folder and filter; the password never takes part.
#[derive(Clone, Serialize, Deserialize)]
pub struct MaterialIdentity {
    /// Kind of source.
    #[serde(rename = "type")]
    pub kind: MaterialKind,
    /// Repository URL; for dependency materials the upstream pipeline name.
    #[serde(alias = "pipeline")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    password: Option<String>,
    /// Branch for git and hg materials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Upstream stage for dependency materials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Subversion `svn:externals` handling.
    #[serde(default, skip_serializing_if = "is_false")]
    pub check_externals: bool,
    /// Sub-directory of the pipeline's working directory the material is
    /// checked out into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Ignore patterns; matching paths neither trigger builds nor contribute
    /// configuration fragments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<String>,
}

impl MaterialIdentity {
    pub fn new(kind: MaterialKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            username: None,
            password: None,
            branch: None,
            stage: None,
            check_externals: false,
            destination: None,
            filter: Vec::new(),
        }
    }

    pub fn svn(url: impl Into<String>) -> Self {
        Self::new(MaterialKind::Svn, url)
    }

    pub fn git(url: impl Into<String>) -> Self {
        Self::new(MaterialKind::Git, url)
    }

    pub fn hg(url: impl Into<String>) -> Self {
        Self::new(MaterialKind::Hg, url)
    }

    /// A dependency on `stage` of the upstream `pipeline`.
    pub fn dependency(pipeline: impl Into<String>, stage: impl Into<String>) -> Self {
        let mut material = Self::new(MaterialKind::Dependency, pipeline);
        material.stage = Some(stage.into());
        material
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_check_externals(mut self, check_externals: bool) -> Self {
        self.check_externals = check_externals;
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_filter(mut self, patterns: Vec<String>) -> Self {
        self.filter = patterns;
        self
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn set_password(&mut self, password: Option<String>) {
        self.password = password;
    }

    /// Branch used for identity: git falls back to [`DEFAULT_GIT_BRANCH`].
    pub fn effective_branch(&self) -> Option<&str> {
        match (self.kind, self.branch.as_deref()) {
            (MaterialKind::Git, None) => Some(DEFAULT_GIT_BRANCH),
            (_, branch) => branch,
        }
    }

    /// Ordered whitelisted projection the fingerprint is computed from.
    fn criteria(&self) -> Vec<(&'static str, String)> {
        let mut criteria = vec![("type", self.kind.type_name().to_string())];
        match self.kind {
            MaterialKind::Svn => {
                criteria.push(("url", self.url.clone()));
                criteria.push(("username", self.username.clone().unwrap_or_default()));
                criteria.push(("checkExternals", self.check_externals.to_string()));
            }
            MaterialKind::Git | MaterialKind::Hg => {
                criteria.push(("url", self.url.clone()));
                if let Some(username) = &self.username {
                    criteria.push(("username", username.clone()));
                }
                if let Some(branch) = self.effective_branch() {
                    criteria.push(("branch", branch.to_string()));
                }
            }
            MaterialKind::Dependency => {
                criteria.push(("pipelineName", self.url.clone()));
                criteria.push(("stageName", self.stage.clone().unwrap_or_default()));
            }
        }
        criteria
    }

    /// Fingerprint identifying this material for locking and caching.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.criteria())
    }

    /// Fingerprint that also distinguishes the destination folder, for
    /// materials used more than once by the same pipeline.
    pub fn pipeline_unique_fingerprint(&self) -> Fingerprint {
        let mut criteria = self.criteria();
        criteria.push(("dest", self.destination.clone().unwrap_or_default()));
        Fingerprint::of(&criteria)
    }

    /// URL with any embedded password replaced by `******`.
    pub fn masked_url(&self) -> String {
        mask_url(&self.url)
    }

    /// Human readable summary shown on dashboards.
    pub fn long_description(&self) -> String {
        match self.kind {
            MaterialKind::Svn => format!(
                "URL: {}, Username: {}, CheckExternals: {}",
                self.masked_url(),
                self.username.as_deref().unwrap_or_default(),
                self.check_externals
            ),
            MaterialKind::Git | MaterialKind::Hg => match self.effective_branch() {
                Some(branch) => format!("URL: {}, Branch: {}", self.masked_url(), branch),
                None => format!("URL: {}", self.masked_url()),
            },
            MaterialKind::Dependency => format!(
                "{} [ {} ]",
                self.url,
                self.stage.as_deref().unwrap_or_default()
            ),
        }
    }

    /// Short name derived from the URL, used for working-copy folders.
    pub fn display_name(&self) -> String {
        if self.kind == MaterialKind::Dependency {
            return self.url.clone();
        }
        let masked = self.masked_url();
        masked
            .trim_end_matches('/')
            .rsplit(['/', ':'])
            .next()
            .map(|segment| segment.trim_end_matches(".git"))
            .filter(|segment| !segment.is_empty())
            .unwrap_or("material")
            .to_string()
    }

    /// Directory name of this material's working copy: readable prefix plus
    /// the fingerprint, so distinct materials never share a folder.
    pub fn folder_name(&self) -> String {
        format!(
            "{}-{}",
            encode_url_path(&self.display_name()),
            self.fingerprint()
        )
    }

    /// Attribute map as exposed to API consumers.
    ///
    /// With `include_secure` false the URL is masked and the password left out.
    pub fn attributes(&self, include_secure: bool) -> Value {
        let mut configuration = Map::new();
        match self.kind {
            MaterialKind::Dependency => {
                configuration.insert("pipeline-name".to_string(), json!(self.url));
                configuration.insert("stage-name".to_string(), json!(self.stage));
            }
            _ => {
                let url = if include_secure {
                    self.url.clone()
                } else {
                    self.masked_url()
                };
                configuration.insert("url".to_string(), json!(url));
                configuration.insert("username".to_string(), json!(self.username));
                if include_secure {
                    configuration.insert("password".to_string(), json!(self.password));
                }
                match self.kind {
                    MaterialKind::Svn => {
                        configuration
                            .insert("check-externals".to_string(), json!(self.check_externals));
                    }
                    _ => {
                        configuration.insert("branch".to_string(), json!(self.effective_branch()));
                    }
                }
            }
        }
        json!({
            "type": self.kind.as_str(),
            format!("{}-configuration", self.kind.as_str()): Value::Object(configuration),
        })
    }

    /// Apply a filter pattern to a `/`-rooted path. Patterns without a
    /// leading slash are anchored at the working-copy root.
    pub fn matches(&self, path: &str, pattern: &str) -> Result<bool> {
        if pattern.starts_with('/') {
            glob_match(pattern, path)
        } else {
            glob_match(&format!("/{}", pattern), path)
        }
    }

    /// Whether a path relative to the working copy is excluded by the filter.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        let path = to_filter_path(relative);
        self.filter
            .iter()
            .any(|pattern| match self.matches(&path, pattern) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!("Ignoring invalid filter pattern '{}': {}", pattern, e);
                    false
                }
            })
    }

    fn identity_key(&self) -> impl PartialEq + Hash + '_ {
        (
            self.kind,
            &self.url,
            &self.username,
            self.effective_branch(),
            &self.stage,
            self.check_externals,
            &self.destination,
            &self.filter,
        )
    }
}

/// Replace the password component of a URL with `******`.
///
/// Strings that do not parse as URLs, or that carry no password, are
/// returned unchanged.
pub fn mask_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => match parsed.set_password(Some(MASK)) {
            Ok(()) => parsed.to_string(),
            Err(()) => MASK.to_string(),
        },
        _ => raw.to_string(),
    }
}

impl PartialEq for MaterialIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.identity_key() == other.identity_key()
    }
}

impl Eq for MaterialIdentity {}

impl Hash for MaterialIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity_key().hash(state);
    }
}

impl fmt::Debug for MaterialIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterialIdentity")
            .field("kind", &self.kind)
            .field("url", &self.masked_url())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| MASK))
            .field("branch", &self.branch)
            .field("stage", &self.stage)
            .field("check_externals", &self.check_externals)
            .field("destination", &self.destination)
            .field("filter", &self.filter)
            .finish()
    }
}

impl fmt::Display for MaterialIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}", self.kind.type_name(), self.masked_url())?;
        if let Some(stage) = &self.stage {
            write!(f, " / {}", stage)?;
        }
        if let Some(destination) = &self.destination {
            write!(f, " -> {}", destination)?;
        }
        f.write_str("]")
    }
}
