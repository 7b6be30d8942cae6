//! # Settings File
//!
//! This module defines the `config-repo.yaml` settings file: where working
//! copies and update records live, which config repositories to poll, and the
//! configuration defined locally on the server.
//!
//! ```yaml
//! working_dir: /var/lib/config-repo/working
//! data_dir: /var/lib/config-repo/data
//! config_repos:
//!   - id: app-config
//!     material:
//!       type: git
//!       url: https://example.com/app-config.git
//!       branch: main
//!       filter: ["docs/**"]
//! local:
//!   groups:
//!     - name: infra
//!       pipelines:
//!         - name: deploy-dns
//! ```
//!
//! Both directories are optional; see [`crate::defaults`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::engine::{merge, LocalConfig};
use crate::error::{Error, Result};
use crate::material::{Fingerprint, MaterialIdentity};

/// The only fragment format understood by this crate.
pub const SUPPORTED_PLUGIN: &str = "gocd-xml";

fn default_plugin() -> String {
    SUPPORTED_PLUGIN.to_string()
}

/// One repository to pull configuration fragments from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRepoDeclaration {
    /// Operator-chosen name, unique within the settings file.
    pub id: String,
    pub material: MaterialIdentity,
    #[serde(default = "default_plugin")]
    pub plugin_id: String,
}

/// Parsed contents of `config-repo.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub config_repos: Vec<ConfigRepoDeclaration>,
    #[serde(default)]
    pub local: LocalConfig,
}

fn invalid(message: impl Into<String>, hint: impl Into<String>) -> Error {
    Error::ConfigParse {
        message: message.into(),
        hint: Some(hint.into()),
    }
}

impl Settings {
    /// Directory for working copies, falling back to the platform default.
    pub fn working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(defaults::default_working_dir)
    }

    /// Directory for update records, falling back to the platform default.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(defaults::default_data_dir)
    }

    pub fn local_config(&self) -> &LocalConfig {
        &self.local
    }

    pub fn materials(&self) -> Vec<MaterialIdentity> {
        self.config_repos.iter().map(|r| r.material.clone()).collect()
    }

    pub fn find(&self, id: &str) -> Option<&ConfigRepoDeclaration> {
        self.config_repos.iter().find(|r| r.id == id)
    }

    /// Check the settings for mistakes that would only surface later as
    /// confusing update failures.
    pub fn validate(&self) -> Result<()> {
        let mut ids: HashMap<&str, usize> = HashMap::new();
        let mut fingerprints: HashMap<Fingerprint, &str> = HashMap::new();

        for (index, repo) in self.config_repos.iter().enumerate() {
            if repo.id.trim().is_empty() {
                return Err(invalid(
                    format!("Config repo #{} has an empty id", index + 1),
                    "Give every entry under config_repos an id",
                ));
            }
            if ids.insert(repo.id.as_str(), index).is_some() {
                return Err(invalid(
                    format!("Duplicate config repo id '{}'", repo.id),
                    "Give every config repo a unique id",
                ));
            }
            if repo.plugin_id != SUPPORTED_PLUGIN {
                return Err(invalid(
                    format!(
                        "Config repo '{}' uses unsupported plugin '{}'",
                        repo.id, repo.plugin_id
                    ),
                    format!("Remove plugin_id or set it to '{}'", SUPPORTED_PLUGIN),
                ));
            }

            let material = &repo.material;
            if material.url.trim().is_empty() {
                return Err(invalid(
                    format!("Config repo '{}' has an empty url", repo.id),
                    "Set material.url to the repository location",
                ));
            }
            if !material.kind.is_scm() {
                return Err(invalid(
                    format!(
                        "Config repo '{}' uses a {} material",
                        repo.id,
                        material.kind.as_str()
                    ),
                    "Config repositories must be git, hg or svn materials",
                ));
            }
            for pattern in &material.filter {
                if let Err(e) = glob::Pattern::new(pattern) {
                    return Err(invalid(
                        format!(
                            "Config repo '{}' has an invalid filter pattern '{}': {}",
                            repo.id, pattern, e
                        ),
                        "Filter patterns use glob syntax, e.g. 'docs/**'",
                    ));
                }
            }

            let fingerprint = material.fingerprint();
            if let Some(other) = fingerprints.insert(fingerprint, repo.id.as_str()) {
                return Err(invalid(
                    format!(
                        "Config repos '{}' and '{}' point at the same repository",
                        other, repo.id
                    ),
                    "Remove one of them; repositories are identified by url, username and branch",
                ));
            }
        }

        merge(&self.local, &BTreeMap::new()).map_err(|e| {
            invalid(
                format!("Local configuration is inconsistent: {}", e),
                "Fix the groups and environments under 'local'",
            )
        })?;
        Ok(())
    }
}

/// Parse and validate settings from YAML.
pub fn parse(yaml_content: &str) -> Result<Settings> {
    let settings = if yaml_content.trim().is_empty() {
        Settings::default()
    } else {
        serde_yaml::from_str::<Settings>(yaml_content)?
    };
    settings.validate()?;
    Ok(settings)
}

/// Parse settings from a file path.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}
