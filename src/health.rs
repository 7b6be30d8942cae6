//! # Health State
//!
//! Health entries describe problems users must see: a repository that cannot
//! be checked out, a fragment that does not parse. Each entry is keyed by a
//! [`HealthStateScope`]; recording a new entry for a scope replaces the old
//! one and clearing the scope removes it.
//!
//! Checkout problems use the material scope and fragment problems use the
//! config-repository scope, so one never hides or clears the other.

use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::material::Fingerprint;

/// What a health entry is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", content = "fingerprint", rename_all = "snake_case")]
pub enum HealthStateScope {
    Global,
    /// Fetching the material's working copy.
    Material(Fingerprint),
    /// Parsing and merging the repository's configuration.
    PartialConfigRepo(Fingerprint),
}

impl HealthStateScope {
    pub fn for_material(fingerprint: &Fingerprint) -> Self {
        HealthStateScope::Material(fingerprint.clone())
    }

    pub fn for_partial_config_repo(fingerprint: &Fingerprint) -> Self {
        HealthStateScope::PartialConfigRepo(fingerprint.clone())
    }
}

impl fmt::Display for HealthStateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStateScope::Global => f.write_str("global"),
            HealthStateScope::Material(fp) => write!(f, "material {}", fp.short()),
            HealthStateScope::PartialConfigRepo(fp) => write!(f, "config repo {}", fp.short()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStateEntry {
    pub scope: HealthStateScope,
    pub severity: Severity,
    /// One-line summary.
    pub message: String,
    /// Full diagnostic.
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Concurrent registry of health entries, one per scope.
#[derive(Debug, Default)]
pub struct HealthStateRegistry {
    entries: DashMap<HealthStateScope, HealthStateEntry>,
}

impl HealthStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry for `scope`, replacing any previous one.
    pub fn record(
        &self,
        scope: HealthStateScope,
        severity: Severity,
        message: impl Into<String>,
        description: impl Into<String>,
    ) {
        let entry = HealthStateEntry {
            scope: scope.clone(),
            severity,
            message: message.into(),
            description: description.into(),
            timestamp: Utc::now(),
        };
        match severity {
            Severity::Error => error!("[{}] {}: {}", scope, entry.message, entry.description),
            Severity::Warning => warn!("[{}] {}: {}", scope, entry.message, entry.description),
        }
        self.entries.insert(scope, entry);
    }

    pub fn error(&self, scope: HealthStateScope, message: impl Into<String>, description: impl Into<String>) {
        self.record(scope, Severity::Error, message, description);
    }

    pub fn warning(&self, scope: HealthStateScope, message: impl Into<String>, description: impl Into<String>) {
        self.record(scope, Severity::Warning, message, description);
    }

    /// Remove the entry for `scope`, if any.
    pub fn clear(&self, scope: &HealthStateScope) {
        if self.entries.remove(scope).is_some() {
            info!("[{}] healthy again", scope);
        }
    }

    pub fn query(&self, scope: &HealthStateScope) -> Vec<HealthStateEntry> {
        self.entries
            .get(scope)
            .map(|entry| vec![entry.value().clone()])
            .unwrap_or_default()
    }

    /// Every entry, ordered by scope.
    pub fn all(&self) -> Vec<HealthStateEntry> {
        let mut entries: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.scope.cmp(&b.scope));
        entries
    }

    pub fn errors(&self) -> Vec<HealthStateEntry> {
        self.all()
            .into_iter()
            .filter(|e| e.severity == Severity::Error)
            .collect()
    }

    pub fn is_healthy(&self, scope: &HealthStateScope) -> bool {
        !self
            .entries
            .get(scope)
            .is_some_and(|entry| entry.severity == Severity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp() -> Fingerprint {
        Fingerprint::new("abc")
    }

    #[test]
    fn test_record_replaces_entry_for_scope() {
        let registry = HealthStateRegistry::new();
        let scope = HealthStateScope::for_partial_config_repo(&fp());
        registry.error(scope.clone(), "first", "d1");
        registry.error(scope.clone(), "second", "d2");

        let entries = registry.query(&scope);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "second");
    }

    #[test]
    fn test_material_and_repo_scopes_are_separate() {
        let registry = HealthStateRegistry::new();
        let material = HealthStateScope::for_material(&fp());
        let repo = HealthStateScope::for_partial_config_repo(&fp());
        registry.error(material.clone(), "checkout failed", "network");
        registry.error(repo.clone(), "parse failed", "bad xml");

        registry.clear(&repo);
        assert!(registry.is_healthy(&repo));
        assert!(!registry.is_healthy(&material));
        assert_eq!(registry.errors().len(), 1);
    }

    #[test]
    fn test_warnings_do_not_make_scope_unhealthy() {
        let registry = HealthStateRegistry::new();
        registry.warning(HealthStateScope::Global, "slow", "took a while");
        assert!(registry.is_healthy(&HealthStateScope::Global));
        assert_eq!(registry.all().len(), 1);
        assert!(registry.errors().is_empty());
    }

    #[test]
    fn test_query_unknown_scope_is_empty() {
        let registry = HealthStateRegistry::new();
        assert!(registry.query(&HealthStateScope::Global).is_empty());
    }
}
