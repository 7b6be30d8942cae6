//! # Merge Engine
//!
//! The engine runs update cycles for config repositories and owns the
//! accepted partial configurations and the merged [`CruiseConfig`].
//!
//! ## Update cycle
//!
//! For one material, [`MergeEngine::update`]:
//!
//! 1.  Claims the material's in-progress slot. A cycle already running for
//!     the same fingerprint turns the request away without touching health.
//! 2.  Refreshes the working copy. Checkout failures are reported against
//!     the material's health scope and end the cycle.
//! 3.  Parses and validates the fragments and merges the candidate partial
//!     with everything else. Any failure is recorded against the config-repo
//!     health scope and the previously accepted partial stays in place.
//! 4.  On success, replaces the partial for this repository and clears the
//!     config-repo fault.
//!
//! Steps 3 and 4 commit through a [`TransactionTemplate`]: the update record
//! is persisted before commit, and the new configuration and health state are
//! published after commit, so nothing becomes visible unless it is durable.
//!
//! Cycles for different materials run independently; only the final merge
//! and publish step is serialized.

pub mod merge;
pub mod store;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::checkout::WorkingCopyManager;
use crate::domain::{CruiseConfig, PartialConfig};
use crate::error::{Error, Result};
use crate::fragment::FragmentParser;
use crate::health::{HealthStateRegistry, HealthStateScope};
use crate::material::{Fingerprint, MaterialIdentity};
use crate::tracker::InProgressTracker;
use crate::transaction::{TransactionContext, TransactionTemplate};

pub use merge::{merge, LocalConfig};
pub use store::{
    FileRecordStore, MemoryRecordStore, RecordedFault, RepositoryUpdateRecord, UpdateRecordStore,
};

/// Result of one update cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle for the same material is running.
    AlreadyInProgress,
    /// The working copy could not be refreshed.
    CheckoutFailed { message: String },
    /// The fragments at `revision` were rejected; the previous partial stays.
    Faulted { revision: String, message: String },
    /// The fragments at `revision` are now part of the merged configuration.
    Merged { revision: String },
    /// `revision` was already processed by the previous cycle.
    Unchanged { revision: String },
}

/// Where a repository stands in its update lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoState {
    Unattempted,
    InProgress,
    Merged,
    FaultedKeepingPrevious,
}

fn read_or_recover<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_or_recover<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SharedState {
    local: LocalConfig,
    partials: RwLock<BTreeMap<Fingerprint, Arc<PartialConfig>>>,
    merged: RwLock<Arc<CruiseConfig>>,
    records: DashMap<Fingerprint, RepositoryUpdateRecord>,
    store: Box<dyn UpdateRecordStore>,
}

impl SharedState {
    fn install(&self, merged: Arc<CruiseConfig>) {
        *write_or_recover(&self.partials) = merged.partials().clone();
        *write_or_recover(&self.merged) = merged;
    }

    fn record_for(&self, fingerprint: &Fingerprint) -> RepositoryUpdateRecord {
        self.records
            .get(fingerprint)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| RepositoryUpdateRecord::new(fingerprint.clone()))
    }

    /// The record of `fingerprint`, only when it carries a checkout fault.
    fn record_for_checkout_fault(&self, fingerprint: &Fingerprint) -> Option<RepositoryUpdateRecord> {
        self.records
            .get(fingerprint)
            .filter(|r| r.last_checkout_fault.is_some())
            .map(|r| r.value().clone())
    }
}

/// Runs update cycles and holds the merged configuration.
pub struct MergeEngine {
    tracker: InProgressTracker,
    health: Arc<HealthStateRegistry>,
    checkout: WorkingCopyManager,
    parser: FragmentParser,
    template: TransactionTemplate,
    commit_lock: Mutex<()>,
    shared: Arc<SharedState>,
}

impl MergeEngine {
    /// Create an engine, restoring the last accepted partials from `store`.
    ///
    /// Fails if the local configuration cannot be merged on its own.
    pub fn new(
        checkout: WorkingCopyManager,
        store: Box<dyn UpdateRecordStore>,
        local: LocalConfig,
        health: Arc<HealthStateRegistry>,
    ) -> Result<Self> {
        let records = store.load_all()?;
        let mut partials = BTreeMap::new();
        for record in &records {
            if let Some(partial) = &record.last_merged {
                partials.insert(record.repository_key.clone(), Arc::clone(partial));
            }
            if let Some(fault) = &record.last_fault {
                health.error(
                    HealthStateScope::for_partial_config_repo(&record.repository_key),
                    fault.message.clone(),
                    fault.description.clone(),
                );
            }
            if let Some(fault) = &record.last_checkout_fault {
                health.error(
                    HealthStateScope::for_material(&record.repository_key),
                    fault.message.clone(),
                    fault.description.clone(),
                );
            }
        }

        let merged = match merge(&local, &partials) {
            Ok(merged) => merged,
            Err(e) => {
                warn!("Restored configuration no longer merges, starting from local only: {}", e);
                health.error(
                    HealthStateScope::Global,
                    "Restored config repository configuration was discarded",
                    e.to_string(),
                );
                merge(&local, &BTreeMap::new())?
            }
        };
        info!(
            "Restored {} config repositories with {} pipelines",
            merged.partials().len(),
            merged.all_pipeline_names().len()
        );

        let shared = SharedState {
            local,
            partials: RwLock::new(merged.partials().clone()),
            merged: RwLock::new(Arc::new(merged)),
            records: records
                .into_iter()
                .map(|r| (r.repository_key.clone(), r))
                .collect(),
            store,
        };

        Ok(Self {
            tracker: InProgressTracker::new(),
            health,
            checkout,
            parser: FragmentParser::new(),
            template: TransactionTemplate::new(),
            commit_lock: Mutex::new(()),
            shared: Arc::new(shared),
        })
    }

    /// Use a custom fragment parser.
    pub fn with_parser(mut self, parser: FragmentParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn tracker(&self) -> &InProgressTracker {
        &self.tracker
    }

    pub fn health(&self) -> &Arc<HealthStateRegistry> {
        &self.health
    }

    /// Run one update cycle for `material`.
    pub fn update(&self, material: &MaterialIdentity) -> Result<CycleOutcome> {
        self.run(material, false)
    }

    /// Run one update cycle, stopping after checkout when the revision is the
    /// one the previous cycle already processed.
    pub fn update_if_changed(&self, material: &MaterialIdentity) -> Result<CycleOutcome> {
        self.run(material, true)
    }

    /// Run update cycles for many materials concurrently.
    pub fn update_all(
        &self,
        materials: &[MaterialIdentity],
    ) -> Vec<(Fingerprint, Result<CycleOutcome>)> {
        materials
            .par_iter()
            .map(|material| (material.fingerprint(), self.update_if_changed(material)))
            .collect()
    }

    fn run(&self, material: &MaterialIdentity, skip_unchanged: bool) -> Result<CycleOutcome> {
        let fingerprint = material.fingerprint();
        let token = match self.tracker.begin(&fingerprint) {
            Ok(token) => token,
            Err(Error::AlreadyInProgress { .. }) => {
                debug!("Skipping {}: update already in progress", material);
                return Ok(CycleOutcome::AlreadyInProgress);
            }
            Err(e) => return Err(e),
        };
        let outcome = self.cycle(material, &fingerprint, skip_unchanged);
        self.tracker.end(token);
        outcome
    }

    fn cycle(
        &self,
        material: &MaterialIdentity,
        fingerprint: &Fingerprint,
        skip_unchanged: bool,
    ) -> Result<CycleOutcome> {
        let material_scope = HealthStateScope::for_material(fingerprint);
        let (dir, revision) = match self.checkout.refresh(material) {
            Ok(refreshed) => refreshed,
            Err(e) => {
                let message = e.to_string();
                self.health.error(
                    material_scope,
                    format!("Failed to update working copy of {}", material),
                    message.clone(),
                );
                self.record_checkout_failure(fingerprint, &message);
                return Ok(CycleOutcome::CheckoutFailed { message });
            }
        };
        self.health.clear(&material_scope);
        self.clear_checkout_failure(fingerprint);

        let revision = revision.to_string();
        if skip_unchanged
            && self.revision_at_last_attempt(fingerprint).as_deref() == Some(revision.as_str())
        {
            debug!("{} is unchanged at revision {}", material, revision);
            return Ok(CycleOutcome::Unchanged { revision });
        }

        let parsed = self.parser.parse_for(material, &dir, &revision);

        let _commit = self.commit_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ctx = TransactionContext::new();
        let candidate = parsed.and_then(|partial| self.candidate(fingerprint, partial));

        match candidate {
            Ok((partial, merged)) => {
                self.commit_merged(&mut ctx, material, fingerprint, &revision, partial, merged)?;
                Ok(CycleOutcome::Merged { revision })
            }
            Err(e) if e.is_fragment_error() || matches!(e, Error::Io(_)) => {
                let message = e.to_string();
                self.commit_fault(&mut ctx, material, fingerprint, &revision, &message)?;
                Ok(CycleOutcome::Faulted { revision, message })
            }
            Err(e) => Err(e),
        }
    }

    /// Merge `partial` in place of this repository's current partial.
    fn candidate(
        &self,
        fingerprint: &Fingerprint,
        partial: PartialConfig,
    ) -> Result<(Arc<PartialConfig>, Arc<CruiseConfig>)> {
        let partial = Arc::new(partial);
        let mut partials = read_or_recover(&self.shared.partials).clone();
        partials.insert(fingerprint.clone(), Arc::clone(&partial));
        let merged = merge(&self.shared.local, &partials)?;
        Ok((partial, Arc::new(merged)))
    }

    fn commit_merged(
        &self,
        ctx: &mut TransactionContext,
        material: &MaterialIdentity,
        fingerprint: &Fingerprint,
        revision: &str,
        partial: Arc<PartialConfig>,
        merged: Arc<CruiseConfig>,
    ) -> Result<()> {
        let mut record = self.shared.record_for(fingerprint);
        record.last_attempted_revision = Some(revision.to_string());
        record.last_merged = Some(partial);
        record.last_fault = None;
        record.updated_at = Utc::now();

        let description = material.to_string();
        self.template.execute(ctx, |ctx| {
            let shared = Arc::clone(&self.shared);
            let persisted = record.clone();
            ctx.before_commit(move |_| shared.store.save(&persisted))?;

            let shared = Arc::clone(&self.shared);
            let health = Arc::clone(&self.health);
            let fingerprint = fingerprint.clone();
            ctx.after_commit(move |_| {
                info!(
                    "Merged {} pipelines from {} at revision {}",
                    record.last_merged.as_ref().map(|p| p.pipelines().count()).unwrap_or(0),
                    description,
                    record.last_attempted_revision.as_deref().unwrap_or_default()
                );
                shared.install(merged);
                shared.records.insert(fingerprint.clone(), record);
                health.clear(&HealthStateScope::for_partial_config_repo(&fingerprint));
            })
        })
    }

    fn commit_fault(
        &self,
        ctx: &mut TransactionContext,
        material: &MaterialIdentity,
        fingerprint: &Fingerprint,
        revision: &str,
        description: &str,
    ) -> Result<()> {
        let fault = RecordedFault {
            message: format!("Invalid configuration in repository {}", material.masked_url()),
            description: description.to_string(),
            at: Utc::now(),
        };
        let mut record = self.shared.record_for(fingerprint);
        record.last_attempted_revision = Some(revision.to_string());
        record.last_fault = Some(fault.clone());
        record.updated_at = fault.at;

        self.template.execute(ctx, |ctx| {
            let shared = Arc::clone(&self.shared);
            let persisted = record.clone();
            ctx.before_commit(move |_| shared.store.save(&persisted))?;

            let shared = Arc::clone(&self.shared);
            let health = Arc::clone(&self.health);
            let fingerprint = fingerprint.clone();
            ctx.after_commit(move |_| {
                health.error(
                    HealthStateScope::for_partial_config_repo(&fingerprint),
                    fault.message,
                    fault.description,
                );
                shared.records.insert(fingerprint, record);
            })
        })
    }

    fn record_checkout_failure(&self, fingerprint: &Fingerprint, message: &str) {
        let mut record = self.shared.record_for(fingerprint);
        let now = Utc::now();
        record.last_checkout_fault = Some(RecordedFault {
            message: "Failed to update working copy".to_string(),
            description: message.to_string(),
            at: now,
        });
        record.updated_at = now;
        if let Err(e) = self.shared.store.save(&record) {
            warn!("Could not persist update record for {}: {}", fingerprint.short(), e);
        }
        self.shared.records.insert(fingerprint.clone(), record);
    }

    fn clear_checkout_failure(&self, fingerprint: &Fingerprint) {
        let Some(mut record) = self.shared.record_for_checkout_fault(fingerprint) else {
            return;
        };
        record.last_checkout_fault = None;
        record.updated_at = Utc::now();
        if let Err(e) = self.shared.store.save(&record) {
            warn!("Could not persist update record for {}: {}", fingerprint.short(), e);
        }
        self.shared.records.insert(fingerprint.clone(), record);
    }

    /// Lifecycle state of the repository with `fingerprint`.
    pub fn state(&self, fingerprint: &Fingerprint) -> RepoState {
        if self.tracker.is_in_progress(fingerprint) {
            return RepoState::InProgress;
        }
        match self.shared.records.get(fingerprint) {
            Some(record) if record.last_fault.is_some() || record.last_checkout_fault.is_some() => {
                RepoState::FaultedKeepingPrevious
            }
            Some(record) if record.last_merged.is_some() => RepoState::Merged,
            _ => RepoState::Unattempted,
        }
    }

    /// Revision processed by the most recent cycle that got past checkout.
    pub fn revision_at_last_attempt(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.shared
            .records
            .get(fingerprint)
            .and_then(|r| r.last_attempted_revision.clone())
    }

    /// The accepted partial configuration of a repository.
    pub fn latest_partial(&self, fingerprint: &Fingerprint) -> Option<Arc<PartialConfig>> {
        read_or_recover(&self.shared.partials).get(fingerprint).cloned()
    }

    /// Snapshot of the merged configuration.
    pub fn merged_config(&self) -> Arc<CruiseConfig> {
        Arc::clone(&read_or_recover(&self.shared.merged))
    }

    pub fn record(&self, fingerprint: &Fingerprint) -> Option<RepositoryUpdateRecord> {
        self.shared.records.get(fingerprint).map(|r| r.value().clone())
    }

    /// Every known update record, in fingerprint order.
    pub fn records(&self) -> Vec<RepositoryUpdateRecord> {
        let mut records: Vec<_> = self
            .shared
            .records
            .iter()
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.repository_key.cmp(&b.repository_key));
        records
    }
}
