//! End-to-end update cycles through the merge engine with a scripted
//! version-control backend.

mod common;

use std::path::Path;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;

use common::prelude::*;
use config_repo::checkout::{Revision, ScmOperations, WorkingCopyManager};
use config_repo::domain::{PipelineConfig, PipelineGroup};
use config_repo::engine::{
    CycleOutcome, FileRecordStore, LocalConfig, MemoryRecordStore, MergeEngine, RepoState,
};
use config_repo::error::Result;
use config_repo::health::{HealthStateRegistry, HealthStateScope};
use config_repo::material::MaterialIdentity;

fn material() -> MaterialIdentity {
    MaterialIdentity::git("https://example.com/config.git")
}

fn other_material() -> MaterialIdentity {
    MaterialIdentity::git("https://example.com/other-config.git")
}

#[test]
fn test_empty_repository_gives_empty_partial() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    scm.push("r1", &[("README.md", "no fragments here")]);
    let (engine, health) = engine(temp.path(), &scm);

    let outcome = engine.update(&material()).unwrap();
    assert_eq!(outcome, CycleOutcome::Merged { revision: "r1".to_string() });

    let partial = engine.latest_partial(&material().fingerprint()).unwrap();
    assert!(partial.is_empty());
    assert!(engine.merged_config().all_pipeline_names().is_empty());
    assert!(health.all().is_empty());
}

#[test]
fn test_single_pipeline_is_merged_under_repository_key() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    scm.push("r1", &[("build.gocd.xml", &fragments::pipelines("team", &["up42"]))]);
    let (engine, _health) = engine(temp.path(), &scm);
    let fingerprint = material().fingerprint();

    engine.update(&material()).unwrap();

    let merged = engine.merged_config();
    let partial = merged.partial_for(&fingerprint).unwrap();
    assert!(partial.pipeline_named("UP42").is_some());
    assert_eq!(partial.origin.revision, "r1");
    assert_eq!(merged.group_of("up42"), Some("team"));
    assert!(!merged.pipeline_config_named("up42").unwrap().is_local());
    assert_eq!(engine.state(&fingerprint), RepoState::Merged);
}

#[test]
fn test_invalid_revision_keeps_previous_partial() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    let (engine, health) = engine(temp.path(), &scm);
    let fingerprint = material().fingerprint();

    scm.push("r1", &[("a.gocd.xml", &fragments::pipelines("g", &["p1"]))]);
    engine.update(&material()).unwrap();

    scm.push("r2", &[("a.gocd.xml", fragments::SCHEMA_VIOLATION)]);
    let outcome = engine.update(&material()).unwrap();
    assert!(matches!(outcome, CycleOutcome::Faulted { ref revision, .. } if revision == "r2"));

    let partial = engine.latest_partial(&fingerprint).unwrap();
    assert_eq!(partial.origin.revision, "r1");
    assert!(partial.pipeline_named("p1").is_some());
    assert!(engine.merged_config().has_pipeline_named("p1"));
    assert_eq!(engine.state(&fingerprint), RepoState::FaultedKeepingPrevious);
    assert_eq!(engine.revision_at_last_attempt(&fingerprint).as_deref(), Some("r2"));

    let entries = health.query(&HealthStateScope::for_partial_config_repo(&fingerprint));
    assert_eq!(entries.len(), 1);
    assert!(entries[0].description.contains("broken"));
    assert!(health
        .query(&HealthStateScope::for_material(&fingerprint))
        .is_empty());
}

#[test]
fn test_valid_revision_after_invalid_clears_fault() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    let (engine, health) = engine(temp.path(), &scm);
    let fingerprint = material().fingerprint();
    let repo_scope = HealthStateScope::for_partial_config_repo(&fingerprint);

    scm.push("r1", &[("a.gocd.xml", fragments::SCHEMA_VIOLATION)]);
    engine.update(&material()).unwrap();
    assert!(!health.is_healthy(&repo_scope));
    assert!(engine.latest_partial(&fingerprint).is_none());

    scm.push("r2", &[("a.gocd.xml", &fragments::pipelines("g", &["p1"]))]);
    let outcome = engine.update(&material()).unwrap();
    assert_eq!(outcome, CycleOutcome::Merged { revision: "r2".to_string() });

    assert!(health.is_healthy(&repo_scope));
    assert_eq!(engine.latest_partial(&fingerprint).unwrap().origin.revision, "r2");
    assert_eq!(engine.state(&fingerprint), RepoState::Merged);
}

#[test]
fn test_malformed_second_push_reports_line_and_keeps_pipeline() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    let (engine, health) = engine(temp.path(), &scm);
    let fingerprint = material().fingerprint();

    scm.push("r1", &[("a.gocd.xml", &fragments::pipelines("g", &["p1"]))]);
    engine.update(&material()).unwrap();

    scm.push("r2", &[("a.gocd.xml", fragments::MALFORMED)]);
    match engine.update(&material()).unwrap() {
        CycleOutcome::Faulted { message, .. } => {
            assert!(message.contains("Malformed document"), "{}", message);
            assert!(message.contains("a.gocd.xml (line 3)"), "{}", message);
        }
        other => panic!("expected fault, got {:?}", other),
    }

    assert!(engine.merged_config().has_pipeline_named("p1"));
    assert_eq!(
        health
            .query(&HealthStateScope::for_partial_config_repo(&fingerprint))
            .len(),
        1
    );
}

#[test]
fn test_checkout_failure_is_reported_against_material() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    let (engine, health) = engine(temp.path(), &scm);
    let fingerprint = material().fingerprint();
    let material_scope = HealthStateScope::for_material(&fingerprint);

    scm.fail_with("connection refused");
    let outcome = engine.update(&material()).unwrap();
    assert!(matches!(outcome, CycleOutcome::CheckoutFailed { ref message } if message.contains("connection refused")));
    assert!(!health.is_healthy(&material_scope));
    assert!(health.is_healthy(&HealthStateScope::for_partial_config_repo(&fingerprint)));
    assert!(engine.latest_partial(&fingerprint).is_none());

    scm.push("r1", &[("a.gocd.xml", &fragments::pipelines("g", &["p1"]))]);
    engine.update(&material()).unwrap();
    assert!(health.is_healthy(&material_scope));
}

#[test]
fn test_recovered_checkout_with_unchanged_revision_is_merged() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    let (engine, health) = engine(temp.path(), &scm);
    let fingerprint = material().fingerprint();

    scm.push("r1", &[("a.gocd.xml", &fragments::pipelines("g", &["p1"]))]);
    engine.update_if_changed(&material()).unwrap();

    scm.fail_with("connection refused");
    engine.update_if_changed(&material()).unwrap();
    assert_eq!(engine.state(&fingerprint), RepoState::FaultedKeepingPrevious);

    scm.push("r1", &[("a.gocd.xml", &fragments::pipelines("g", &["p1"]))]);
    let outcome = engine.update_if_changed(&material()).unwrap();
    assert_eq!(outcome, CycleOutcome::Unchanged { revision: "r1".to_string() });
    assert_eq!(engine.state(&fingerprint), RepoState::Merged);
    assert!(engine.record(&fingerprint).unwrap().last_checkout_fault.is_none());
    assert!(health.all().is_empty());
}

#[test]
fn test_pipeline_defined_by_two_repositories_is_a_fault() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    let (engine, health) = engine(temp.path(), &scm);

    scm.push("r1", &[("a.gocd.xml", &fragments::pipelines("g", &["shared"]))]);
    engine.update(&material()).unwrap();

    scm.push("r9", &[("b.gocd.xml", &fragments::pipelines("h", &["SHARED"]))]);
    let outcome = engine.update(&other_material()).unwrap();
    match outcome {
        CycleOutcome::Faulted { message, .. } => assert!(message.contains("Merge conflict")),
        other => panic!("expected fault, got {:?}", other),
    }

    let merged = engine.merged_config();
    assert_eq!(merged.group_of("shared"), Some("g"));
    assert!(merged.partial_for(&other_material().fingerprint()).is_none());
    assert!(!health.is_healthy(&HealthStateScope::for_partial_config_repo(
        &other_material().fingerprint()
    )));
}

#[test]
fn test_pipeline_defined_locally_and_in_repository_is_a_fault() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    let local = LocalConfig {
        groups: vec![PipelineGroup::new("infra", vec![PipelineConfig::local("p1")])],
        environments: vec![],
    };
    let (engine, _health) = engine_with_store(
        temp.path(),
        &scm,
        Box::new(MemoryRecordStore::new()),
        local,
    );

    scm.push("r1", &[("a.gocd.xml", &fragments::pipelines("g", &["p1"]))]);
    let outcome = engine.update(&material()).unwrap();
    assert!(matches!(outcome, CycleOutcome::Faulted { .. }));
    assert!(engine.merged_config().pipeline_config_named("p1").unwrap().is_local());
}

#[test]
fn test_environment_across_repositories() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    let (engine, _health) = engine(temp.path(), &scm);

    scm.push("r1", &[("a.gocd.xml", &fragments::pipelines("g", &["p1"]))]);
    engine.update(&material()).unwrap();

    scm.push("r1", &[("env.gocd.xml", &fragments::environment("uat", &["p1"]))]);
    engine.update(&other_material()).unwrap();

    let merged = engine.merged_config();
    assert!(merged.environment_named("UAT").unwrap().contains_pipeline("p1"));
}

#[test]
fn test_filtered_fragments_are_ignored() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    let (engine, _health) = engine(temp.path(), &scm);
    let material = material().with_filter(vec!["drafts/**".to_string()]);

    scm.push(
        "r1",
        &[
            ("a.gocd.xml", &fragments::pipelines("g", &["p1"])),
            ("drafts/wip.gocd.xml", fragments::MALFORMED),
        ],
    );
    let outcome = engine.update(&material).unwrap();
    assert_eq!(outcome, CycleOutcome::Merged { revision: "r1".to_string() });
}

#[test]
fn test_unchanged_revision_is_skipped() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    let (engine, _health) = engine(temp.path(), &scm);

    scm.push("r1", &[("a.gocd.xml", &fragments::pipelines("g", &["p1"]))]);
    engine.update_if_changed(&material()).unwrap();
    let outcome = engine.update_if_changed(&material()).unwrap();

    assert_eq!(outcome, CycleOutcome::Unchanged { revision: "r1".to_string() });
    assert_eq!(scm.call_count(), 2);
}

#[test]
fn test_update_all_merges_every_repository() {
    let temp = TempDir::new().unwrap();
    let scm = ScriptedScm::new();
    scm.push("r1", &[("a.gocd.xml", &fragments::pipelines("g", &["p1"]))]);
    let (engine, _health) = engine(temp.path(), &scm);

    // Both repositories see the same fragment, so only one of them can win.
    let results = engine.update_all(&[material(), other_material()]);
    assert_eq!(results.len(), 2);
    let merged = results
        .iter()
        .filter(|(_, r)| matches!(r, Ok(CycleOutcome::Merged { .. })))
        .count();
    let faulted = results
        .iter()
        .filter(|(_, r)| matches!(r, Ok(CycleOutcome::Faulted { .. })))
        .count();
    assert_eq!((merged, faulted), (1, 1));
    assert!(engine.merged_config().has_pipeline_named("p1"));
}

#[test]
fn test_restart_restores_last_good_configuration() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("data");
    let working_dir = temp.path().join("working");
    let scm = ScriptedScm::new();
    let fingerprint = material().fingerprint();

    {
        let (engine, _health) = engine_with_store(
            &working_dir,
            &scm,
            Box::new(FileRecordStore::new(&data_dir)),
            LocalConfig::default(),
        );
        scm.push("r1", &[("a.gocd.xml", &fragments::pipelines("g", &["p1"]))]);
        engine.update(&material()).unwrap();
        scm.push("r2", &[("a.gocd.xml", fragments::MALFORMED)]);
        engine.update(&material()).unwrap();
    }

    let (engine, health) = engine_with_store(
        &working_dir,
        &scm,
        Box::new(FileRecordStore::new(&data_dir)),
        LocalConfig::default(),
    );
    assert!(engine.merged_config().has_pipeline_named("p1"));
    assert_eq!(engine.state(&fingerprint), RepoState::FaultedKeepingPrevious);
    assert_eq!(engine.revision_at_last_attempt(&fingerprint).as_deref(), Some("r2"));
    assert!(!health.is_healthy(&HealthStateScope::for_partial_config_repo(&fingerprint)));
}

#[test]
fn test_restart_restores_checkout_fault_against_material() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("data");
    let working_dir = temp.path().join("working");
    let scm = ScriptedScm::new();
    let fingerprint = material().fingerprint();
    let restart = || {
        engine_with_store(
            &working_dir,
            &scm,
            Box::new(FileRecordStore::new(&data_dir)),
            LocalConfig::default(),
        )
    };

    {
        let (engine, _health) = restart();
        scm.fail_with("connection refused");
        engine.update(&material()).unwrap();
    }

    let (engine, health) = restart();
    assert!(health.is_healthy(&HealthStateScope::for_partial_config_repo(&fingerprint)));
    let entries = health.query(&HealthStateScope::for_material(&fingerprint));
    assert_eq!(entries.len(), 1);
    assert!(entries[0].description.contains("connection refused"));
    assert_eq!(engine.state(&fingerprint), RepoState::FaultedKeepingPrevious);

    scm.push("r1", &[("a.gocd.xml", &fragments::pipelines("g", &["p1"]))]);
    engine.update(&material()).unwrap();
    drop(engine);

    let (engine, health) = restart();
    assert!(health.all().is_empty());
    assert_eq!(engine.state(&fingerprint), RepoState::Merged);
}

/// Blocks inside checkout until released, so a second cycle can be started
/// while the first one is in progress.
struct BlockingScm {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl ScmOperations for BlockingScm {
    fn checkout(&self, _material: &MaterialIdentity, dir: &Path) -> Result<Revision> {
        std::fs::create_dir_all(dir)?;
        self.entered.lock().unwrap().send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
        Ok(Revision::new("r1"))
    }

    fn update(&self, material: &MaterialIdentity, dir: &Path) -> Result<Revision> {
        self.checkout(material, dir)
    }

    fn origin_matches(&self, _material: &MaterialIdentity, _dir: &Path) -> bool {
        true
    }
}

#[test]
fn test_concurrent_cycle_for_same_material_is_rejected() {
    let temp = TempDir::new().unwrap();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let scm = BlockingScm {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };
    let health = std::sync::Arc::new(HealthStateRegistry::new());
    let engine = MergeEngine::new(
        WorkingCopyManager::with_operations(Box::new(scm), temp.path().to_path_buf()),
        Box::new(MemoryRecordStore::new()),
        LocalConfig::default(),
        std::sync::Arc::clone(&health),
    )
    .unwrap();
    let fingerprint = material().fingerprint();

    thread::scope(|scope| {
        let first = scope.spawn(|| engine.update(&material()));
        entered_rx.recv().unwrap();

        assert_eq!(engine.state(&fingerprint), RepoState::InProgress);
        assert_eq!(
            engine.update(&material()).unwrap(),
            CycleOutcome::AlreadyInProgress
        );
        assert!(health.all().is_empty());

        release_tx.send(()).unwrap();
        let outcome = first.join().unwrap().unwrap();
        assert_eq!(outcome, CycleOutcome::Merged { revision: "r1".to_string() });
    });

    assert!(!engine.tracker().is_in_progress(&fingerprint));
}
