//! Shared test utilities for integration and E2E tests.
//!
//! Add `mod common;` to a test file, then `use common::prelude::*;`.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use assert_fs::prelude::*;

use config_repo::checkout::{Revision, ScmOperations, WorkingCopyManager};
use config_repo::engine::{LocalConfig, MemoryRecordStore, MergeEngine, UpdateRecordStore};
use config_repo::error::{Error, Result};
use config_repo::health::HealthStateRegistry;
use config_repo::material::MaterialIdentity;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    pub use super::fragments;
    pub use super::{engine, engine_with_store, ScriptedScm, TestFixture};
}

/// Fragment documents for tests.
pub mod fragments {
    /// A fragment declaring `pipelines` in `group`, each with one stage.
    pub fn pipelines(group: &str, pipelines: &[&str]) -> String {
        let body: String = pipelines
            .iter()
            .map(|name| {
                format!(
                    r#"<pipeline name="{}"><materials><git url="https://example.com/{}.git"/></materials><stage name="build"><jobs><job name="compile"><tasks><exec command="make"/></tasks></job></jobs></stage></pipeline>"#,
                    name, name
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<cruise schemaVersion="139"><pipelines group="{}">{}</pipelines></cruise>"#,
            group, body
        )
    }

    /// A fragment declaring an environment over `pipelines`.
    pub fn environment(name: &str, pipelines: &[&str]) -> String {
        let members: String = pipelines
            .iter()
            .map(|p| format!(r#"<pipeline name="{}"/>"#, p))
            .collect();
        format!(
            r#"<cruise schemaVersion="139"><environments><environment name="{}"><pipelines>{}</pipelines></environment></environments></cruise>"#,
            name, members
        )
    }

    /// Well-formed, but a pipeline without stages.
    pub const SCHEMA_VIOLATION: &str = r#"<cruise schemaVersion="139"><pipelines group="g"><pipeline name="broken"><materials><git url="https://example.com/x.git"/></materials></pipeline></pipelines></cruise>"#;

    /// Not well-formed XML.
    pub const MALFORMED: &str = "<cruise schemaVersion=\"139\">\n<pipelines group=\"g\">\n</cruise>";
}

#[derive(Debug, Clone)]
struct Script {
    revision: String,
    files: Vec<(String, String)>,
    failure: Option<String>,
}

/// An `ScmOperations` double whose working-copy contents are set by the
/// test. Every checkout or update replaces the fragment files in the
/// directory with the current script. Calls are logged.
#[derive(Clone)]
pub struct ScriptedScm {
    script: Arc<Mutex<Script>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedScm {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                revision: "r0".to_string(),
                files: Vec::new(),
                failure: None,
            })),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make `files` the contents of the repository at `revision`.
    pub fn push(&self, revision: &str, files: &[(&str, &str)]) {
        let mut script = self.script.lock().unwrap();
        script.revision = revision.to_string();
        script.files = files
            .iter()
            .map(|(name, content)| (name.to_string(), content.to_string()))
            .collect();
        script.failure = None;
    }

    /// Make every following checkout fail with `message`.
    pub fn fail_with(&self, message: &str) {
        self.script.lock().unwrap().failure = Some(message.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn write(&self, operation: &str, material: &MaterialIdentity, dir: &Path) -> Result<Revision> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", operation, material.masked_url()));
        let script = self.script.lock().unwrap().clone();
        if let Some(message) = script.failure {
            return Err(Error::CheckoutFailed {
                url: material.masked_url(),
                message,
            });
        }
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        fs::create_dir_all(dir)?;
        for (name, content) in &script.files {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
        Ok(Revision::new(script.revision))
    }
}

impl Default for ScriptedScm {
    fn default() -> Self {
        Self::new()
    }
}

impl ScmOperations for ScriptedScm {
    fn checkout(&self, material: &MaterialIdentity, dir: &Path) -> Result<Revision> {
        self.write("checkout", material, dir)
    }

    fn update(&self, material: &MaterialIdentity, dir: &Path) -> Result<Revision> {
        self.write("update", material, dir)
    }

    fn origin_matches(&self, _material: &MaterialIdentity, _dir: &Path) -> bool {
        true
    }
}

/// An engine over `scm` with its working copies in `working_dir`.
pub fn engine_with_store(
    working_dir: &Path,
    scm: &ScriptedScm,
    store: Box<dyn UpdateRecordStore>,
    local: LocalConfig,
) -> (MergeEngine, Arc<HealthStateRegistry>) {
    let health = Arc::new(HealthStateRegistry::new());
    let checkout =
        WorkingCopyManager::with_operations(Box::new(scm.clone()), working_dir.to_path_buf());
    let engine = MergeEngine::new(checkout, store, local, Arc::clone(&health))
        .expect("engine should start");
    (engine, health)
}

/// An engine with an in-memory record store and no local configuration.
pub fn engine(working_dir: &Path, scm: &ScriptedScm) -> (MergeEngine, Arc<HealthStateRegistry>) {
    engine_with_store(
        working_dir,
        scm,
        Box::new(MemoryRecordStore::new()),
        LocalConfig::default(),
    )
}

/// A temporary directory for CLI tests, with helpers for writing a
/// settings file and fragment files.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Write `config-repo.yaml` with the given content.
    pub fn with_settings(self, content: &str) -> Self {
        self.temp_dir
            .child("config-repo.yaml")
            .write_str(content)
            .expect("Failed to write settings file");
        self
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn settings_path(&self) -> PathBuf {
        self.temp_dir.path().join("config-repo.yaml")
    }

    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// A `config-repo` command running in the fixture directory, with
    /// working and data directories kept inside it.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("config-repo");
        cmd.current_dir(self.path())
            .env("CONFIG_REPO_WORKING_DIR", self.path().join("working"))
            .env("CONFIG_REPO_DATA_DIR", self.path().join("data"))
            .env_remove("CONFIG_REPO_CONFIG")
            .env_remove("CONFIG_REPO_LOG_LEVEL")
            .env("NO_COLOR", "1");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
