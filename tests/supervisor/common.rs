//! Shared fixtures for supervision loop tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use rotenv::config::{SupervisorConfig, VariantChangePolicy};
use rotenv::credential::Credential;
use rotenv::process::{CommandSpec, Launcher, ProcessHandle, StartError};

/// Launcher that records every start attempt before spawning for real.
#[derive(Default)]
pub struct RecordingLauncher {
    attempts: AtomicUsize,
    environments: Mutex<Vec<BTreeMap<String, String>>>,
}

impl RecordingLauncher {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn environments(&self) -> Vec<BTreeMap<String, String>> {
        self.environments.lock().expect("lock").clone()
    }
}

impl Launcher for RecordingLauncher {
    fn launch(
        &self,
        command: &CommandSpec,
        credential: Box<dyn Credential>,
    ) -> Result<ProcessHandle, StartError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.environments
            .lock()
            .expect("lock")
            .push(credential.environment());
        ProcessHandle::start(command, credential)
    }
}

pub fn config(document: &Path, command: CommandSpec) -> SupervisorConfig {
    SupervisorConfig {
        logical_name: "svc".to_owned(),
        command,
        variant: "symmetric".to_owned(),
        document_path: document.to_path_buf(),
        poll_interval: Duration::from_secs(15),
        on_variant_change: VariantChangePolicy::Abort,
    }
}

pub fn sleeper() -> CommandSpec {
    CommandSpec::new("sleep", vec!["30".to_owned()])
}

pub fn write_document(path: &Path, document: &Value) {
    std::fs::write(path, document.to_string()).expect("write document");
}

pub fn document_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("sec-config.json")
}

pub async fn wait_for_lines(path: &Path, count: usize) -> Vec<String> {
    for _ in 0..100 {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let lines: Vec<String> = contents.lines().map(str::to_owned).collect();
            if lines.len() >= count {
                return lines;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {count} lines in {}", path.display());
}
