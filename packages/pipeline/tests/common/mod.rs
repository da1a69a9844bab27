#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use deploy_core::{
    DeploymentId, DeploymentJob, DeploymentOutcome, PipelineEvent, RepositorySlug, ServicePath,
    Stage,
};
use db::DbError;
use pipeline::{
    ArtifactSink, CommandError, CommandFuture, CommandOutput, CommandRunner, CommandSpec,
    PipelineConfig, SinkFuture, StatusFuture, StatusStore,
};
use storage::StorageError;
use tokio::sync::broadcast;
use tokio::time::Instant;

pub fn job(slug: &str, service_path: &str, id: &str) -> DeploymentJob {
    DeploymentJob::new(
        RepositorySlug::parse(slug).unwrap(),
        ServicePath::new(service_path),
        DeploymentId::parse(id).unwrap(),
    )
}

pub fn config(root: &Path) -> PipelineConfig {
    PipelineConfig::default()
        .with_workspace_root(root)
        .with_upload_retry(3, Duration::from_secs(1))
}

/// Drain every event sent so far.
pub fn drain(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn stages(events: &[PipelineEvent]) -> Vec<Stage> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::StageEntered { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

/// Stands in for `git` and the package managers.
///
/// `git clone` writes `files` into the clone target; a build script writes
/// `build_outputs` into its working directory.
#[derive(Default)]
pub struct FakeToolchain {
    files: Vec<(PathBuf, Vec<u8>)>,
    build_outputs: Vec<(PathBuf, Vec<u8>)>,
    clone_error: Option<String>,
    clone_times_out: bool,
    build_exit: i32,
    build_panics: bool,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A file in the repository.
    pub fn file(mut self, path: &str, contents: &str) -> Self {
        self.files.push((PathBuf::from(path), contents.as_bytes().to_vec()));
        self
    }

    /// A file the build writes, relative to the service directory.
    pub fn builds(mut self, path: &str, contents: &str) -> Self {
        self.build_outputs
            .push((PathBuf::from(path), contents.as_bytes().to_vec()));
        self
    }

    pub fn clone_fails(mut self, stderr: &str) -> Self {
        self.clone_error = Some(stderr.to_string());
        self
    }

    pub fn clone_times_out(mut self) -> Self {
        self.clone_times_out = true;
        self
    }

    pub fn build_exits(mut self, code: i32) -> Self {
        self.build_exit = code;
        self
    }

    pub fn build_panics(mut self) -> Self {
        self.build_panics = true;
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }

    fn respond(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        match spec.program.as_str() {
            "git" => self.clone_repo(spec),
            "sh" => self.build(spec),
            other => panic!("unexpected program {other}"),
        }
    }

    fn clone_repo(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        if self.clone_times_out {
            return Err(CommandError::TimedOut {
                program: "git".into(),
                after: spec.timeout.unwrap_or_default(),
            });
        }
        if let Some(stderr) = &self.clone_error {
            return Ok(exit(128, stderr));
        }

        let target = PathBuf::from(spec.args.last().unwrap());
        if std::fs::read_dir(&target).map(|mut d| d.next().is_some()).unwrap_or(false) {
            return Ok(exit(
                128,
                "fatal: destination path already exists and is not an empty directory.",
            ));
        }
        write_all(&target, &self.files);
        Ok(exit(0, ""))
    }

    fn build(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let script = spec.display();
        if script.contains("export") {
            return Ok(exit(0, ""));
        }
        if self.build_panics {
            panic!("build tool crashed");
        }
        if self.build_exit != 0 {
            return Ok(exit(self.build_exit, "error: build script failed"));
        }
        write_all(spec.cwd.as_deref().unwrap(), &self.build_outputs);
        Ok(exit(0, ""))
    }
}

impl CommandRunner for FakeToolchain {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> CommandFuture<'a> {
        self.calls.lock().unwrap().push(spec.clone());
        Box::pin(async move { self.respond(spec) })
    }
}

fn exit(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

fn write_all(root: &Path, files: &[(PathBuf, Vec<u8>)]) {
    for (path, contents) in files {
        let full = root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, contents).unwrap();
    }
}

/// In-memory object store that can be told to fail specific keys.
#[derive(Default)]
pub struct FakeSink {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
    failures: Mutex<HashMap<String, u32>>,
    attempts: Mutex<Vec<(String, Instant)>>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` puts of `key`.
    pub fn fail(self, key: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(key.to_string(), times);
        self
    }

    pub fn object(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn attempts_for(&self, key: &str) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

impl ArtifactSink for FakeSink {
    fn put<'a>(&'a self, key: &'a str, bytes: Bytes, content_type: &'a str) -> SinkFuture<'a> {
        Box::pin(async move {
            self.attempts
                .lock()
                .unwrap()
                .push((key.to_string(), Instant::now()));

            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(key)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(StorageError::InvalidConfig("503 Slow Down".into()));
            }
            drop(failures);

            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (bytes, content_type.to_string()));
            Ok(())
        })
    }
}

/// Records every status write.
#[derive(Default)]
pub struct RecordingStatus {
    writes: Mutex<Vec<DeploymentOutcome>>,
    fail: AtomicBool,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let store = Self::default();
        store.fail.store(true, Ordering::SeqCst);
        store
    }

    pub fn writes(&self) -> Vec<DeploymentOutcome> {
        self.writes.lock().unwrap().clone()
    }
}

impl StatusStore for RecordingStatus {
    fn record<'a>(&'a self, outcome: &'a DeploymentOutcome) -> StatusFuture<'a> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DbError::Query("status store unavailable".into()));
            }
            self.writes.lock().unwrap().push(outcome.clone());
            Ok(())
        })
    }
}
