//! Build runner: package manager detection, install and build, and the
//! optional static export.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use deploy_core::Stage;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::command::{CommandRunner, CommandSpec};
use crate::error::{CommandError, PipelineError};

/// JavaScript package managers, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageManager {
    Yarn,
    Npm,
    Pnpm,
    Bun,
}

impl PackageManager {
    /// Detection order when several lockfiles are present.
    pub const PRIORITY: [PackageManager; 4] = [
        PackageManager::Yarn,
        PackageManager::Npm,
        PackageManager::Pnpm,
        PackageManager::Bun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Yarn => "yarn",
            PackageManager::Npm => "npm",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Bun => "bun",
        }
    }

    /// Lockfile names that select this package manager.
    pub fn lockfiles(&self) -> &'static [&'static str] {
        match self {
            PackageManager::Yarn => &["yarn.lock"],
            PackageManager::Npm => &["package-lock.json"],
            PackageManager::Pnpm => &["pnpm-lock.yaml"],
            PackageManager::Bun => &["bun.lock", "bun.lockb"],
        }
    }

    /// Install dependencies from the lockfile, then run the `build` script.
    pub fn install_and_build(&self) -> &'static str {
        match self {
            PackageManager::Yarn => "yarn --frozen-lockfile && yarn run build",
            PackageManager::Npm => "npm ci && npm run build",
            PackageManager::Pnpm => {
                "corepack enable pnpm && pnpm i --frozen-lockfile && pnpm run build"
            }
            PackageManager::Bun => "bun install --no-save && bun run build",
        }
    }

    /// Run the project's `export` script.
    pub fn export(&self) -> &'static str {
        match self {
            PackageManager::Yarn => "yarn export",
            PackageManager::Npm => "npm run export",
            PackageManager::Pnpm => "pnpm export",
            PackageManager::Bun => "bun export",
        }
    }

    /// Pick the package manager from the lockfiles directly inside `dir`.
    pub async fn detect(dir: &Path) -> Option<Self> {
        for manager in Self::PRIORITY {
            for lockfile in manager.lockfiles() {
                if tokio::fs::try_exists(dir.join(lockfile))
                    .await
                    .unwrap_or(false)
                {
                    return Some(manager);
                }
            }
        }
        None
    }
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the optional export step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    NotApplicable,
    Exported,
    /// The export failed; the build output is used as is.
    Failed(String),
}

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub package_manager: PackageManager,
    pub export: ExportStatus,
}

/// Framework whose projects get the export step.
const STATIC_EXPORT_FRAMEWORK: &str = "next";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageManifest {
    #[serde(default)]
    dependencies: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    dev_dependencies: Option<HashMap<String, serde_json::Value>>,
}

impl PackageManifest {
    fn depends_on(&self, package: &str) -> bool {
        [&self.dependencies, &self.dev_dependencies]
            .into_iter()
            .flatten()
            .any(|deps| deps.contains_key(package))
    }
}

/// Installs dependencies and builds a service directory.
#[derive(Clone)]
pub struct BuildRunner {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl BuildRunner {
    /// `timeout` bounds the install-and-build command and the export command
    /// separately.
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    pub async fn build(&self, service_dir: &Path) -> Result<BuildReport, PipelineError> {
        let Some(package_manager) = PackageManager::detect(service_dir).await else {
            error!(dir = %service_dir.display(), "No lockfile found");
            return Err(PipelineError::NoLockfileFound(service_dir.to_path_buf()));
        };
        info!(%package_manager, "Detected package manager");

        let script = package_manager.install_and_build();
        let spec = CommandSpec::shell(script)
            .current_dir(service_dir)
            .timeout(self.timeout);

        let output = self.runner.run(&spec).await.map_err(|e| match e {
            CommandError::TimedOut { after, .. } => PipelineError::StageTimedOut {
                stage: Stage::Building,
                after,
            },
            other => PipelineError::BuildCommandFailed {
                command: script.to_string(),
                exit_code: None,
                stdout: String::new(),
                stderr: other.to_string(),
            },
        })?;

        if !output.success() {
            error!(
                command = script,
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "Build command failed"
            );
            return Err(PipelineError::BuildCommandFailed {
                command: script.to_string(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        debug!(stdout = %output.stdout.trim(), "Build output");
        info!(command = script, "Build succeeded");

        let export = if requires_static_export(service_dir).await {
            match self.export(package_manager, service_dir).await {
                Ok(()) => ExportStatus::Exported,
                Err(e) => {
                    warn!(error = %e, "Export step failed; continuing with build output");
                    ExportStatus::Failed(e.to_string())
                }
            }
        } else {
            ExportStatus::NotApplicable
        };

        Ok(BuildReport {
            package_manager,
            export,
        })
    }

    async fn export(
        &self,
        package_manager: PackageManager,
        dir: &Path,
    ) -> Result<(), PipelineError> {
        let script = package_manager.export();
        info!(command = script, "Running static export");

        let spec = CommandSpec::shell(script)
            .current_dir(dir)
            .timeout(self.timeout);
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| PipelineError::ExportStepFailed {
                command: script.to_string(),
                message: e.to_string(),
            })?;

        if output.success() {
            Ok(())
        } else {
            Err(PipelineError::ExportStepFailed {
                command: script.to_string(),
                message: format!(
                    "exit code {}: {}",
                    output.exit_code.map_or("none".to_string(), |c| c.to_string()),
                    output.stderr.trim()
                ),
            })
        }
    }
}

/// Whether `package.json` declares the static-export framework.
///
/// A missing manifest means no; an unreadable one is logged and treated as no.
async fn requires_static_export(dir: &Path) -> bool {
    let raw = match tokio::fs::read(dir.join("package.json")).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
        Err(e) => {
            warn!(error = %e, "Could not read package.json; skipping export");
            return false;
        }
    };

    match serde_json::from_slice::<PackageManifest>(&raw) {
        Ok(manifest) => manifest.depends_on(STATIC_EXPORT_FRAMEWORK),
        Err(e) => {
            warn!(error = %e, "Could not parse package.json; skipping export");
            false
        }
    }
}
