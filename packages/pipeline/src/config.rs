//! Pipeline configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use deploy_core::DeploymentId;

use crate::error::ConfigError;

/// Settings shared by every pipeline stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent directory of per-deployment workspaces.
    pub workspace_root: PathBuf,
    /// Scheme and host that repository slugs are cloned from.
    pub git_host: String,
    pub clone_timeout: Duration,
    pub build_timeout: Duration,
    pub upload_max_attempts: u32,
    /// The wait after failed attempt `n` is `upload_backoff_base * 2^n`.
    pub upload_backoff_base: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("deploy-worker"),
            git_host: "https://github.com".to_string(),
            clone_timeout: Duration::from_secs(300),
            build_timeout: Duration::from_secs(1200),
            upload_max_attempts: 3,
            upload_backoff_base: Duration::from_millis(1000),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let upload_max_attempts = parse_env("UPLOAD_MAX_ATTEMPTS", defaults.upload_max_attempts)?;
        if upload_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "UPLOAD_MAX_ATTEMPTS".into(),
                value: "0".into(),
                reason: "at least one attempt is required".into(),
            });
        }

        Ok(Self {
            workspace_root: env_non_empty("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            git_host: env_non_empty("GIT_HOST_URL").unwrap_or(defaults.git_host),
            clone_timeout: Duration::from_secs(parse_env(
                "CLONE_TIMEOUT_SECS",
                defaults.clone_timeout.as_secs(),
            )?),
            build_timeout: Duration::from_secs(parse_env(
                "BUILD_TIMEOUT_SECS",
                defaults.build_timeout.as_secs(),
            )?),
            upload_max_attempts,
            upload_backoff_base: Duration::from_millis(parse_env(
                "UPLOAD_BACKOFF_BASE_MS",
                defaults.upload_backoff_base.as_millis() as u64,
            )?),
        })
    }

    /// Workspace directory for one deployment.
    pub fn workspace_dir(&self, deployment_id: &DeploymentId) -> PathBuf {
        self.workspace_root.join(deployment_id.as_str())
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_git_host(mut self, host: impl Into<String>) -> Self {
        self.git_host = host.into();
        self
    }

    pub fn with_timeouts(mut self, clone: Duration, build: Duration) -> Self {
        self.clone_timeout = clone;
        self.build_timeout = build;
        self
    }

    pub fn with_upload_retry(mut self, max_attempts: u32, backoff_base: Duration) -> Self {
        self.upload_max_attempts = max_attempts.max(1);
        self.upload_backoff_base = backoff_base;
        self
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_non_empty(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
