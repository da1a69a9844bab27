//! Deployment job values and the queue wire format.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Field separator of the wire format. No escaping exists, so no field may contain it.
pub const WIRE_SEPARATOR: char = ',';

/// Errors raised while decoding a queue payload into a [`DeploymentJob`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("expected 3 comma-separated fields, found {0}")]
    FieldCount(usize),

    #[error("invalid repository slug '{0}' (expected owner/name)")]
    InvalidSlug(String),

    #[error("invalid deployment id '{0}'")]
    InvalidDeploymentId(String),

    #[error("field contains the wire separator: '{0}'")]
    ContainsSeparator(String),
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Opaque identifier correlating a job with its persisted deployment record.
///
/// Restricted to `[A-Za-z0-9._-]` because it is used both as a workspace
/// directory name and as an object key segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Parse and validate a deployment id.
    pub fn parse(s: &str) -> Result<Self, DecodeError> {
        let s = s.trim();
        if s.is_empty() || s == "." || s == ".." || !s.chars().all(is_id_char) {
            return Err(DecodeError::InvalidDeploymentId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Generate a fresh id for a new deployment.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeploymentId {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeploymentId> for String {
    fn from(id: DeploymentId) -> Self {
        id.0
    }
}

impl std::fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A repository on the source host, written `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositorySlug {
    owner: String,
    name: String,
}

impl RepositorySlug {
    pub fn parse(s: &str) -> Result<Self, DecodeError> {
        let s = s.trim();
        let invalid = || DecodeError::InvalidSlug(s.to_string());

        let (owner, name) = s.split_once('/').ok_or_else(invalid)?;
        let valid_part = |part: &str| {
            !part.is_empty() && part != "." && part != ".." && part.chars().all(is_id_char)
        };
        if !valid_part(owner) || !valid_part(name) {
            return Err(invalid());
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// HTTPS clone URL on the given host, e.g. `https://github.com/acme/site`.
    pub fn clone_url(&self, host: &str) -> String {
        format!("{}/{}/{}", host.trim_end_matches('/'), self.owner, self.name)
    }
}

impl TryFrom<String> for RepositorySlug {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RepositorySlug> for String {
    fn from(slug: RepositorySlug) -> Self {
        slug.to_string()
    }
}

impl std::fmt::Display for RepositorySlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Subdirectory of the repository that holds the project, `.` for the root.
///
/// Kept verbatim at decode time; whether it stays inside the workspace is
/// checked by the fetcher so that a bad path fails the deployment instead of
/// poisoning the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServicePath(String);

impl ServicePath {
    pub fn new(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            Self::root()
        } else {
            Self(s.to_string())
        }
    }

    pub fn root() -> Self {
        Self(".".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.relative().is_some_and(|p| p.as_os_str().is_empty())
    }

    /// The path as a normalized relative path, or `None` if it is absolute
    /// or climbs out with `..`.
    pub fn relative(&self) -> Option<PathBuf> {
        let mut out = PathBuf::new();
        for component in Path::new(&self.0).components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(out)
    }
}

impl std::fmt::Display for ServicePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One deployment request decoded from a queue message.
///
/// Immutable once decoded; every pipeline stage receives it by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentJob {
    pub repository: RepositorySlug,
    pub service_path: ServicePath,
    pub deployment_id: DeploymentId,
}

impl DeploymentJob {
    pub fn new(
        repository: RepositorySlug,
        service_path: ServicePath,
        deployment_id: DeploymentId,
    ) -> Self {
        Self {
            repository,
            service_path,
            deployment_id,
        }
    }

    /// Decode the `<repositorySlug>,<servicePath>,<deploymentId>` wire format.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
        let fields: Vec<&str> = text.trim().split(WIRE_SEPARATOR).collect();

        let [slug, service_path, deployment_id] = fields.as_slice() else {
            return Err(DecodeError::FieldCount(fields.len()));
        };

        Ok(Self {
            repository: RepositorySlug::parse(slug)?,
            service_path: ServicePath::new(service_path),
            deployment_id: DeploymentId::parse(deployment_id)?,
        })
    }

    /// Encode into the wire format consumed by [`DeploymentJob::decode`].
    pub fn encode(&self) -> Result<String, DecodeError> {
        if self.service_path.as_str().contains(WIRE_SEPARATOR) {
            return Err(DecodeError::ContainsSeparator(
                self.service_path.as_str().to_string(),
            ));
        }
        Ok(format!(
            "{}{sep}{}{sep}{}",
            self.repository,
            self.service_path,
            self.deployment_id,
            sep = WIRE_SEPARATOR
        ))
    }
}
