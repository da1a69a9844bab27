//! Object storage for published build artifacts.
//!
//! Backends:
//! - S3-compatible bucket in production (public website bucket)
//! - On-disk storage for local runs
//! - In-memory storage for tests
//!
//! A thin wrapper around `object_store`, which already provides all three.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, ObjectStoreExt, PutOptions, PutPayload,
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }

    /// Whether the backend keeps a per-object content type.
    fn stores_content_type(self) -> bool {
        !matches!(self, StorageKind::Filesystem)
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
        }
    }

    /// Build a config from environment variables.
    ///
    /// Selection rules:
    /// - If `STORAGE_BACKEND` is set: use it (`s3`, `filesystem`, `memory`)
    /// - Otherwise: default to filesystem (`./data/object_store`)
    ///
    /// S3 env vars (S3-compatible):
    /// - `S3_BUCKET` (required when backend is `s3`; falls back to `BUCKET_NAME`)
    /// - `AWS_REGION` (default: `us-east-1`)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (`true`/`false`, default: auto true if endpoint is http://)
    /// - `S3_VIRTUAL_HOSTED_STYLE` (`true`/`false`, default: false)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` (optional)
    ///
    /// Filesystem env vars:
    /// - `STORAGE_FS_ROOT` (default: `./data/object_store`)
    ///
    /// Common:
    /// - `STORAGE_PREFIX` (optional)
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = std::env::var("STORAGE_BACKEND").ok();
        let prefix = env_non_empty("STORAGE_PREFIX");

        let cfg = match backend.as_deref() {
            Some("s3") => Self::s3(read_s3_config()?),
            Some("filesystem") | Some("fs") | None => {
                let root = env_non_empty("STORAGE_FS_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/object_store"));
                Self::filesystem(root)
            }
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(Self { prefix, ..cfg })
    }
}

/// An object read back from storage.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl Storage {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store) = match cfg.backend {
            StorageBackendConfig::S3(s3) => (StorageKind::S3, Arc::new(build_s3(s3)?) as _),
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs) as _)
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem) as _)
            }
        };

        tracing::info!(backend = kind.as_str(), "Object storage ready");

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidKey(
                "object key must not be empty".to_string(),
            ));
        }

        let joined = match self.prefix.as_deref() {
            Some(prefix) => {
                let prefix = prefix.trim_matches('/');
                if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}/{key}")
                }
            }
            None => key.to_string(),
        };

        Path::parse(&joined).map_err(|e| StorageError::InvalidKey(e.to_string()))
    }

    /// Write an object, overwriting any existing object under the same key.
    ///
    /// The content type is kept as object metadata where the backend supports it.
    pub async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let path = self.to_path(key)?;

        let mut attributes = Attributes::new();
        if let Some(content_type) = content_type
            && self.kind.stores_content_type()
        {
            attributes.insert(
                Attribute::ContentType,
                AttributeValue::from(content_type.to_string()),
            );
        }

        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        self.store
            .put_opts(&path, PutPayload::from(bytes), opts)
            .await?;
        Ok(())
    }

    pub async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        self.put_object(key, bytes, None).await
    }

    pub async fn get_object(&self, key: &str) -> Result<StoredObject, StorageError> {
        let path = self.to_path(key)?;
        let res = self.store.get(&path).await?;
        let content_type = res
            .attributes
            .get(&Attribute::ContentType)
            .map(|v| v.as_ref().to_string());
        Ok(StoredObject {
            bytes: res.bytes().await?,
            content_type,
        })
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        Ok(self.get_object(key).await?.bytes)
    }

    /// Whether an object exists under the key.
    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.to_path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_non_empty(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().and_then(non_empty)
}

fn parse_bool_env(var_name: &str) -> Result<Option<bool>, StorageError> {
    let v = match std::env::var(var_name) {
        Ok(v) => v,
        Err(std::env::VarError::NotPresent) => return Ok(None),
        Err(e) => {
            return Err(StorageError::InvalidConfig(format!(
                "failed reading {var_name}: {e}"
            )));
        }
    };

    let normalized = v.trim().to_ascii_lowercase();
    let parsed = match normalized.as_str() {
        "1" | "true" | "yes" | "y" => true,
        "0" | "false" | "no" | "n" => false,
        _ => {
            return Err(StorageError::InvalidConfig(format!(
                "invalid boolean for {var_name}={v} (expected true/false)"
            )));
        }
    };
    Ok(Some(parsed))
}

fn read_s3_config() -> Result<S3Config, StorageError> {
    let bucket = env_non_empty("S3_BUCKET")
        .or_else(|| env_non_empty("BUCKET_NAME"))
        .ok_or_else(|| {
            StorageError::InvalidConfig("S3_BUCKET is required for s3 backend".into())
        })?;

    let region = env_non_empty("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string());

    let endpoint = env_non_empty("S3_ENDPOINT");
    let allow_http = match parse_bool_env("S3_ALLOW_HTTP")? {
        Some(v) => v,
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.trim_start().to_ascii_lowercase().starts_with("http://")),
    };

    let virtual_hosted_style = parse_bool_env("S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false);

    Ok(S3Config {
        bucket,
        region,
        endpoint,
        allow_http,
        access_key_id: env_non_empty("AWS_ACCESS_KEY_ID"),
        secret_access_key: env_non_empty("AWS_SECRET_ACCESS_KEY"),
        session_token: env_non_empty("AWS_SESSION_TOKEN"),
        virtual_hosted_style,
    })
}

fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(session_token) = cfg.session_token {
        builder = builder.with_token(session_token);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[tokio::test]
    async fn in_memory_keeps_content_type() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        storage
            .put_object(
                "__outputs/dep-1/index.html",
                Bytes::from("<h1>hi</h1>"),
                Some("text/html"),
            )
            .await?;

        let got = storage.get_object("__outputs/dep-1/index.html").await?;
        assert_eq!(got.bytes, Bytes::from("<h1>hi</h1>"));
        assert_eq!(got.content_type.as_deref(), Some("text/html"));
        Ok(())
    }

    #[tokio::test]
    async fn put_overwrites_same_key() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        storage.put_bytes("a/b.txt", Bytes::from("one")).await?;
        storage.put_bytes("a/b.txt", Bytes::from("two")).await?;
        assert_eq!(storage.get_bytes("a/b.txt").await?, Bytes::from("two"));
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_ignores_content_type() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let storage = Storage::new(StorageConfig::filesystem(dir.path())).await?;

        storage
            .put_object("nested/dir/app.js", Bytes::from("x"), Some("text/javascript"))
            .await?;
        assert!(dir.path().join("nested/dir/app.js").exists());
        assert!(storage.exists("nested/dir/app.js").await?);
        assert!(!storage.exists("nested/dir/missing.js").await?);
        Ok(())
    }

    #[tokio::test]
    async fn prefix_is_applied() -> Result<(), StorageError> {
        let mut cfg = StorageConfig::memory();
        cfg.prefix = Some("/site/".to_string());
        let storage = Storage::new(cfg).await?;
        storage.put_bytes("/x.txt", Bytes::from("x")).await?;
        assert!(storage.exists("x.txt").await?);
        Ok(())
    }

    #[tokio::test]
    async fn empty_key_is_rejected() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        let err = storage.put_bytes("/", Bytes::new()).await;
        assert!(matches!(err, Err(StorageError::InvalidKey(_))));
        Ok(())
    }
}
