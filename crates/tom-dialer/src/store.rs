//! Persistence for the client identity.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::identity::Identity;

pub const KEY_FILE: &str = "tls.key";
pub const CERT_FILE: &str = "tls.crt";
pub const REGISTRATION_FILE: &str = "registration_id";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no identity stored")]
    NotFound,

    #[error("failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where the dialer keeps its key, certificate and registration id.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Whether a key and certificate are present. Does not check they are usable.
    async fn exists(&self) -> Result<bool, StoreError>;

    async fn load(&self) -> Result<Identity, StoreError>;

    /// Replace any stored identity. Loading the same identity afterwards
    /// returns exactly what was saved.
    async fn save(&self, identity: &Identity) -> Result<(), StoreError>;
}

// ── File store ──────────────────────────────────────────────────────

/// Identity kept as three files in one directory. The directory is created
/// owner-only; all files are written owner-read/write only.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.tom-dialer/certs`, or under the temp dir when there is no home.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".tom-dialer")
            .join("certs")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn present(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.dir.join(name);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StoreError::Io {
                op: "stat",
                path,
                source,
            })
    }

    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                op: "read",
                path,
                source,
            }),
        }
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn write_replace(&self, name: &str, contents: &[u8]) -> Result<(), StoreError> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let io_err = |op, path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { op, path, source }
        };

        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        opts.mode(0o600);

        let mut file = opts.open(&tmp).await.map_err(io_err("create", &tmp))?;
        file.write_all(contents).await.map_err(io_err("write", &tmp))?;
        file.sync_all().await.map_err(io_err("sync", &tmp))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(io_err("replace", &path))
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder
            .create(&self.dir)
            .await
            .map_err(|source| StoreError::Io {
                op: "create directory",
                path: self.dir.clone(),
                source,
            })
    }
}

#[async_trait]
impl IdentityStore for FileStore {
    async fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.present(KEY_FILE).await? && self.present(CERT_FILE).await?)
    }

    async fn load(&self) -> Result<Identity, StoreError> {
        let key = self.read(KEY_FILE).await?.ok_or(StoreError::NotFound)?;
        let cert = self.read(CERT_FILE).await?.ok_or(StoreError::NotFound)?;
        let registration_id = self
            .read(REGISTRATION_FILE)
            .await?
            .map(|raw| String::from_utf8_lossy(&raw).trim().to_string())
            .unwrap_or_default();
        Ok(Identity::new(key, cert, registration_id))
    }

    async fn save(&self, identity: &Identity) -> Result<(), StoreError> {
        self.ensure_dir().await?;
        self.write_replace(KEY_FILE, identity.key_pem()).await?;
        self.write_replace(CERT_FILE, identity.cert_pem()).await?;
        self.write_replace(REGISTRATION_FILE, identity.registration_id().as_bytes())
            .await?;
        tracing::debug!(dir = %self.dir.display(), "identity saved");
        Ok(())
    }
}

// ── Memory store ────────────────────────────────────────────────────

/// Identity held in process memory. Concurrent loads and saves are safe.
#[derive(Debug, Default)]
pub struct MemoryStore {
    identity: RwLock<Option<Identity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `identity`.
    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity: RwLock::new(Some(identity)),
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn exists(&self) -> Result<bool, StoreError> {
        Ok(self
            .identity
            .read()
            .await
            .as_ref()
            .is_some_and(|id| !id.key_pem().is_empty() && id.has_certificate()))
    }

    async fn load(&self) -> Result<Identity, StoreError> {
        self.identity
            .read()
            .await
            .clone()
            .ok_or(StoreError::NotFound)
    }

    async fn save(&self, identity: &Identity) -> Result<(), StoreError> {
        *self.identity.write().await = Some(identity.clone());
        Ok(())
    }
}
