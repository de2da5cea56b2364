//! On-disk token cache.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use skyview_common::{Error, Result};

use super::auth::Tokens;

/// JSON file holding the signed-in user's tokens between runs.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cached tokens.
    ///
    /// A missing file yields `None`. An unreadable or corrupt cache is
    /// discarded with a warning so that sign-in can start over.
    pub async fn load(&self) -> Result<Option<Tokens>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&raw) {
            Ok(tokens) => Ok(Some(tokens)),
            Err(e) => {
                tracing::warn!(
                    "Ignoring corrupt token cache {}: {}",
                    self.path.display(),
                    e
                );
                Ok(None)
            }
        }
    }

    /// Write tokens, creating the parent directory if needed.
    ///
    /// The file is only readable by the owner before any token is written.
    pub async fn save(&self, tokens: &Tokens) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(tokens)
            .map_err(|e| Error::Serialization(format!("Failed to encode tokens: {}", e)))?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&self.path).await?;
        // An existing file keeps its mode on open.
        restrict_permissions(&self.path).await?;
        file.write_all(&json).await?;
        file.flush().await?;

        tracing::debug!("Saved token cache to {}", self.path.display());
        Ok(())
    }

    /// Remove the cache file. Removing a missing cache succeeds.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
