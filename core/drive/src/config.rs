//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use skyview_common::{Error, Result};

use crate::onedrive::auth::AuthConfig;

/// Application (client) ID registered for SkyView with the Microsoft
/// identity platform.
pub const DEFAULT_CLIENT_ID: &str = "a4ff7c3c-d1e5-47eb-a654-e0038f637a52";
/// Microsoft Graph v1.0 endpoint.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
/// Environment variable overriding the configured client ID.
pub const CLIENT_ID_ENV: &str = "SKYVIEW_CLIENT_ID";

const APP_DIR: &str = "skyview";

/// Kind of account the drive belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// Personal Microsoft account.
    #[default]
    Consumer,
    /// Work or school account (OneDrive for Business).
    Business,
}

impl ClientType {
    /// `$expand` directive used when listing a folder.
    ///
    /// Business drives reject nested expansion of children thumbnails.
    pub fn expand(&self) -> &'static str {
        match self {
            Self::Consumer => "thumbnails,children($expand=thumbnails)",
            Self::Business => "thumbnails,children",
        }
    }
}

/// SkyView configuration, stored as JSON.
///
/// Every field has a default, so a partial file (or none at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application (client) ID.
    pub client_id: String,
    /// Directory tenant: `common`, `consumers`, `organizations` or a GUID.
    pub tenant: String,
    /// Redirect URL for the authorization-code flow.
    pub redirect_url: String,
    /// Account kind, which selects the listing expansion.
    pub client_type: ClientType,
    /// Graph API base URL.
    pub graph_base_url: String,
    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
    /// Token cache file; defaults to the user cache directory.
    pub token_cache: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            tenant: "common".to_string(),
            redirect_url: "http://localhost".to_string(),
            client_type: ClientType::Consumer,
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            timeout_secs: 60,
            token_cache: None,
        }
    }
}

impl AppConfig {
    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// read when present and defaults are used otherwise. The client ID
    /// environment override is applied last.
    ///
    /// # Errors
    /// - Explicit file missing or unreadable
    /// - Malformed JSON
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::read_file(path).await?,
            None => match Self::default_path() {
                Some(default) if tokio::fs::try_exists(&default).await? => {
                    Self::read_file(&default).await?
                }
                _ => Self::default(),
            },
        };

        Ok(config.with_env_overrides(std::env::var(CLIENT_ID_ENV).ok()))
    }

    async fn read_file(path: &Path) -> Result<Self> {
        tracing::debug!("Loading configuration from {}", path.display());
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json(&raw)
    }

    /// Parse configuration JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidInput(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn with_env_overrides(mut self, client_id: Option<String>) -> Self {
        if let Some(client_id) = client_id.filter(|id| !id.trim().is_empty()) {
            self.client_id = client_id;
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::InvalidInput("client_id cannot be empty".to_string()));
        }
        if self.tenant.trim().is_empty() {
            return Err(Error::InvalidInput("tenant cannot be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        url::Url::parse(&self.graph_base_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid graph_base_url: {}", e)))?;
        Ok(())
    }

    /// OAuth2 settings derived from this configuration.
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            client_id: self.client_id.clone(),
            tenant: self.tenant.clone(),
            redirect_url: self.redirect_url.clone(),
            ..AuthConfig::default()
        }
    }

    /// Token cache location, if one can be determined.
    pub fn token_cache_path(&self) -> Option<PathBuf> {
        self.token_cache
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join(APP_DIR).join("tokens.json")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(config.tenant, "common");
        assert_eq!(config.client_type, ClientType::Consumer);
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AppConfig::from_json(r#"{"client_type": "business", "tenant": "organizations"}"#)
            .unwrap();
        assert_eq!(config.client_type, ClientType::Business);
        assert_eq!(config.tenant, "organizations");
        assert_eq!(config.graph_base_url, DEFAULT_GRAPH_BASE_URL);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(AppConfig::from_json(r#"{"client_id": ""}"#).is_err());
        assert!(AppConfig::from_json(r#"{"graph_base_url": "not a url"}"#).is_err());
        assert!(AppConfig::from_json("{").is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = AppConfig::from_json(r#"{"timeout_secs": 0}"#);
        assert!(matches!(result, Err(Error::InvalidInput(ref m)) if m.contains("timeout_secs")));
        assert_eq!(AppConfig::from_json(r#"{"timeout_secs": 1}"#).unwrap().timeout_secs, 1);
    }

    #[test]
    fn test_env_override() {
        let config = AppConfig::default().with_env_overrides(Some("my-app".to_string()));
        assert_eq!(config.client_id, "my-app");

        let config = AppConfig::default().with_env_overrides(Some("  ".to_string()));
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
    }

    #[test]
    fn test_expand_by_client_type() {
        assert_eq!(
            ClientType::Consumer.expand(),
            "thumbnails,children($expand=thumbnails)"
        );
        assert_eq!(ClientType::Business.expand(), "thumbnails,children");
    }

    #[tokio::test]
    async fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"timeout_secs": 5, "token_cache": "/tmp/t.json"}"#)
            .await
            .unwrap();

        let config = AppConfig::load(Some(path.as_path())).await.unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.token_cache_path(), Some(PathBuf::from("/tmp/t.json")));

        let missing_path = dir.path().join("nope.json");
        let missing = AppConfig::load(Some(missing_path.as_path())).await;
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
