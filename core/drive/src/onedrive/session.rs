//! Signed-in OneDrive session.

use std::sync::Arc;

use skyview_common::{Result, SecretString};

use super::auth::{Authenticator, TokenManager, Tokens};
use super::cache::TokenCache;
use super::client::GraphClient;
use crate::browser::DriveBrowser;
use crate::config::AppConfig;

/// An authenticated session against the user's drive.
///
/// Owns the single active token and the Graph client that uses it. Created by
/// [`AuthSession::sign_in`] and passed explicitly to whatever needs the drive.
pub struct AuthSession {
    token_manager: Arc<TokenManager>,
    client: Arc<GraphClient>,
}

impl AuthSession {
    /// Sign in and obtain an access token before returning.
    ///
    /// Cached tokens are reused when still valid and refreshed silently when
    /// they are about to expire; the authenticator prompts only when neither
    /// works.
    ///
    /// # Errors
    /// - Token acquisition failed
    /// - HTTP client construction failed
    pub async fn sign_in(config: &AppConfig, authenticator: Arc<dyn Authenticator>) -> Result<Self> {
        let cache = config.token_cache_path().map(TokenCache::new);
        let cached = match &cache {
            Some(cache) => cache.load().await?,
            None => None,
        };

        let mut token_manager = TokenManager::new(authenticator, cached);
        if let Some(cache) = cache {
            token_manager = token_manager.with_cache(cache);
        }
        let token_manager = Arc::new(token_manager);

        token_manager.get_access_token().await?;
        tracing::info!("Signed in (tenant {})", config.tenant);

        let client = Arc::new(GraphClient::new(token_manager.clone(), config)?);

        Ok(Self {
            token_manager,
            client,
        })
    }

    /// Current access token, refreshed if needed.
    pub async fn access_token(&self) -> Result<SecretString> {
        self.token_manager.get_access_token().await
    }

    /// Current token set.
    pub async fn tokens(&self) -> Option<Tokens> {
        self.token_manager.get_tokens().await
    }

    /// Graph client bound to this session.
    pub fn client(&self) -> Arc<GraphClient> {
        self.client.clone()
    }

    /// Drive browser bound to this session.
    pub fn browser(&self) -> DriveBrowser {
        DriveBrowser::new(self.client.clone())
    }

    /// Forget the token and delete the token cache.
    pub async fn sign_out(self) -> Result<()> {
        self.token_manager.clear().await?;
        tracing::info!("Signed out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAuthenticator {
        interactive_calls: AtomicUsize,
    }

    #[async_trait]
    impl Authenticator for CountingAuthenticator {
        async fn refresh(&self, _refresh_token: &SecretString) -> Result<Tokens> {
            Err(skyview_common::Error::Authentication("no refresh".to_string()))
        }

        async fn acquire_interactive(&self) -> Result<Tokens> {
            self.interactive_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Tokens {
                access_token: SecretString::new("token"),
                refresh_token: Some(SecretString::new("refresh")),
                expires_at: Utc::now() + Duration::hours(1),
            })
        }
    }

    fn config(dir: &std::path::Path) -> AppConfig {
        AppConfig {
            token_cache: Some(dir.join("tokens.json")),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn test_sign_in_acquires_token_and_caches_it() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let auth = Arc::new(CountingAuthenticator {
            interactive_calls: AtomicUsize::new(0),
        });

        let session = AuthSession::sign_in(&config, auth.clone()).await.unwrap();
        assert_eq!(auth.interactive_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.access_token().await.unwrap().expose(), "token");
        assert!(dir.path().join("tokens.json").exists());

        // A second sign-in reuses the cached token.
        let _again = AuthSession::sign_in(&config, auth.clone()).await.unwrap();
        assert_eq!(auth.interactive_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sign_out_removes_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let auth = Arc::new(CountingAuthenticator {
            interactive_calls: AtomicUsize::new(0),
        });

        let session = AuthSession::sign_in(&config, auth).await.unwrap();
        session.sign_out().await.unwrap();

        assert!(!dir.path().join("tokens.json").exists());
    }
}
