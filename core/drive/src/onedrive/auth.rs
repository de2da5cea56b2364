//! OAuth2 authentication and token management for Microsoft Graph.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    reqwest, AuthType, AuthUrl, AuthorizationCode, ClientId, CsrfToken, DeviceAuthorizationUrl,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    Scope, StandardDeviceAuthorizationResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use skyview_common::{Error, Result, SecretString};

use super::cache::TokenCache;
use crate::config::DEFAULT_CLIENT_ID;

/// Microsoft identity platform authority.
const AUTHORITY_BASE: &str = "https://login.microsoftonline.com";

/// Delegated scopes requested for the signed-in user.
const DEFAULT_SCOPES: &[&str] = &["Files.ReadWrite.All", "offline_access"];

/// Tokens expiring within this window are treated as expired.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// Device code polls give up after this long.
const DEVICE_CODE_TIMEOUT_SECS: u64 = 15 * 60;

type GraphOAuthClient =
    BasicClient<EndpointSet, EndpointSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// OAuth2 tokens with expiration tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    /// Bearer token presented on each API call.
    pub access_token: SecretString,
    /// Refresh token for silent renewal, when the provider issued one.
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now() + Duration::minutes(EXPIRY_MARGIN_MINUTES)
    }

    fn from_response(response: &BasicTokenResponse, previous_refresh: Option<&SecretString>) -> Self {
        let expires_in = response
            .expires_in()
            .unwrap_or_else(|| std::time::Duration::from_secs(3600));
        let expires_at =
            Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));

        // Refresh responses may omit the refresh token; keep the old one then.
        let refresh_token = response
            .refresh_token()
            .map(|t| SecretString::new(t.secret().clone()))
            .or_else(|| previous_refresh.cloned());

        Self {
            access_token: SecretString::new(response.access_token().secret().clone()),
            refresh_token,
            expires_at,
        }
    }
}

/// Configuration for OAuth2 authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Application (client) ID.
    pub client_id: String,
    /// Directory tenant.
    pub tenant: String,
    /// Redirect URL for the authorization-code flow.
    pub redirect_url: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            tenant: "common".to_string(),
            redirect_url: "http://localhost".to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AuthConfig {
    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}/oauth2/v2.0/{}", AUTHORITY_BASE, self.tenant, name)
    }
}

/// What the user must do to finish a device code sign-in.
#[derive(Debug, Clone)]
pub struct DeviceCodePrompt {
    /// Page where the user enters the code.
    pub verification_uri: String,
    /// Code to enter.
    pub user_code: String,
    /// How long the code stays valid.
    pub expires_in: std::time::Duration,
}

/// Callback that shows a device code prompt to the user.
pub type PromptHandler = Arc<dyn Fn(&DeviceCodePrompt) + Send + Sync>;

/// Source of tokens from the identity provider.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Redeem a refresh token without user interaction.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<Tokens>;

    /// Acquire tokens by prompting the user.
    async fn acquire_interactive(&self) -> Result<Tokens>;
}

/// OAuth2 client for the Microsoft identity platform.
///
/// SkyView is a public client: no secret is sent and the client ID travels
/// in the request body.
pub struct AuthManager {
    client: GraphOAuthClient,
    http: reqwest::Client,
    config: AuthConfig,
    prompt: PromptHandler,
}

impl AuthManager {
    /// Create a new authentication manager.
    ///
    /// `prompt` is invoked when interactive sign-in needs the user to visit
    /// the verification page.
    pub fn new(config: AuthConfig, prompt: PromptHandler) -> Result<Self> {
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_auth_type(AuthType::RequestBody)
            .set_auth_uri(
                AuthUrl::new(config.endpoint("authorize"))
                    .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?,
            )
            .set_device_authorization_url(
                DeviceAuthorizationUrl::new(config.endpoint("devicecode"))
                    .map_err(|e| Error::InvalidInput(format!("Invalid device code URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(config.endpoint("token"))
                    .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(config.redirect_url.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?,
            );

        // Redirects are refused to keep token requests on the authority.
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http,
            config,
            prompt,
        })
    }

    fn scopes(&self) -> Vec<Scope> {
        self.config.scopes.iter().cloned().map(Scope::new).collect()
    }

    /// Generate an authorization URL for the authorization-code + PKCE flow.
    ///
    /// Returns the URL, the CSRF state to verify on callback, and the PKCE
    /// verifier to pass to [`AuthManager::exchange_code`].
    pub fn authorization_url(&self) -> (String, String, String) {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.scopes())
            .set_pkce_challenge(challenge)
            .url();

        (
            auth_url.to_string(),
            csrf_token.secret().clone(),
            verifier.secret().clone(),
        )
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    /// - Invalid or expired authorization code
    /// - Network errors
    pub async fn exchange_code(&self, code: &str, pkce_verifier: &str) -> Result<Tokens> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token exchange failed: {}", e)))?;

        Ok(Tokens::from_response(&response, None))
    }

    /// Refresh an access token using the refresh token.
    ///
    /// # Errors
    /// - Invalid or revoked refresh token
    /// - Network errors
    pub async fn refresh_token(&self, refresh_token: &SecretString) -> Result<Tokens> {
        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.expose().to_string()))
            .add_scopes(self.scopes())
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

        Ok(Tokens::from_response(&response, Some(refresh_token)))
    }

    /// Run the device code flow: show the code, then poll until the user
    /// completes sign-in or the code expires.
    pub async fn device_code_sign_in(&self) -> Result<Tokens> {
        let details: StandardDeviceAuthorizationResponse = self
            .client
            .exchange_device_code()
            .add_scopes(self.scopes())
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Device code request failed: {}", e)))?;

        (self.prompt)(&DeviceCodePrompt {
            verification_uri: details.verification_uri().to_string(),
            user_code: details.user_code().secret().clone(),
            expires_in: details.expires_in(),
        });

        let response = self
            .client
            .exchange_device_access_token(&details)
            .request_async(
                &self.http,
                tokio::time::sleep,
                Some(std::time::Duration::from_secs(DEVICE_CODE_TIMEOUT_SECS)),
            )
            .await
            .map_err(|e| Error::Authentication(format!("Device code sign-in failed: {}", e)))?;

        Ok(Tokens::from_response(&response, None))
    }

    /// Get the current configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

#[async_trait]
impl Authenticator for AuthManager {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<Tokens> {
        self.refresh_token(refresh_token).await
    }

    async fn acquire_interactive(&self) -> Result<Tokens> {
        self.device_code_sign_in().await
    }
}

/// Token manager holding the session's single active token.
///
/// Acquisition is silent first (cached token, then refresh token) and falls
/// back to an interactive prompt.
pub struct TokenManager {
    authenticator: Arc<dyn Authenticator>,
    tokens: RwLock<Option<Tokens>>,
    cache: Option<TokenCache>,
}

impl TokenManager {
    /// Create a new token manager with optional initial tokens.
    pub fn new(authenticator: Arc<dyn Authenticator>, tokens: Option<Tokens>) -> Self {
        Self {
            authenticator,
            tokens: RwLock::new(tokens),
            cache: None,
        }
    }

    /// Persist newly acquired tokens to `cache`.
    pub fn with_cache(mut self, cache: TokenCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Get a valid access token, refreshing or prompting if necessary.
    ///
    /// # Errors
    /// - Silent refresh and interactive acquisition both failed
    pub async fn get_access_token(&self) -> Result<SecretString> {
        {
            let tokens = self.tokens.read().await;
            if let Some(current) = tokens.as_ref().filter(|t| !t.is_expired()) {
                return Ok(current.access_token.clone());
            }
        }

        let mut tokens = self.tokens.write().await;

        // Double-check after acquiring write lock
        if let Some(current) = tokens.as_ref().filter(|t| !t.is_expired()) {
            return Ok(current.access_token.clone());
        }

        let refreshed = match tokens.as_ref().and_then(|t| t.refresh_token.as_ref()) {
            Some(refresh_token) => {
                tracing::info!("Refreshing expired access token");
                match self.authenticator.refresh(refresh_token).await {
                    Ok(mut new_tokens) => {
                        // Refresh responses may omit the refresh token.
                        if new_tokens.refresh_token.is_none() {
                            new_tokens.refresh_token = Some(refresh_token.clone());
                        }
                        Some(new_tokens)
                    }
                    Err(e) => {
                        tracing::warn!("Silent token refresh failed: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        let new_tokens = match refreshed {
            Some(new_tokens) => new_tokens,
            None => {
                tracing::info!("Acquiring access token interactively");
                self.authenticator.acquire_interactive().await?
            }
        };

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(&new_tokens).await {
                tracing::warn!("Failed to persist token cache: {}", e);
            }
        }

        let access_token = new_tokens.access_token.clone();
        *tokens = Some(new_tokens);

        Ok(access_token)
    }

    /// Get the current tokens.
    pub async fn get_tokens(&self) -> Option<Tokens> {
        self.tokens.read().await.clone()
    }

    /// Forget the active token and remove the persisted cache.
    pub async fn clear(&self) -> Result<()> {
        *self.tokens.write().await = None;
        if let Some(cache) = &self.cache {
            cache.clear().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tokens(access: &str, refresh: Option<&str>, expires_in: Duration) -> Tokens {
        Tokens {
            access_token: SecretString::new(access),
            refresh_token: refresh.map(SecretString::new),
            expires_at: Utc::now() + expires_in,
        }
    }

    /// Authenticator that counts calls and can be told to fail refreshes.
    struct FakeAuthenticator {
        refresh_calls: AtomicUsize,
        interactive_calls: AtomicUsize,
        refresh_fails: bool,
    }

    impl FakeAuthenticator {
        fn new(refresh_fails: bool) -> Arc<Self> {
            Arc::new(Self {
                refresh_calls: AtomicUsize::new(0),
                interactive_calls: AtomicUsize::new(0),
                refresh_fails,
            })
        }
    }

    #[async_trait]
    impl Authenticator for FakeAuthenticator {
        async fn refresh(&self, _refresh_token: &SecretString) -> Result<Tokens> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.refresh_fails {
                return Err(Error::Authentication("invalid_grant".to_string()));
            }
            Ok(tokens("refreshed", None, Duration::hours(1)))
        }

        async fn acquire_interactive(&self) -> Result<Tokens> {
            self.interactive_calls.fetch_add(1, Ordering::SeqCst);
            Ok(tokens("interactive", Some("new-refresh"), Duration::hours(1)))
        }
    }

    #[test]
    fn test_tokens_expiration() {
        assert!(tokens("a", None, Duration::hours(-1)).is_expired());
        assert!(!tokens("a", None, Duration::hours(1)).is_expired());
    }

    #[test]
    fn test_tokens_near_expiration() {
        // Token expiring in 4 minutes should be considered expired (5 min buffer)
        assert!(tokens("a", None, Duration::minutes(4)).is_expired());
        assert!(!tokens("a", None, Duration::minutes(6)).is_expired());
    }

    #[test]
    fn test_tokens_serialization() {
        let original = tokens("access", Some("refresh"), Duration::hours(1));
        let json = serde_json::to_string(&original).unwrap();
        let deserialized: Tokens = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.access_token, original.access_token);
        assert_eq!(deserialized.refresh_token, original.refresh_token);
    }

    #[tokio::test]
    async fn test_valid_token_needs_no_provider() {
        let auth = FakeAuthenticator::new(false);
        let manager = TokenManager::new(
            auth.clone(),
            Some(tokens("cached", Some("r"), Duration::minutes(30))),
        );

        let token = manager.get_access_token().await.unwrap();

        assert_eq!(token.expose(), "cached");
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(auth.interactive_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_near_expiry_refreshes_silently_first() {
        let auth = FakeAuthenticator::new(false);
        let manager = TokenManager::new(
            auth.clone(),
            Some(tokens("old", Some("r"), Duration::minutes(2))),
        );

        let token = manager.get_access_token().await.unwrap();

        assert_eq!(token.expose(), "refreshed");
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(auth.interactive_calls.load(Ordering::SeqCst), 0);

        // The old refresh token is kept when the response has none.
        let current = manager.get_tokens().await.unwrap();
        assert_eq!(current.refresh_token.unwrap().expose(), "r");
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_interactive() {
        let auth = FakeAuthenticator::new(true);
        let manager = TokenManager::new(
            auth.clone(),
            Some(tokens("old", Some("r"), Duration::minutes(2))),
        );

        let token = manager.get_access_token().await.unwrap();

        assert_eq!(token.expose(), "interactive");
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(auth.interactive_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_token_prompts_interactively() {
        let auth = FakeAuthenticator::new(false);
        let manager = TokenManager::new(auth.clone(), None);

        assert_eq!(manager.get_access_token().await.unwrap().expose(), "interactive");
        // Second call is served from memory.
        assert_eq!(manager.get_access_token().await.unwrap().expose(), "interactive");
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(auth.interactive_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token_prompts() {
        let auth = FakeAuthenticator::new(false);
        let manager = TokenManager::new(auth.clone(), Some(tokens("old", None, Duration::minutes(1))));

        assert_eq!(manager.get_access_token().await.unwrap().expose(), "interactive");
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_acquired_tokens_are_cached_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("tokens.json"));
        let manager = TokenManager::new(FakeAuthenticator::new(false), None).with_cache(cache.clone());

        manager.get_access_token().await.unwrap();
        let stored = cache.load().await.unwrap().unwrap();
        assert_eq!(stored.access_token.expose(), "interactive");

        manager.clear().await.unwrap();
        assert!(manager.get_tokens().await.is_none());
        assert!(cache.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_persists_previous_one() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("tokens.json"));
        let auth = FakeAuthenticator::new(false);
        let manager = TokenManager::new(
            auth.clone(),
            Some(tokens("old", Some("r"), Duration::minutes(2))),
        )
        .with_cache(cache.clone());

        assert_eq!(manager.get_access_token().await.unwrap().expose(), "refreshed");

        // A later run can still renew silently.
        let stored = cache.load().await.unwrap().unwrap();
        assert_eq!(stored.access_token.expose(), "refreshed");
        assert_eq!(stored.refresh_token.unwrap().expose(), "r");
        assert_eq!(auth.interactive_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_authorization_url_generation() {
        let config = AuthConfig {
            client_id: "test_id".to_string(),
            ..AuthConfig::default()
        };

        let manager = AuthManager::new(config, Arc::new(|_: &DeviceCodePrompt| {})).unwrap();
        let (url, csrf_token, verifier) = manager.authorization_url();

        assert!(url.starts_with("https://login.microsoftonline.com/common/oauth2/v2.0/authorize"));
        assert!(url.contains("client_id=test_id"));
        assert!(url.contains("code_challenge="));
        assert!(url.contains("offline_access"));
        assert!(!csrf_token.is_empty());
        assert!(!verifier.is_empty());
    }

    #[test]
    fn test_invalid_redirect_url_rejected() {
        let config = AuthConfig {
            redirect_url: "not a url".to_string(),
            ..AuthConfig::default()
        };
        let result = AuthManager::new(config, Arc::new(|_: &DeviceCodePrompt| {}));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
