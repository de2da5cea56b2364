//! OneDrive backend over Microsoft Graph.
//!
//! Authentication uses the Microsoft identity platform (device code, refresh
//! token, and authorization code with PKCE). Tokens are cached on disk and
//! refreshed automatically.

pub mod auth;
pub mod cache;
pub mod client;
pub mod session;
pub mod upload;

pub use auth::{
    AuthConfig, AuthManager, Authenticator, DeviceCodePrompt, PromptHandler, TokenManager, Tokens,
};
pub use cache::TokenCache;
pub use client::GraphClient;
pub use session::AuthSession;
