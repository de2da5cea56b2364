//! OneDrive access for SkyView.
//!
//! This crate wraps the Microsoft Graph drive API behind the [`DriveApi`]
//! trait and exposes the user-facing operations through [`DriveBrowser`].
//!
//! # Layout
//! - [`onedrive`]: sign-in, token cache and the Graph HTTP client
//! - [`memory`]: in-process drive with the same semantics, used in tests
//! - [`browser`]: list, upload, download, delete, share and change queries
//! - [`navigation`]: breadcrumb trail and listing diffs for front ends

pub mod api;
pub mod browser;
pub mod config;
pub mod memory;
pub mod model;
pub mod navigation;
pub mod onedrive;

pub use api::{ByteStream, DriveApi, ItemRef};
pub use browser::{DriveBrowser, FolderListing, ItemFilter};
pub use config::{AppConfig, ClientType};
pub use memory::MemoryDrive;
pub use model::{DeltaPage, DriveItem, ItemKind, LinkScope, LinkType, Permission};
pub use navigation::{Breadcrumbs, ChildrenDiff, Crumb};
pub use onedrive::{AuthManager, AuthSession, Authenticator, DeviceCodePrompt, GraphClient};
