//! Common utilities and types shared across SkyView crates.
//!
//! This module provides the error taxonomy and the small identifier and path
//! types used by both the drive library and the command line front end.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{DrivePath, ItemId, SecretString};
