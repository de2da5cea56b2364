//! Common types used throughout SkyView.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque identifier of a remote drive item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Create a new ItemId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "Item id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A path inside the drive, relative to the drive root.
///
/// Uses '/' as separator; the empty path and "/" both denote the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DrivePath {
    components: Vec<String>,
}

impl DrivePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - A component is empty or contains a path separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            Self::check_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string into a DrivePath.
    ///
    /// Leading and trailing separators are ignored.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Ok(Self::root());
        }

        let components: Vec<String> = path.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    fn check_component(comp: &str) -> crate::Result<()> {
        if comp.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Path component cannot be empty".to_string(),
            ));
        }
        if comp.contains('/') || comp.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "Path component cannot contain separators".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the last component.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        Self::check_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }
}

impl fmt::Display for DrivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

/// String secret (bearer or refresh token) that zeroizes on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Expose the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED; {} chars])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_item_id_creation() {
        let id = ItemId::new("ABC!101").unwrap();
        assert_eq!(id.as_str(), "ABC!101");
    }

    #[test]
    fn test_item_id_empty_fails() {
        assert!(ItemId::new("").is_err());
        assert!(ItemId::new("   ").is_err());
    }

    #[test]
    fn test_drive_path_root() {
        assert!(DrivePath::root().is_root());
        assert!(DrivePath::parse("").unwrap().is_root());
        assert!(DrivePath::parse("/").unwrap().is_root());
        assert_eq!(DrivePath::root().to_string_path(), "/");
    }

    #[test]
    fn test_drive_path_parse() {
        let path = DrivePath::parse("/Documents/Reports/").unwrap();
        assert_eq!(path.components(), &["Documents", "Reports"]);
        assert_eq!(path.to_string_path(), "/Documents/Reports");
    }

    #[test]
    fn test_drive_path_rejects_empty_component() {
        assert!(DrivePath::parse("/a//b").is_err());
        assert!(DrivePath::root().join("").is_err());
        assert!(DrivePath::root().join("a\\b").is_err());
    }

    #[test]
    fn test_drive_path_parent_and_name() {
        let path = DrivePath::parse("/foo/bar").unwrap();
        assert_eq!(path.name(), Some("bar"));
        assert_eq!(path.parent().unwrap().to_string_path(), "/foo");
        assert!(DrivePath::root().parent().is_none());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = SecretString::new("eyJ0eXAi");
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("eyJ0eXAi"));
        assert_eq!(secret.expose(), "eyJ0eXAi");
    }

    proptest! {
        #[test]
        fn prop_drive_path_roundtrips_through_string(
            parts in proptest::collection::vec("[A-Za-z0-9 ._-]{1,12}", 0..6)
        ) {
            let path = DrivePath::from_components(parts.clone()).unwrap();
            let reparsed = DrivePath::parse(&path.to_string_path()).unwrap();
            prop_assert_eq!(reparsed.components(), &parts[..]);
        }
    }
}
