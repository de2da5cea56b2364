//! Microsoft Graph drive resources.
//!
//! Field names follow the Graph JSON (camelCase). Only the properties the
//! browser reads are modelled; unknown properties are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use skyview_common::{DrivePath, Error, ItemId, Result};

/// Whether an item is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    File,
    Folder,
}

/// A file or folder in a drive.
///
/// See <https://learn.microsoft.com/en-us/graph/api/resources/driveitem>.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_reference: Option<ItemReference>,
    /// Present only on folders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<FolderFacet>,
    /// Present only on files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileFacet>,
    /// Present on the drive root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<serde_json::Value>,
    /// Tombstone marker in delta responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DeletedFacet>,
    /// First page of children, when requested with `$expand=children`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<DriveItem>>,
    #[serde(
        rename = "children@odata.nextLink",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub children_next_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnails: Option<Vec<ThumbnailSet>>,
}

impl DriveItem {
    pub fn kind(&self) -> ItemKind {
        if self.folder.is_some() {
            ItemKind::Folder
        } else {
            ItemKind::File
        }
    }

    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind() == ItemKind::Folder
    }

    pub fn item_id(&self) -> Result<ItemId> {
        ItemId::new(self.id.clone())
    }

    /// Number of children reported by the folder facet.
    pub fn child_count(&self) -> Option<i64> {
        self.folder.as_ref().and_then(|f| f.child_count)
    }

    /// Path of this item inside the drive.
    ///
    /// The parent reference path looks like `/drive/root:/Documents`; the part
    /// after the first ':' is the parent's drive path. Items without a parent
    /// path (the root) map to the root path.
    pub fn drive_path(&self) -> Result<DrivePath> {
        let parent_path = match self
            .parent_reference
            .as_ref()
            .and_then(|p| p.path.as_deref())
        {
            Some(path) => path,
            None => return Ok(DrivePath::root()),
        };

        let relative = parent_path
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(parent_path);

        DrivePath::parse(relative)?.join(&self.name)
    }
}

/// Reference to an item's parent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    #[serde(default)]
    pub child_count: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletedFacet {
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThumbnailSet {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub small: Option<Thumbnail>,
    #[serde(default)]
    pub medium: Option<Thumbnail>,
    #[serde(default)]
    pub large: Option<Thumbnail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thumbnail {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// A sharing grant on an item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<SharingLink>,
}

impl Permission {
    /// URL of the sharing link, if this permission is link-based.
    pub fn web_url(&self) -> Option<&str> {
        self.link.as_ref().and_then(|l| l.web_url.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingLink {
    #[serde(rename = "type", default)]
    pub link_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// Kind of sharing link to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    #[default]
    View,
    Edit,
    Embed,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
            Self::Embed => "embed",
        }
    }
}

impl FromStr for LinkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "view" => Ok(Self::View),
            "edit" => Ok(Self::Edit),
            "embed" => Ok(Self::Embed),
            other => Err(Error::InvalidInput(format!("Unknown link type: {}", other))),
        }
    }
}

/// Audience of a sharing link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkScope {
    #[default]
    Anonymous,
    Organization,
}

impl LinkScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Organization => "organization",
        }
    }
}

impl FromStr for LinkScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anonymous" => Ok(Self::Anonymous),
            "organization" => Ok(Self::Organization),
            other => Err(Error::InvalidInput(format!("Unknown link scope: {}", other))),
        }
    }
}

/// Body of a `createLink` request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateLinkRequest {
    #[serde(rename = "type")]
    pub link_type: LinkType,
    pub scope: LinkScope,
}

/// Body of a folder creation request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateFolderRequest {
    pub name: String,
    pub folder: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: String,
}

impl CreateFolderRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            folder: serde_json::Map::new(),
            conflict_behavior: "rename".to_string(),
        }
    }
}

/// Generic OData collection page.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionPage<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink", default)]
    pub delta_link: Option<String>,
}

/// One page of a delta (change tracking) query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaPage {
    pub items: Vec<DriveItem>,
    /// Link to fetch the next page of this round of changes.
    pub next_link: Option<String>,
    /// Link to fetch changes made after this round, once all pages are read.
    pub delta_link: Option<String>,
}

impl From<CollectionPage<DriveItem>> for DeltaPage {
    fn from(page: CollectionPage<DriveItem>) -> Self {
        Self {
            items: page.value,
            next_link: page.next_link,
            delta_link: page.delta_link,
        }
    }
}

/// Upload session returned by `createUploadSession`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub upload_url: String,
    #[serde(default)]
    pub expiration_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_expected_ranges: Vec<String>,
}

/// Graph error envelope: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphErrorResponse {
    pub error: GraphError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
