//! Remote drive API trait definition.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;

use skyview_common::{DrivePath, Error, ItemId, Result};

use crate::model::{DeltaPage, DriveItem, LinkScope, LinkType, Permission};

/// Byte stream type for uploads and downloads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Stream an in-memory buffer as a single chunk.
pub fn bytes_stream(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Read a whole stream that should hold exactly `size` bytes.
///
/// # Errors
/// - The stream failed
/// - The stream held more or fewer bytes than `size`
pub async fn collect_stream(mut stream: ByteStream, size: u64) -> Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }

    if buffer.len() as u64 != size {
        return Err(Error::InvalidInput(format!(
            "Expected {} bytes, got {}",
            size,
            buffer.len()
        )));
    }
    Ok(buffer.freeze())
}

/// Recover the drive error carried through an I/O reader over a
/// [`ByteStream`].
pub(crate) fn stream_error(err: std::io::Error) -> Error {
    if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
        return Error::Io(err);
    }
    match err.into_inner().map(|inner| inner.downcast::<Error>()) {
        Some(Ok(inner)) => *inner,
        Some(Err(other)) => Error::Io(std::io::Error::other(other)),
        None => Error::Network("Byte stream failed".to_string()),
    }
}

/// How an operation addresses a drive item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemRef {
    /// The drive root.
    Root,
    /// An item by its opaque ID.
    Id(ItemId),
    /// An item by its path below the root.
    Path(DrivePath),
}

impl ItemRef {
    /// Address an item by ID.
    pub fn id(id: impl Into<String>) -> Result<Self> {
        Ok(Self::Id(ItemId::new(id)?))
    }

    /// Address an item by path; the root path maps to [`ItemRef::Root`].
    pub fn path(path: &str) -> Result<Self> {
        let path = DrivePath::parse(path)?;
        if path.is_root() {
            Ok(Self::Root)
        } else {
            Ok(Self::Path(path))
        }
    }

    /// Parse the textual form produced by `Display`: `id:<ID>` addresses an
    /// item by ID, anything else is a path.
    pub fn parse(s: &str) -> Result<Self> {
        match s.strip_prefix("id:") {
            Some(id) => Self::id(id),
            None => Self::path(s),
        }
    }
}

impl From<ItemId> for ItemRef {
    fn from(id: ItemId) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "/"),
            Self::Id(id) => write!(f, "id:{}", id),
            Self::Path(path) => write!(f, "{}", path),
        }
    }
}

/// Remote drive-item API.
///
/// Each method is one logical request against the remote service (an upload
/// of a large file may span several HTTP requests of one upload session).
/// Implementations handle their own authentication.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Get the backend name (e.g., "graph", "memory").
    fn name(&self) -> &str;

    /// Fetch item metadata without expansion.
    ///
    /// # Errors
    /// - Item not found
    async fn get_item(&self, target: &ItemRef) -> Result<DriveItem>;

    /// Fetch an item expanded with its thumbnails and the first page of its
    /// children.
    ///
    /// # Postconditions
    /// - For folders, `children` holds the first page in server order
    async fn get_item_with_children(&self, target: &ItemRef) -> Result<DriveItem>;

    /// Upload the `size` bytes of `data` as a file named `name` inside the
    /// `parent` folder, replacing an existing file of that name.
    ///
    /// Large files are sent in chunks as the stream yields them.
    ///
    /// # Errors
    /// - Parent not found or not a folder
    /// - `data` failed or did not hold `size` bytes
    async fn upload(
        &self,
        parent: &ItemRef,
        name: &str,
        data: ByteStream,
        size: u64,
    ) -> Result<DriveItem>;

    /// Upload an in-memory buffer.
    async fn upload_bytes(&self, parent: &ItemRef, name: &str, data: Bytes) -> Result<DriveItem> {
        let size = data.len() as u64;
        self.upload(parent, name, bytes_stream(data), size).await
    }

    /// Stream the content of a file.
    async fn download_stream(&self, id: &ItemId) -> Result<ByteStream>;

    /// Delete an item (folders recursively).
    async fn delete(&self, id: &ItemId) -> Result<()>;

    /// Create a folder below `parent`. Name collisions are resolved by
    /// renaming the new folder.
    async fn create_folder(&self, parent: &ItemRef, name: &str) -> Result<DriveItem>;

    /// Create (or return the existing) sharing link of the given kind.
    async fn create_link(
        &self,
        id: &ItemId,
        link_type: LinkType,
        scope: LinkScope,
    ) -> Result<Permission>;

    /// List the first page of permissions on an item.
    async fn list_permissions(&self, id: &ItemId) -> Result<Vec<Permission>>;

    /// Fetch one page of changes below `folder`.
    ///
    /// `continuation` is a next or delta link from a previous page; `None`
    /// starts from the beginning.
    async fn delta(&self, folder: &ItemRef, continuation: Option<&str>) -> Result<DeltaPage>;
}
