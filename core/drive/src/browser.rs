//! High-level drive operations.

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};
use uuid::Uuid;

use skyview_common::{Error, ItemId, Result};

use crate::api::{stream_error, ByteStream, DriveApi, ItemRef};
use crate::model::{DeltaPage, DriveItem, LinkScope, LinkType, Permission};

/// Which children a listing keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemFilter {
    #[default]
    All,
    Files,
    Folders,
}

impl ItemFilter {
    /// Check whether `item` passes the filter.
    pub fn matches(&self, item: &DriveItem) -> bool {
        match self {
            Self::All => true,
            Self::Files => item.folder.is_none(),
            Self::Folders => item.folder.is_some(),
        }
    }

    /// Keep the matching items, preserving order.
    pub fn apply(&self, items: Vec<DriveItem>) -> Vec<DriveItem> {
        items.into_iter().filter(|item| self.matches(item)).collect()
    }
}

/// A folder and the first page of its children.
#[derive(Debug, Clone)]
pub struct FolderListing {
    pub parent: DriveItem,
    pub children: Vec<DriveItem>,
}

/// Drive operations as the user sees them: one call per action, each
/// awaited to completion.
#[derive(Clone)]
pub struct DriveBrowser {
    api: Arc<dyn DriveApi>,
}

impl DriveBrowser {
    pub fn new(api: Arc<dyn DriveApi>) -> Self {
        Self { api }
    }

    /// Underlying API.
    pub fn api(&self) -> &Arc<dyn DriveApi> {
        &self.api
    }

    /// List a folder's first page of children.
    ///
    /// # Postconditions
    /// - `children` are in server order, filtered by `filter`
    /// - A file target yields an empty `children`
    ///
    /// # Errors
    /// - Target not found
    pub async fn list_folder(&self, target: &ItemRef, filter: ItemFilter) -> Result<FolderListing> {
        let mut parent = self.api.get_item_with_children(target).await?;
        let children = parent.children.take().unwrap_or_default();

        if parent.children_next_link.is_some() {
            tracing::debug!("{} has more children than the first page", parent.name);
        }

        Ok(FolderListing {
            parent,
            children: filter.apply(children),
        })
    }

    /// Fetch item metadata.
    pub async fn item(&self, target: &ItemRef) -> Result<DriveItem> {
        self.api.get_item(target).await
    }

    /// Upload a local file into `target_folder`, named after the local file.
    ///
    /// # Errors
    /// - Local file missing or not a regular file
    /// - Target folder not found
    pub async fn upload(&self, target_folder: &ItemRef, local_file: &Path) -> Result<DriveItem> {
        let metadata = tokio::fs::metadata(local_file).await?;
        if !metadata.is_file() {
            return Err(Error::InvalidInput(format!(
                "Not a regular file: {}",
                local_file.display()
            )));
        }

        let name = local_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::InvalidInput(format!("Invalid file name: {}", local_file.display()))
            })?
            .to_string();

        let size = metadata.len();
        tracing::info!("Uploading {} ({} bytes) to {}", name, size, target_folder);

        let file = tokio::fs::File::open(local_file).await?;
        let data: ByteStream = Box::pin(ReaderStream::new(file).map_err(Error::from));

        self.api.upload(target_folder, &name, data, size).await
    }

    /// Download a file's content to `dest`.
    ///
    /// Returns once every byte is written and flushed. Content is written
    /// next to `dest` and only replaces it when complete, so a failed
    /// download leaves an existing `dest` untouched.
    pub async fn download(&self, id: &ItemId, dest: &Path) -> Result<u64> {
        let stream = self.api.download_stream(id).await?;
        let mut reader = StreamReader::new(stream.map_err(std::io::Error::other));

        let partial = partial_path(dest)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)
            .await?;

        let copied = async {
            let written = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            Ok::<u64, std::io::Error>(written)
        }
        .await;
        drop(file);

        let result = match copied {
            Ok(written) => tokio::fs::rename(&partial, dest)
                .await
                .map(|()| written)
                .map_err(Error::from),
            Err(e) => Err(stream_error(e)),
        };

        match result {
            Ok(written) => {
                tracing::info!("Downloaded {} bytes to {}", written, dest.display());
                Ok(written)
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&partial).await {
                    tracing::warn!(
                        "Failed to remove partial download {}: {}",
                        partial.display(),
                        remove_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Delete an item (folders recursively).
    pub async fn delete_item(&self, id: &ItemId) -> Result<()> {
        self.api.delete(id).await?;
        tracing::info!("Deleted {}", id);
        Ok(())
    }

    /// Create a sharing link.
    pub async fn create_share_link(
        &self,
        id: &ItemId,
        link_type: LinkType,
        scope: LinkScope,
    ) -> Result<Permission> {
        self.api.create_link(id, link_type, scope).await
    }

    /// List the first page of permissions on an item.
    pub async fn list_permissions(&self, id: &ItemId) -> Result<Vec<Permission>> {
        self.api.list_permissions(id).await
    }

    /// Create a folder; a name collision yields a renamed folder.
    pub async fn create_folder(&self, parent: &ItemRef, name: &str) -> Result<DriveItem> {
        if name.trim().is_empty() || name.contains('/') || name.contains('\\') {
            return Err(Error::InvalidInput(format!("Invalid folder name: {:?}", name)));
        }
        self.api.create_folder(parent, name).await
    }

    /// Fetch one page of changes below `folder`.
    pub async fn changes(&self, folder: &ItemRef, continuation: Option<&str>) -> Result<DeltaPage> {
        self.api.delta(folder, continuation).await
    }
}

/// Hidden sibling of `dest` that receives a download in progress.
fn partial_path(dest: &Path) -> Result<PathBuf> {
    let name = dest
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", dest.display())))?;
    Ok(dest.with_file_name(format!(
        ".{}.{}.part",
        name.to_string_lossy(),
        Uuid::new_v4().simple()
    )))
}
