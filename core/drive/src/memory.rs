//! In-memory drive for testing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use skyview_common::{Error, ItemId, Result};

use crate::api::{collect_stream, ByteStream, DriveApi, ItemRef};
use crate::model::{
    DeletedFacet, DeltaPage, DriveItem, FileFacet, FolderFacet, ItemReference, LinkScope,
    LinkType, Permission, SharingLink,
};

const ROOT_ID: &str = "root";
const DELTA_PREFIX: &str = "memory-delta:";
const DOWNLOAD_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct Node {
    item: DriveItem,
    parent: Option<String>,
    children: Vec<String>,
    data: Option<Bytes>,
    permissions: Vec<Permission>,
}

#[derive(Debug, Clone)]
struct Change {
    seq: u64,
    item: DriveItem,
    /// Ancestor IDs at the time of the change, nearest first.
    ancestors: Vec<String>,
}

#[derive(Debug)]
struct State {
    nodes: HashMap<String, Node>,
    changes: Vec<Change>,
    seq: u64,
}

impl State {
    fn node(&self, id: &str) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("Item not found: {}", id)))
    }

    fn folder(&self, id: &str) -> Result<&Node> {
        let node = self.node(id)?;
        if !node.item.is_folder() {
            return Err(Error::InvalidInput(format!("Not a folder: {}", node.item.name)));
        }
        Ok(node)
    }

    fn find_child(&self, parent_id: &str, name: &str) -> Option<String> {
        self.nodes.get(parent_id).and_then(|parent| {
            parent
                .children
                .iter()
                .find(|child| {
                    self.nodes
                        .get(*child)
                        .is_some_and(|n| n.item.name.eq_ignore_ascii_case(name))
                })
                .cloned()
        })
    }

    fn resolve(&self, target: &ItemRef) -> Result<String> {
        match target {
            ItemRef::Root => Ok(ROOT_ID.to_string()),
            ItemRef::Id(id) => {
                self.node(id.as_str())?;
                Ok(id.as_str().to_string())
            }
            ItemRef::Path(path) => {
                let mut current = ROOT_ID.to_string();
                for component in path.components() {
                    current = self.find_child(&current, component).ok_or_else(|| {
                        Error::NotFound(format!("Path component not found: {}", component))
                    })?;
                }
                Ok(current)
            }
        }
    }

    fn ancestors(&self, id: &str) -> Vec<String> {
        let mut ancestors = Vec::new();
        let mut current = self.nodes.get(id).and_then(|n| n.parent.clone());
        while let Some(parent_id) = current {
            current = self.nodes.get(&parent_id).and_then(|n| n.parent.clone());
            ancestors.push(parent_id);
        }
        ancestors
    }

    /// Graph-style parent path, e.g. `/drive/root:/Documents`.
    fn parent_path(&self, id: &str) -> String {
        let mut names: Vec<&str> = self
            .ancestors(id)
            .iter()
            .filter(|a| a.as_str() != ROOT_ID)
            .filter_map(|a| self.nodes.get(a).map(|n| n.item.name.as_str()))
            .collect();
        names.reverse();

        let mut path = "/drive/root:".to_string();
        for name in names {
            path.push('/');
            path.push_str(name);
        }
        path
    }

    fn snapshot(&self, id: &str) -> Result<DriveItem> {
        let node = self.node(id)?;
        let mut item = node.item.clone();

        if let Some(parent_id) = &node.parent {
            item.parent_reference = Some(ItemReference {
                drive_id: Some("memory".to_string()),
                id: Some(parent_id.clone()),
                path: Some(self.parent_path(id)),
            });
        }
        if let Some(folder) = item.folder.as_mut() {
            folder.child_count = Some(node.children.len() as i64);
        }

        Ok(item)
    }

    fn record(&mut self, item: DriveItem, ancestors: Vec<String>) {
        self.seq += 1;
        self.changes.push(Change {
            seq: self.seq,
            item,
            ancestors,
        });
    }

    fn record_current(&mut self, id: &str) -> Result<()> {
        let item = self.snapshot(id)?;
        let ancestors = self.ancestors(id);
        self.record(item, ancestors);
        Ok(())
    }

    fn insert_child(&mut self, parent_id: &str, item: DriveItem, data: Option<Bytes>) -> Result<String> {
        let id = item.id.clone();
        self.nodes.insert(
            id.clone(),
            Node {
                item,
                parent: Some(parent_id.to_string()),
                children: Vec::new(),
                data,
                permissions: Vec::new(),
            },
        );
        self.nodes
            .get_mut(parent_id)
            .ok_or_else(|| Error::NotFound(format!("Item not found: {}", parent_id)))?
            .children
            .push(id.clone());
        self.record_current(&id)?;
        Ok(id)
    }

    fn unique_name(&self, parent_id: &str, name: &str) -> String {
        if self.find_child(parent_id, name).is_none() {
            return name.to_string();
        }
        (1..)
            .map(|n| format!("{} {}", name, n))
            .find(|candidate| self.find_child(parent_id, candidate).is_none())
            .unwrap_or_else(|| name.to_string())
    }

    fn collect_subtree(&self, id: &str, out: &mut Vec<String>) {
        if let Some(node) = self.nodes.get(id) {
            for child in &node.children {
                self.collect_subtree(child, out);
            }
        }
        out.push(id.to_string());
    }
}

fn new_item_id() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}

fn new_etag() -> Option<String> {
    Some(Uuid::new_v4().to_string())
}

/// In-memory drive.
///
/// Behaves like a single OneDrive account: a folder tree rooted at `root`,
/// file contents, sharing links and a change log for delta queries. All data
/// is lost on drop.
pub struct MemoryDrive {
    state: RwLock<State>,
}

impl MemoryDrive {
    /// Create a new drive holding only an empty root folder.
    pub fn new() -> Self {
        let root = DriveItem {
            id: ROOT_ID.to_string(),
            name: "root".to_string(),
            e_tag: new_etag(),
            last_modified_date_time: Some(Utc::now()),
            folder: Some(FolderFacet { child_count: Some(0) }),
            root: Some(serde_json::json!({})),
            ..Default::default()
        };

        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_ID.to_string(),
            Node {
                item: root,
                parent: None,
                children: Vec::new(),
                data: None,
                permissions: Vec::new(),
            },
        );

        Self {
            state: RwLock::new(State {
                nodes,
                changes: Vec::new(),
                seq: 0,
            }),
        }
    }
}

impl Default for MemoryDrive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriveApi for MemoryDrive {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_item(&self, target: &ItemRef) -> Result<DriveItem> {
        let state = self.state.read().await;
        let id = state.resolve(target)?;
        state.snapshot(&id)
    }

    async fn get_item_with_children(&self, target: &ItemRef) -> Result<DriveItem> {
        let state = self.state.read().await;
        let id = state.resolve(target)?;
        let mut item = state.snapshot(&id)?;

        if item.is_folder() {
            let node = state.node(&id)?;
            let children = node
                .children
                .iter()
                .map(|child| state.snapshot(child))
                .collect::<Result<Vec<_>>>()?;
            item.children = Some(children);
            item.thumbnails = Some(Vec::new());
        }

        Ok(item)
    }

    async fn upload(
        &self,
        parent: &ItemRef,
        name: &str,
        data: ByteStream,
        size: u64,
    ) -> Result<DriveItem> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidInput(format!("Invalid file name: {:?}", name)));
        }
        let data = collect_stream(data, size).await?;

        let mut state = self.state.write().await;
        let parent_id = state.resolve(parent)?;
        state.folder(&parent_id)?;

        if let Some(existing) = state.find_child(&parent_id, name) {
            let node = state
                .nodes
                .get_mut(&existing)
                .ok_or_else(|| Error::NotFound(format!("Item not found: {}", existing)))?;
            if node.item.is_folder() {
                return Err(Error::Conflict(format!("A folder named {} already exists", name)));
            }
            node.item.size = Some(data.len() as i64);
            node.item.e_tag = new_etag();
            node.item.last_modified_date_time = Some(Utc::now());
            node.data = Some(data);
            state.record_current(&existing)?;
            return state.snapshot(&existing);
        }

        let item = DriveItem {
            id: new_item_id(),
            name: name.to_string(),
            size: Some(data.len() as i64),
            e_tag: new_etag(),
            last_modified_date_time: Some(Utc::now()),
            file: Some(FileFacet {
                mime_type: Some("application/octet-stream".to_string()),
            }),
            ..Default::default()
        };

        let id = state.insert_child(&parent_id, item, Some(data))?;
        state.snapshot(&id)
    }

    async fn download_stream(&self, id: &ItemId) -> Result<ByteStream> {
        let state = self.state.read().await;
        let node = state.node(id.as_str())?;

        let data = match &node.data {
            Some(data) => data.clone(),
            None => {
                return Err(Error::InvalidInput(format!(
                    "Cannot download folder: {}",
                    node.item.name
                )))
            }
        };

        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(DOWNLOAD_CHUNK)
            .map(|start| Ok(data.slice(start..(start + DOWNLOAD_CHUNK).min(data.len()))))
            .collect();

        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn delete(&self, id: &ItemId) -> Result<()> {
        let mut state = self.state.write().await;
        let node = state.node(id.as_str())?;

        let parent_id = node
            .parent
            .clone()
            .ok_or_else(|| Error::PermissionDenied("Cannot delete the drive root".to_string()))?;

        let mut removed = Vec::new();
        state.collect_subtree(id.as_str(), &mut removed);

        let mut tombstones = Vec::with_capacity(removed.len());
        for removed_id in &removed {
            let mut item = state.snapshot(removed_id)?;
            item.deleted = Some(DeletedFacet {
                state: Some("deleted".to_string()),
            });
            tombstones.push((item, state.ancestors(removed_id)));
        }

        for removed_id in &removed {
            state.nodes.remove(removed_id);
        }
        if let Some(parent) = state.nodes.get_mut(&parent_id) {
            parent.children.retain(|child| child != id.as_str());
        }
        for (item, ancestors) in tombstones {
            state.record(item, ancestors);
        }

        Ok(())
    }

    async fn create_folder(&self, parent: &ItemRef, name: &str) -> Result<DriveItem> {
        if name.trim().is_empty() || name.contains('/') {
            return Err(Error::InvalidInput(format!("Invalid folder name: {:?}", name)));
        }

        let mut state = self.state.write().await;
        let parent_id = state.resolve(parent)?;
        state.folder(&parent_id)?;

        let item = DriveItem {
            id: new_item_id(),
            name: state.unique_name(&parent_id, name),
            e_tag: new_etag(),
            last_modified_date_time: Some(Utc::now()),
            folder: Some(FolderFacet { child_count: Some(0) }),
            ..Default::default()
        };

        let id = state.insert_child(&parent_id, item, None)?;
        state.snapshot(&id)
    }

    async fn create_link(
        &self,
        id: &ItemId,
        link_type: LinkType,
        scope: LinkScope,
    ) -> Result<Permission> {
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(id.as_str())
            .ok_or_else(|| Error::NotFound(format!("Item not found: {}", id)))?;

        let existing = node.permissions.iter().find(|p| {
            p.link.as_ref().is_some_and(|l| {
                l.link_type.as_deref() == Some(link_type.as_str())
                    && l.scope.as_deref() == Some(scope.as_str())
            })
        });
        if let Some(permission) = existing {
            return Ok(permission.clone());
        }

        let role = match link_type {
            LinkType::Edit => "write",
            LinkType::View | LinkType::Embed => "read",
        };
        let permission = Permission {
            id: Uuid::new_v4().to_string(),
            roles: vec![role.to_string()],
            link: Some(SharingLink {
                link_type: Some(link_type.as_str().to_string()),
                scope: Some(scope.as_str().to_string()),
                web_url: Some(format!("https://1drv.ms/u/s!{}", Uuid::new_v4().simple())),
            }),
        };
        node.permissions.push(permission.clone());

        Ok(permission)
    }

    async fn list_permissions(&self, id: &ItemId) -> Result<Vec<Permission>> {
        let state = self.state.read().await;
        Ok(state.node(id.as_str())?.permissions.clone())
    }

    async fn delta(&self, folder: &ItemRef, continuation: Option<&str>) -> Result<DeltaPage> {
        let state = self.state.read().await;
        let folder_id = state.resolve(folder)?;
        state.folder(&folder_id)?;

        let since = match continuation {
            None => 0,
            Some(link) => link
                .strip_prefix(DELTA_PREFIX)
                .and_then(|seq| seq.parse::<u64>().ok())
                .ok_or_else(|| Error::InvalidInput(format!("Invalid delta link: {}", link)))?,
        };

        // Latest change per item, in order of first appearance.
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, DriveItem> = HashMap::new();
        for change in state.changes.iter().filter(|c| c.seq > since) {
            if !change.ancestors.contains(&folder_id) {
                continue;
            }
            if !latest.contains_key(&change.item.id) {
                order.push(change.item.id.clone());
            }
            latest.insert(change.item.id.clone(), change.item.clone());
        }

        let items = order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect();

        Ok(DeltaPage {
            items,
            next_link: None,
            delta_link: Some(format!("{}{}", DELTA_PREFIX, state.seq)),
        })
    }
}
