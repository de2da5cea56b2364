//! Folder navigation state for interactive front ends.

use std::collections::HashMap;
use std::fmt;

use skyview_common::{Error, ItemId, Result};

use crate::api::ItemRef;
use crate::model::DriveItem;

/// One folder on the navigation trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crumb {
    pub id: ItemId,
    pub name: String,
}

/// Trail of folders from the drive root to the current folder.
///
/// The root is implicit: an empty trail means the current folder is the root.
#[derive(Debug, Clone, Default)]
pub struct Breadcrumbs {
    crumbs: Vec<Crumb>,
}

impl Breadcrumbs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `item`.
    ///
    /// Revisiting a folder already on the trail truncates the trail to it.
    /// Entering the drive root clears the trail.
    pub fn navigate_to(&mut self, item: &DriveItem) -> Result<()> {
        if item.root.is_some() {
            self.crumbs.clear();
            return Ok(());
        }

        let id = item.item_id()?;
        match self.crumbs.iter().position(|c| c.id == id) {
            Some(pos) => self.crumbs.truncate(pos + 1),
            None => self.crumbs.push(Crumb {
                id,
                name: item.name.clone(),
            }),
        }
        Ok(())
    }

    /// Jump to the crumb at `index`, where 0 is the root, and drop deeper
    /// crumbs.
    ///
    /// # Errors
    /// - `index` is past the end of the trail
    pub fn jump_to(&mut self, index: usize) -> Result<ItemRef> {
        if index > self.crumbs.len() {
            return Err(Error::InvalidInput(format!(
                "No breadcrumb at position {}",
                index
            )));
        }
        self.crumbs.truncate(index);
        Ok(self.current())
    }

    /// Go to the parent folder. Returns false at the root.
    pub fn up(&mut self) -> bool {
        self.crumbs.pop().is_some()
    }

    /// Folder the trail ends at.
    pub fn current(&self) -> ItemRef {
        match self.crumbs.last() {
            Some(crumb) => ItemRef::Id(crumb.id.clone()),
            None => ItemRef::Root,
        }
    }

    pub fn crumbs(&self) -> &[Crumb] {
        &self.crumbs
    }

    pub fn is_root(&self) -> bool {
        self.crumbs.is_empty()
    }
}

impl fmt::Display for Breadcrumbs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/")?;
        for crumb in &self.crumbs {
            write!(f, " > {}", crumb.name)?;
        }
        Ok(())
    }
}

/// Difference between two listings of the same folder.
#[derive(Debug, Clone, Default)]
pub struct ChildrenDiff {
    /// In the new listing only, in new order.
    pub added: Vec<DriveItem>,
    /// In the old listing only, in old order.
    pub removed: Vec<DriveItem>,
    /// In both, with a different eTag or name; new version, in new order.
    pub changed: Vec<DriveItem>,
}

impl ChildrenDiff {
    /// Compare listings by item ID.
    pub fn between(old: &[DriveItem], new: &[DriveItem]) -> Self {
        let old_by_id: HashMap<&str, &DriveItem> =
            old.iter().map(|item| (item.id.as_str(), item)).collect();
        let new_by_id: HashMap<&str, &DriveItem> =
            new.iter().map(|item| (item.id.as_str(), item)).collect();

        let mut diff = Self::default();

        for item in new {
            match old_by_id.get(item.id.as_str()) {
                None => diff.added.push(item.clone()),
                Some(previous) if previous.e_tag != item.e_tag || previous.name != item.name => {
                    diff.changed.push(item.clone())
                }
                Some(_) => {}
            }
        }

        diff.removed = old
            .iter()
            .filter(|item| !new_by_id.contains_key(item.id.as_str()))
            .cloned()
            .collect();

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}
