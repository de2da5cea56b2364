//! Terminal output and prompts.

use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use skyview_drive::{ChildrenDiff, DeltaPage, DriveItem, Permission};

/// Human-readable byte count.
pub fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} bytes", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// One line describing an item.
pub fn item_line(item: &DriveItem) -> String {
    if item.is_folder() {
        match item.child_count() {
            Some(count) => format!("[DIR]  {}/ ({} items)", item.name, count),
            None => format!("[DIR]  {}/", item.name),
        }
    } else {
        let size = item.size.map(format_size).unwrap_or_default();
        format!("[FILE] {} ({})", item.name, size)
    }
}

pub fn print_listing(children: &[DriveItem], numbered: bool) {
    if children.is_empty() {
        println!("Folder is empty.");
        return;
    }
    for (index, item) in children.iter().enumerate() {
        if numbered {
            println!("  {:>3}  {}", index + 1, item_line(item));
        } else {
            println!("  {}", item_line(item));
        }
    }
}

pub fn print_item(item: &DriveItem) {
    println!("{}", item.name);
    println!("  ID: {}", item.id);
    if let Ok(path) = item.drive_path() {
        println!("  Path: {}", path);
    }
    println!("  Kind: {}", if item.is_folder() { "folder" } else { "file" });
    if let Some(size) = item.size {
        println!("  Size: {}", format_size(size));
    }
    if let Some(modified) = item.last_modified_date_time {
        println!("  Modified: {}", modified.to_rfc3339());
    }
    if let Some(mime) = item.file.as_ref().and_then(|f| f.mime_type.as_deref()) {
        println!("  Type: {}", mime);
    }
    if let Some(url) = &item.web_url {
        println!("  URL: {}", url);
    }
}

pub fn print_permissions(permissions: &[Permission]) {
    if permissions.is_empty() {
        println!("No permissions.");
        return;
    }
    for permission in permissions {
        println!(
            "  [{}] {}",
            permission.roles.join(", "),
            permission.web_url().unwrap_or("(no link)")
        );
    }
}

pub fn print_changes(page: &DeltaPage) {
    if page.items.is_empty() {
        println!("No changes.");
    }
    for item in &page.items {
        let marker = if item.deleted.is_some() {
            "deleted"
        } else if item.is_folder() {
            "folder"
        } else {
            "file"
        };
        let location = item
            .drive_path()
            .map(|p| p.to_string())
            .unwrap_or_else(|_| item.name.clone());
        println!("  {:<8} {}", marker, location);
    }
    if let Some(next) = &page.next_link {
        println!("More changes: {}", next);
    }
    if let Some(delta) = &page.delta_link {
        println!("Delta link: {}", delta);
    }
}

pub fn print_diff(diff: &ChildrenDiff) {
    for item in &diff.added {
        println!("  + {}", item.name);
    }
    for item in &diff.removed {
        println!("  - {}", item.name);
    }
    for item in &diff.changed {
        println!("  ~ {}", item.name);
    }
}

/// Ask a yes/no question; anything but an explicit yes is a no.
pub async fn confirm<R>(input: &mut R, question: &str) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer).await?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
