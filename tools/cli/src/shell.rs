//! Interactive drive browser.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};

use skyview_drive::{
    AuthSession, Breadcrumbs, ChildrenDiff, DriveBrowser, DriveItem, ItemFilter, ItemRef,
    LinkScope, LinkType,
};

use crate::term;

const HELP: &str = "\
Commands:
  ls [all|files|folders]   list the current folder
  cd <name|#n|..|/>        enter a folder
  up                       go to the parent folder
  jump <n>                 go to breadcrumb n (0 is the root)
  refresh                  reload and show what changed
  info <name|#n>           show item details
  get <name|#n>            download into the current directory
  put <local file>         upload into the current folder
  mkdir <name>             create a folder
  rm <name|#n>             delete an item
  share [edit] <name|#n>   create a sharing link
  perms <name|#n>          list permissions
  changes                  show changes since the last call
  pwd                      show the breadcrumb trail
  logout                   sign out and quit
  exit                     quit";

#[derive(Debug, PartialEq)]
enum ShellCommand {
    Empty,
    List(Option<ItemFilter>),
    Cd(String),
    Up,
    Jump(usize),
    Refresh,
    Info(String),
    Get(String),
    Put(PathBuf),
    Mkdir(String),
    Rm(String),
    Share { name: String, link_type: LinkType },
    Perms(String),
    Changes,
    Pwd,
    Help,
    Logout,
    Exit,
}

impl ShellCommand {
    fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let required = |what: &str| -> Result<String> {
            if rest.is_empty() {
                bail!("{} requires {}", word, what);
            }
            Ok(rest.to_string())
        };

        let command = match word {
            "" => Self::Empty,
            "ls" | "dir" => Self::List(match rest {
                "" => None,
                "all" => Some(ItemFilter::All),
                "files" => Some(ItemFilter::Files),
                "folders" => Some(ItemFilter::Folders),
                other => bail!("Unknown filter: {}", other),
            }),
            "cd" => Self::Cd(required("a folder")?),
            "up" => Self::Up,
            "jump" => Self::Jump(
                required("a breadcrumb number")?
                    .parse()
                    .context("Breadcrumb must be a number")?,
            ),
            "refresh" => Self::Refresh,
            "info" => Self::Info(required("an item")?),
            "get" => Self::Get(required("an item")?),
            "put" => Self::Put(PathBuf::from(required("a local file")?)),
            "mkdir" => Self::Mkdir(required("a name")?),
            "rm" | "del" => Self::Rm(required("an item")?),
            "share" => match rest.strip_prefix("edit ") {
                Some(name) => Self::Share {
                    name: name.trim().to_string(),
                    link_type: LinkType::Edit,
                },
                None => Self::Share {
                    name: required("an item")?,
                    link_type: LinkType::View,
                },
            },
            "perms" | "permissions" => Self::Perms(required("an item")?),
            "changes" => Self::Changes,
            "pwd" => Self::Pwd,
            "help" | "?" => Self::Help,
            "logout" => Self::Logout,
            "exit" | "quit" => Self::Exit,
            other => bail!("Unknown command: {} (try help)", other),
        };

        Ok(command)
    }
}

/// Pick an item from a listing by `#n` (1-based), exact name, or name
/// ignoring case.
fn find_item<'a>(listing: &'a [DriveItem], key: &str) -> Option<&'a DriveItem> {
    if let Some(index) = key.strip_prefix('#').and_then(|n| n.parse::<usize>().ok()) {
        return index.checked_sub(1).and_then(|i| listing.get(i));
    }
    listing
        .iter()
        .find(|item| item.name == key)
        .or_else(|| listing.iter().find(|item| item.name.eq_ignore_ascii_case(key)))
}

/// Current folder, its listing, and the trail leading to it.
///
/// A move only takes effect once the new folder has been listed, so the
/// trail always matches the listing on screen.
struct Navigator {
    browser: DriveBrowser,
    trail: Breadcrumbs,
    listing: Vec<DriveItem>,
    filter: ItemFilter,
    delta_link: Option<String>,
}

impl Navigator {
    fn new(browser: DriveBrowser) -> Self {
        Self {
            browser,
            trail: Breadcrumbs::new(),
            listing: Vec::new(),
            filter: ItemFilter::All,
            delta_link: None,
        }
    }

    fn find(&self, key: &str) -> Result<&DriveItem> {
        find_item(&self.listing, key).with_context(|| format!("No item named {} here", key))
    }

    /// List `target` and make it the current folder, reached via `trail`.
    async fn enter(&mut self, target: &ItemRef, mut trail: Breadcrumbs) -> Result<()> {
        let listing = self.browser.list_folder(target, self.filter).await?;
        if !listing.parent.is_folder() {
            bail!("{} is not a folder", listing.parent.name);
        }
        trail.navigate_to(&listing.parent)?;

        self.trail = trail;
        self.listing = listing.children;
        self.delta_link = None;
        Ok(())
    }

    async fn cd(&mut self, key: &str) -> Result<()> {
        match key {
            ".." => {
                self.up().await?;
            }
            "/" => self.enter(&ItemRef::Root, Breadcrumbs::new()).await?,
            _ => {
                let item = self.find(key)?;
                if !item.is_folder() {
                    bail!("{} is not a folder", item.name);
                }
                let target = ItemRef::Id(item.item_id()?);
                self.enter(&target, self.trail.clone()).await?;
            }
        }
        Ok(())
    }

    /// Go to the parent folder. Returns false at the root.
    async fn up(&mut self) -> Result<bool> {
        let mut trail = self.trail.clone();
        if !trail.up() {
            return Ok(false);
        }
        let target = trail.current();
        self.enter(&target, trail).await?;
        Ok(true)
    }

    async fn jump(&mut self, index: usize) -> Result<()> {
        let mut trail = self.trail.clone();
        let target = trail.jump_to(index)?;
        self.enter(&target, trail).await
    }

    /// Relist the current folder, switching to `filter` if given.
    async fn list(&mut self, filter: Option<ItemFilter>) -> Result<()> {
        let filter = filter.unwrap_or(self.filter);
        let listing = self.browser.list_folder(&self.trail.current(), filter).await?;
        self.filter = filter;
        self.listing = listing.children;
        Ok(())
    }

    /// Reload the current folder and report what changed.
    async fn refresh(&mut self) -> Result<ChildrenDiff> {
        let listing = self
            .browser
            .list_folder(&self.trail.current(), self.filter)
            .await?;
        let diff = ChildrenDiff::between(&self.listing, &listing.children);
        self.listing = listing.children;
        Ok(diff)
    }
}

struct Shell {
    session: AuthSession,
    nav: Navigator,
}

impl Shell {
    fn new(session: AuthSession) -> Self {
        let nav = Navigator::new(session.browser());
        Self { session, nav }
    }

    fn show_listing(&self) {
        term::print_listing(&self.nav.listing, true);
    }

    async fn refresh(&mut self) -> Result<()> {
        let diff = self.nav.refresh().await?;
        if diff.is_empty() {
            println!("No changes.");
        } else {
            term::print_diff(&diff);
        }
        Ok(())
    }

    async fn execute(&mut self, command: ShellCommand, input: &mut BufReader<Stdin>) -> Result<()> {
        match command {
            ShellCommand::Empty | ShellCommand::Logout | ShellCommand::Exit => {}
            ShellCommand::Help => println!("{}", HELP),
            ShellCommand::Pwd => println!("{}", self.nav.trail),
            ShellCommand::List(filter) => {
                self.nav.list(filter).await?;
                self.show_listing();
            }
            ShellCommand::Cd(key) => {
                self.nav.cd(&key).await?;
                self.show_listing();
            }
            ShellCommand::Up => {
                if !self.nav.up().await? {
                    println!("Already at the root.");
                    return Ok(());
                }
                self.show_listing();
            }
            ShellCommand::Jump(index) => {
                self.nav.jump(index).await?;
                self.show_listing();
            }
            ShellCommand::Refresh => self.refresh().await?,
            ShellCommand::Info(key) => {
                let id = self.nav.find(&key)?.item_id()?;
                let item = self.nav.browser.item(&ItemRef::Id(id)).await?;
                term::print_item(&item);
            }
            ShellCommand::Get(key) => {
                let item = self.nav.find(&key)?;
                if item.is_folder() {
                    bail!("{} is a folder", item.name);
                }
                let dest = std::env::current_dir()?.join(&item.name);
                let written = self.nav.browser.download(&item.item_id()?, &dest).await?;
                println!("Downloaded {} ({})", dest.display(), term::format_size(written as i64));
            }
            ShellCommand::Put(path) => {
                let item = self.nav.browser.upload(&self.nav.trail.current(), &path).await?;
                println!("Uploaded {}", term::item_line(&item));
                self.refresh().await?;
            }
            ShellCommand::Mkdir(name) => {
                let item = self
                    .nav
                    .browser
                    .create_folder(&self.nav.trail.current(), &name)
                    .await?;
                println!("Created {}", term::item_line(&item));
                self.refresh().await?;
            }
            ShellCommand::Rm(key) => {
                let item = self.nav.find(&key)?;
                let (id, name) = (item.item_id()?, item.name.clone());
                if !term::confirm(input, &format!("Delete {}?", name)).await? {
                    println!("Cancelled.");
                    return Ok(());
                }
                self.nav.browser.delete_item(&id).await?;
                println!("Deleted {}", name);
                self.refresh().await?;
            }
            ShellCommand::Share { name, link_type } => {
                let id = self.nav.find(&name)?.item_id()?;
                let permission = self
                    .nav
                    .browser
                    .create_share_link(&id, link_type, LinkScope::Anonymous)
                    .await?;
                println!("{}", permission.web_url().unwrap_or("(no link returned)"));
            }
            ShellCommand::Perms(key) => {
                let id = self.nav.find(&key)?.item_id()?;
                let permissions = self.nav.browser.list_permissions(&id).await?;
                term::print_permissions(&permissions);
            }
            ShellCommand::Changes => {
                let page = self
                    .nav
                    .browser
                    .changes(&self.nav.trail.current(), self.nav.delta_link.as_deref())
                    .await?;
                term::print_changes(&page);
                self.nav.delta_link = page.delta_link.or(page.next_link);
            }
        }
        Ok(())
    }
}

/// Run the interactive browser until `exit`, `logout` or end of input.
pub async fn run(session: AuthSession) -> Result<()> {
    let mut shell = Shell::new(session);
    let mut input = BufReader::new(tokio::io::stdin());

    shell.nav.enter(&ItemRef::Root, Breadcrumbs::new()).await?;
    shell.show_listing();
    println!("Type help for a list of commands.");

    loop {
        print!("{}> ", shell.nav.trail);
        std::io::stdout().flush()?;

        let mut line = String::new();
        if input.read_line(&mut line).await? == 0 {
            println!();
            return Ok(());
        }

        let command = match ShellCommand::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match command {
            ShellCommand::Exit => return Ok(()),
            ShellCommand::Logout => {
                shell.session.sign_out().await?;
                println!("Signed out.");
                return Ok(());
            }
            command => {
                if let Err(err) = shell.execute(command, &mut input).await {
                    crate::report_error(&err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyview_drive::{DriveApi, MemoryDrive};
    use std::sync::Arc;

    fn item(name: &str) -> DriveItem {
        DriveItem {
            id: format!("id-{}", name),
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ShellCommand::parse("  \n").unwrap(), ShellCommand::Empty);
        assert_eq!(
            ShellCommand::parse("ls files").unwrap(),
            ShellCommand::List(Some(ItemFilter::Files))
        );
        assert_eq!(
            ShellCommand::parse("cd My Documents\n").unwrap(),
            ShellCommand::Cd("My Documents".to_string())
        );
        assert_eq!(ShellCommand::parse("jump 2").unwrap(), ShellCommand::Jump(2));
        assert_eq!(
            ShellCommand::parse("share edit report.docx").unwrap(),
            ShellCommand::Share {
                name: "report.docx".to_string(),
                link_type: LinkType::Edit,
            }
        );
        assert_eq!(
            ShellCommand::parse("share report.docx").unwrap(),
            ShellCommand::Share {
                name: "report.docx".to_string(),
                link_type: LinkType::View,
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(ShellCommand::parse("cd").is_err());
        assert!(ShellCommand::parse("jump x").is_err());
        assert!(ShellCommand::parse("ls everything").is_err());
        assert!(ShellCommand::parse("frobnicate").is_err());
    }

    #[test]
    fn test_find_item() {
        let listing = vec![item("Photos"), item("notes.txt")];

        assert_eq!(find_item(&listing, "#2").unwrap().name, "notes.txt");
        assert_eq!(find_item(&listing, "photos").unwrap().name, "Photos");
        assert!(find_item(&listing, "#0").is_none());
        assert!(find_item(&listing, "#3").is_none());
        assert!(find_item(&listing, "missing").is_none());
    }

    /// Drive with /A/B, browsed down to B.
    async fn navigator_in_b() -> (Arc<MemoryDrive>, Navigator) {
        let drive = Arc::new(MemoryDrive::new());
        let a = drive.create_folder(&ItemRef::Root, "A").await.unwrap();
        drive
            .create_folder(&ItemRef::Id(a.item_id().unwrap()), "B")
            .await
            .unwrap();

        let mut nav = Navigator::new(DriveBrowser::new(drive.clone()));
        nav.enter(&ItemRef::Root, Breadcrumbs::new()).await.unwrap();
        nav.cd("A").await.unwrap();
        nav.cd("B").await.unwrap();
        assert_eq!(nav.trail.to_string(), "/ > A > B");
        (drive, nav)
    }

    #[tokio::test]
    async fn test_navigation_moves_trail_and_listing() {
        let (_, mut nav) = navigator_in_b().await;
        assert!(nav.listing.is_empty());

        assert!(nav.up().await.unwrap());
        assert_eq!(nav.trail.to_string(), "/ > A");
        assert_eq!(nav.listing[0].name, "B");

        nav.cd("..").await.unwrap();
        assert!(nav.trail.is_root());
        assert!(!nav.up().await.unwrap());

        nav.cd("A").await.unwrap();
        nav.jump(0).await.unwrap();
        assert_eq!(nav.trail.to_string(), "/");
        assert_eq!(nav.listing[0].name, "A");
    }

    #[tokio::test]
    async fn test_failed_move_keeps_location() {
        let (drive, mut nav) = navigator_in_b().await;
        let a = nav.trail.crumbs()[0].id.clone();
        drive.delete(&a).await.unwrap();

        assert!(nav.up().await.is_err());
        assert!(nav.cd("..").await.is_err());
        assert!(nav.jump(1).await.is_err());
        assert!(nav.jump(5).await.is_err());

        assert_eq!(nav.trail.to_string(), "/ > A > B");
        assert_eq!(nav.trail.current(), ItemRef::Id(nav.trail.crumbs()[1].id.clone()));
        assert!(nav.listing.is_empty());
    }

    #[tokio::test]
    async fn test_failed_listing_keeps_filter() {
        let (drive, mut nav) = navigator_in_b().await;
        let a = nav.trail.crumbs()[0].id.clone();
        drive.delete(&a).await.unwrap();

        assert!(nav.list(Some(ItemFilter::Files)).await.is_err());
        assert_eq!(nav.filter, ItemFilter::All);
    }
}
