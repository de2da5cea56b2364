//! SkyView CLI - browse and manage a OneDrive account from the terminal.
//!
//! Items are addressed by path (`/Documents/report.docx`) or by ID
//! (`id:32217FC1154AEC3D!101`).

mod shell;
mod term;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use skyview_common::{Error, ItemId};
use skyview_drive::onedrive::{PromptHandler, TokenCache};
use skyview_drive::{
    AppConfig, AuthManager, AuthSession, DeviceCodePrompt, DriveBrowser, ItemFilter, ItemRef,
    LinkScope, LinkType,
};

#[derive(Parser)]
#[command(name = "skyview")]
#[command(about = "SkyView - OneDrive browser")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: <config dir>/skyview/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Do not open the sign-in page in a browser.
    #[arg(long, global = true)]
    no_browser: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and cache the token.
    Login,

    /// Sign out and delete the cached token.
    Logout,

    /// List a folder.
    Ls {
        /// Folder path or id:<ID>.
        #[arg(default_value = "/")]
        folder: String,

        /// Show files only.
        #[arg(long, conflicts_with = "folders")]
        files: bool,

        /// Show folders only.
        #[arg(long)]
        folders: bool,
    },

    /// Show item details.
    Info {
        /// Item path or id:<ID>.
        item: String,
    },

    /// Upload a local file into a folder.
    Upload {
        /// Local file.
        file: PathBuf,

        /// Destination folder path or id:<ID>.
        #[arg(short, long, default_value = "/")]
        to: String,
    },

    /// Download a file.
    Download {
        /// Item path or id:<ID>.
        item: String,

        /// Destination file (default: the item name in the current directory).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a file or folder.
    Rm {
        /// Item path or id:<ID>.
        item: String,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Create a folder.
    Mkdir {
        /// Folder name.
        name: String,

        /// Parent folder path or id:<ID>.
        #[arg(short, long, default_value = "/")]
        parent: String,
    },

    /// Create a sharing link.
    Share {
        /// Item path or id:<ID>.
        item: String,

        /// Link type: "view", "edit" or "embed".
        #[arg(short = 't', long = "type", default_value = "view")]
        link_type: LinkType,

        /// Link scope: "anonymous" or "organization".
        #[arg(short, long, default_value = "anonymous")]
        scope: LinkScope,
    },

    /// List the permissions on an item.
    Permissions {
        /// Item path or id:<ID>.
        item: String,
    },

    /// Show changes below a folder.
    Changes {
        /// Folder path or id:<ID>.
        #[arg(default_value = "/")]
        folder: String,

        /// Next or delta link from a previous call.
        #[arg(short, long)]
        link: Option<String>,
    },

    /// Browse interactively.
    Shell,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Global options every command needs for signing in.
struct Options {
    config: Option<PathBuf>,
    open_browser: bool,
}

impl Options {
    async fn config(&self) -> Result<AppConfig> {
        AppConfig::load(self.config.as_deref())
            .await
            .context("Failed to load configuration")
    }

    async fn sign_in(&self) -> Result<AuthSession> {
        let config = self.config().await?;
        let manager = AuthManager::new(config.auth_config(), device_code_prompt(self.open_browser))
            .context("Failed to configure sign-in")?;

        AuthSession::sign_in(&config, Arc::new(manager))
            .await
            .context("Sign-in failed")
    }

    async fn browser(&self) -> Result<DriveBrowser> {
        Ok(self.sign_in().await?.browser())
    }
}

fn device_code_prompt(open_browser: bool) -> PromptHandler {
    Arc::new(move |prompt: &DeviceCodePrompt| {
        println!(
            "To sign in, open {} and enter the code {}",
            prompt.verification_uri, prompt.user_code
        );
        println!(
            "The code expires in {} minutes.",
            prompt.expires_in.as_secs() / 60
        );
        if open_browser {
            if let Err(e) = open::that(&prompt.verification_uri) {
                warn!("Failed to open browser: {}", e);
            }
        }
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
        return ExitCode::FAILURE;
    }

    let options = Options {
        config: cli.config,
        open_browser: !cli.no_browser,
    };

    let result = match cli.command {
        Commands::Login => cmd_login(&options).await,
        Commands::Logout => cmd_logout(&options).await,
        Commands::Ls {
            folder,
            files,
            folders,
        } => cmd_ls(&options, &folder, filter_from_flags(files, folders)).await,
        Commands::Info { item } => cmd_info(&options, &item).await,
        Commands::Upload { file, to } => cmd_upload(&options, &file, &to).await,
        Commands::Download { item, output } => cmd_download(&options, &item, output).await,
        Commands::Rm { item, yes } => cmd_rm(&options, &item, yes).await,
        Commands::Mkdir { name, parent } => cmd_mkdir(&options, &name, &parent).await,
        Commands::Share {
            item,
            link_type,
            scope,
        } => cmd_share(&options, &item, link_type, scope).await,
        Commands::Permissions { item } => cmd_permissions(&options, &item).await,
        Commands::Changes { folder, link } => cmd_changes(&options, &folder, link.as_deref()).await,
        Commands::Shell => cmd_shell(&options).await,
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

/// Print an error the way the operator should see it.
pub(crate) fn report_error(err: &anyhow::Error) {
    let drive_error = err.chain().find_map(|cause| cause.downcast_ref::<Error>());
    match drive_error {
        Some(e) if e.is_service_error() => {
            eprintln!("OneDrive reported the following error: {}", e)
        }
        _ => eprintln!("Error: {:#}", err),
    }
}

fn filter_from_flags(files: bool, folders: bool) -> ItemFilter {
    match (files, folders) {
        (true, _) => ItemFilter::Files,
        (_, true) => ItemFilter::Folders,
        _ => ItemFilter::All,
    }
}

fn parse_ref(item: &str) -> Result<ItemRef> {
    ItemRef::parse(item).with_context(|| format!("Invalid item: {}", item))
}

/// ID of an item given by path or `id:`.
async fn resolve_id(browser: &DriveBrowser, item: &str) -> Result<ItemId> {
    match parse_ref(item)? {
        ItemRef::Id(id) => Ok(id),
        target => Ok(browser.item(&target).await?.item_id()?),
    }
}

/// Sign in.
async fn cmd_login(options: &Options) -> Result<()> {
    let session = options.sign_in().await?;
    let tokens = session.tokens().await;

    println!("Signed in.");
    if let Some(tokens) = tokens {
        println!("  Token expires: {}", tokens.expires_at.to_rfc3339());
    }

    Ok(())
}

/// Sign out without prompting for a sign-in first.
async fn cmd_logout(options: &Options) -> Result<()> {
    let config = options.config().await?;

    match config.token_cache_path() {
        Some(path) => {
            TokenCache::new(path)
                .clear()
                .await
                .context("Failed to remove token cache")?;
            println!("Signed out.");
        }
        None => println!("No token cache configured."),
    }

    Ok(())
}

/// List a folder.
async fn cmd_ls(options: &Options, folder: &str, filter: ItemFilter) -> Result<()> {
    let target = parse_ref(folder)?;
    let browser = options.browser().await?;

    let listing = browser
        .list_folder(&target, filter)
        .await
        .context("Failed to list folder")?;

    let location = listing
        .parent
        .drive_path()
        .map(|p| p.to_string())
        .unwrap_or_else(|_| folder.to_string());
    println!("Contents of {}:", location);
    term::print_listing(&listing.children, false);

    Ok(())
}

/// Show item details.
async fn cmd_info(options: &Options, item: &str) -> Result<()> {
    let target = parse_ref(item)?;
    let browser = options.browser().await?;

    let item = browser.item(&target).await.context("Failed to get item")?;
    term::print_item(&item);

    Ok(())
}

/// Upload a file.
async fn cmd_upload(options: &Options, file: &Path, to: &str) -> Result<()> {
    info!("Uploading {} to {}", file.display(), to);

    let target = parse_ref(to)?;
    let browser = options.browser().await?;

    let item = browser
        .upload(&target, file)
        .await
        .context("Failed to upload file")?;

    println!("Uploaded {}", term::item_line(&item));
    println!("  ID: {}", item.id);

    Ok(())
}

/// Download a file.
async fn cmd_download(options: &Options, item: &str, output: Option<PathBuf>) -> Result<()> {
    let target = parse_ref(item)?;
    let browser = options.browser().await?;

    let remote = browser.item(&target).await.context("Failed to get item")?;
    if remote.is_folder() {
        anyhow::bail!("{} is a folder", remote.name);
    }

    let dest = match output {
        Some(dest) => dest,
        None => std::env::current_dir()?.join(&remote.name),
    };

    let written = browser
        .download(&remote.item_id()?, &dest)
        .await
        .context("Failed to download file")?;

    println!(
        "Downloaded {} ({})",
        dest.display(),
        term::format_size(written as i64)
    );

    Ok(())
}

/// Delete an item after confirmation.
async fn cmd_rm(options: &Options, item: &str, yes: bool) -> Result<()> {
    let target = parse_ref(item)?;
    let browser = options.browser().await?;

    let remote = browser.item(&target).await.context("Failed to get item")?;
    if !yes {
        let mut input = BufReader::new(tokio::io::stdin());
        if !term::confirm(&mut input, &format!("Delete {}?", remote.name)).await? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    browser
        .delete_item(&remote.item_id()?)
        .await
        .context("Failed to delete item")?;

    println!("Deleted {}", remote.name);

    Ok(())
}

/// Create a folder.
async fn cmd_mkdir(options: &Options, name: &str, parent: &str) -> Result<()> {
    let target = parse_ref(parent)?;
    let browser = options.browser().await?;

    let folder = browser
        .create_folder(&target, name)
        .await
        .context("Failed to create folder")?;

    if folder.name != name {
        println!("A folder named {} already exists.", name);
    }
    println!("Created {}", term::item_line(&folder));

    Ok(())
}

/// Create a sharing link.
async fn cmd_share(
    options: &Options,
    item: &str,
    link_type: LinkType,
    scope: LinkScope,
) -> Result<()> {
    let browser = options.browser().await?;
    let id = resolve_id(&browser, item).await?;

    let permission = browser
        .create_share_link(&id, link_type, scope)
        .await
        .context("Failed to create sharing link")?;

    match permission.web_url() {
        Some(url) => println!("{}", url),
        None => println!("Link created, but no URL was returned."),
    }

    Ok(())
}

/// List permissions.
async fn cmd_permissions(options: &Options, item: &str) -> Result<()> {
    let browser = options.browser().await?;
    let id = resolve_id(&browser, item).await?;

    let permissions = browser
        .list_permissions(&id)
        .await
        .context("Failed to list permissions")?;

    term::print_permissions(&permissions);

    Ok(())
}

/// Show changes below a folder.
async fn cmd_changes(options: &Options, folder: &str, link: Option<&str>) -> Result<()> {
    let target = parse_ref(folder)?;
    let browser = options.browser().await?;

    let page = browser
        .changes(&target, link)
        .await
        .context("Failed to fetch changes")?;

    term::print_changes(&page);

    Ok(())
}

/// Interactive browser.
async fn cmd_shell(options: &Options) -> Result<()> {
    let session = options.sign_in().await?;
    shell::run(session).await
}

fn cmd_completions(shell: Shell) {
    clap_complete::generate(shell, &mut Cli::command(), "skyview", &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_share_options() {
        let cli = Cli::try_parse_from([
            "skyview",
            "share",
            "/a.txt",
            "--type",
            "edit",
            "-s",
            "organization",
        ])
        .unwrap();
        match cli.command {
            Commands::Share {
                item,
                link_type,
                scope,
            } => {
                assert_eq!(item, "/a.txt");
                assert_eq!(link_type, LinkType::Edit);
                assert_eq!(scope, LinkScope::Organization);
            }
            _ => panic!("expected share"),
        }
    }

    #[test]
    fn test_ls_filters_conflict() {
        assert!(Cli::try_parse_from(["skyview", "ls", "--files", "--folders"]).is_err());
    }

    #[test]
    fn test_filter_from_flags() {
        assert_eq!(filter_from_flags(false, false), ItemFilter::All);
        assert_eq!(filter_from_flags(true, false), ItemFilter::Files);
        assert_eq!(filter_from_flags(false, true), ItemFilter::Folders);
    }

    #[test]
    fn test_report_error_finds_drive_error() {
        let err = anyhow::Error::new(Error::NotFound("x".to_string())).context("Failed to list");
        let found = err.chain().find_map(|cause| cause.downcast_ref::<Error>());
        assert!(found.is_some_and(|e| e.is_service_error()));
    }
}
