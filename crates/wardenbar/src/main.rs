//! wardenbar - Launcher backend for a Bitwarden vault
//!
//! Commands:
//! - search [QUERY]: Search the redacted cache (launcher JSON)
//! - folders [--id ID]: List folders, or the items of one folder
//! - item --id ID: Show the copyable values of one item
//! - get-item --id ID [PATH]: Resolve a field, TOTP code or attachment
//! - login / unlock / lock / logout: Manage the CLI session
//! - sync: Sync the vault and rebuild the cache
//! - icons: Download favicons for login items
//! - config-server URL: Point the CLI at a vault server

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wardenbar::auth::{self, Auth, TerminalPrompt, ICONS_JOB, SYNC_JOB};
use wardenbar::cache::Marker;
use wardenbar::cli::{BwCli, CliRequest, CliRunner, SyncMode};
use wardenbar::crypto::SessionKeyUnwrap;
use wardenbar::feedback::{Action, Feedback, Item};
use wardenbar::icons::{self, HttpDownloader};
use wardenbar::search;
use wardenbar::token::KeyringTokenStore;
use wardenbar::{Context, Resolver, SecretRequest};
use wardenbar_core::{Config, Paths};

#[derive(Parser)]
#[command(name = "wardenbar")]
#[command(about = "Launcher backend for a Bitwarden vault - search a redacted cache, resolve secrets on demand")]
#[command(version)]
#[command(after_help = r#"CONFIGURATION:
    ~/.config/wardenbar/config.toml, overridden by environment variables
    such as BW_EXEC, BW_EMAIL, SKIP_TYPES and DEBUG.

SECURITY:
    - The session token lives in the OS keyring
    - The search cache never holds passwords, TOTP seeds, card codes,
      hidden fields or secure note bodies
    - Secrets are never logged"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search cached items by name, username or URL
    Search {
        /// Search text (empty lists everything)
        #[arg(default_value = "")]
        query: String,
        /// Only favorites
        #[arg(long)]
        favorites: bool,
    },

    /// List folders with item counts, or the items of one folder
    Folders {
        /// Folder id (`null` for items without a folder)
        #[arg(long)]
        id: Option<String>,
    },

    /// Show the copyable values of one cached item
    Item {
        /// Item id
        #[arg(long)]
        id: String,
    },

    /// Print a secret value of an item
    GetItem {
        /// Item id
        #[arg(long)]
        id: String,
        /// Field path (e.g. login.password, fields[0].value); empty prints the item
        #[arg(default_value = "")]
        path: String,
        /// Print the current TOTP code
        #[arg(long, conflicts_with = "attachment")]
        totp: bool,
        /// Save the attachment with this id to the output folder
        #[arg(long)]
        attachment: Option<String>,
    },

    /// Log in to Bitwarden
    Login,

    /// Unlock the vault
    Unlock,

    /// Lock the vault and clear the cache
    Lock,

    /// Log out and clear the cache
    Logout,

    /// Sync the vault and rebuild the cache
    Sync {
        /// Full sync
        #[arg(long, conflicts_with = "last")]
        force: bool,
        /// Print the last sync date
        #[arg(long)]
        last: bool,
        /// Run the sync as a background job
        #[arg(long)]
        background: bool,
    },

    /// Download favicons for login items
    Icons {
        /// Run as a background job
        #[arg(long)]
        background: bool,
    },

    /// Set the vault server URL
    ConfigServer {
        /// Server URL
        url: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = Paths::new();
    init_logging(startup_debug(&paths.config_file()));
    let ctx = Context::load_from(paths)?;

    match cli.command {
        Commands::Search { query, favorites } => cmd_search(&ctx, &query, favorites),
        Commands::Folders { id } => cmd_folders(&ctx, id.as_deref()),
        Commands::Item { id } => cmd_item(&ctx, &id),
        Commands::GetItem {
            id,
            path,
            totp,
            attachment,
        } => cmd_get_item(&ctx, &id, &path, totp, attachment.as_deref()),
        Commands::Login => with_auth(&ctx, |auth| auth.login()),
        Commands::Unlock => with_auth(&ctx, |auth| auth.unlock()),
        Commands::Lock => with_auth(&ctx, |auth| auth.lock()),
        Commands::Logout => with_auth(&ctx, |auth| auth.logout()),
        Commands::Sync {
            force,
            last,
            background,
        } => cmd_sync(&ctx, sync_mode(force, last), background),
        Commands::Icons { background } => cmd_icons(&ctx, background),
        Commands::ConfigServer { url } => cmd_config_server(&ctx, &url),
    }
}

/// Debug flag read ahead of the context so its loading is traced too.
/// An unreadable config is reported again by `Context::load_from`.
fn startup_debug(config_file: &Path) -> bool {
    Config::load(config_file).map(|config| config.debug).unwrap_or(false)
}

/// Logs go to stderr; stdout carries launcher output and secret values
fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn sync_mode(force: bool, last: bool) -> SyncMode {
    match (force, last) {
        (_, true) => SyncMode::Last,
        (true, false) => SyncMode::Force,
        (false, false) => SyncMode::Normal,
    }
}

fn print_feedback(feedback: &Feedback) -> Result<()> {
    println!("{}", feedback.to_json()?);
    Ok(())
}

/// Rows shown instead of results while the vault cannot be searched
fn status_feedback(ctx: &Context) -> Option<Feedback> {
    let cache = ctx.cache();
    let rows = search::status_rows(
        ctx.state.auth_state(),
        cache.has_items(),
        ctx.jobs().is_running(SYNC_JOB),
    )?;
    let mut feedback = Feedback::new();
    feedback.extend(rows);
    Some(feedback)
}

/// Search the cache
fn cmd_search(ctx: &Context, query: &str, favorites: bool) -> Result<()> {
    if let Some(feedback) = status_feedback(ctx) {
        return print_feedback(&feedback);
    }

    let cache = ctx.cache();
    let items = cache.load_items()?;
    let icons_dir = ctx.paths.icons();

    let mut feedback = Feedback::new();
    feedback.extend(
        search::filter(&items, query, favorites, ctx.config.max_results)
            .into_iter()
            .map(|item| search::item_row(item, &icons_dir)),
    );
    if feedback.is_empty() {
        feedback.push(Item::new("No matching items", query).action(Action::None, ""));
    }

    cache.touch(Marker::LastUsage)?;
    if ctx.config.icon_cache_enabled && cache.is_stale(Marker::AutoFetch, ctx.config.auto_fetch_max_age()) {
        cache.touch(Marker::AutoFetch)?;
        if let Err(e) = auth::start_icon_job(ctx) {
            warn!("could not start icon job: {:#}", e);
        }
    }

    print_feedback(&feedback)
}

/// List folders or the items of one folder
fn cmd_folders(ctx: &Context, id: Option<&str>) -> Result<()> {
    if let Some(feedback) = status_feedback(ctx) {
        return print_feedback(&feedback);
    }

    let cache = ctx.cache();
    let items = cache.load_items()?;
    let mut feedback = Feedback::new();

    match id {
        Some(folder_id) => {
            let icons_dir = ctx.paths.icons();
            feedback.extend(
                search::folder_items(&items, folder_id)
                    .into_iter()
                    .take(ctx.config.max_results)
                    .map(|item| search::item_row(item, &icons_dir)),
            );
        }
        None => feedback.extend(search::folder_rows(&cache.load_folders()?, &items)),
    }

    print_feedback(&feedback)
}

/// Drill-down rows for one cached item
fn cmd_item(ctx: &Context, id: &str) -> Result<()> {
    if let Some(feedback) = status_feedback(ctx) {
        return print_feedback(&feedback);
    }

    let items = ctx.cache().load_items()?;
    let mut feedback = Feedback::new();
    match items.iter().find(|item| item.id == id) {
        Some(item) => feedback.extend(search::detail_rows(item, &ctx.config.output_folder)),
        None => feedback.push(Item::new("Item not found", "Sync Bitwarden and try again").action(Action::Sync, "")),
    }
    print_feedback(&feedback)
}

/// Resolve one value and print it without a trailing newline
fn cmd_get_item(ctx: &Context, id: &str, path: &str, totp: bool, attachment: Option<&str>) -> Result<()> {
    let cli = BwCli::new(ctx.config.bw_exec.clone());
    let tokens = KeyringTokenStore::default();
    let resolver = Resolver::new(&ctx.state, &tokens, &SessionKeyUnwrap, &cli, &ctx.config.output_folder);

    let request = match attachment {
        Some(attachment_id) => SecretRequest::attachment(id, attachment_id),
        None if totp => SecretRequest::totp(id),
        None => SecretRequest::field(id, path),
    };

    let value = resolver.resolve(&request)?;
    print!("{}", value);
    Ok(())
}

fn with_auth<F>(ctx: &Context, flow: F) -> Result<()>
where
    F: FnOnce(&Auth) -> Result<String>,
{
    let cli = BwCli::new(ctx.config.bw_exec.clone());
    let tokens = KeyringTokenStore::default();
    let auth = Auth::new(ctx, &cli, &tokens, &TerminalPrompt);
    println!("{}", flow(&auth)?);
    Ok(())
}

/// Sync; a foreground sync holds the sync job slot while it runs
fn cmd_sync(ctx: &Context, mode: SyncMode, background: bool) -> Result<()> {
    if background || mode == SyncMode::Last {
        return with_auth(ctx, |auth| auth.sync(mode, background));
    }

    let Some(_guard) = ctx.jobs().claim(SYNC_JOB)? else {
        println!("Sync already running");
        return Ok(());
    };
    with_auth(ctx, |auth| auth.sync(mode, false))
}

/// Download missing favicons
fn cmd_icons(ctx: &Context, background: bool) -> Result<()> {
    if !ctx.config.icon_cache_enabled {
        info!("icon cache disabled");
        return Ok(());
    }

    if background {
        let started = auth::start_icon_job(ctx)?;
        println!("{}", if started { "Fetching icons in the background" } else { "Icon fetch already running" });
        return Ok(());
    }

    let Some(_guard) = ctx.jobs().claim(ICONS_JOB)? else {
        info!("icon job already running");
        return Ok(());
    };

    let cache = ctx.cache();
    let items = cache.load_items()?;
    let report = icons::fetch_icons(&items, &ctx.paths.icons(), &HttpDownloader)?;
    cache.touch(Marker::Icons)?;
    println!("Icons: {} downloaded, {} failed", report.downloaded, report.failed);
    Ok(())
}

fn cmd_config_server(ctx: &Context, url: &str) -> Result<()> {
    let cli = BwCli::new(ctx.config.bw_exec.clone());
    cli.run(&CliRequest::config_server(url))?;
    println!("Server set to {}", url);
    Ok(())
}
