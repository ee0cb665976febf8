//! Mangoon plugin host
//!
//! Administrative command line over the plugin manager.

use mangoon::cache::MemoryCache;
use mangoon::core::config::{Config, GlobalArgs};
use mangoon::core::{ArchiveReader, ErrorResponse, Logger};
use mangoon::db::DatabaseManager;
use mangoon::plugin::{
    ConfigValues, DownloadOptions, PluginManager, PluginRegistry, ReqwestHttpClient,
    SearchFilters,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

#[derive(Debug, Parser)]
#[command(name = "mangoon", version, about = "Manage Mangoon source plugins")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered plugins
    List,
    /// Register every built-in plugin class
    Discover,
    /// Register one plugin class
    Register { class_ref: String },
    Install { slug: String },
    Uninstall { slug: String },
    Activate { slug: String },
    Deactivate { slug: String },
    /// Run a plugin's self-test
    Test { slug: String },
    /// Validate and store configuration values given as a JSON object
    Configure { slug: String, values: String },
    /// Import a manga into the catalog
    Download {
        url: String,
        /// Use this plugin instead of resolving one from the URL
        #[arg(long)]
        plugin: Option<String>,
        #[arg(long)]
        language: Option<String>,
    },
    Search {
        slug: String,
        query: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// List the chapters of a manga
    Chapters { slug: String, url: String },
    /// Resolve the pages of one chapter
    Chapter { slug: String, url: String },
    /// Usage statistics of all plugins
    Stats,
    /// Distinct plugin types
    Types,
    /// List the pages of a CBZ archive
    Pages {
        archive: PathBuf,
        /// Show a single page by position
        #[arg(long)]
        index: Option<i64>,
    },
    /// Print the effective configuration
    Config,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn page_summary(page: &mangoon::core::ArchivePage) -> Value {
    json!({
        "index": page.index,
        "name": page.name,
        "extension": page.extension,
        "mime_type": page.mime_type(),
        "size": page.size(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli.global) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Logging is not initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    // Commands that need no database
    match &cli.command {
        Command::Config => {
            print!("{}", config.to_toml()?);
            return Ok(());
        }
        Command::Pages { archive, index } => {
            let reader = ArchiveReader::new();
            match index {
                Some(index) => match reader.get_page(archive, *index) {
                    Some(page) => print_json(&page_summary(&page))?,
                    None => bail!("No page at index {}", index),
                },
                None => {
                    let pages: Vec<Value> =
                        reader.list_pages(archive).iter().map(page_summary).collect();
                    print_json(&pages)?;
                }
            }
            return Ok(());
        }
        _ => {}
    }

    info!(path = ?config.database.path, "Opening database");
    let db = Arc::new(
        DatabaseManager::new(
            &config.database.path,
            u32::try_from(config.database.connection_pool_size).unwrap_or(u32::MAX),
            Duration::from_millis(config.database.busy_timeout),
        )
        .context("Failed to open database")?,
    );

    let http = Arc::new(ReqwestHttpClient::new().context("Failed to build HTTP client")?);
    let manager = PluginManager::from_config(
        db,
        Arc::new(MemoryCache::new()),
        http,
        PluginRegistry::with_builtin(),
        &config,
    );

    if config.plugins.auto_discover && !matches!(cli.command, Command::Discover) {
        let registered = manager.discover().await;
        info!(count = registered.len(), "Auto-discovered plugins");
    }

    match cli.command {
        Command::List => {
            let plugins: Vec<Value> = manager
                .all()
                .await
                .into_iter()
                .map(|d| {
                    json!({
                        "slug": d.slug,
                        "name": d.name,
                        "version": d.version,
                        "type": d.plugin_type,
                        "state": d.state(),
                        "priority": d.priority,
                        "is_system": d.is_system,
                        "downloads_count": d.downloads_count,
                    })
                })
                .collect();
            print_json(&plugins)?;
        }
        Command::Discover => {
            let registered: Vec<String> =
                manager.discover().await.into_iter().map(|d| d.slug).collect();
            print_json(&registered)?;
        }
        Command::Register { class_ref } => match manager.register(&class_ref).await {
            Some(descriptor) => print_json(&descriptor)?,
            None => bail!("Failed to register {}", class_ref),
        },
        Command::Install { slug } => print_json(&json!({ "installed": manager.install(&slug).await }))?,
        Command::Uninstall { slug } => {
            print_json(&json!({ "uninstalled": manager.uninstall(&slug).await }))?
        }
        Command::Activate { slug } => print_json(&json!({ "activated": manager.activate(&slug).await }))?,
        Command::Deactivate { slug } => {
            print_json(&json!({ "deactivated": manager.deactivate(&slug).await }))?
        }
        Command::Test { slug } => print_json(&manager.test(&slug).await)?,
        Command::Configure { slug, values } => {
            let values: ConfigValues =
                serde_json::from_str(&values).context("Configuration must be a JSON object")?;
            match manager.update_config(&slug, values).await {
                Ok(updated) => print_json(&json!({ "updated": updated }))?,
                Err(e) => {
                    print_json(&ErrorResponse::from_error(&e))?;
                    bail!("Configuration of {} rejected", slug);
                }
            }
        }
        Command::Download {
            url,
            plugin,
            language,
        } => {
            Url::parse(&url).with_context(|| format!("Invalid URL: {}", url))?;
            let options = DownloadOptions {
                language,
                ..Default::default()
            };
            let result = manager.download_manga(&url, plugin.as_deref(), &options).await;
            print_json(&result)?;
        }
        Command::Search {
            slug,
            query,
            limit,
            offset,
        } => {
            let filters = SearchFilters {
                limit,
                offset,
                ..Default::default()
            };
            print_json(&manager.search(&slug, &query, &filters).await)?;
        }
        Command::Chapters { slug, url } => print_json(&manager.get_chapters(&slug, &url).await)?,
        Command::Chapter { slug, url } => {
            let result = manager
                .download_chapter(&slug, &url, &DownloadOptions::default())
                .await;
            print_json(&result)?;
        }
        Command::Stats => print_json(&manager.get_statistics().await)?,
        Command::Types => print_json(&manager.get_types().await)?,
        Command::Config | Command::Pages { .. } => {}
    }

    Ok(())
}
