//! confluence-mirror: Headless Confluence to Obsidian vault mirror.
//!
//! Uses the same mirror-core as the Obsidian plugin, but runs as a native
//! binary with native filesystem and networking.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use mirror_core::regions::{parse_file_content, split_header};
use mirror_core::{
    BackgroundChangeDetector, EventBus, FileSystem, NoteWriter, RemoteClient, Settings,
    Subscription, SyncEngine, SyncEvent, SyncHistoryStore,
};
use mirror_daemon::{Config, ConfluenceHttpClient, NativeFs};

#[derive(Parser, Debug)]
#[command(name = "confluence-mirror")]
#[command(about = "Incremental Confluence to Obsidian vault mirror")]
struct Args {
    /// Path to the vault directory
    #[arg(short, long, env = "CONFLUENCE_MIRROR_VAULT")]
    vault: PathBuf,

    /// Config file (defaults to the plugin folder inside the vault)
    #[arg(short, long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync changed pages now
    Sync {
        /// Rewrite every page regardless of history
        #[arg(long)]
        force: bool,
    },
    /// Count remote changes once, without writing
    Check,
    /// Poll for remote changes until interrupted
    Watch {
        /// Seconds between checks
        #[arg(long, default_value_t = 300)]
        interval: u64,
        /// Run a sync whenever changes are found
        #[arg(long)]
        auto_sync: bool,
    },
    /// Verify the tenant url and credentials
    TestConnection,
    /// Forget every sync record so the next sync rewrites all pages
    ClearHistory,
    /// Show the regions and sync record of a note
    Inspect {
        /// Vault-relative path of the note
        file: String,
    },
}

/// Turn sync events into user-facing log lines.
fn notify(bus: &Arc<EventBus>) -> Subscription {
    bus.subscribe(|event| match event {
        SyncEvent::Phase { phase } => debug!("Phase: {:?}", phase),
        SyncEvent::DocumentSynced { title, path, .. } => info!("Synced \"{}\" -> {}", title, path),
        SyncEvent::DocumentFailed { title, error, .. } => warn!("Failed \"{}\": {}", title, error),
        SyncEvent::SyncFinished {
            success_count,
            failure_count,
            skipped_pages,
        } => info!(
            "Sync complete: {} updated, {} failed, {} unchanged",
            success_count, failure_count, skipped_pages
        ),
        SyncEvent::ChangesDetected { count } => {
            info!("{} Confluence pages changed since last sync", count)
        }
    })
}

async fn run_sync<C: RemoteClient, F: FileSystem + Clone>(
    engine: &mut SyncEngine<C, F>,
) -> Result<()> {
    let result = engine.sync_all().await?;
    for failure in &result.errors {
        error!(
            "Page {} ({}): {}",
            failure.page_id, failure.page_title, failure.error
        );
    }
    if !result.success {
        anyhow::bail!("{} of {} pages failed", result.failure_count, result.updated_pages);
    }
    Ok(())
}

async fn inspect(fs: &Arc<NativeFs>, settings: &Settings, file: &str) -> Result<()> {
    let raw = NoteWriter::new(fs.clone())
        .read(file)
        .await
        .with_context(|| format!("Failed to read {}", file))?;
    let (header, body) = split_header(&raw);
    let parsed = parse_file_content(body);

    let mut history = SyncHistoryStore::with_path(fs.clone(), settings.history_path.clone());
    let record = history
        .load_history()
        .await
        .values()
        .find(|record| record.file_path == file)
        .cloned();

    println!("file:           {}", file);
    println!("header:         {} bytes", header.len());
    println!("markers:        {}", parsed.has_markers);
    println!("remote section: {} bytes", parsed.remote_section.len());
    println!("local notes:    {} bytes", parsed.user_section.len());
    match record {
        Some(record) => {
            println!("page id:        {}", record.page_id);
            println!("last modified:  {}", record.last_modified.to_rfc3339());
            println!("last synced:    {}", record.last_synced_at.to_rfc3339());
        }
        None => println!("sync record:    none"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| Config::default_path(&args.vault).to_string_lossy().to_string());
    let config = Config::load(&config_path)?;
    let settings = config.settings.clone();

    // Set up logging - respects RUST_LOG env var, defaults to the configured level (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,mirror_core=debug,mirror_daemon=debug".to_string()
    } else {
        settings.log_level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Vault path: {:?}", args.vault);
    debug!("Config: {}", config_path);

    let fs = Arc::new(NativeFs::new(args.vault.clone()));

    if let Command::ClearHistory = args.command {
        let mut history = SyncHistoryStore::with_path(fs, settings.history_path.clone());
        history.clear_history().await?;
        return Ok(());
    }
    if let Command::Inspect { file } = &args.command {
        return inspect(&fs, &settings, file).await;
    }

    let client = Arc::new(ConfluenceHttpClient::new(
        &config.tenant.url,
        config.tenant.credentials()?,
    )?);

    let bus = Arc::new(EventBus::new());
    let _subscription = settings.show_notifications.then(|| notify(&bus));

    match args.command {
        Command::Sync { force } => {
            let mut engine =
                SyncEngine::new(client, fs, settings.clone()).with_events(bus.clone());
            if force {
                engine.set_force_sync(true);
            }
            run_sync(&mut engine).await?;
        }
        Command::Check => {
            let history = SyncHistoryStore::with_path(fs, settings.history_path.clone());
            let mut detector =
                BackgroundChangeDetector::new(client, history, settings.filters.clone())
                    .with_events(bus.clone());
            let count = detector.check_for_changes().await;
            println!("{}", count);
        }
        Command::Watch {
            interval,
            auto_sync,
        } => {
            let history = SyncHistoryStore::with_path(fs.clone(), settings.history_path.clone());
            let mut detector =
                BackgroundChangeDetector::new(client.clone(), history, settings.filters.clone())
                    .with_events(bus.clone());
            let mut engine =
                SyncEngine::new(client, fs, settings.clone()).with_events(bus.clone());

            let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
            info!("Watching for changes every {}s. Press Ctrl+C to stop.", interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let count = detector.check_for_changes().await;
                        if count > 0 && auto_sync {
                            if let Err(e) = run_sync(&mut engine).await {
                                error!("Sync failed: {:#}", e);
                            }
                        }
                    }

                    // Handle graceful shutdown
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }
        Command::TestConnection => {
            client.test_connection().await?;
            println!("Connected to {}", config.tenant.url);
        }
        Command::ClearHistory | Command::Inspect { .. } => {}
    }

    Ok(())
}
