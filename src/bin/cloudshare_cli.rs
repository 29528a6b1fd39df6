//! CloudShare CLI - Command line client for a CloudShare server
//!
//! Usage:
//!   cloudshare-cli ls [--name <filter>] [--sort newest|oldest|name|size] [--search <text>]
//!   cloudshare-cli put <file>...            Upload files as one batch
//!   cloudshare-cli rm <id>                  Delete a file
//!   cloudshare-cli rename <id> <name>       Rename a file
//!   cloudshare-cli toggle <id>              Flip public/private
//!   cloudshare-cli share <id>               Print the share link of a public file
//!   cloudshare-cli download-url <id>        Print the download link
//!   cloudshare-cli config [--base-url <url>] Show or update the client config
//!
//! The session token is read from $CLOUDSHARE_TOKEN (or the variable named
//! in the config) before every request.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use cloudshare::client_config::{self, ClientConfig};
use cloudshare::remote::format_size;
use cloudshare::{
    CloudShareApi, EnvTokenProvider, FileCollectionStore, FileRecord, FileService, ItemId,
    MediaKind, SortKey, UploadObserver, UploadQueueConfig, UploadQueueManager, UploadSource,
    UploadStatus,
};

#[derive(Parser)]
#[command(
    name = "cloudshare-cli",
    about = "CloudShare CLI - personal cloud file storage client",
    version
)]
struct Cli {
    /// Use this API base URL instead of the configured one
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List files
    Ls {
        /// Server-side name filter
        #[arg(long)]
        name: Option<String>,
        /// Sort order: newest, oldest, name, size
        #[arg(long, default_value = "newest")]
        sort: SortKey,
        /// Case-insensitive search over the listed names
        #[arg(long, default_value = "")]
        search: String,
        /// Only show one media kind: image, video, audio, pdf, other
        #[arg(long)]
        kind: Option<MediaKind>,
    },
    /// Upload files as one batch
    Put {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Delete a file
    Rm { id: String },
    /// Rename a file
    Rename { id: String, name: String },
    /// Flip a file between public and private
    Toggle { id: String },
    /// Print the share link of a public file
    Share { id: String },
    /// Print the download link of a file
    DownloadUrl { id: String },
    /// Show or update the client config
    Config {
        /// Persist a new API base URL
        #[arg(long)]
        base_url: Option<String>,
    },
}

/// Draws one progress bar per queued file
struct BarObserver {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: Mutex<HashMap<ItemId, ProgressBar>>,
}

impl BarObserver {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{prefix:>24} [{bar:30}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        Self {
            multi: MultiProgress::new(),
            style,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn track(&self, id: ItemId, name: &str) {
        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(self.style.clone());
        bar.set_prefix(name.to_string());
        self.bars.lock().insert(id, bar);
    }
}

impl UploadObserver for BarObserver {
    fn on_progress(&self, item: ItemId, percent: f64) {
        if let Some(bar) = self.bars.lock().get(&item) {
            bar.set_position(percent.round() as u64);
        }
    }

    fn on_item_finished(&self, item: ItemId, status: UploadStatus) {
        if let Some(bar) = self.bars.lock().get(&item) {
            match status {
                UploadStatus::Succeeded => bar.finish_with_message("done"),
                _ => bar.abandon_with_message("failed"),
            }
        }
    }

    fn on_batch_complete(&self, records: &[FileRecord]) {
        tracing::debug!("Batch of {} files complete", records.len());
    }
}

fn print_records(records: &[FileRecord]) {
    if records.is_empty() {
        println!("No files.");
        return;
    }
    for r in records {
        println!(
            "{:<36}  {:>10}  {}  {:<7}  {}",
            r.id,
            format_size(r.size_bytes),
            r.created_at.format("%Y-%m-%d %H:%M"),
            if r.is_public { "public" } else { "private" },
            r.name
        );
    }
}

async fn upload(
    config: &ClientConfig,
    service: Arc<dyn FileService>,
    store: &FileCollectionStore,
    paths: &[PathBuf],
) -> Result<()> {
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let source = UploadSource::from_path(path)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?;
        sources.push(source);
    }

    let names: Vec<String> = sources.iter().map(|s| s.name().to_string()).collect();
    let observer = Arc::new(BarObserver::new());
    let queue = UploadQueueManager::new(
        service,
        observer.clone(),
        UploadQueueConfig {
            clear_delay_ms: config.clear_delay_ms,
        },
    );
    for (id, name) in queue.enqueue(sources).into_iter().zip(&names) {
        observer.track(id, name);
    }

    let summary = queue.start_upload().await?;
    for e in &summary.errors {
        eprintln!("{}: {}", e.name, e.error);
    }
    println!(
        "{} uploaded, {} failed in {} ms",
        summary.uploaded, summary.failed, summary.duration_ms
    );

    if summary.completed {
        let count = store.refresh(None).await?;
        println!("{} files in your cloud", count);
        Ok(())
    } else {
        bail!("{} of {} uploads failed", summary.failed, queue.len())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = client_config::load_config();
    cloudshare::logging::init_console(&config.log_level);

    if let Some(url) = cli.server.clone() {
        config.base_url = url;
        client_config::validate_config(&mut config)?;
    }

    if let Commands::Config { base_url } = &cli.command {
        if let Some(url) = base_url {
            config.base_url = url.clone();
            client_config::validate_config(&mut config)?;
            let path = client_config::save_config(&config)?;
            println!("Saved {}", path.display());
        } else {
            println!("# {}", client_config::get_config_path().display());
        }
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let auth = Arc::new(EnvTokenProvider::new(config.token_env_var.clone()));
    let service: Arc<dyn FileService> = Arc::new(CloudShareApi::new(&config, auth));
    let store = FileCollectionStore::new(Arc::clone(&service));

    match cli.command {
        Commands::Ls {
            name,
            sort,
            search,
            kind,
        } => {
            store.refresh(name.as_deref()).await?;
            print_records(&store.view_filtered(sort, &search, kind));
        }
        Commands::Put { paths } => upload(&config, service, &store, &paths).await?,
        Commands::Rm { id } => {
            store.remove(&id).await?;
            println!("Deleted {}", id);
        }
        Commands::Rename { id, name } => {
            store.refresh(None).await?;
            let record = store.rename(&id, &name).await?;
            println!("Renamed {} to {}", record.id, record.name);
        }
        Commands::Toggle { id } => {
            store.refresh(None).await?;
            let record = store.toggle_visibility(&id).await?;
            println!(
                "{} is now {}",
                record.name,
                if record.is_public { "public" } else { "private" }
            );
        }
        Commands::Share { id } => {
            store.refresh(None).await?;
            println!("{}", store.share_link(&id)?);
        }
        Commands::DownloadUrl { id } => {
            store.refresh(None).await?;
            println!("{}", store.download_url(&id)?);
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
