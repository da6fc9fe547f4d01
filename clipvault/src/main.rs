use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};

use clipvault::config::{AppConfig, StorageConfig};
use clipvault::database::models::NewEvent;
use clipvault::database::repositories::{EventRepository, SqlxEventRepository};
use clipvault::database;
use clipvault::domain::UploadHandle;
use clipvault::logging;
use clipvault::services::{EventDetails, EventTarget, IngestSource, ServiceContainer};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a clip link or a local video file into an event
    Ingest(IngestArgs),
    /// Show an event and its published variants
    Show {
        /// Event id
        event_id: i64,
    },
    /// Delete an event and every object stored for it
    Delete {
        /// Event id
        event_id: i64,
    },
    /// Check the media tools and the object store
    Check,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["url", "file"])))]
#[command(group(ArgGroup::new("target").required(true).args(["event_id", "title"])))]
struct IngestArgs {
    /// Remote clip URL
    #[arg(long)]
    url: Option<String>,

    /// Local video file
    #[arg(long)]
    file: Option<PathBuf>,

    /// Content type of --file; guessed from the extension when omitted
    #[arg(long, requires = "file")]
    content_type: Option<String>,

    /// Existing event to (re-)ingest into
    #[arg(long)]
    event_id: Option<i64>,

    /// Title of a new event
    #[arg(long)]
    title: Option<String>,

    /// Slug of a new event
    #[arg(long, requires = "title")]
    slug: Option<String>,

    /// Body text of a new event
    #[arg(long, requires = "title", default_value = "")]
    body: String,
}

impl IngestArgs {
    fn target(&self) -> EventTarget {
        match (self.event_id, &self.title) {
            (Some(id), _) => EventTarget::Existing(id),
            (None, title) => {
                let mut event = NewEvent::new(title.clone().unwrap_or_default()).with_body(&self.body);
                if let Some(slug) = &self.slug {
                    event = event.with_slug(slug);
                }
                EventTarget::New(event)
            }
        }
    }

    fn source(&self) -> IngestSource {
        match (&self.url, &self.file) {
            (Some(url), _) => IngestSource::remote(url),
            (None, Some(path)) => {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload".to_string());
                let content_type = self
                    .content_type
                    .clone()
                    .unwrap_or_else(|| guess_content_type(path).to_string());
                IngestSource::upload(UploadHandle::from_path(file_name, content_type, path))
            }
            (None, None) => IngestSource::default(),
        }
    }
}

fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "flv" => "video/x-flv",
        "ts" => "video/mp2t",
        _ => "application/octet-stream",
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let _log_guard = logging::init_logging(&config.log_dir).context("Failed to initialize logging")?;
    match logging::cleanup_old_logs(&config.log_dir).await {
        Ok(0) => {}
        Ok(removed) => debug!(removed, "Removed old log files"),
        Err(e) => warn!(error = %e, "Failed to clean up old log files"),
    }

    let command = match cli.command {
        Command::Show { event_id } => return show(&config, event_id).await,
        command => command,
    };

    let storage = StorageConfig::from_env().context("Invalid storage configuration")?;
    let container = ServiceContainer::new(&config, &storage)
        .await
        .context("Failed to initialize services")?;

    let token = container.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            token.cancel();
        }
    });

    let result = run(command, &container).await;
    container.shutdown().await;
    result
}

async fn run(command: Command, container: &ServiceContainer) -> anyhow::Result<ExitCode> {
    match command {
        Command::Ingest(args) => {
            let result = container
                .ingest
                .ingest(args.target(), args.source())
                .await
                .context("Ingestion failed")?;
            print_json(&result)?;
            if result.is_committed() {
                info!(event_id = result.event_id, "Done");
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Delete { event_id } => {
            let report = container.ingest.delete_event(event_id).await?;
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => {
            let report = container.ingest.check().await;
            print_json(&report)?;
            Ok(if report.is_healthy() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Show { event_id } => {
            print_json(&container.ingest.show(event_id).await?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `show` only needs the database, so it works without storage credentials.
async fn show(config: &AppConfig, event_id: i64) -> anyhow::Result<ExitCode> {
    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;
    let repo = SqlxEventRepository::new(pool.clone());

    let details = EventDetails {
        event: repo.get_event(event_id).await?,
        variants: repo.list_variants(event_id).await?,
    };
    print_json(&details)?;

    pool.close().await;
    Ok(ExitCode::SUCCESS)
}
