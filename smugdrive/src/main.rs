use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use smugdrive::config::{self, CliOverrides, ConfigError, ResolvedRun, RunConfig};
use smugdrive::logging;
use smugdrive::migrate::catalog::SourceCatalog;
use smugdrive::migrate::engine::{MigrationEngine, RunSummary};
use smugdrive::migrate::handle::MigrationHandle;
use smugdrive::migrate::ledger::TransferLedger;
use smugdrive::migrate::observer::{MigrationEvent, MigrationObserver, TracingObserver};
use smugdrive::migrate::store::DestinationStore;
use smugdrive::migrate::transfer::{ContentFetcher, StagingArea, TransferClient};
use smugdrive_core::{DriveClient, SmugMugClient};

#[derive(Debug, Parser)]
#[command(name = "smugdrive", version, about = "Copy a SmugMug library into Google Drive")]
struct Cli {
    /// Name of the top-level Drive folder to migrate into
    #[arg(long, value_name = "NAME")]
    folder: Option<String>,
    /// Report what would be migrated without transferring anything
    #[arg(long)]
    dry_run: bool,
    /// Transfer files even when a same-named file is already in the folder
    #[arg(long)]
    no_skip_existing: bool,
    /// Try items that failed in earlier runs again
    #[arg(long)]
    retry_failed: bool,
    /// Only migrate this album key (repeatable)
    #[arg(long = "album", value_name = "KEY")]
    albums: Vec<String>,
    /// Progress ledger location
    #[arg(long, value_name = "PATH")]
    state: Option<PathBuf>,
    /// Run configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// List albums with their folder path and image count, then exit
    #[arg(long)]
    list_albums: bool,
    /// Delete the progress ledger, then exit
    #[arg(long)]
    reset_progress: bool,
}

impl Cli {
    fn needs_destination(&self) -> bool {
        !(self.dry_run || self.list_albums)
    }

    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            folder: self.folder.clone(),
            dry_run: self.dry_run,
            no_skip_existing: self.no_skip_existing,
            retry_failed: self.retry_failed,
            albums: self.albums.clone(),
            state: self.state.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let _log_guard = logging::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let mut run_config = RunConfig::load(&config_path)?;
    run_config.apply_env();

    if cli.reset_progress {
        let path = cli
            .state
            .clone()
            .or_else(|| run_config.state_file.clone())
            .unwrap_or_else(config::default_state_path);
        let removed = TransferLedger::reset(&path).await?;
        if removed {
            println!("progress reset: removed {}", path.display());
        } else {
            println!("no progress ledger at {}", path.display());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let resolved = match run_config.resolve(cli.overrides(), cli.needs_destination()) {
        Ok(resolved) => resolved,
        Err(ConfigError::MissingCredentials(hint)) => {
            tracing::error!("missing credentials: {hint}");
            return Ok(ExitCode::from(1));
        }
        Err(err) => return Err(err.into()),
    };
    let engine = build_engine(&resolved)?;

    if cli.list_albums {
        let listing = engine.collections().await.context("failed to list albums")?;
        for album in &listing.items {
            let count = album
                .item_count
                .map(|count| count.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!("{}\t{}\t{}", album.id, album.path_segments.join("/"), count);
        }
        if listing.truncated {
            tracing::warn!("album listing is incomplete");
        }
        return Ok(ExitCode::SUCCESS);
    }

    tracing::info!(
        state = %resolved.state_file.display(),
        folder = %resolved.options.root_folder,
        dry_run = resolved.options.dry_run,
        "starting migration"
    );
    let mut handle = MigrationHandle::spawn(engine);
    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current item");
            cancel.cancel();
        }
    });

    let observer = TracingObserver;
    while let Some(event) = handle.next_event().await {
        forward(&observer, &event);
    }
    let summary = handle
        .wait()
        .await
        .context("migration task panicked")?
        .context("migration failed")?;
    print!("{}", format_summary(&summary));
    Ok(ExitCode::SUCCESS)
}

fn build_engine(run: &ResolvedRun) -> anyhow::Result<MigrationEngine> {
    let signer = run.source.signer();
    let source = match run.smugmug_base_url.as_deref() {
        Some(base) => SmugMugClient::with_base_url(base, signer.clone()),
        None => SmugMugClient::new(signer.clone()),
    }
    .context("invalid SmugMug base URL")?;
    let token = run.drive_token.clone().unwrap_or_default();
    let drive = match run.drive_base_url.as_deref() {
        Some(base) => DriveClient::with_base_url(base, token),
        None => DriveClient::new(token),
    }
    .context("invalid Google Drive base URL")?;

    Ok(MigrationEngine::new(
        SourceCatalog::new(source),
        DestinationStore::new(drive, TransferClient::new()),
        ContentFetcher::new(
            TransferClient::new().with_signer(signer),
            StagingArea::system_temp(),
        ),
        run.state_file.clone(),
        run.options.clone(),
    ))
}

fn forward(observer: &dyn MigrationObserver, event: &MigrationEvent) {
    match event {
        MigrationEvent::CollectionStarted { name, index, total } => {
            observer.collection_started(name, *index, *total)
        }
        MigrationEvent::ItemFinished {
            item_id,
            filename,
            outcome,
        } => observer.item_finished(item_id, filename, outcome),
        MigrationEvent::Progress(counters) => observer.progress(counters),
        MigrationEvent::Log(line) => observer.log(line),
        MigrationEvent::Finished(_) => {}
    }
}

fn format_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let title = if summary.dry_run {
        "Dry run summary"
    } else {
        "Migration summary"
    };
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "  albums:    {}", summary.collections);
    let _ = writeln!(out, "  items:     {}", summary.total_items);
    if summary.dry_run {
        let _ = writeln!(out, "  done:      {}", summary.skipped);
        let _ = writeln!(out, "  pending:   {}", summary.pending);
    } else {
        let _ = writeln!(out, "  migrated:  {}", summary.migrated);
        let _ = writeln!(out, "  skipped:   {}", summary.skipped);
        let _ = writeln!(out, "  failed:    {}", summary.failed);
    }
    if summary.truncated_listings > 0 {
        let _ = writeln!(
            out,
            "  warning: {} listing(s) ended early; rerun to pick up missed items",
            summary.truncated_listings
        );
    }
    if summary.failed_collections > 0 {
        let _ = writeln!(
            out,
            "  warning: {} album(s) skipped, destination folder unavailable",
            summary.failed_collections
        );
    }
    if summary.cancelled {
        let _ = writeln!(out, "  cancelled before completion; progress saved");
    }
    if !summary.failures.is_empty() {
        let _ = writeln!(out, "Failed items ({}):", summary.failures.len());
        for (id, reason) in &summary.failures {
            let _ = writeln!(out, "  {id}: {reason}");
        }
    }
    out
}
