use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::catalog::{CatalogError, Collection, Item, Listing, LocatorError, SourceCatalog};
use super::ledger::{LedgerError, Outcome, TransferLedger};
use super::observer::{Counters, MigrationObserver};
use super::store::{DestinationStore, StoreError};
use super::transfer::ContentFetcher;

pub const DEFAULT_ROOT_FOLDER: &str = "SmugMug Migration";
const DEFAULT_ITEM_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_SAVE_EVERY: usize = 10;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("progress ledger is unreadable, refusing to continue: {0}")]
    StateCorruption(#[source] LedgerError),
    #[error("progress ledger error: {0}")]
    Ledger(#[source] LedgerError),
    #[error("source listing failed: {0}")]
    Catalog(#[source] CatalogError),
    #[error("destination error: {0}")]
    Store(#[source] StoreError),
}

impl MigrationError {
    fn from_ledger(err: LedgerError) -> Self {
        match err {
            LedgerError::Corrupt { .. } => MigrationError::StateCorruption(err),
            LedgerError::Io { .. } => MigrationError::Ledger(err),
        }
    }
}

impl From<CatalogError> for MigrationError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Auth(ref source) => MigrationError::Auth(source.to_string()),
            CatalogError::NoAlbumListing => MigrationError::Auth(err.to_string()),
            other => MigrationError::Catalog(other),
        }
    }
}

impl From<StoreError> for MigrationError {
    fn from(err: StoreError) -> Self {
        if err.is_auth() {
            MigrationError::Auth(err.to_string())
        } else {
            MigrationError::Store(err)
        }
    }
}

/// Why a single item could not be transferred. Recorded as the ledger reason.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("no locator")]
    NotFound,
    #[error("{0}")]
    Transfer(String),
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl From<StoreError> for ItemError {
    fn from(err: StoreError) -> Self {
        if err.is_auth() {
            ItemError::Auth(err.to_string())
        } else {
            ItemError::Transfer(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub root_folder: String,
    pub dry_run: bool,
    pub skip_existing: bool,
    pub retry_failed: bool,
    /// Album keys to migrate; empty means every album.
    pub albums: Vec<String>,
    pub item_delay: Duration,
    pub save_every: usize,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            root_folder: DEFAULT_ROOT_FOLDER.to_string(),
            dry_run: false,
            skip_existing: true,
            retry_failed: false,
            albums: Vec::new(),
            item_delay: DEFAULT_ITEM_DELAY,
            save_every: DEFAULT_SAVE_EVERY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyMigrated,
    PreviouslyFailed,
    ExistsAtDestination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Done,
    Pending,
}

impl ItemStatus {
    pub fn label(self) -> &'static str {
        match self {
            ItemStatus::Done => "DONE",
            ItemStatus::Pending => "PENDING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Migrated,
    Skipped(SkipReason),
    Failed(String),
    /// Dry-run report; nothing was touched.
    DryRun(ItemStatus),
}

impl ItemOutcome {
    fn touched_ledger(&self) -> bool {
        matches!(
            self,
            ItemOutcome::Migrated
                | ItemOutcome::Failed(_)
                | ItemOutcome::Skipped(SkipReason::ExistsAtDestination)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub dry_run: bool,
    pub collections: usize,
    pub total_items: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Dry-run only: items not yet in the ledger as migrated.
    pub pending: usize,
    pub truncated_listings: usize,
    pub failed_collections: usize,
    pub cancelled: bool,
    /// Every failed id in the ledger with its reason, including earlier runs.
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Migrated => self.migrated += 1,
            ItemOutcome::Skipped(_) | ItemOutcome::DryRun(ItemStatus::Done) => self.skipped += 1,
            ItemOutcome::Failed(_) => self.failed += 1,
            ItemOutcome::DryRun(ItemStatus::Pending) => self.pending += 1,
        }
    }

    fn counters(&self, collections_done: usize) -> Counters {
        Counters {
            collections_done,
            collections_total: self.collections,
            processed: self.migrated + self.skipped + self.failed + self.pending,
            migrated: self.migrated,
            skipped: self.skipped,
            failed: self.failed,
        }
    }
}

/// Sequential, resumable migration of every selected album.
pub struct MigrationEngine {
    catalog: SourceCatalog,
    store: DestinationStore,
    fetcher: ContentFetcher,
    ledger_path: PathBuf,
    options: MigrationOptions,
}

impl MigrationEngine {
    pub fn new(
        catalog: SourceCatalog,
        store: DestinationStore,
        fetcher: ContentFetcher,
        ledger_path: impl Into<PathBuf>,
        options: MigrationOptions,
    ) -> Self {
        Self {
            catalog,
            store,
            fetcher,
            ledger_path: ledger_path.into(),
            options,
        }
    }

    /// Every album of the account, in listing order, without touching the
    /// destination or the ledger.
    pub async fn collections(&self) -> Result<Listing<Collection>, MigrationError> {
        let account = self.catalog.account().await?;
        Ok(self.catalog.list_collections(&account).await?)
    }

    /// Runs one migration pass. The ledger is loaded before any network call
    /// and, outside dry-run, saved again before this returns on every path
    /// past a successful load that left unsaved changes.
    pub async fn run(
        &mut self,
        observer: &dyn MigrationObserver,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, MigrationError> {
        let mut ledger = TransferLedger::load(&self.ledger_path)
            .await
            .map_err(MigrationError::from_ledger)?;
        let mut summary = RunSummary {
            dry_run: self.options.dry_run,
            ..RunSummary::default()
        };

        let result = self
            .run_collections(&mut ledger, &mut summary, observer, cancel)
            .await;

        if !self.options.dry_run && ledger.is_dirty() {
            if let Err(err) = ledger.save().await {
                tracing::error!(%err, "failed to save progress ledger");
                if result.is_ok() {
                    return Err(MigrationError::from_ledger(err));
                }
            }
        }
        if let Err(err) = result {
            tracing::error!(%err, "migration aborted");
            return Err(err);
        }

        summary.failures = ledger.failures();
        observer.log(&format!(
            "finished: {} migrated, {} skipped, {} failed",
            summary.migrated, summary.skipped, summary.failed
        ));
        Ok(summary)
    }

    async fn run_collections(
        &mut self,
        ledger: &mut TransferLedger,
        summary: &mut RunSummary,
        observer: &dyn MigrationObserver,
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError> {
        let listing = self.collections().await?;
        if listing.truncated {
            summary.truncated_listings += 1;
            observer.log("album listing is incomplete; some albums were not seen");
        }
        let collections = self.select(listing.items);
        summary.collections = collections.len();
        observer.log(&format!("found {} albums to process", collections.len()));

        let root = if self.options.dry_run {
            None
        } else {
            let root = self
                .store
                .ensure_folder(&self.options.root_folder, None)
                .await?;
            tracing::info!(folder = %self.options.root_folder, id = %root, "destination root ready");
            Some(root)
        };

        let save_every = self.options.save_every.max(1);
        let mut unsaved = 0usize;

        for (index, collection) in collections.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            observer.collection_started(&collection.display_name, index, collections.len());
            tracing::info!(
                album = %collection.id,
                path = %collection.path_segments.join("/"),
                "processing album"
            );

            let folder = match root.as_deref() {
                Some(root) => match self.store.ensure_path(root, &collection.path_segments).await
                {
                    Ok(id) => Some(id),
                    Err(err) if err.is_auth() => return Err(err.into()),
                    Err(err) => {
                        tracing::error!(album = %collection.id, %err, "could not resolve destination folder");
                        observer.log(&format!(
                            "skipping album {}: {err}",
                            collection.display_name
                        ));
                        summary.failed_collections += 1;
                        continue;
                    }
                },
                None => None,
            };

            let items = self.catalog.list_items(&collection.id).await?;
            if items.truncated {
                summary.truncated_listings += 1;
                observer.log(&format!(
                    "image listing for {} is incomplete",
                    collection.display_name
                ));
            }
            summary.total_items += items.items.len();

            for item in &items.items {
                if cancel.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
                let outcome = self.process_item(ledger, item, folder.as_deref()).await?;
                summary.record(&outcome);

                if outcome.touched_ledger() {
                    unsaved += 1;
                    if unsaved >= save_every {
                        ledger.save().await.map_err(MigrationError::from_ledger)?;
                        unsaved = 0;
                    }
                }
                observer.item_finished(&item.id, &item.filename, &outcome);
                observer.progress(&summary.counters(index));

                if matches!(outcome, ItemOutcome::Migrated | ItemOutcome::Failed(_)) {
                    self.throttle(cancel).await;
                }
            }
            if summary.cancelled {
                break;
            }
            observer.progress(&summary.counters(index + 1));
        }

        tracing::debug!(folders = self.store.folder_cache().len(), "destination folders resolved");
        if summary.cancelled {
            tracing::warn!("migration cancelled");
            observer.log("cancelled; progress saved");
        }
        Ok(())
    }

    fn select(&self, collections: Vec<Collection>) -> Vec<Collection> {
        if self.options.albums.is_empty() {
            return collections;
        }
        let wanted: HashSet<&str> = self.options.albums.iter().map(String::as_str).collect();
        let known: HashSet<&str> = collections.iter().map(|c| c.id.as_str()).collect();
        for key in wanted.difference(&known) {
            tracing::warn!(album = %key, "selected album not found in account");
        }
        collections
            .into_iter()
            .filter(|collection| wanted.contains(collection.id.as_str()))
            .collect()
    }

    async fn process_item(
        &self,
        ledger: &mut TransferLedger,
        item: &Item,
        folder: Option<&str>,
    ) -> Result<ItemOutcome, MigrationError> {
        let dry_run = self.options.dry_run;
        match ledger.outcome(&item.id) {
            Some(Outcome::Done) => {
                tracing::debug!(item = %item.id, "already migrated");
                return Ok(if dry_run {
                    ItemOutcome::DryRun(ItemStatus::Done)
                } else {
                    ItemOutcome::Skipped(SkipReason::AlreadyMigrated)
                });
            }
            Some(Outcome::Failed(reason)) if !self.options.retry_failed => {
                tracing::debug!(item = %item.id, reason = %reason, "previously failed, not retrying");
                return Ok(if dry_run {
                    ItemOutcome::DryRun(ItemStatus::Pending)
                } else {
                    ItemOutcome::Skipped(SkipReason::PreviouslyFailed)
                });
            }
            _ => {}
        }

        let Some(folder) = folder.filter(|_| !dry_run) else {
            return Ok(ItemOutcome::DryRun(ItemStatus::Pending));
        };

        if self.options.skip_existing {
            match self.store.file_exists(&item.filename, folder).await {
                Ok(true) => {
                    tracing::debug!(item = %item.id, file = %item.filename, "already at destination");
                    ledger.mark_done(&item.id);
                    return Ok(ItemOutcome::Skipped(SkipReason::ExistsAtDestination));
                }
                Ok(false) => {}
                Err(err) if err.is_auth() => return Err(err.into()),
                Err(err) => {
                    let reason = format!("existence check failed: {err}");
                    tracing::warn!(item = %item.id, %reason, "item failed");
                    ledger.mark_failed(&item.id, &reason);
                    return Ok(ItemOutcome::Failed(reason));
                }
            }
        }

        match self.transfer_item(item, folder).await {
            Ok(file_id) => {
                tracing::debug!(item = %item.id, file_id = %file_id, "transferred");
                ledger.mark_done(&item.id);
                Ok(ItemOutcome::Migrated)
            }
            Err(ItemError::Auth(reason)) => Err(MigrationError::Auth(reason)),
            Err(err) => {
                let reason = err.to_string();
                tracing::warn!(item = %item.id, file = %item.filename, %reason, "item failed");
                ledger.mark_failed(&item.id, &reason);
                Ok(ItemOutcome::Failed(reason))
            }
        }
    }

    /// Locator, staged download, upload. The staging file is dropped on
    /// every return path.
    async fn transfer_item(&self, item: &Item, folder: &str) -> Result<String, ItemError> {
        let locator = self
            .catalog
            .resolve_locator(item)
            .await
            .map_err(|err| match err {
                LocatorError::NotFound => ItemError::NotFound,
                LocatorError::Auth(source) => ItemError::Auth(source.to_string()),
            })?;
        let staged = self
            .fetcher
            .fetch(&locator, &item.filename)
            .await
            .map_err(|err| ItemError::Transfer(format!("download failed: {err}")))?;
        let file_id = self
            .store
            .write_file(staged.path(), &item.filename, folder)
            .await?;
        Ok(file_id)
    }

    async fn throttle(&self, cancel: &CancellationToken) {
        if self.options.item_delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.options.item_delay) => {}
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
