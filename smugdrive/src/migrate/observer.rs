use tokio::sync::mpsc;

use super::engine::{ItemOutcome, ItemStatus, RunSummary};

/// Running totals published after every item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub collections_done: usize,
    pub collections_total: usize,
    pub processed: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Narrow view of a run for front ends. Every method has a no-op default so
/// an observer only implements what it shows.
pub trait MigrationObserver: Send + Sync {
    fn collection_started(&self, _name: &str, _index: usize, _total: usize) {}

    fn item_finished(&self, _item_id: &str, _filename: &str, _outcome: &ItemOutcome) {}

    fn progress(&self, _counters: &Counters) {}

    fn log(&self, _line: &str) {}
}

/// Observer that drops everything; the engine's own tracing output remains.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl MigrationObserver for NoopObserver {}

/// Mirrors observer calls into `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl MigrationObserver for TracingObserver {
    fn collection_started(&self, name: &str, index: usize, total: usize) {
        tracing::info!("[{}/{}] {}", index + 1, total, name);
    }

    fn item_finished(&self, item_id: &str, filename: &str, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Failed(reason) => {
                tracing::warn!(item = item_id, file = filename, reason = %reason, "item failed");
            }
            ItemOutcome::Migrated => {
                tracing::info!(item = item_id, file = filename, "migrated");
            }
            ItemOutcome::DryRun(status) => {
                tracing::info!(item = item_id, "{}", dry_run_line(filename, *status));
            }
            other => {
                tracing::debug!(item = item_id, file = filename, outcome = ?other, "item settled");
            }
        }
    }

    fn log(&self, line: &str) {
        tracing::info!("{line}");
    }
}

/// One line of the dry-run report, e.g. `[PENDING] IMG_0001.JPG`.
pub fn dry_run_line(filename: &str, status: ItemStatus) -> String {
    format!("[{}] {filename}", status.label())
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationEvent {
    CollectionStarted {
        name: String,
        index: usize,
        total: usize,
    },
    ItemFinished {
        item_id: String,
        filename: String,
        outcome: ItemOutcome,
    },
    Progress(Counters),
    Log(String),
    Finished(Result<RunSummary, String>),
}

/// Forwards observer calls over an unbounded channel. Sends after the
/// receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<MigrationEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<MigrationEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MigrationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub(crate) fn send(&self, event: MigrationEvent) {
        let _ = self.tx.send(event);
    }
}

impl MigrationObserver for ChannelObserver {
    fn collection_started(&self, name: &str, index: usize, total: usize) {
        self.send(MigrationEvent::CollectionStarted {
            name: name.to_string(),
            index,
            total,
        });
    }

    fn item_finished(&self, item_id: &str, filename: &str, outcome: &ItemOutcome) {
        self.send(MigrationEvent::ItemFinished {
            item_id: item_id.to_string(),
            filename: filename.to_string(),
            outcome: outcome.clone(),
        });
    }

    fn progress(&self, counters: &Counters) {
        self.send(MigrationEvent::Progress(*counters));
    }

    fn log(&self, line: &str) {
        self.send(MigrationEvent::Log(line.to_string()));
    }
}
