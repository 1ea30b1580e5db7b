use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger {path:?} is not valid: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("ledger I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed(String),
}

/// On-disk shape: `{"migrated": [id, ..], "failed": {id: reason, ..}}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    migrated: Vec<String>,
    #[serde(default)]
    failed: BTreeMap<String, String>,
}

/// Persisted per-item transfer outcomes. One record per item id.
#[derive(Debug)]
pub struct TransferLedger {
    path: PathBuf,
    records: HashMap<String, Outcome>,
    dirty: bool,
}

impl TransferLedger {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: HashMap::new(),
            dirty: false,
        }
    }

    /// Loads the ledger at `path`. A missing file is an empty ledger; a file
    /// that does not parse is an error and is left untouched.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no ledger yet, starting empty");
                return Ok(Self::empty(path));
            }
            Err(source) => return Err(LedgerError::Io { path, source }),
        };
        let file: LedgerFile = match serde_json::from_slice(&raw) {
            Ok(file) => file,
            Err(source) => return Err(LedgerError::Corrupt { path, source }),
        };

        let mut records = HashMap::with_capacity(file.migrated.len() + file.failed.len());
        for (id, reason) in file.failed {
            records.insert(id, Outcome::Failed(reason));
        }
        let mut overlapping = 0usize;
        for id in file.migrated {
            if let Some(Outcome::Failed(_)) = records.insert(id, Outcome::Done) {
                overlapping += 1;
            }
        }
        if overlapping > 0 {
            tracing::warn!(
                path = %path.display(),
                overlapping,
                "ledger lists items as both migrated and failed; keeping them as migrated"
            );
        }

        let ledger = Self {
            path,
            records,
            dirty: overlapping > 0,
        };
        tracing::info!(
            done = ledger.done_count(),
            failed = ledger.failed_count(),
            "loaded migration ledger"
        );
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn outcome(&self, item_id: &str) -> Option<&Outcome> {
        self.records.get(item_id)
    }

    pub fn is_done(&self, item_id: &str) -> bool {
        matches!(self.records.get(item_id), Some(Outcome::Done))
    }

    pub fn failure(&self, item_id: &str) -> Option<&str> {
        match self.records.get(item_id) {
            Some(Outcome::Failed(reason)) => Some(reason),
            _ => None,
        }
    }

    pub fn mark_done(&mut self, item_id: &str) {
        self.records.insert(item_id.to_string(), Outcome::Done);
        self.dirty = true;
    }

    pub fn mark_failed(&mut self, item_id: &str, reason: &str) {
        self.records
            .insert(item_id.to_string(), Outcome::Failed(reason.to_string()));
        self.dirty = true;
    }

    pub fn done_count(&self) -> usize {
        self.records
            .values()
            .filter(|outcome| matches!(outcome, Outcome::Done))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.records.len() - self.done_count()
    }

    /// Failed ids with their reasons, ordered by id.
    pub fn failures(&self) -> Vec<(String, String)> {
        let mut failures: Vec<_> = self
            .records
            .iter()
            .filter_map(|(id, outcome)| match outcome {
                Outcome::Failed(reason) => Some((id.clone(), reason.clone())),
                Outcome::Done => None,
            })
            .collect();
        failures.sort();
        failures
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Replaces the file on disk with the current records. The new content is
    /// written and synced to a sibling file first, then renamed over the old one.
    pub async fn save(&mut self) -> Result<(), LedgerError> {
        let mut file = LedgerFile::default();
        for (id, outcome) in &self.records {
            match outcome {
                Outcome::Done => file.migrated.push(id.clone()),
                Outcome::Failed(reason) => {
                    file.failed.insert(id.clone(), reason.clone());
                }
            }
        }
        file.migrated.sort();
        let body = serde_json::to_vec_pretty(&file).map_err(|source| LedgerError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        self.write_atomically(&body)
            .await
            .map_err(|source| LedgerError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.dirty = false;
        Ok(())
    }

    async fn write_atomically(&self, body: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(&self.path);
        let mut out = tokio::fs::File::create(&partial).await?;
        out.write_all(body).await?;
        out.flush().await?;
        out.sync_all().await?;
        drop(out);
        tokio::fs::rename(&partial, &self.path).await
    }

    /// Deletes the ledger file. Returns whether a file was removed.
    pub async fn reset(path: &Path) -> Result<bool, LedgerError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(LedgerError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}
