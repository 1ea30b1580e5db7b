use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smugdrive_core::{ApiKeySigner, RequestSigner, StaticAuthorization};
use thiserror::Error;

use crate::migrate::engine::{DEFAULT_ROOT_FOLDER, MigrationOptions};

const APP_DIR_NAME: &str = "smugdrive";
const CONFIG_FILE_NAME: &str = "config.json";
const STATE_FILE_NAME: &str = "migration_state.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config {path:?} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
}

/// Settings persisted in `config.json`. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    pub smugmug_api_key: Option<String>,
    pub smugmug_authorization: Option<String>,
    pub google_access_token: Option<String>,
    pub folder_name: Option<String>,
    pub skip_existing: Option<bool>,
    pub retry_failed: Option<bool>,
    pub albums: Vec<String>,
    pub state_file: Option<PathBuf>,
    pub item_delay_ms: Option<u64>,
    #[serde(skip)]
    pub smugmug_base_url: Option<String>,
    #[serde(skip)]
    pub drive_base_url: Option<String>,
}

impl RunConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(value) = read("SMUGMUG_API_KEY") {
            self.smugmug_api_key = Some(value);
        }
        if let Some(value) = read("SMUGMUG_AUTHORIZATION") {
            self.smugmug_authorization = Some(value);
        }
        if let Some(value) = read("GOOGLE_DRIVE_TOKEN") {
            self.google_access_token = Some(value);
        }
        if let Some(value) = read("SMUGDRIVE_STATE_FILE") {
            self.state_file = Some(expand_home(&value));
        }
        if let Some(value) = read("SMUGDRIVE_ITEM_DELAY_MS").and_then(|v| v.trim().parse().ok()) {
            self.item_delay_ms = Some(value);
        }
        if let Some(value) = read("SMUGMUG_BASE_URL") {
            self.smugmug_base_url = Some(value);
        }
        if let Some(value) = read("GOOGLE_DRIVE_BASE_URL") {
            self.drive_base_url = Some(value);
        }
    }

    /// Folds command-line overrides on top of the file and environment.
    /// `needs_destination` is false for runs that never talk to Drive.
    pub fn resolve(
        self,
        cli: CliOverrides,
        needs_destination: bool,
    ) -> Result<ResolvedRun, ConfigError> {
        let source = if let Some(value) = self.smugmug_authorization {
            SourceCredentials::Authorization(value)
        } else if let Some(key) = self.smugmug_api_key {
            SourceCredentials::ApiKey(key)
        } else {
            return Err(ConfigError::MissingCredentials(
                "set SMUGMUG_API_KEY or SMUGMUG_AUTHORIZATION",
            ));
        };
        let drive_token = self.google_access_token;
        if needs_destination && drive_token.is_none() {
            return Err(ConfigError::MissingCredentials("set GOOGLE_DRIVE_TOKEN"));
        }

        let defaults = MigrationOptions::default();
        let options = MigrationOptions {
            root_folder: cli
                .folder
                .or(self.folder_name)
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ROOT_FOLDER.to_string()),
            dry_run: cli.dry_run,
            skip_existing: !cli.no_skip_existing && self.skip_existing.unwrap_or(true),
            retry_failed: cli.retry_failed || self.retry_failed.unwrap_or(false),
            albums: if cli.albums.is_empty() {
                self.albums
            } else {
                cli.albums
            },
            item_delay: self
                .item_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.item_delay),
            save_every: defaults.save_every,
        };

        Ok(ResolvedRun {
            source,
            drive_token,
            state_file: cli
                .state
                .or(self.state_file)
                .unwrap_or_else(default_state_path),
            smugmug_base_url: self.smugmug_base_url,
            drive_base_url: self.drive_base_url,
            options,
        })
    }
}

/// Values taken from the command line. Unset flags defer to the config.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub folder: Option<String>,
    pub dry_run: bool,
    pub no_skip_existing: bool,
    pub retry_failed: bool,
    pub albums: Vec<String>,
    pub state: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCredentials {
    ApiKey(String),
    Authorization(String),
}

impl SourceCredentials {
    pub fn signer(&self) -> Arc<dyn RequestSigner> {
        match self {
            SourceCredentials::ApiKey(key) => Arc::new(ApiKeySigner::new(key.clone())),
            SourceCredentials::Authorization(value) => {
                Arc::new(StaticAuthorization::new(value.clone()))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedRun {
    pub source: SourceCredentials,
    pub drive_token: Option<String>,
    pub state_file: PathBuf,
    pub smugmug_base_url: Option<String>,
    pub drive_base_url: Option<String>,
    pub options: MigrationOptions,
}

pub fn app_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

pub fn default_config_path() -> PathBuf {
    app_config_dir().join(CONFIG_FILE_NAME)
}

pub fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join(STATE_FILE_NAME)
}

fn expand_home(value: &str) -> PathBuf {
    match dirs::home_dir() {
        Some(home) => expand_with_home(value, &home),
        None => PathBuf::from(value),
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}
