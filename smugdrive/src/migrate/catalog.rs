use std::future::Future;

use smugdrive_core::{Album, AlbumImage, Page, SmugMugClient, SmugMugError};
use thiserror::Error;
use url::Url;

use super::backoff::RetryPolicy;

/// SmugMug listings start at 1.
const FIRST_START: u32 = 1;
const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("source rejected credentials: {0}")]
    Auth(SmugMugError),
    #[error("source account request failed: {0}")]
    Account(SmugMugError),
    #[error("source account exposes no album listing")]
    NoAlbumListing,
}

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("no locator")]
    NotFound,
    #[error("source rejected credentials: {0}")]
    Auth(SmugMugError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: Option<String>,
    pub albums_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: String,
    pub display_name: String,
    pub path_segments: Vec<String>,
    pub item_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub filename: String,
    pub locator_hint: Option<String>,
}

/// Result of walking every page of a listing. `truncated` is set when a
/// page kept failing and the walk stopped before the provider said it was done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub truncated: bool,
}

/// Read-only, validated view of the source library.
pub struct SourceCatalog {
    client: SmugMugClient,
    page_size: u32,
    retry: RetryPolicy,
}

impl SourceCatalog {
    pub fn new(client: SmugMugClient) -> Self {
        Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::page_default(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn account(&self) -> Result<Account, CatalogError> {
        let user = self.client.authenticated_user().await.map_err(|err| {
            if err.is_auth() {
                CatalogError::Auth(err)
            } else {
                CatalogError::Account(err)
            }
        })?;
        let albums_uri = user.albums_uri().ok_or(CatalogError::NoAlbumListing)?;
        Ok(Account {
            name: user.account_name().map(str::to_string),
            albums_uri,
        })
    }

    pub async fn list_collections(
        &self,
        account: &Account,
    ) -> Result<Listing<Collection>, CatalogError> {
        let client = &self.client;
        let uri = account.albums_uri.as_str();
        let count = self.page_size;
        let raw = self
            .paginate("albums", move |start| client.albums_page(uri, start, count))
            .await?;
        Ok(Listing {
            items: raw
                .items
                .into_iter()
                .filter_map(|album| collection_from(album, account.name.as_deref()))
                .collect(),
            truncated: raw.truncated,
        })
    }

    pub async fn list_items(&self, collection_id: &str) -> Result<Listing<Item>, CatalogError> {
        let client = &self.client;
        let count = self.page_size;
        let raw = self
            .paginate("album images", move |start| {
                client.album_images_page(collection_id, start, count)
            })
            .await?;
        Ok(Listing {
            items: raw.items.into_iter().filter_map(item_from).collect(),
            truncated: raw.truncated,
        })
    }

    /// Largest rendition first, then the original upload; nothing else.
    pub async fn resolve_locator(&self, item: &Item) -> Result<Url, LocatorError> {
        let Some(image_uri) = item.locator_hint.as_deref() else {
            return Err(LocatorError::NotFound);
        };
        match self.client.largest_image(image_uri).await {
            Ok(Some(url)) => return Ok(url),
            Ok(None) => {}
            Err(err) if err.is_auth() => return Err(LocatorError::Auth(err)),
            Err(err) => {
                tracing::debug!(item = %item.id, %err, "largest rendition lookup failed");
            }
        }
        match self.client.image_download(image_uri).await {
            Ok(Some(url)) => Ok(url),
            Ok(None) => Err(LocatorError::NotFound),
            Err(err) if err.is_auth() => Err(LocatorError::Auth(err)),
            Err(err) => {
                tracing::debug!(item = %item.id, %err, "archive rendition lookup failed");
                Err(LocatorError::NotFound)
            }
        }
    }

    /// Offset pagination: advance by what each page actually returned; stop on
    /// an empty page or once `start + page length` passes the reported total.
    async fn paginate<T, F, Fut>(&self, what: &str, mut fetch: F) -> Result<Listing<T>, CatalogError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Page<T>, SmugMugError>>,
    {
        let mut start = FIRST_START;
        let mut items = Vec::new();
        loop {
            let Some(page) = self.fetch_page(what, start, &mut fetch).await? else {
                return Ok(Listing {
                    items,
                    truncated: true,
                });
            };
            if page.items.is_empty() {
                break;
            }
            let returned = page.items.len() as u32;
            items.extend(page.items);
            if start.saturating_add(returned) > page.total {
                break;
            }
            start = start.saturating_add(returned);
        }
        Ok(Listing {
            items,
            truncated: false,
        })
    }

    async fn fetch_page<T, F, Fut>(
        &self,
        what: &str,
        start: u32,
        fetch: &mut F,
    ) -> Result<Option<Page<T>>, CatalogError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Page<T>, SmugMugError>>,
    {
        let mut failures = 0u32;
        loop {
            let err = match fetch(start).await {
                Ok(page) => return Ok(Some(page)),
                Err(err) if err.is_auth() => return Err(CatalogError::Auth(err)),
                Err(err) => err,
            };
            failures += 1;
            if !err.is_retryable() || !self.retry.allows_retry(failures) {
                tracing::warn!(
                    what,
                    start,
                    attempts = failures,
                    %err,
                    "page request failed; listing is incomplete"
                );
                return Ok(None);
            }
            let delay = err
                .retry_after_secs()
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| self.retry.delay(failures - 1));
            tracing::debug!(what, start, attempt = failures, ?delay, %err, "retrying page");
            tokio::time::sleep(delay).await;
        }
    }
}

fn collection_from(album: Album, account_name: Option<&str>) -> Option<Collection> {
    let Some(id) = album.album_key.filter(|key| !key.is_empty()) else {
        tracing::warn!(name = ?album.name, "skipping album without a key");
        return None;
    };
    let display_name = album
        .name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Untitled Album".to_string());
    let path_segments = path_segments(album.url_path.as_deref(), account_name, &display_name);
    Some(Collection {
        id,
        display_name,
        path_segments,
        item_count: album.image_count,
    })
}

fn item_from(image: AlbumImage) -> Option<Item> {
    let locator_hint = image.image_uri().map(str::to_string);
    let Some(id) = image.image_key.filter(|key| !key.is_empty()) else {
        tracing::warn!(file = ?image.file_name, "skipping image without a key");
        return None;
    };
    let filename = image
        .file_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("{id}.jpg"));
    Some(Item {
        id,
        filename,
        locator_hint,
    })
}

/// Folder chain for an album: its URL path without the leading account
/// segment, or just the album name when nothing is left.
pub fn path_segments(
    url_path: Option<&str>,
    account_name: Option<&str>,
    display_name: &str,
) -> Vec<String> {
    let mut parts: Vec<&str> = url_path
        .unwrap_or_default()
        .split('/')
        .filter(|part| !part.is_empty())
        .collect();
    if let (Some(first), Some(account)) = (parts.first(), account_name)
        && *first == account
    {
        parts.remove(0);
    }
    if parts.is_empty() {
        return vec![display_name.to_string()];
    }
    parts.into_iter().map(str::to_string).collect()
}
