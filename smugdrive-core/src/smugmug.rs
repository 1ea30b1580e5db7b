use std::sync::Arc;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::signer::RequestSigner;
use crate::status::{self, ApiErrorClass, classify_api_status};

const DEFAULT_BASE_URL: &str = "https://api.smugmug.com";

#[derive(Debug, Error)]
pub enum SmugMugError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after: Option<u64>,
    },
}

impl SmugMugError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            SmugMugError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::Auth))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SmugMugError::Request(err) => status::transport_is_retryable(err),
            SmugMugError::Url(_) => false,
            SmugMugError::Api { .. } => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            SmugMugError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct SmugMugClient {
    http: Client,
    base_url: Url,
    signer: Arc<dyn RequestSigner>,
}

impl SmugMugClient {
    pub fn new(signer: Arc<dyn RequestSigner>) -> Result<Self, SmugMugError> {
        Self::with_base_url(DEFAULT_BASE_URL, signer)
    }

    pub fn with_base_url(
        base_url: &str,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, SmugMugError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            signer,
        })
    }

    pub async fn authenticated_user(&self) -> Result<User, SmugMugError> {
        let payload: Envelope<UserResponse> = self.get_json("/api/v2!authuser", &[]).await?;
        Ok(payload.response.user)
    }

    pub async fn albums_page(
        &self,
        albums_uri: &str,
        start: u32,
        count: u32,
    ) -> Result<Page<Album>, SmugMugError> {
        let payload: Envelope<AlbumsResponse> = self
            .get_json(albums_uri, &paging(start, count))
            .await?;
        Ok(Page {
            items: payload.response.albums,
            total: payload.response.pages.map(|p| p.total).unwrap_or(0),
        })
    }

    pub async fn album_images_page(
        &self,
        album_key: &str,
        start: u32,
        count: u32,
    ) -> Result<Page<AlbumImage>, SmugMugError> {
        let uri = format!("/api/v2/album/{album_key}!images");
        let payload: Envelope<AlbumImagesResponse> =
            self.get_json(&uri, &paging(start, count)).await?;
        Ok(Page {
            items: payload.response.images,
            total: payload.response.pages.map(|p| p.total).unwrap_or(0),
        })
    }

    /// URL of the largest rendition the account may fetch, if any.
    pub async fn largest_image(&self, image_uri: &str) -> Result<Option<Url>, SmugMugError> {
        let uri = format!("{image_uri}!largestimage");
        let payload: Envelope<LargestImageResponse> = self.get_json(&uri, &[]).await?;
        Ok(payload.response.largest.and_then(RenditionRef::parsed))
    }

    /// URL of the original (archive) upload, if downloads are enabled.
    pub async fn image_download(&self, image_uri: &str) -> Result<Option<Url>, SmugMugError> {
        let uri = format!("{image_uri}!download");
        let payload: Envelope<ImageDownloadResponse> = self.get_json(&uri, &[]).await?;
        Ok(payload.response.download.and_then(RenditionRef::parsed))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        uri: &str,
        query: &[(&str, String)],
    ) -> Result<T, SmugMugError> {
        let mut url = self.endpoint(uri)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        let authorization = self.signer.sign(&Method::GET, &mut url);
        let mut request = self.http.get(url).header(ACCEPT, "application/json");
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        let response = request.send().await?;
        Self::handle_response(response).await
    }

    fn endpoint(&self, uri: &str) -> Result<Url, SmugMugError> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(Url::parse(uri)?);
        }
        Ok(self.base_url.join(uri)?)
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SmugMugError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let retry_after = status::retry_after_secs(response.headers());
            let body = response.text().await.unwrap_or_default();
            Err(SmugMugError::Api {
                status,
                body,
                retry_after,
            })
        }
    }
}

fn paging(start: u32, count: u32) -> [(&'static str, String); 2] {
    [("start", start.to_string()), ("count", count.to_string())]
}

/// One page of a listing together with the provider-reported total.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u32,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "Response")]
    response: T,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    #[serde(rename = "User")]
    user: User,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct User {
    #[serde(rename = "NickName", default)]
    pub nick_name: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Uris", default)]
    pub uris: UserUris,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct UserUris {
    #[serde(rename = "UserAlbums", default)]
    pub user_albums: Option<UriRef>,
}

/// The API reports linked resources either as `{"Uri": ".."}` or as a bare string.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UriRef {
    Object {
        #[serde(rename = "Uri")]
        uri: String,
    },
    Plain(String),
}

impl UriRef {
    pub fn as_str(&self) -> &str {
        match self {
            UriRef::Object { uri } => uri,
            UriRef::Plain(uri) => uri,
        }
    }
}

impl User {
    pub fn account_name(&self) -> Option<&str> {
        self.nick_name
            .as_deref()
            .or(self.name.as_deref())
            .filter(|name| !name.is_empty())
    }

    pub fn albums_uri(&self) -> Option<String> {
        if let Some(uri) = self
            .uris
            .user_albums
            .as_ref()
            .map(UriRef::as_str)
            .filter(|uri| !uri.is_empty())
        {
            return Some(uri.to_string());
        }
        self.account_name()
            .map(|name| format!("/api/v2/user/{name}!albums"))
    }
}

#[derive(Debug, Deserialize)]
struct PagesInfo {
    #[serde(rename = "Total", default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct AlbumsResponse {
    #[serde(rename = "Album", default)]
    albums: Vec<Album>,
    #[serde(rename = "Pages", default)]
    pages: Option<PagesInfo>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Album {
    #[serde(rename = "AlbumKey", default)]
    pub album_key: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "UrlPath", default)]
    pub url_path: Option<String>,
    #[serde(rename = "ImageCount", default)]
    pub image_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AlbumImagesResponse {
    #[serde(rename = "AlbumImage", default)]
    images: Vec<AlbumImage>,
    #[serde(rename = "Pages", default)]
    pages: Option<PagesInfo>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AlbumImage {
    #[serde(rename = "ImageKey", default)]
    pub image_key: Option<String>,
    #[serde(rename = "FileName", default)]
    pub file_name: Option<String>,
    #[serde(rename = "Uri", default)]
    pub uri: Option<String>,
    #[serde(rename = "Uris", default)]
    pub uris: ImageUris,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ImageUris {
    #[serde(rename = "Image", default)]
    pub image: Option<UriRef>,
}

impl AlbumImage {
    /// The image resource URI, preferring the linked `Uris.Image` entry.
    /// Blank values count as missing.
    pub fn image_uri(&self) -> Option<&str> {
        let linked = self.uris.image.as_ref().map(UriRef::as_str);
        linked
            .filter(|uri| !uri.is_empty())
            .or_else(|| self.uri.as_deref().filter(|uri| !uri.is_empty()))
    }
}

#[derive(Debug, Deserialize)]
struct RenditionRef {
    #[serde(rename = "Url", default)]
    url: Option<String>,
}

impl RenditionRef {
    fn parsed(self) -> Option<Url> {
        self.url.and_then(|url| Url::parse(&url).ok())
    }
}

#[derive(Debug, Deserialize)]
struct LargestImageResponse {
    #[serde(rename = "LargestImage", default)]
    largest: Option<RenditionRef>,
}

#[derive(Debug, Deserialize)]
struct ImageDownloadResponse {
    #[serde(rename = "ImageDownload", default)]
    download: Option<RenditionRef>,
}
