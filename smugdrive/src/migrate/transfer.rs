use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::Deserialize;
use smugdrive_core::RequestSigner;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("upload response carried no file id")]
    MissingFileId,
}

impl TransferError {
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            TransferError::Request(err)
                if err.status().is_some_and(|s| s.as_u16() == 401)
        )
    }
}

/// Streams bytes between content URLs and local files.
#[derive(Clone)]
pub struct TransferClient {
    http: Client,
    signer: Option<Arc<dyn RequestSigner>>,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: Option<String>,
}

impl TransferClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            signer: None,
        }
    }

    /// Signs content downloads with the source account's signer, for
    /// renditions that are not publicly reachable.
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub async fn download_to_path(&self, href: &Url, target: &Path) -> Result<u64, TransferError> {
        let mut url = href.clone();
        let authorization = self
            .signer
            .as_ref()
            .and_then(|signer| signer.sign(&Method::GET, &mut url));
        let mut request = self.http.get(url);
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        let response = request.send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    /// Sends the file at `source` to an upload session and returns the id of
    /// the file object the destination created.
    pub async fn upload_from_path(
        &self,
        session: &Url,
        source: &Path,
        content_type: &str,
    ) -> Result<String, TransferError> {
        let file = tokio::fs::File::open(source).await?;
        let len = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http
            .put(session.clone())
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        let uploaded: UploadedFile = response.json().await?;
        uploaded.id.ok_or(TransferError::MissingFileId)
    }
}

impl Default for TransferClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory that holds downloaded bytes between fetch and upload.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn system_temp() -> Self {
        Self::new(std::env::temp_dir())
    }

    /// Creates an empty staging file that is deleted when the returned
    /// handle is dropped. The filename's extension is kept as the suffix.
    pub fn acquire(&self, filename: &str) -> io::Result<NamedTempFile> {
        std::fs::create_dir_all(&self.dir)?;
        let suffix = Path::new(filename)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        tempfile::Builder::new()
            .prefix("smugdrive-")
            .suffix(&suffix)
            .tempfile_in(&self.dir)
    }
}

/// Downloads item content into scoped staging files.
#[derive(Clone)]
pub struct ContentFetcher {
    transfer: TransferClient,
    staging: StagingArea,
}

impl ContentFetcher {
    pub fn new(transfer: TransferClient, staging: StagingArea) -> Self {
        Self { transfer, staging }
    }

    /// Fetches `locator` into a fresh staging file. The file is removed when
    /// the returned handle drops, on success and on every error path.
    pub async fn fetch(&self, locator: &Url, filename: &str) -> Result<NamedTempFile, TransferError> {
        let staged = self.staging.acquire(filename)?;
        let bytes = self.transfer.download_to_path(locator, staged.path()).await?;
        tracing::debug!(%locator, bytes, path = %staged.path().display(), "staged content");
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smugdrive_core::ApiKeySigner;
    use tempfile::tempdir;
    use wiremock::matchers::{body_bytes, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn fetch_stages_content_and_cleans_up_on_drop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photos/a.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let fetcher = ContentFetcher::new(TransferClient::new(), StagingArea::new(dir.path()));
        let locator = Url::parse(&format!("{}/photos/a.jpg", server.uri())).unwrap();

        let staged = fetcher.fetch(&locator, "IMG_1.JPG").await.unwrap();
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"jpeg-bytes");
        assert!(staged.path().to_string_lossy().ends_with(".JPG"));
        assert_eq!(staged_files(dir.path()), 1);

        drop(staged);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_no_staging_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photos/gone.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let fetcher = ContentFetcher::new(TransferClient::new(), StagingArea::new(dir.path()));
        let locator = Url::parse(&format!("{}/photos/gone.jpg", server.uri())).unwrap();

        let err = fetcher.fetch(&locator, "gone.jpg").await.expect_err("404");
        assert!(matches!(err, TransferError::Request(_)));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn signed_download_carries_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photos/a.jpg"))
            .and(query_param("APIKey", "key-1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let client = TransferClient::new().with_signer(Arc::new(ApiKeySigner::new("key-1")));
        let target = dir.path().join("a.jpg");
        let locator = Url::parse(&format!("{}/photos/a.jpg", server.uri())).unwrap();

        assert_eq!(client.download_to_path(&locator, &target).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upload_puts_bytes_and_returns_file_id() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload/session/1"))
            .and(header("content-type", "image/png"))
            .and(body_bytes(b"png-bytes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "file-9",
                "name": "a.png"
            })))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("a.png");
        std::fs::write(&source, b"png-bytes").unwrap();
        let session = Url::parse(&format!("{}/upload/session/1", server.uri())).unwrap();

        let id = TransferClient::new()
            .upload_from_path(&session, &source, "image/png")
            .await
            .unwrap();
        assert_eq!(id, "file-9");
    }

    #[tokio::test]
    async fn upload_without_id_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload/session/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("a.png");
        std::fs::write(&source, b"x").unwrap();
        let session = Url::parse(&format!("{}/upload/session/2", server.uri())).unwrap();

        let err = TransferClient::new()
            .upload_from_path(&session, &source, "image/png")
            .await
            .expect_err("no id");
        assert!(matches!(err, TransferError::MissingFileId));
    }
}
