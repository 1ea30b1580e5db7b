use std::collections::HashMap;
use std::path::Path;

use smugdrive_core::{DriveClient, DriveError, file_query, folder_query};
use thiserror::Error;

use super::transfer::{TransferClient, TransferError};

const LOOKUP_PAGE_SIZE: u32 = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("destination api error: {0}")]
    Api(#[from] DriveError),
    #[error("upload failed: {0}")]
    Upload(#[from] TransferError),
}

impl StoreError {
    pub fn is_auth(&self) -> bool {
        match self {
            StoreError::Api(err) => err.is_auth(),
            StoreError::Upload(err) => err.is_auth(),
        }
    }
}

/// Folder ids resolved during one run, keyed by `(parent id, name)`.
/// `None` as parent stands for the top level of the drive.
#[derive(Debug, Default)]
pub struct FolderCache {
    entries: HashMap<(Option<String>, String), String>,
}

impl FolderCache {
    pub fn get(&self, parent: Option<&str>, name: &str) -> Option<&str> {
        self.entries
            .get(&(parent.map(str::to_string), name.to_string()))
            .map(String::as_str)
    }

    fn insert(&mut self, parent: Option<&str>, name: &str, id: &str) {
        self.entries.insert(
            (parent.map(str::to_string), name.to_string()),
            id.to_string(),
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Folder/file view of the destination drive.
pub struct DestinationStore {
    client: DriveClient,
    transfer: TransferClient,
    folders: FolderCache,
}

impl DestinationStore {
    pub fn new(client: DriveClient, transfer: TransferClient) -> Self {
        Self {
            client,
            transfer,
            folders: FolderCache::default(),
        }
    }

    pub fn folder_cache(&self) -> &FolderCache {
        &self.folders
    }

    /// Returns the id of the folder `name` under `parent`, creating it only
    /// when no folder with exactly that name exists there yet.
    pub async fn ensure_folder(
        &mut self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, StoreError> {
        if let Some(id) = self.folders.get(parent, name) {
            return Ok(id.to_string());
        }

        let id = match self.find_folder(name, parent).await? {
            Some(id) => {
                tracing::debug!(name, parent, id = %id, "reusing destination folder");
                id
            }
            None => {
                let created = self.client.create_folder(name, parent).await?;
                tracing::info!(name, parent, id = %created.id, "created destination folder");
                created.id
            }
        };
        self.folders.insert(parent, name, &id);
        Ok(id)
    }

    /// Walks `segments` below `root`, ensuring each level, and returns the
    /// id of the deepest folder.
    pub async fn ensure_path(
        &mut self,
        root: &str,
        segments: &[String],
    ) -> Result<String, StoreError> {
        let mut current = root.to_string();
        for segment in segments {
            current = self.ensure_folder(segment, Some(&current)).await?;
        }
        Ok(current)
    }

    pub async fn file_exists(&self, name: &str, parent: &str) -> Result<bool, StoreError> {
        let files = self
            .client
            .find_files(&file_query(name, parent), LOOKUP_PAGE_SIZE)
            .await?;
        Ok(files.iter().any(|file| file.name == name && !file.is_folder()))
    }

    /// Uploads the staged file at `local` as `name` under `parent`.
    pub async fn write_file(
        &self,
        local: &Path,
        name: &str,
        parent: &str,
    ) -> Result<String, StoreError> {
        let content_type = content_type_for(name);
        let session = self.client.start_upload(name, parent, content_type).await?;
        let id = self
            .transfer
            .upload_from_path(&session, local, content_type)
            .await?;
        Ok(id)
    }

    async fn find_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let files = self
            .client
            .find_files(&folder_query(name, parent), LOOKUP_PAGE_SIZE)
            .await?;
        // The backend may match names case-insensitively; only an exact
        // name counts as the same folder.
        Ok(files
            .into_iter()
            .find(|file| file.name == name && file.is_folder())
            .map(|file| file.id))
    }
}

/// Media type for an upload, from the filename extension.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        "dng" => "image/x-adobe-dng",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mts" | "m2ts" => "video/mp2t",
        "3gp" => "video/3gpp",
        "wmv" => "video/x-ms-wmv",
        "mpg" | "mpeg" => "video/mpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use smugdrive_core::FOLDER_MIME_TYPE;
    use tempfile::tempdir;
    use wiremock::matchers::{body_bytes, body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_store(server: &MockServer) -> DestinationStore {
        let client = DriveClient::with_base_url(&server.uri(), "drive-token").unwrap();
        DestinationStore::new(client, TransferClient::new())
    }

    #[tokio::test]
    async fn ensure_folder_reuses_existing_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", folder_query("Family", Some("root")).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "fam-1", "name": "Family", "mimeType": FOLDER_MIME_TYPE }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "nope" })))
            .expect(0)
            .mount(&server)
            .await;

        let mut store = make_store(&server);
        assert_eq!(store.ensure_folder("Family", Some("root")).await.unwrap(), "fam-1");
        assert_eq!(store.ensure_folder("Family", Some("root")).await.unwrap(), "fam-1");
        assert_eq!(store.folder_cache().len(), 1);
    }

    #[tokio::test]
    async fn ensure_folder_creates_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .and(body_json(json!({
                "name": "SmugMug Migration",
                "mimeType": FOLDER_MIME_TYPE
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "root-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let mut store = make_store(&server);
        assert_eq!(
            store.ensure_folder("SmugMug Migration", None).await.unwrap(),
            "root-1"
        );
        assert_eq!(store.folder_cache().get(None, "SmugMug Migration"), Some("root-1"));
    }

    #[tokio::test]
    async fn differently_cased_match_is_not_reused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "lower", "name": "family", "mimeType": FOLDER_MIME_TYPE }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "upper" })))
            .expect(1)
            .mount(&server)
            .await;

        let mut store = make_store(&server);
        assert_eq!(store.ensure_folder("Family", Some("root")).await.unwrap(), "upper");
    }

    #[tokio::test]
    async fn ensure_path_walks_each_segment() {
        let server = MockServer::start().await;
        for (name, parent, id) in [("A", "root", "a"), ("B", "a", "b")] {
            Mock::given(method("GET"))
                .and(path("/drive/v3/files"))
                .and(query_param("q", folder_query(name, Some(parent)).as_str()))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "files": [{ "id": id, "name": name, "mimeType": FOLDER_MIME_TYPE }]
                })))
                .expect(1)
                .mount(&server)
                .await;
        }

        let mut store = make_store(&server);
        let segments = vec!["A".to_string(), "B".to_string()];
        assert_eq!(store.ensure_path("root", &segments).await.unwrap(), "b");
        assert_eq!(store.ensure_path("root", &segments).await.unwrap(), "b");
    }

    #[tokio::test]
    async fn file_exists_requires_exact_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", file_query("a.jpg", "f-1").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "x", "name": "a.jpg", "mimeType": "image/jpeg" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", file_query("B.jpg", "f-1").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "y", "name": "b.jpg", "mimeType": "image/jpeg" }]
            })))
            .mount(&server)
            .await;

        let store = make_store(&server);
        assert!(store.file_exists("a.jpg", "f-1").await.unwrap());
        assert!(!store.file_exists("B.jpg", "f-1").await.unwrap());
    }

    #[tokio::test]
    async fn write_file_opens_session_and_uploads() {
        let server = MockServer::start().await;
        let session = format!("{}/upload/session/7", server.uri());
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(body_json(json!({ "name": "clip.MOV", "parents": ["f-1"] })))
            .respond_with(ResponseTemplate::new(200).insert_header("Location", session.as_str()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload/session/7"))
            .and(body_bytes(b"movie"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "file-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let local = dir.path().join("staged");
        std::fs::write(&local, b"movie").unwrap();

        let store = make_store(&server);
        let id = store.write_file(&local, "clip.MOV", "f-1").await.unwrap();
        assert_eq!(id, "file-1");
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for("IMG_1.JPG"), "image/jpeg");
        assert_eq!(content_type_for("clip.mov"), "video/quicktime");
        assert_eq!(content_type_for("scan.tiff"), "image/tiff");
        assert_eq!(content_type_for("notes"), "application/octet-stream");
        assert_eq!(content_type_for("archive.xyz"), "application/octet-stream");
    }
}
