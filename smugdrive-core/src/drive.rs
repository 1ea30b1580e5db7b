use reqwest::header::{AUTHORIZATION, LOCATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::status::{ApiErrorClass, classify_api_status};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("upload session response carried no location")]
    MissingUploadLocation,
}

impl DriveError {
    /// Drive answers 403 for quota and rate limits as well as for missing
    /// permissions, so the reason in the error body decides.
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, body } => Some(classify_drive_error(*status, body)),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::Auth))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ErrorReason {
    #[serde(default)]
    reason: String,
}

const RATE_LIMIT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "sharingRateLimitExceeded",
];

const QUOTA_REASONS: &[&str] = &[
    "storageQuotaExceeded",
    "quotaExceeded",
    "dailyLimitExceeded",
    "teamDriveFileLimitExceeded",
    "numChildrenInNonRootLimitExceeded",
];

fn classify_drive_error(status: StatusCode, body: &str) -> ApiErrorClass {
    if status != StatusCode::FORBIDDEN {
        return classify_api_status(status);
    }
    let reasons = serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.error.errors)
        .unwrap_or_default();
    if reasons.iter().any(|r| RATE_LIMIT_REASONS.contains(&r.reason.as_str())) {
        ApiErrorClass::RateLimit
    } else if reasons.iter().any(|r| QUOTA_REASONS.contains(&r.reason.as_str())) {
        ApiErrorClass::Permanent
    } else {
        ApiErrorClass::Auth
    }
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Runs a files search and returns at most `page_size` matches.
    pub async fn find_files(
        &self,
        query: &str,
        page_size: u32,
    ) -> Result<Vec<DriveFile>, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("fields", "files(id,name,mimeType)")
            .append_pair("pageSize", &page_size.max(1).to_string())
            .append_pair("spaces", "drive");
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        let list: FileList = Self::handle_response(response).await?;
        Ok(list.files)
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("fields", "id,name,mimeType");
        let body = NewFile {
            name,
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: parent.into_iter().collect(),
        };
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Opens a resumable upload session and returns the session URL the
    /// content must be `PUT` to.
    pub async fn start_upload(
        &self,
        name: &str,
        parent: &str,
        content_type: &str,
    ) -> Result<Url, DriveError> {
        let mut url = self.endpoint("/upload/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("fields", "id,name,mimeType");
        let body = NewFile {
            name,
            mime_type: None,
            parents: vec![parent],
        };
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .header("X-Upload-Content-Type", content_type)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(DriveError::MissingUploadLocation)?;
        Ok(Url::parse(location)?)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> DriveError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        DriveError::Api { status, body }
    }
}

/// Search for a non-trashed folder named exactly `name` under `parent`
/// (or anywhere the token can see, for a top-level lookup).
pub fn folder_query(name: &str, parent: Option<&str>) -> String {
    let mut query = format!(
        "name = '{}' and mimeType = '{}' and trashed = false",
        escape_query_value(name),
        FOLDER_MIME_TYPE
    );
    if let Some(parent) = parent {
        query.push_str(&format!(" and '{}' in parents", escape_query_value(parent)));
    }
    query
}

/// Search for a non-trashed, non-folder file named `name` directly under `parent`.
pub fn file_query(name: &str, parent: &str) -> String {
    format!(
        "name = '{}' and '{}' in parents and mimeType != '{}' and trashed = false",
        escape_query_value(name),
        escape_query_value(parent),
        FOLDER_MIME_TYPE
    )
}

pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Serialize)]
struct NewFile<'a> {
    name: &'a str,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parents: Vec<&'a str>,
}
