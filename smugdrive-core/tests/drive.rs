use serde_json::json;
use smugdrive_core::{ApiErrorClass, DriveClient, DriveError, FOLDER_MIME_TYPE, folder_query};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn find_files_sends_bearer_token_and_query() {
    let server = MockServer::start().await;
    let query = folder_query("Family", Some("root-1"));

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(header("authorization", "Bearer drive-token"))
        .and(query_param("q", query.as_str()))
        .and(query_param("pageSize", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [
                { "id": "f-1", "name": "Family", "mimeType": FOLDER_MIME_TYPE }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "drive-token").unwrap();
    let files = client.find_files(&query, 10).await.unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].id, "f-1");
    assert!(files[0].is_folder());
}

#[tokio::test]
async fn find_files_tolerates_missing_files_array() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "drive-token").unwrap();
    assert!(client.find_files("name = 'x'", 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn create_folder_posts_metadata_with_parent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/drive/v3/files"))
        .and(header("authorization", "Bearer drive-token"))
        .and(body_json(json!({
            "name": "Vacation",
            "mimeType": FOLDER_MIME_TYPE,
            "parents": ["f-1"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "f-2",
            "name": "Vacation",
            "mimeType": FOLDER_MIME_TYPE
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "drive-token").unwrap();
    let folder = client.create_folder("Vacation", Some("f-1")).await.unwrap();
    assert_eq!(folder.id, "f-2");
}

#[tokio::test]
async fn create_top_level_folder_omits_parents() {
    let server = MockServer::start().await;

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

    let client = DriveClient::with_base_url(&server.uri(), "drive-token").unwrap();
    let folder = client.create_folder("SmugMug Migration", None).await.unwrap();
    assert_eq!(folder.id, "root-1");
}

#[tokio::test]
async fn start_upload_returns_session_location() {
    let server = MockServer::start().await;
    let session = format!("{}/upload/session/abc", server.uri());

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(query_param("uploadType", "resumable"))
        .and(header("x-upload-content-type", "image/jpeg"))
        .and(body_json(json!({ "name": "a.jpg", "parents": ["f-2"] })))
        .respond_with(ResponseTemplate::new(200).insert_header("Location", session.as_str()))
        .expect(1)
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "drive-token").unwrap();
    let url = client.start_upload("a.jpg", "f-2", "image/jpeg").await.unwrap();
    assert_eq!(url.as_str(), session);
}

#[tokio::test]
async fn start_upload_without_location_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "drive-token").unwrap();
    let err = client
        .start_upload("a.jpg", "f-2", "image/jpeg")
        .await
        .expect_err("expected missing location");
    assert!(matches!(err, DriveError::MissingUploadLocation));
}

#[tokio::test]
async fn quota_and_auth_errors_are_classified() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(403).set_body_string("insufficient permissions"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "drive-token").unwrap();
    let err = client.create_folder("x", None).await.expect_err("403");
    assert_eq!(err.classification(), Some(ApiErrorClass::Auth));

    let err = client.find_files("name = 'x'", 1).await.expect_err("503");
    assert_eq!(err.classification(), Some(ApiErrorClass::Transient));
}

fn drive_error_body(reason: &str) -> serde_json::Value {
    json!({
        "error": {
            "code": 403,
            "message": reason,
            "errors": [{ "domain": "usageLimits", "reason": reason, "message": reason }]
        }
    })
}

#[tokio::test]
async fn forbidden_with_quota_reason_is_not_an_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(drive_error_body("storageQuotaExceeded")),
        )
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "drive-token").unwrap();
    let err = client
        .start_upload("a.jpg", "f-2", "image/jpeg")
        .await
        .expect_err("quota");
    assert_eq!(err.classification(), Some(ApiErrorClass::Permanent));
    assert!(!err.is_auth());
}

#[tokio::test]
async fn forbidden_with_rate_limit_reason_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(drive_error_body("userRateLimitExceeded")),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/drive/v3/files"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(drive_error_body("insufficientFilePermissions")),
        )
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "drive-token").unwrap();
    let err = client.find_files("name = 'x'", 1).await.expect_err("rate limit");
    assert_eq!(err.classification(), Some(ApiErrorClass::RateLimit));
    assert!(!err.is_auth());

    let err = client.create_folder("x", None).await.expect_err("permissions");
    assert!(err.is_auth());
}
