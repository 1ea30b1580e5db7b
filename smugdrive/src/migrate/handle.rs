use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::engine::{MigrationEngine, MigrationError, RunSummary};
use super::observer::{ChannelObserver, MigrationEvent};

/// A migration running on its own task. The front end drains `events` and
/// may cancel; the engine loop itself stays sequential.
pub struct MigrationHandle {
    events: mpsc::UnboundedReceiver<MigrationEvent>,
    cancel: CancellationToken,
    task: JoinHandle<Result<RunSummary, MigrationError>>,
}

impl MigrationHandle {
    pub fn spawn(mut engine: MigrationEngine) -> Self {
        let (observer, events) = ChannelObserver::channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let result = engine.run(&observer, &token).await;
            observer.send(MigrationEvent::Finished(
                result.as_ref().map(Clone::clone).map_err(|err| err.to_string()),
            ));
            result
        });
        Self {
            events,
            cancel,
            task,
        }
    }

    pub async fn next_event(&mut self) -> Option<MigrationEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> anyhow::Result<Result<RunSummary, MigrationError>> {
        Ok(self.task.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::catalog::SourceCatalog;
    use crate::migrate::engine::MigrationOptions;
    use crate::migrate::store::DestinationStore;
    use crate::migrate::transfer::{ContentFetcher, StagingArea, TransferClient};
    use smugdrive_core::{DriveClient, SmugMugClient, StaticAuthorization};
    use std::sync::Arc;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn spawned_run_reports_finished_event() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2!authuser"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Response": { "User": { "NickName": "jdoe" } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/user/jdoe!albums"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Response": { "Album": [], "Pages": { "Total": 0 } }
            })))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = SmugMugClient::with_base_url(
            &server.uri(),
            Arc::new(StaticAuthorization::new("OAuth t")),
        )
        .unwrap();
        let drive = DriveClient::with_base_url(&server.uri(), "token").unwrap();
        let engine = MigrationEngine::new(
            SourceCatalog::new(source),
            DestinationStore::new(drive, TransferClient::new()),
            ContentFetcher::new(TransferClient::new(), StagingArea::new(dir.path())),
            dir.path().join("state.json"),
            MigrationOptions {
                dry_run: true,
                ..MigrationOptions::default()
            },
        );

        let mut handle = MigrationHandle::spawn(engine);
        let mut finished = None;
        while let Some(event) = handle.next_event().await {
            if let MigrationEvent::Finished(result) = event {
                finished = Some(result);
            }
        }
        let summary = handle.wait().await.unwrap().unwrap();
        assert_eq!(finished, Some(Ok(summary.clone())));
        assert_eq!(summary.collections, 0);
    }
}
