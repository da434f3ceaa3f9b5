//! Architectural Contract Test: Write-back Idempotence
//!
//! This test verifies that backup and restore results reach the server at
//! most once per change: a batch identical to what is already stored
//! produces no write at all.
//!
//! Constraints verified:
//! - Identical results → zero writes
//! - Changed results → exactly one write
//! - Failed fetch → no write, one notification carrying the status
//! - One failing batch does not stop the write-back worker
//! - A panic while writing one batch is notified and the next batch is written
//! - A panic inside a results source loses one tick, not the poller
//!
//! If this test fails, someone has added:
//! - Unconditional writes on every poll
//! - Writes based on a stale or missing document
//! - A write-back worker that dies on the first error
//! - Write-back or polling that runs unisolated from panics

mod common;

use async_trait::async_trait;
use bond_core::error::Result;
use bond_core::event::VirtualMachine;
use bond_core::notify::Notifier;
use bond_core::results::{
    BackupRestorePair, BackupState, BackupStatus, BatchOutcome, ResultBatch, ResultsHandler,
    ResultsWriter,
};
use bond_core::plugin::PluginError;
use bond_core::traits::{HttpResponse, ResourceClient};
use bond_core::{ResourceCache, ResultsSource};
use common::*;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const LINK: &str = "http://m.test/api/vms/1/metadata";

fn cache_with_vm(name: &str, link: &str) -> Arc<ResourceCache> {
    let cache = Arc::new(ResourceCache::new());
    cache.insert_vm(&VirtualMachine::new(name, "ON").with_link("metadata", link));
    cache
}

fn stored_document() -> String {
    json!({
        "metadata": {
            "metadata": {
                "owner": "ops"
            }
        }
    })
    .to_string()
}

fn batch(name: &str, backup: &str) -> ResultBatch {
    ResultBatch::new(
        name,
        vec![BackupRestorePair::backup(BackupStatus::new(
            backup,
            BackupState::Done,
        ))],
    )
}

#[tokio::test]
async fn identical_results_are_written_exactly_once() {
    // Arrange
    let client = Arc::new(MockResourceClient::new().with_document(LINK, 200, &stored_document()));
    let writes = client.write_calls();
    let writer = ResultsWriter::new(cache_with_vm("vm-1", LINK), client.clone(), Notifier::disabled());

    // Act
    let first = writer.process(batch("vm-1", "nightly")).await;
    let second = writer.process(batch("vm-1", "nightly")).await;

    // Assert
    assert_eq!(first, BatchOutcome::Written(200));
    assert_eq!(second, BatchOutcome::Unchanged);
    assert_eq!(writes.load(Ordering::SeqCst), 1);

    let written = client.written();
    let (link, body) = written.lock().unwrap()[0].clone();
    assert_eq!(link, LINK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["metadata"]["metadata"]["owner"], "ops");
    assert_eq!(
        body["metadata"]["metadata"]["backupResults"]["results"][0]["name"],
        "nightly"
    );
}

#[tokio::test]
async fn changed_results_trigger_another_write() {
    // Arrange
    let client = Arc::new(MockResourceClient::new().with_document(LINK, 200, &stored_document()));
    let writes = client.write_calls();
    let writer = ResultsWriter::new(cache_with_vm("vm-1", LINK), client, Notifier::disabled());

    // Act
    writer.process(batch("vm-1", "nightly")).await;
    let outcome = writer.process(batch("vm-1", "weekly")).await;

    // Assert
    assert_eq!(outcome, BatchOutcome::Written(200));
    assert_eq!(writes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn not_found_fetch_skips_write_and_notifies_status() {
    // Arrange: the resource server has no document at the link
    let client = Arc::new(MockResourceClient::new());
    let writes = client.write_calls();
    let (notifier, mut notifications) = Notifier::channel(8);
    let writer = ResultsWriter::new(cache_with_vm("vm-1", LINK), client, notifier);

    // Act
    let outcome = writer.process(batch("vm-1", "nightly")).await;

    // Assert
    assert_eq!(outcome, BatchOutcome::FetchFailed(Some(404)));
    assert_eq!(writes.load(Ordering::SeqCst), 0);

    let notification = notifications.try_recv().expect("failure is notified");
    assert_eq!(notification.status(), Some(404));
    assert_eq!(notification.message(), "Failed to retrieve current metadata");
    assert!(notifications.try_recv().is_err(), "exactly one notification");
}

#[tokio::test]
async fn entity_without_cached_link_is_skipped() {
    // Arrange
    let client = Arc::new(MockResourceClient::new().with_document(LINK, 200, &stored_document()));
    let fetches = client.fetch_calls();
    let writer = ResultsWriter::new(Arc::new(ResourceCache::new()), client, Notifier::disabled());

    // Act
    let outcome = writer.process(batch("unknown-vm", "nightly")).await;

    // Assert
    assert_eq!(outcome, BatchOutcome::NoLink);
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn null_metadata_is_reported_and_not_written() {
    // Arrange
    let client = Arc::new(MockResourceClient::new().with_document(
        LINK,
        200,
        &json!({ "metadata": null }).to_string(),
    ));
    let writes = client.write_calls();
    let (notifier, mut notifications) = Notifier::channel(8);
    let writer = ResultsWriter::new(cache_with_vm("vm-1", LINK), client, notifier);

    // Act
    let outcome = writer.process(batch("vm-1", "nightly")).await;

    // Assert
    assert_eq!(outcome, BatchOutcome::MissingMetadata);
    assert_eq!(writes.load(Ordering::SeqCst), 0);
    let notification = notifications.try_recv().expect("failure is notified");
    assert!(notification.message().contains("original metadata is null"));
}

#[tokio::test]
async fn rejected_write_is_notified_with_server_errors() {
    // Arrange
    let client = Arc::new(
        MockResourceClient::new()
            .with_document(LINK, 200, &stored_document())
            .failing_writes(
                409,
                &json!({ "collection": [{ "code": "VM-9", "message": "Locked" }] }).to_string(),
            ),
    );
    let (notifier, mut notifications) = Notifier::channel(8);
    let writer = ResultsWriter::new(cache_with_vm("vm-1", LINK), client, notifier);

    // Act
    let outcome = writer.process(batch("vm-1", "nightly")).await;

    // Assert
    assert_eq!(outcome, BatchOutcome::WriteFailed(Some(409)));
    let notification = notifications.try_recv().expect("failure is notified");
    assert_eq!(notification.status(), Some(409));
    assert!(notification.message().contains("VM-9-Locked"));
}

#[tokio::test]
async fn repeated_polls_write_once_and_worker_survives_failures() {
    // Arrange: one VM with a document, one VM whose fetch fails
    const BROKEN: &str = "http://m.test/api/vms/2/metadata";
    let cache = cache_with_vm("vm-1", LINK);
    cache.insert_vm(&VirtualMachine::new("vm-2", "ON").with_link("metadata", BROKEN));

    let client = Arc::new(
        MockResourceClient::new()
            .with_document(LINK, 200, &stored_document())
            .with_document(BROKEN, 500, ""),
    );
    let writes = client.write_calls();
    let fetches = client.fetch_calls();

    let source = Arc::new(FixedResults::new(vec![
        batch("vm-2", "nightly"),
        batch("vm-1", "nightly"),
    ]));
    let polls = source.polls();
    let seen_entities = source.seen_entities();

    let handler = ResultsHandler::start(
        ResultsWriter::new(cache, client, Notifier::disabled()),
        Duration::from_millis(40),
    );

    // Act
    handler.add_source(source);
    assert!(wait_until(Duration::from_secs(3), || polls.load(Ordering::SeqCst) >= 3).await);
    assert!(
        wait_until(Duration::from_secs(2), || fetches.load(Ordering::SeqCst) >= 6).await,
        "every polled batch is processed"
    );
    handler.shutdown();

    // Assert
    assert_eq!(writes.load(Ordering::SeqCst), 1, "only the first poll writes");
    assert_eq!(
        *seen_entities.lock().unwrap(),
        vec!["vm-1".to_string(), "vm-2".to_string()]
    );
    assert!(!handler.submit(batch("vm-1", "late")));
}

/// Resource server that crashes whenever `link` is fetched
struct CrashingLink {
    link: &'static str,
    inner: MockResourceClient,
}

#[async_trait]
impl ResourceClient for CrashingLink {
    async fn fetch_entity(&self, link: &str) -> Result<HttpResponse> {
        if link == self.link {
            panic!("resource server crashed on {}", link);
        }
        self.inner.fetch_entity(link).await
    }

    async fn write_entity(&self, link: &str, body: &str) -> Result<HttpResponse> {
        self.inner.write_entity(link, body).await
    }

    async fn api_version(&self) -> Result<String> {
        self.inner.api_version().await
    }
}

/// Results source that crashes on its first poll only
struct CrashOnce {
    batches: Vec<ResultBatch>,
    polls: Arc<AtomicUsize>,
}

#[async_trait]
impl ResultsSource for CrashOnce {
    fn name(&self) -> &str {
        "crash-once"
    }

    async fn poll(&self, _entities: &[String]) -> std::result::Result<Vec<ResultBatch>, PluginError> {
        if self.polls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("results backend crashed");
        }
        Ok(self.batches.clone())
    }
}

#[tokio::test]
async fn panicking_write_back_is_notified_and_next_batch_is_written() {
    // Arrange: fetching vm-bad's metadata panics inside the client
    const BAD: &str = "http://m.test/api/vms/bad/metadata";
    let cache = cache_with_vm("vm-good", LINK);
    cache.insert_vm(&VirtualMachine::new("vm-bad", "ON").with_link("metadata", BAD));

    let inner = MockResourceClient::new().with_document(LINK, 200, &stored_document());
    let writes = inner.write_calls();
    let client = Arc::new(CrashingLink { link: BAD, inner });
    let (notifier, mut notifications) = Notifier::channel(8);
    let handler = ResultsHandler::start(
        ResultsWriter::new(cache, client, notifier),
        Duration::from_secs(60),
    );

    // Act
    assert!(handler.submit(batch("vm-bad", "nightly")));
    assert!(handler.submit(batch("vm-good", "nightly")));

    // Assert
    assert!(
        wait_until(Duration::from_secs(2), || writes.load(Ordering::SeqCst) == 1).await,
        "the batch after the crash is still written"
    );
    assert!(handler.submit(batch("vm-good", "weekly")), "worker is still accepting batches");
    assert!(wait_until(Duration::from_secs(2), || writes.load(Ordering::SeqCst) == 2).await);

    let notification = notifications.try_recv().expect("crash is notified");
    assert!(notification.message().contains("vm-bad"));
    handler.shutdown();
}

#[tokio::test]
async fn panicking_results_source_keeps_polling() {
    // Arrange
    let client = Arc::new(MockResourceClient::new().with_document(LINK, 200, &stored_document()));
    let writes = client.write_calls();
    let polls = Arc::new(AtomicUsize::new(0));
    let source = Arc::new(CrashOnce {
        batches: vec![batch("vm-1", "nightly")],
        polls: polls.clone(),
    });
    let (notifier, mut notifications) = Notifier::channel(8);
    let handler = ResultsHandler::start(
        ResultsWriter::new(cache_with_vm("vm-1", LINK), client, notifier),
        Duration::from_millis(40),
    );

    // Act
    handler.add_source(source);

    // Assert
    assert!(
        wait_until(Duration::from_secs(3), || writes.load(Ordering::SeqCst) == 1).await,
        "a later poll still delivers results"
    );
    assert!(polls.load(Ordering::SeqCst) >= 2);
    let notification = notifications.try_recv().expect("crash is notified");
    assert!(notification.message().contains("crash-once"));
    handler.shutdown();
}
