//! Pipeline integration tests.
//!
//! Tests verify:
//! - Job execution end to end (lookup, download, transform, upload, update)
//! - Failure handling with no partial writes
//! - Orphan cleanup after a format change
//! - Acknowledgement rules and redelivery across shutdown
//! - Concurrency of the worker pool

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use imago_pipeline::broker::{Delivery, MemoryBroker, MessagePublisher};
use imago_pipeline::model::{CallbackId, JobState, OperationSet, TransformationRequest};
use imago_pipeline::pipeline::{PoolConfig, ProcessOutcome, TransformationProducer, WorkerPool};
use imago_pipeline::repository::ImageRepository;
use imago_pipeline::status::StatusCache;
use imago_pipeline::storage::blob_path;
use imago_pipeline::transform::ImageCodec;

use super::test_utils::{
    create_test_png, job_delivery, wait_for_terminal, ClosingSource, FailingStatusStore, Fixture,
    SlowBlobStore, TEST_TTL,
};

fn completed(outcome: ProcessOutcome) -> imago_pipeline::model::TransformationStatus {
    match outcome {
        ProcessOutcome::Completed(status) => status,
        other => panic!("Expected a recorded status, got {:?}", other),
    }
}

// =============================================================================
// Single Job Execution
// =============================================================================

#[tokio::test]
async fn test_successful_job_updates_record_and_blob() {
    let fixture = Fixture::new().await;
    let image = fixture.add_image("cat.png", create_test_png(40, 30)).await;

    let id = CallbackId::new();
    let request = TransformationRequest::new(
        image.id,
        fixture.user.id,
        OperationSet::encode_only("png").with_resize(20, 0),
    );

    let status = completed(fixture.processor().process(&job_delivery(id, &request, 0)).await);
    assert_eq!(status.state, JobState::Done);
    assert_eq!(status.status_id, id);
    assert_eq!(status.image_id, image.id);
    assert!(status.error_message.is_empty());

    // The status is what pollers will see
    let stored = fixture.statuses.get(&id).await.unwrap().unwrap();
    assert_eq!(stored, status);

    // Same name: the original blob was overwritten in place
    let path = blob_path(&fixture.user.id, "cat.png");
    let data = std::fs::read(fixture.blob_file(&path)).unwrap();
    let dims = ImageCodec::new().dimensions(&data).unwrap();
    assert_eq!(dims, (20, 15));

    let updated = fixture
        .repo
        .find_image_by_id(image.id, fixture.user.id)
        .await
        .unwrap();
    assert_eq!(updated.filename, "cat.png");
    assert_eq!(updated.format, "png");
    assert_eq!(updated.alt, image.alt);
    assert_eq!(fixture.repo.update_count(), 1);
}

#[tokio::test]
async fn test_format_change_removes_original_blob() {
    let fixture = Fixture::new().await;
    let image = fixture.add_image("cat.png", create_test_png(16, 16)).await;
    let processor = fixture.processor();

    let request = TransformationRequest::new(
        image.id,
        fixture.user.id,
        OperationSet::encode_only("jpeg").with_grayscale(),
    );
    let status = completed(
        processor
            .process(&job_delivery(CallbackId::new(), &request, 0))
            .await,
    );
    assert_eq!(status.state, JobState::Done);

    // Wait for the detached delete
    processor.cleanup().shutdown().await;
    assert_eq!(processor.cleanup().failure_count(), 0);
    assert_eq!(fixture.user_files(), vec!["cat.jpeg".to_string()]);

    let updated = fixture
        .repo
        .find_image_by_id(image.id, fixture.user.id)
        .await
        .unwrap();
    assert_eq!(updated.filename, "cat.jpeg");
    assert_eq!(updated.format, "jpeg");
    assert!(updated.url.ends_with("cat.jpeg"));

    let data = std::fs::read(fixture.blob_file(&blob_path(&fixture.user.id, "cat.jpeg"))).unwrap();
    assert_eq!(&data[0..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn test_same_format_keeps_filename_and_blob() {
    let fixture = Fixture::new().await;
    // Extension and recorded format disagree in case only
    let image = fixture
        .add_image_as("cat.PNG", "png", create_test_png(16, 16))
        .await;
    let processor = fixture.processor();

    let request = TransformationRequest::new(
        image.id,
        fixture.user.id,
        OperationSet::encode_only("png").with_resize(8, 8),
    );
    let status = completed(
        processor
            .process(&job_delivery(CallbackId::new(), &request, 0))
            .await,
    );
    assert_eq!(status.state, JobState::Done);

    processor.cleanup().shutdown().await;
    assert_eq!(fixture.user_files(), vec!["cat.PNG".to_string()]);

    let updated = fixture
        .repo
        .find_image_by_id(image.id, fixture.user.id)
        .await
        .unwrap();
    assert_eq!(updated.filename, "cat.PNG");
    assert_eq!(updated.format, "png");

    let data = std::fs::read(fixture.blob_file(&blob_path(&fixture.user.id, "cat.PNG"))).unwrap();
    assert_eq!(ImageCodec::new().dimensions(&data).unwrap(), (8, 8));
}

#[tokio::test]
async fn test_unknown_image_fails_without_writes() {
    let fixture = Fixture::new().await;
    fixture.add_image("cat.png", create_test_png(8, 8)).await;

    let request =
        TransformationRequest::new(999, fixture.user.id, OperationSet::encode_only("png"));
    let status = completed(
        fixture
            .processor()
            .process(&job_delivery(CallbackId::new(), &request, 0))
            .await,
    );

    assert_eq!(status.state, JobState::Failed);
    assert!(
        status.error_message.starts_with("image not found"),
        "unexpected error: {}",
        status.error_message
    );
    assert_eq!(fixture.repo.update_count(), 0);
    assert_eq!(fixture.user_files(), vec!["cat.png".to_string()]);
}

#[tokio::test]
async fn test_image_of_another_user_is_not_found() {
    let fixture = Fixture::new().await;
    let image = fixture.add_image("cat.png", create_test_png(8, 8)).await;

    let request =
        TransformationRequest::new(image.id, Uuid::new_v4(), OperationSet::encode_only("png"));
    let status = completed(
        fixture
            .processor()
            .process(&job_delivery(CallbackId::new(), &request, 0))
            .await,
    );

    assert_eq!(status.state, JobState::Failed);
    assert!(status.error_message.starts_with("image not found"));
    assert_eq!(fixture.repo.update_count(), 0);
}

#[tokio::test]
async fn test_unsupported_format_fails_without_writes() {
    let fixture = Fixture::new().await;
    let image = fixture.add_image("cat.png", create_test_png(8, 8)).await;

    let request =
        TransformationRequest::new(image.id, fixture.user.id, OperationSet::encode_only("xyz"));
    let status = completed(
        fixture
            .processor()
            .process(&job_delivery(CallbackId::new(), &request, 0))
            .await,
    );

    assert_eq!(status.state, JobState::Failed);
    assert!(
        status.error_message.contains("unsupported file format: xyz"),
        "unexpected error: {}",
        status.error_message
    );
    assert_eq!(fixture.repo.update_count(), 0);
    assert_eq!(fixture.user_files(), vec!["cat.png".to_string()]);
}

#[tokio::test]
async fn test_missing_blob_fails_as_download_error() {
    let fixture = Fixture::new().await;
    let image = fixture.add_image("cat.png", create_test_png(8, 8)).await;
    std::fs::remove_file(fixture.blob_file(&blob_path(&fixture.user.id, "cat.png"))).unwrap();

    let request =
        TransformationRequest::new(image.id, fixture.user.id, OperationSet::encode_only("png"));
    let status = completed(
        fixture
            .processor()
            .process(&job_delivery(CallbackId::new(), &request, 0))
            .await,
    );

    assert_eq!(status.state, JobState::Failed);
    assert!(status.error_message.starts_with("failed to download image"));
    assert_eq!(fixture.repo.update_count(), 0);
}

#[tokio::test]
async fn test_malformed_delivery_gets_no_status() {
    let fixture = Fixture::new().await;
    let processor = fixture.processor();

    let bad_key = Delivery {
        key: Some(Bytes::from_static(b"not-a-uuid")),
        payload: Bytes::from_static(b"{}"),
        partition: 0,
        offset: 0,
    };
    let outcome = processor.process(&bad_key).await;
    assert_eq!(outcome, ProcessOutcome::Malformed);
    assert!(outcome.should_ack());

    let id = CallbackId::new();
    let bad_body = Delivery {
        key: Some(Bytes::from(id.to_string())),
        payload: Bytes::from_static(b"not json"),
        partition: 0,
        offset: 1,
    };
    assert_eq!(processor.process(&bad_body).await, ProcessOutcome::Malformed);
    assert!(fixture.statuses.get(&id).await.unwrap().is_none());
}

// =============================================================================
// Worker Pool
// =============================================================================

#[tokio::test]
async fn test_enqueue_to_done_through_pool() {
    let fixture = Fixture::new().await;
    let image = fixture.add_image("dog.png", create_test_png(32, 32)).await;

    let broker = Arc::new(MemoryBroker::new());
    let producer = TransformationProducer::new(broker.clone(), fixture.statuses.clone());

    let pending = producer
        .enqueue(&TransformationRequest::new(
            image.id,
            fixture.user.id,
            OperationSet::encode_only("png").with_rotation(90.0),
        ))
        .await
        .unwrap();
    assert_eq!(pending.state, JobState::Pending);

    let pool = WorkerPool::start(
        PoolConfig::new(2),
        broker.clone(),
        fixture.processor(),
        CancellationToken::new(),
    );

    let status = wait_for_terminal(&fixture.statuses, pending.status_id, Duration::from_secs(10))
        .await
        .expect("job should finish");
    assert_eq!(status.state, JobState::Done);

    broker.shutdown();
    let report = pool.join().await;
    assert_eq!(report.processed, 1);
    assert_eq!(broker.acked_offsets(), vec![0]);
}

#[tokio::test]
async fn test_distinct_enqueues_get_distinct_ids() {
    let fixture = Fixture::new().await;
    let broker = Arc::new(MemoryBroker::new());
    let producer = TransformationProducer::new(broker.clone(), fixture.statuses.clone());

    let request = TransformationRequest::new(1, fixture.user.id, OperationSet::encode_only("png"));
    let first = producer.enqueue(&request).await.unwrap();
    let second = producer.enqueue(&request).await.unwrap();

    assert_ne!(first.status_id, second.status_id);
    assert_eq!(broker.queued(), 2);

    for id in [first.status_id, second.status_id] {
        let stored = fixture.statuses.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Pending);
    }
}

#[tokio::test]
async fn test_malformed_and_failed_messages_are_acked() {
    let fixture = Fixture::new().await;
    let image = fixture.add_image("cat.png", create_test_png(8, 8)).await;
    let broker = Arc::new(MemoryBroker::new());

    broker.publish(b"garbage", b"{}").await.unwrap();
    let failing = TransformationRequest::new(image.id, fixture.user.id, OperationSet::encode_only("xyz"));
    let id = CallbackId::new();
    broker
        .publish(id.to_string().as_bytes(), &serde_json::to_vec(&failing).unwrap())
        .await
        .unwrap();
    broker.shutdown();

    let pool = WorkerPool::start(
        PoolConfig::new(1),
        broker.clone(),
        fixture.processor(),
        CancellationToken::new(),
    );
    let report = pool.join().await;

    assert_eq!(report.processed, 2);
    assert_eq!(report.malformed, 1);
    assert_eq!(report.status_lost, 0);
    assert_eq!(broker.acked_offsets().len(), 2);
    assert!(broker.unacked().is_empty());

    let status = fixture.statuses.get(&id).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Failed);
}

#[tokio::test]
async fn test_status_write_failure_leaves_message_unacked() {
    let fixture = Fixture::new().await;
    let image = fixture.add_image("cat.png", create_test_png(8, 8)).await;
    let broker = Arc::new(MemoryBroker::new());

    let request = TransformationRequest::new(image.id, fixture.user.id, OperationSet::encode_only("png"));
    broker
        .publish(
            CallbackId::new().to_string().as_bytes(),
            &serde_json::to_vec(&request).unwrap(),
        )
        .await
        .unwrap();
    broker.shutdown();

    let broken = StatusCache::new(Arc::new(FailingStatusStore), TEST_TTL);
    let processor = fixture.processor_with(fixture.blobs.clone(), broken);

    let report = WorkerPool::start(PoolConfig::new(1), broker.clone(), processor, CancellationToken::new())
        .join()
        .await;

    assert_eq!(report.status_lost, 1);
    assert!(broker.acked_offsets().is_empty());
    assert_eq!(broker.unacked().len(), 1);
}

#[tokio::test]
async fn test_distinct_jobs_run_concurrently() {
    let fixture = Fixture::new().await;
    let broker = Arc::new(MemoryBroker::new());
    let slow = Arc::new(SlowBlobStore::new(
        fixture.blobs.clone(),
        Duration::from_millis(200),
    ));

    let mut ids = Vec::new();
    for i in 0..4 {
        let image = fixture
            .add_image(&format!("img{}.png", i), create_test_png(8, 8))
            .await;
        let id = CallbackId::new();
        let request =
            TransformationRequest::new(image.id, fixture.user.id, OperationSet::encode_only("png"));
        broker
            .publish(id.to_string().as_bytes(), &serde_json::to_vec(&request).unwrap())
            .await
            .unwrap();
        ids.push(id);
    }
    broker.shutdown();

    let processor = fixture.processor_with(slow.clone(), fixture.statuses.clone());
    let report = WorkerPool::start(PoolConfig::new(4), broker.clone(), processor, CancellationToken::new())
        .join()
        .await;

    assert_eq!(report.processed, 4);
    assert_eq!(slow.download_count(), 4);
    assert!(
        slow.max_concurrent() >= 2,
        "expected overlapping downloads, saw at most {}",
        slow.max_concurrent()
    );
    assert!(slow.max_concurrent() <= 4);

    for id in ids {
        let status = fixture.statuses.get(&id).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Done);
    }
}

#[tokio::test]
async fn test_shutdown_drains_forwarded_jobs_and_redelivers_the_rest() {
    let fixture = Fixture::new().await;
    let image = fixture.add_image("cat.png", create_test_png(8, 8)).await;
    let broker = Arc::new(MemoryBroker::new());
    let slow = Arc::new(SlowBlobStore::new(
        fixture.blobs.clone(),
        Duration::from_millis(150),
    ));

    const JOBS: usize = 8;
    let producer = TransformationProducer::new(broker.clone(), fixture.statuses.clone());
    let mut ids = Vec::new();
    for _ in 0..JOBS {
        let request =
            TransformationRequest::new(image.id, fixture.user.id, OperationSet::encode_only("png"));
        ids.push(producer.enqueue(&request).await.unwrap().status_id);
    }

    let cancel = CancellationToken::new();
    let pool = WorkerPool::start(
        PoolConfig {
            workers: 1,
            queue_factor: 1,
        },
        broker.clone(),
        fixture.processor_with(slow.clone(), fixture.statuses.clone()),
        cancel.clone(),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let report = pool.join().await;

    // Every forwarded job finished and was acknowledged
    assert_eq!(report.processed, report.reader.forwarded);
    let acked = broker.acked_offsets().len();
    assert_eq!(acked, report.processed);
    assert!(acked < JOBS, "shutdown should leave work behind");

    // Nothing was lost: the rest is either in flight or never received
    let unacked = broker.unacked();
    assert_eq!(acked + unacked.len() + broker.queued(), JOBS);

    let mut done = 0;
    for id in &ids {
        match fixture.statuses.get(id).await.unwrap().unwrap().state {
            JobState::Done => done += 1,
            JobState::Pending => {}
            JobState::Failed => panic!("no job should fail"),
        }
    }
    assert_eq!(done, acked);

    // A new consumer picks up what the old one left behind
    assert_eq!(broker.requeue_unacked().unwrap(), unacked.len());
    broker.shutdown();

    // One worker: every job rewrites the same blob
    let report = WorkerPool::start(
        PoolConfig::new(1),
        broker.clone(),
        fixture.processor(),
        CancellationToken::new(),
    )
    .join()
    .await;
    assert_eq!(report.processed, JOBS - acked);

    for id in &ids {
        let status = fixture.statuses.get(id).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Done);
    }
    assert!(broker.unacked().is_empty());
}

#[tokio::test]
async fn test_source_closes_only_after_drained_jobs_are_acked() {
    let fixture = Fixture::new().await;
    let image = fixture.add_image("cat.png", create_test_png(8, 8)).await;
    let broker = Arc::new(MemoryBroker::new());
    let slow = Arc::new(SlowBlobStore::new(
        fixture.blobs.clone(),
        Duration::from_millis(100),
    ));

    let producer = TransformationProducer::new(broker.clone(), fixture.statuses.clone());
    for _ in 0..4 {
        let request =
            TransformationRequest::new(image.id, fixture.user.id, OperationSet::encode_only("png"));
        producer.enqueue(&request).await.unwrap();
    }

    let source = Arc::new(ClosingSource::new(broker.clone()));
    let cancel = CancellationToken::new();
    let pool = WorkerPool::start(
        PoolConfig {
            workers: 1,
            queue_factor: 2,
        },
        source.clone(),
        fixture.processor_with(slow, fixture.statuses.clone()),
        cancel.clone(),
    );

    // Cancel while jobs are still queued behind the single worker
    tokio::time::sleep(Duration::from_millis(30)).await;
    cancel.cancel();
    let report = pool.join().await;

    assert!(report.reader.forwarded >= 2);
    assert_eq!(report.processed, report.reader.forwarded);

    // Every drained job got its ack in before the source was released
    let events = source.events();
    assert_eq!(events.last().map(String::as_str), Some("close"));
    assert_eq!(events.iter().filter(|e| *e == "close").count(), 1);
    assert_eq!(broker.acked_offsets().len(), report.processed);
}
