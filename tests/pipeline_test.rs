use chrono::Utc;
use parking_lot::Mutex;
use rask_metrics_exporter::app::{
    ExporterHandle, ExporterKind, ExporterState, MetricProducer, MetricsExporter, Options,
    Pipeline, SnapshotProducer, StatsbeatFactory,
};
use rask_metrics_exporter::buffer::Batch;
use rask_metrics_exporter::domain::{Envelope, Metric};
use rask_metrics_exporter::sender::{Transmit, TransmissionStats, TransportOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

const IKEY: &str = "11111111-2222-3333-4444-555555555555";

#[derive(Default)]
struct CountingTransmitter {
    sizes: Mutex<Vec<usize>>,
}

impl Transmit for CountingTransmitter {
    fn transmit(&self, batch: &Batch) -> impl Future<Output = TransportOutcome> + Send {
        self.sizes.lock().push(batch.size());
        async { TransportOutcome::Success }
    }
}

fn quiet_options(endpoint: &str) -> Options {
    Options {
        endpoint: endpoint.to_string(),
        enable_local_storage: false,
        enable_standard_metrics: false,
        enable_self_monitoring: false,
        export_interval_secs: 1,
        ..Options::new(IKEY)
    }
}

fn snapshot_with(count: usize) -> SnapshotProducer {
    let producer = SnapshotProducer::new();
    producer.replace(
        (0..count)
            .map(|i| Metric::gauge(format!("metric_{i}"), i as f64, Utc::now()))
            .collect(),
    );
    producer
}

async fn start_handle(kind: ExporterKind, interval: Duration) -> ExporterHandle<CountingTransmitter> {
    let exporter = MetricsExporter::with_transmitter(
        &quiet_options("https://example.com"),
        kind,
        CountingTransmitter::default(),
    )
    .await
    .unwrap();
    let producers: Vec<Arc<dyn MetricProducer>> = vec![Arc::new(snapshot_with(3))];
    ExporterHandle::start(Arc::new(exporter), producers, interval)
}

#[tokio::test]
async fn test_exports_periodically() {
    let handle = start_handle(ExporterKind::Primary, Duration::from_millis(50)).await;

    // The first export waits a full interval.
    assert!(handle.exporter().transmitter().sizes.lock().is_empty());

    tokio::time::sleep(Duration::from_millis(230)).await;
    let exported = handle.exporter().transmitter().sizes.lock().len();
    assert!(exported >= 2, "only {exported} exports");

    assert!(handle.shutdown().await);
}

#[tokio::test]
async fn test_primary_shutdown_flushes_once() {
    let handle = start_handle(ExporterKind::Primary, Duration::from_secs(3600)).await;

    assert!(handle.shutdown().await);
    assert_eq!(*handle.exporter().transmitter().sizes.lock(), vec![3]);
    assert_eq!(handle.state(), ExporterState::ShuttingDown);

    // Repeated shutdown is a no-op.
    assert!(!handle.shutdown().await);
    assert_eq!(handle.exporter().transmitter().sizes.lock().len(), 1);
}

#[tokio::test]
async fn test_self_monitoring_shutdown_does_not_flush() {
    let handle = start_handle(ExporterKind::SelfMonitoring, Duration::from_secs(3600)).await;

    assert!(handle.shutdown().await);
    assert!(handle.is_shut_down());
    assert!(handle.exporter().transmitter().sizes.lock().is_empty());
}

#[tokio::test]
async fn test_pipeline_delivers_to_ingestion() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2.1/track"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let producers: Vec<Arc<dyn MetricProducer>> = vec![Arc::new(snapshot_with(4))];
    let pipeline = Pipeline::start(&quiet_options(&mock_server.uri()), producers)
        .await
        .unwrap();
    assert!(!pipeline.self_monitoring_active());

    pipeline
        .processors()
        .add(|envelopes: &mut Vec<Envelope>| {
            envelopes.retain(|e| e.name.ends_with("Metric"));
            true
        });

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(pipeline.shutdown().await);
    assert!(!pipeline.shutdown().await);

    let requests = mock_server.received_requests().await.unwrap();
    // At least one periodic export plus the shutdown flush.
    assert!(requests.len() >= 2);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body.as_array().unwrap().len(), 4);
    assert!(pipeline.stats().snapshot().successful_requests >= 2);
}

#[tokio::test]
async fn test_pipeline_rejects_invalid_options() {
    let options = Options {
        max_batch_size: 0,
        ..quiet_options("https://example.com")
    };
    assert!(Pipeline::start(&options, Vec::new()).await.is_err());
}

#[tokio::test]
async fn test_statsbeat_factory_starts_once() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2.1/track"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let options = quiet_options(&mock_server.uri());
    let factory = StatsbeatFactory::new(&options, Arc::new(TransmissionStats::new()));
    assert!(!factory.is_started());

    let first = factory.get_or_start().await.map(|h| h as *const _);
    let second = factory.get_or_start().await.map(|h| h as *const _);
    assert!(first.is_some());
    assert_eq!(first, second);
    assert_eq!(
        factory.get_or_start().await.unwrap().exporter().kind(),
        ExporterKind::SelfMonitoring
    );

    assert!(factory.shutdown().await);
    assert!(!factory.shutdown().await);
    // Cancelled on shutdown, nothing was flushed.
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}
