use chrono::Utc;
use rask_metrics_exporter::buffer::Batch;
use rask_metrics_exporter::converter::MetricConverter;
use rask_metrics_exporter::domain::Metric;
use rask_metrics_exporter::sender::{
    BatchTransmitter, ClientConfig, HttpClient, MAX_CONSECUTIVE_REDIRECTS, TransmissionStats,
    TransportOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

const IKEY: &str = "11111111-2222-3333-4444-555555555555";

fn create_test_batch(envelopes: usize) -> Batch {
    let converter = MetricConverter::new(IKEY, false);
    let metrics: Vec<Metric> = (0..envelopes)
        .map(|i| Metric::gauge(format!("metric_{i}"), i as f64, Utc::now()))
        .collect();
    Batch::new(converter.convert_all(&metrics))
}

fn client_for(uri: &str) -> HttpClient {
    HttpClient::new(ClientConfig {
        endpoint: uri.to_string(),
        timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap()
}

async fn mount_status(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path("/v2.1/track"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_successful_delivery() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2.1/track"))
        .and(header("content-type", "application/json; charset=utf-8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"itemsAccepted":3}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let stats = Arc::new(TransmissionStats::new());
    let transmitter = BatchTransmitter::new(client_for(&mock_server.uri()), stats.clone());

    let outcome = transmitter.send_batch(&create_test_batch(3)).await;
    assert_eq!(outcome, TransportOutcome::Success);
    assert_eq!(stats.snapshot().successful_requests, 1);

    let requests = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let envelopes = body.as_array().unwrap();
    assert_eq!(envelopes.len(), 3);
    assert_eq!(envelopes[0]["iKey"], IKEY);
    assert_eq!(envelopes[0]["data"]["baseType"], "MetricData");
}

#[tokio::test]
async fn test_server_errors_are_retryable() {
    for status in [500, 503, 408, 429] {
        let mock_server = MockServer::start().await;
        mount_status(&mock_server, status).await;

        let stats = Arc::new(TransmissionStats::new());
        let transmitter = BatchTransmitter::new(client_for(&mock_server.uri()), stats.clone());

        let outcome = transmitter.send_batch(&create_test_batch(1)).await;
        assert_eq!(outcome, TransportOutcome::Retryable, "status {status}");
        assert_eq!(stats.snapshot().retries, 1);
    }
}

#[tokio::test]
async fn test_client_errors_are_not_retryable() {
    for status in [400, 401, 403, 404] {
        let mock_server = MockServer::start().await;
        mount_status(&mock_server, status).await;

        let transmitter = BatchTransmitter::new(
            client_for(&mock_server.uri()),
            Arc::new(TransmissionStats::new()),
        );

        let outcome = transmitter.send_batch(&create_test_batch(1)).await;
        assert_eq!(outcome, TransportOutcome::NonRetryable, "status {status}");
    }
}

#[tokio::test]
async fn test_network_error_is_retryable() {
    // Nothing listens on the discard port.
    let stats = Arc::new(TransmissionStats::new());
    let transmitter = BatchTransmitter::new(client_for("http://127.0.0.1:9"), stats.clone());

    let outcome = transmitter.send_batch(&create_test_batch(1)).await;
    assert_eq!(outcome, TransportOutcome::Retryable);
    assert_eq!(stats.snapshot().exceptions, 1);
}

#[tokio::test]
async fn test_redirect_is_followed_and_remembered() {
    let old_server = MockServer::start().await;
    let new_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2.1/track"))
        .respond_with(
            ResponseTemplate::new(308)
                .insert_header("Location", format!("{}/v2.1/track", new_server.uri()).as_str()),
        )
        .expect(1)
        .mount(&old_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2.1/track"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&new_server)
        .await;

    let stats = Arc::new(TransmissionStats::new());
    let transmitter = BatchTransmitter::new(client_for(&old_server.uri()), stats.clone());

    let outcome = transmitter.send_batch(&create_test_batch(2)).await;
    assert_eq!(outcome, TransportOutcome::Success);
    assert_eq!(
        transmitter.endpoint().port(),
        url::Url::parse(&new_server.uri()).unwrap().port()
    );
    // The redirect hop is not counted as a failed request.
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.successful_requests, 1);
    assert_eq!(snapshot.failed_requests, 0);

    // Subsequent batches go straight to the new endpoint.
    let outcome = transmitter.send_batch(&create_test_batch(2)).await;
    assert_eq!(outcome, TransportOutcome::Success);
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2.1/track"))
        .respond_with(
            ResponseTemplate::new(307)
                .insert_header("Location", format!("{}/v2.1/track", mock_server.uri()).as_str()),
        )
        .mount(&mock_server)
        .await;

    let stats = Arc::new(TransmissionStats::new());
    let transmitter = BatchTransmitter::new(client_for(&mock_server.uri()), stats.clone());

    let outcome = transmitter.send_batch(&create_test_batch(1)).await;
    assert_eq!(outcome, TransportOutcome::Retryable);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), MAX_CONSECUTIVE_REDIRECTS as usize + 1);
    assert_eq!(stats.snapshot().failed_requests, 0);
}

#[tokio::test]
async fn test_redirect_without_location_is_dropped() {
    let mock_server = MockServer::start().await;
    mount_status(&mock_server, 302).await;

    let transmitter = BatchTransmitter::new(
        client_for(&mock_server.uri()),
        Arc::new(TransmissionStats::new()),
    );

    let outcome = transmitter.send_batch(&create_test_batch(1)).await;
    assert_eq!(outcome, TransportOutcome::NonRetryable);
}

#[tokio::test]
async fn test_self_monitoring_shuts_down_after_repeated_failures() {
    let mock_server = MockServer::start().await;
    mount_status(&mock_server, 401).await;

    let transmitter = BatchTransmitter::self_monitoring(
        client_for(&mock_server.uri()),
        Arc::new(TransmissionStats::new()),
    );

    let batch = create_test_batch(1);
    assert_eq!(transmitter.send_batch(&batch).await, TransportOutcome::NonRetryable);
    assert_eq!(transmitter.send_batch(&batch).await, TransportOutcome::NonRetryable);
    assert_eq!(transmitter.send_batch(&batch).await, TransportOutcome::SpecialShutdown);
}

#[tokio::test]
async fn test_self_monitoring_throttling_does_not_count_as_failure() {
    let mock_server = MockServer::start().await;
    mount_status(&mock_server, 429).await;

    let transmitter = BatchTransmitter::self_monitoring(
        client_for(&mock_server.uri()),
        Arc::new(TransmissionStats::new()),
    );

    let batch = create_test_batch(1);
    for _ in 0..5 {
        assert_eq!(transmitter.send_batch(&batch).await, TransportOutcome::Retryable);
    }
}

#[tokio::test]
async fn test_primary_never_signals_shutdown() {
    let mock_server = MockServer::start().await;
    mount_status(&mock_server, 401).await;

    let transmitter = BatchTransmitter::new(
        client_for(&mock_server.uri()),
        Arc::new(TransmissionStats::new()),
    );

    let batch = create_test_batch(1);
    for _ in 0..5 {
        assert_eq!(transmitter.send_batch(&batch).await, TransportOutcome::NonRetryable);
    }
}

#[tokio::test]
async fn test_empty_batch_is_not_sent() {
    let mock_server = MockServer::start().await;
    mount_status(&mock_server, 200).await;

    let transmitter = BatchTransmitter::new(
        client_for(&mock_server.uri()),
        Arc::new(TransmissionStats::new()),
    );

    assert_eq!(
        transmitter.send_batch(&Batch::new(Vec::new())).await,
        TransportOutcome::Success
    );
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}
