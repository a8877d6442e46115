// Copyright 2025-Present New Relic, Inc.
// SPDX-License-Identifier: Apache-2.0

//! End to end pipeline tests against a local intake server.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};

use nr_forwarder_core::{
    Config, CredentialBackend, ForwardError, Forwarder, FunctionContext, ObjectStore,
    ObjectStoreError,
};

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

fn subscription_event(log_group: &str, messages: &[&str]) -> Value {
    let events: Vec<Value> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            json!({
                "id": format!("event-{i}"),
                "timestamp": 1_709_000_000_000_i64 + i as i64,
                "message": m,
            })
        })
        .collect();
    let document = json!({
        "messageType": "DATA_MESSAGE",
        "owner": "123456789012",
        "logGroup": log_group,
        "logStream": "test-stream",
        "subscriptionFilters": ["forwarder"],
        "logEvents": events,
    });
    let compressed = gzip(document.to_string().as_bytes());
    json!({ "awslogs": { "data": BASE64.encode(compressed) } })
}

#[derive(Default)]
struct MemoryObjectStore {
    objects: HashMap<String, Vec<u8>>,
}

impl MemoryObjectStore {
    fn with_object(mut self, bucket: &str, key: &str, body: Vec<u8>) -> Self {
        self.objects.insert(format!("{bucket}/{key}"), body);
        self
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.objects
            .get(&format!("{bucket}/{key}"))
            .cloned()
            .ok_or_else(|| ObjectStoreError("no such object".to_string()))
    }
}

fn config(server: &mockito::Server) -> Config {
    Config {
        license_key: "test-key".to_string(),
        logging_enabled: true,
        infra_endpoint: Some(server.url()),
        logging_endpoint: Some(format!("{}/log/v1", server.url())),
        max_retries: 0,
        ..Config::default()
    }
}

fn forwarder(config: Config) -> Forwarder {
    Forwarder::new(
        config,
        CredentialBackend::Environment(Some("test-key".to_string())),
        Arc::new(MemoryObjectStore::default()),
    )
}

#[tokio::test]
async fn lambda_subscription_reaches_both_destinations() {
    let mut server = mockito::Server::new_async().await;
    let infra = server
        .mock("POST", "/aws/lambda/v1")
        .match_header("x-license-key", "test-key")
        .match_header("content-encoding", "gzip")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let logging = server
        .mock("POST", "/log/v1")
        .match_header("x-license-key", "test-key")
        .match_header("x-event-source", "logs")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let forwarder = forwarder(config(&server));
    let event = subscription_event(
        "/aws/lambda/my-func",
        &[
            "RequestId: 0f90f2c9-31d1-4a57-be36-e04031fe4d21 Error: Runtime exited",
            "plain application output",
        ],
    );
    forwarder
        .handle(&event, &FunctionContext::default(), None)
        .await
        .expect("pipeline");

    infra.assert_async().await;
    logging.assert_async().await;
}

#[tokio::test]
async fn vpc_flow_logs_use_the_vpc_ingest_path() {
    let mut server = mockito::Server::new_async().await;
    let infra = server
        .mock("POST", "/aws/vpc/v1")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let forwarder = forwarder(Config {
        logging_enabled: false,
        ..config(&server)
    });
    let event = subscription_event(
        "/aws/vpc/flow-logs/my-vpc",
        &["2 123456789012 eni-abc 10.0.0.1 10.0.0.2 443 34210 6 5 400 1 2 ACCEPT OK"],
    );
    forwarder
        .handle(&event, &FunctionContext::default(), None)
        .await
        .expect("pipeline");

    infra.assert_async().await;
}

#[tokio::test]
async fn stored_objects_flow_to_the_logging_destination() {
    let mut server = mockito::Server::new_async().await;
    let logging = server
        .mock("POST", "/log/v1")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;
    let infra = server
        .mock("POST", "/aws/v1")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let objects = MemoryObjectStore::default().with_object(
        "log-archive",
        "2026/08/29/app.log",
        b"line one\nline two\n".to_vec(),
    );
    let forwarder = Forwarder::new(
        config(&server),
        CredentialBackend::Environment(Some("test-key".to_string())),
        Arc::new(objects),
    );
    let event = json!({
        "Records": [
            { "s3": { "bucket": { "name": "log-archive" }, "object": { "key": "2026/08/29/app.log" } } }
        ]
    });
    forwarder
        .handle(&event, &FunctionContext::default(), None)
        .await
        .expect("pipeline");

    logging.assert_async().await;
    infra.assert_async().await;
}

#[tokio::test]
async fn rejected_chunks_surface_in_the_delivery_report() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/aws/lambda/v1")
        .with_status(403)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("POST", "/log/v1")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let forwarder = forwarder(config(&server));
    let event = subscription_event(
        "/aws/lambda/my-func",
        &["RequestId: 0f90f2c9-31d1-4a57-be36-e04031fe4d21 Error: oom"],
    );
    let err = forwarder
        .handle(&event, &FunctionContext::default(), None)
        .await
        .expect_err("infra chunk should fail");

    match err {
        ForwardError::Delivery(report) => {
            assert_eq!(report.total, 2);
            assert_eq!(report.delivered, 1);
            assert_eq!(report.failures.len(), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn malformed_events_never_reach_the_intake() {
    let mut server = mockito::Server::new_async().await;
    let nothing = server
        .mock("POST", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let forwarder = forwarder(config(&server));
    let event = json!({ "awslogs": { "data": "%%%" } });
    let err = forwarder
        .handle(&event, &FunctionContext::default(), None)
        .await
        .expect_err("should fail to decode");
    assert!(matches!(err, ForwardError::Decode(_)));

    nothing.assert_async().await;
}
