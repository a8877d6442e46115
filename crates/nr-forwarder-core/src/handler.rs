// Copyright 2025-Present New Relic, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Top-level forwarding pipeline: decode, build, dispatch.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::constants;
use crate::credentials::{CredentialBackend, CredentialResolver};
use crate::decode::{self, EntryType, ObjectStore};
use crate::dispatch::Dispatcher;
use crate::error::{ChunkFailure, DeliveryReport, ForwardError};
use crate::payload::{self, OutboundPayload};

/// Identity of the forwarder function itself, reported in the
/// Infrastructure payload context block.
#[derive(Debug, Clone, Default)]
pub struct FunctionContext {
    pub function_name: String,
    pub invoked_function_arn: String,
    pub log_group_name: String,
    pub log_stream_name: String,
}

/// Long-lived pipeline state, built once per process and shared across
/// warm invocations.
pub struct Forwarder {
    config: Config,
    credentials: CredentialResolver,
    objects: Arc<dyn ObjectStore>,
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(
        config: Config,
        backend: CredentialBackend,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let credentials = CredentialResolver::new(backend, &config);
        Self {
            config,
            credentials,
            objects,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Processes one invocation event end to end.
    ///
    /// All chunks for all destinations are dispatched concurrently.
    /// Successes are never rolled back; if any chunk fails the error
    /// carries a [`DeliveryReport`] naming which ones, and the caller
    /// decides whether to re-drive the whole event.
    pub async fn handle(
        &self,
        event: &Value,
        context: &FunctionContext,
        deadline: Option<Instant>,
    ) -> Result<(), ForwardError> {
        let license_key = self.credentials.resolve().await?;
        let batches = decode::decode(event, self.objects.as_ref()).await?;
        if batches.is_empty() {
            debug!("event carried no forwardable records");
            return Ok(());
        }

        // (url, chunk index within its destination, payload)
        let mut plan: Vec<(String, usize, OutboundPayload)> = Vec::new();
        let mut infra_chunks = 0;
        let mut logging_chunks = 0;

        for batch in &batches {
            let entry_type = EntryType::classify(batch, &self.config);
            debug!(
                log_group = batch.origin.log_group(),
                records = batch.records.len(),
                ?entry_type,
                "decoded batch"
            );

            if self.config.infra_enabled {
                let url = format!(
                    "{}{}/{}",
                    self.config.infra_endpoint(&license_key),
                    entry_type.infra_path(),
                    constants::INGEST_SERVICE_VERSION
                );
                for p in payload::build_infra_payloads(batch, entry_type, context, &self.config)? {
                    plan.push((url.clone(), infra_chunks, p));
                    infra_chunks += 1;
                }
            }
            if self.config.logging_enabled {
                let url = self.config.logging_endpoint(&license_key);
                for p in payload::build_logging_payloads(batch, &self.config)? {
                    plan.push((url.clone(), logging_chunks, p));
                    logging_chunks += 1;
                }
            }
        }

        if plan.is_empty() {
            debug!("no payloads to deliver after filtering");
            return Ok(());
        }

        let dispatcher = Dispatcher::new(self.client.clone(), &self.config).with_deadline(deadline);
        let total = plan.len();
        let sends = plan.iter().map(|(url, chunk, p)| {
            let dispatcher = &dispatcher;
            let license_key = license_key.as_str();
            async move {
                dispatcher
                    .send(url, license_key, p)
                    .await
                    .map_err(|error| ChunkFailure {
                        destination: p.destination,
                        chunk: *chunk,
                        error,
                    })
            }
        });

        let failures: Vec<ChunkFailure> = join_all(sends)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if failures.is_empty() {
            info!(chunks = total, "all payloads delivered");
            Ok(())
        } else {
            let report = DeliveryReport {
                delivered: total - failures.len(),
                total,
                failures,
            };
            error!(%report, "delivery incomplete");
            Err(ForwardError::Delivery(report))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::test_support::{
        data_message, subscription_event, FakeObjectStore,
    };

    fn forwarder(config: Config) -> Forwarder {
        Forwarder::new(
            config,
            CredentialBackend::Environment(Some("test-key".to_string())),
            Arc::new(FakeObjectStore::default()),
        )
    }

    #[test]
    fn infra_urls_follow_the_entry_type() {
        let config = Config::default();
        let base = config.infra_endpoint("test-key");
        assert_eq!(
            format!("{}{}/v1", base, EntryType::Lambda.infra_path()),
            "https://cloud-collector.newrelic.com/aws/lambda/v1"
        );
        assert_eq!(
            format!("{}{}/v1", base, EntryType::Vpc.infra_path()),
            "https://cloud-collector.newrelic.com/aws/vpc/v1"
        );
        assert_eq!(
            format!("{}{}/v1", base, EntryType::Other.infra_path()),
            "https://cloud-collector.newrelic.com/aws/v1"
        );
    }

    #[tokio::test]
    async fn control_messages_complete_without_dispatch() {
        // No endpoint override: a dispatch attempt would fail, so an Ok
        // here proves nothing was sent.
        let forwarder = forwarder(Config {
            license_key: "test-key".to_string(),
            ..Config::default()
        });
        let event = subscription_event(&serde_json::json!({
            "messageType": "CONTROL_MESSAGE",
            "owner": "CloudwatchLogs",
            "logGroup": "",
            "logStream": "",
            "subscriptionFilters": [],
            "logEvents": [{ "id": "", "timestamp": 0, "message": "CWL CONTROL MESSAGE" }],
        }));
        forwarder
            .handle(&event, &FunctionContext::default(), None)
            .await
            .expect("control messages are a no-op");
    }

    #[tokio::test]
    async fn both_destinations_disabled_is_a_no_op() {
        let forwarder = forwarder(Config {
            license_key: "test-key".to_string(),
            infra_enabled: false,
            logging_enabled: false,
            ..Config::default()
        });
        let event = subscription_event(&data_message("/aws/lambda/fn", "stream", &["hello"]));
        forwarder
            .handle(&event, &FunctionContext::default(), None)
            .await
            .expect("nothing to deliver");
    }

    #[tokio::test]
    async fn malformed_events_error_before_any_dispatch() {
        let forwarder = forwarder(Config {
            license_key: "test-key".to_string(),
            ..Config::default()
        });
        let event = serde_json::json!({ "awslogs": { "data": "!!not base64!!" } });
        let err = forwarder
            .handle(&event, &FunctionContext::default(), None)
            .await
            .expect_err("should fail to decode");
        assert!(matches!(err, ForwardError::Decode(_)));
    }
}
