// Copyright 2025-Present New Relic, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Retrying HTTP delivery to the intake endpoints.
//!
//! Each sealed payload is posted with exponential backoff. Transport
//! errors, timeouts, and 408/429/5xx responses are retryable; any other
//! 4xx means the request itself is wrong and is failed immediately. The
//! dispatcher refuses to start a backoff sleep that would cross the
//! invocation deadline, abandoning the chunk instead so the runtime
//! never freezes us mid-retry.

use std::time::Duration;

use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::DeliveryError;
use crate::payload::{Destination, OutboundPayload};

/// Exponential backoff schedule. `delay_for(n)` is the sleep before the
/// n-th retry (zero-based), so a policy of 1s base and 2.0 multiplier
/// yields 1s, 2s, 4s.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
            multiplier: config.backoff_multiplier,
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial_backoff.mul_f64(self.multiplier.powi(retry as i32))
    }
}

enum Outcome {
    Success,
    Retryable(String),
    Rejected(DeliveryError),
}

/// Posts payloads to one endpoint URL with retries.
pub struct Dispatcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    request_timeout: Duration,
    deadline: Option<Instant>,
}

impl Dispatcher {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            policy: RetryPolicy::from_config(config),
            request_timeout: config.request_timeout,
            deadline: None,
        }
    }

    /// Bounds every backoff sleep by the invocation deadline.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Delivers one payload, retrying transient failures until the
    /// retry budget or the deadline runs out.
    pub async fn send(
        &self,
        url: &str,
        license_key: &str,
        payload: &OutboundPayload,
    ) -> Result<(), DeliveryError> {
        let attempts = self.policy.max_retries.saturating_add(1);
        let mut last = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.delay_for(attempt - 1);
                if let Some(deadline) = self.deadline {
                    if Instant::now() + delay >= deadline {
                        warn!(
                            destination = %payload.destination,
                            attempt,
                            "abandoning delivery, backoff would cross the invocation deadline"
                        );
                        return Err(DeliveryError::DeadlineExceeded);
                    }
                }
                debug!(destination = %payload.destination, attempt, ?delay, "retrying delivery");
                tokio::time::sleep(delay).await;
            }

            match self.attempt(url, license_key, payload).await {
                Outcome::Success => {
                    debug!(
                        destination = %payload.destination,
                        records = payload.record_count,
                        compressed = payload.body.len(),
                        "payload delivered"
                    );
                    return Ok(());
                }
                Outcome::Rejected(err) => return Err(err),
                Outcome::Retryable(reason) => {
                    warn!(destination = %payload.destination, attempt, %reason, "delivery attempt failed");
                    last = reason;
                }
            }
        }

        Err(DeliveryError::RetriesExhausted { attempts, last })
    }

    async fn attempt(&self, url: &str, license_key: &str, payload: &OutboundPayload) -> Outcome {
        let mut request = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .header("X-License-Key", license_key)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(ACCEPT_ENCODING, "gzip")
            .body(payload.body.clone());
        if payload.destination == Destination::Logging {
            request = request.header("X-Event-Source", "logs");
        }

        match request.send().await {
            Ok(response) => classify(response.status()),
            Err(err) => Outcome::Retryable(err.to_string()),
        }
    }
}

fn classify(status: StatusCode) -> Outcome {
    if status.is_success() {
        return Outcome::Success;
    }
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        return Outcome::Retryable(format!("status {status}"));
    }
    let hint = match status {
        StatusCode::BAD_REQUEST => "the intake did not understand the payload",
        StatusCode::FORBIDDEN => "review your license key",
        StatusCode::NOT_FOUND => "review the configured endpoint region",
        _ => "not retryable",
    };
    Outcome::Rejected(DeliveryError::Rejected { status, hint })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(destination: Destination) -> OutboundPayload {
        OutboundPayload {
            destination,
            body: vec![0x1f, 0x8b, 0x08, 0x00],
            uncompressed_len: 16,
            record_count: 1,
            oversized: false,
        }
    }

    fn config(max_retries: u32) -> Config {
        Config {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            ..Config::default()
        }
    }

    #[test]
    fn backoff_schedule_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn delivers_with_intake_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/log/v1")
            .match_header("x-license-key", "test-key")
            .match_header("content-encoding", "gzip")
            .match_header("content-type", "application/json")
            .match_header("x-event-source", "logs")
            .with_status(202)
            .expect(1)
            .create_async()
            .await;

        let dispatcher = Dispatcher::new(reqwest::Client::new(), &config(3));
        let url = format!("{}/log/v1", server.url());
        dispatcher
            .send(&url, "test-key", &payload(Destination::Logging))
            .await
            .expect("delivery");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn maximum_retry_budget_still_attempts_delivery() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/log/v1")
            .with_status(202)
            .expect(1)
            .create_async()
            .await;

        let dispatcher = Dispatcher::new(reqwest::Client::new(), &config(u32::MAX));
        let url = format!("{}/log/v1", server.url());
        dispatcher
            .send(&url, "test-key", &payload(Destination::Logging))
            .await
            .expect("delivery");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn infra_requests_omit_the_event_source_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/aws/v1")
            .match_header("x-event-source", mockito::Matcher::Missing)
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let dispatcher = Dispatcher::new(reqwest::Client::new(), &config(3));
        let url = format!("{}/aws/v1", server.url());
        dispatcher
            .send(&url, "test-key", &payload(Destination::Infra))
            .await
            .expect("delivery");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn persistent_server_errors_consume_the_whole_budget() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/log/v1")
            .with_status(500)
            .expect(4)
            .create_async()
            .await;

        let dispatcher = Dispatcher::new(reqwest::Client::new(), &config(3));
        let url = format!("{}/log/v1", server.url());
        let err = dispatcher
            .send(&url, "test-key", &payload(Destination::Logging))
            .await
            .expect_err("should exhaust retries");

        assert!(matches!(
            err,
            DeliveryError::RetriesExhausted { attempts: 4, .. }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/log/v1")
            .with_status(403)
            .expect(1)
            .create_async()
            .await;

        let dispatcher = Dispatcher::new(reqwest::Client::new(), &config(3));
        let url = format!("{}/log/v1", server.url());
        let err = dispatcher
            .send(&url, "bad-key", &payload(Destination::Logging))
            .await
            .expect_err("should reject");

        assert!(matches!(
            err,
            DeliveryError::Rejected {
                status: StatusCode::FORBIDDEN,
                ..
            }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn deadline_stops_the_retry_loop() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/log/v1")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let slow_retry = Config {
            max_retries: 3,
            initial_backoff: Duration::from_secs(30),
            ..Config::default()
        };
        let dispatcher = Dispatcher::new(reqwest::Client::new(), &slow_retry)
            .with_deadline(Some(Instant::now() + Duration::from_millis(50)));
        let url = format!("{}/log/v1", server.url());
        let err = dispatcher
            .send(&url, "test-key", &payload(Destination::Logging))
            .await
            .expect_err("should hit the deadline");

        assert!(matches!(err, DeliveryError::DeadlineExceeded));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn connection_failures_are_retryable() {
        // Nothing listens on this port; every attempt is a transport error.
        let dispatcher = Dispatcher::new(reqwest::Client::new(), &config(1));
        let err = dispatcher
            .send(
                "http://127.0.0.1:1/log/v1",
                "test-key",
                &payload(Destination::Logging),
            )
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            DeliveryError::RetriesExhausted { attempts: 2, .. }
        ));
    }
}
