// Copyright 2025-Present New Relic, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the forwarding pipeline.
//!
//! Errors are split by failure domain so the orchestrator can apply the
//! right propagation policy: decode and credential errors abort the
//! invocation outright (nothing to deliver, or nothing to authenticate
//! with), while delivery errors are scoped to a single payload chunk and
//! aggregated into a composite [`ForwardError::Delivery`] at the end.

use std::fmt;

use reqwest::StatusCode;

use crate::payload::Destination;

/// Invocation input that could not be normalized into log records.
///
/// Never retried: a malformed batch stays malformed on re-drive, so the
/// error is surfaced to the invoking environment instead.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 in subscription payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid gzip stream: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized invocation envelope")]
    UnknownEnvelope,

    #[error("failed to fetch object s3://{bucket}/{key}: {source}")]
    ObjectFetch {
        bucket: String,
        key: String,
        #[source]
        source: ObjectStoreError,
    },
}

/// Failure reported by an [`crate::decode::ObjectStore`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ObjectStoreError(pub String);

/// A license key could not be obtained from the configured backend.
///
/// Terminal for the whole invocation: no delivery can be authenticated
/// without it. Retrying is left to the invoking environment's re-drive.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    #[error("license key is not configured")]
    Missing,

    #[error("secret backend returned an empty license key")]
    Empty,

    #[error("failed to fetch license key from {backend}: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
}

/// Terminal outcome for a single payload chunk.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// A 4xx other than 408/429. Retrying cannot help, so the chunk is
    /// failed after a single attempt without consuming retry budget.
    #[error("request rejected with status {status}: {hint}")]
    Rejected { status: StatusCode, hint: &'static str },

    /// Transient failures (network, timeout, 408/429/5xx) persisted
    /// through the whole retry budget.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// The invocation deadline would be crossed by the next backoff
    /// sleep, so the chunk was abandoned instead of overrunning it.
    #[error("invocation deadline reached before delivery completed")]
    DeadlineExceeded,
}

/// One failed chunk inside a composite delivery failure.
#[derive(Debug)]
pub struct ChunkFailure {
    pub destination: Destination,
    pub chunk: usize,
    pub error: DeliveryError,
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} chunk {}: {}", self.destination, self.chunk, self.error)
    }
}

/// Aggregated delivery outcome when at least one chunk failed.
///
/// Successes are not rolled back; the report names exactly which chunks
/// failed so the invoking environment can decide on a whole-batch
/// re-drive (duplicate records are the accepted cost).
#[derive(Debug)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub total: usize,
    pub failures: Vec<ChunkFailure>,
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} payload chunks failed (",
            self.failures.len(),
            self.total
        )?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{failure}")?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for DeliveryReport {}

/// Invocation-level failure surfaced to the invoking environment.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to decode invocation payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to resolve license key: {0}")]
    Credential(#[from] CredentialError),

    #[error("failed to serialize intake payload: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to compress intake payload: {0}")]
    Compress(#[source] std::io::Error),

    #[error("delivery failed: {0}")]
    Delivery(DeliveryReport),
}
