// Copyright 2025-Present New Relic, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Invocation payload normalization.
//!
//! Two source encodings are supported:
//!
//! 1. **CloudWatch Logs subscription filter**: the invocation carries an
//!    `awslogs.data` field holding a base64-encoded, gzip-compressed JSON
//!    document with a `messageType`, the log group/stream identity, and a
//!    batch of `logEvents`. Only `DATA_MESSAGE` documents carry log data;
//!    control messages decode to an empty batch and are dropped silently.
//! 2. **S3 object-created notification**: the invocation names a bucket
//!    and key. The object body is fetched through the [`ObjectStore`]
//!    collaborator, gunzipped when it carries the gzip magic, and split
//!    into non-empty lines, one record per line.
//!
//! Decoding never retries. A malformed batch is reported as a
//! [`DecodeError`], distinguishing "no records" (valid control message)
//! from "unparseable input".

use std::io::Read;
use std::sync::OnceLock;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{DecodeError, ObjectStoreError};

/// Message type marking a subscription document that carries log data.
const DATA_MESSAGE: &str = "DATA_MESSAGE";

/// Leading bytes of a gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Fetches stored object bodies for object-created notifications.
///
/// The production implementation wraps the S3 client; tests substitute an
/// in-memory map.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError>;
}

/// One semantic unit of log data. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// CloudWatch event id, absent for object-storage lines.
    pub id: Option<String>,
    /// Epoch milliseconds, absent for object-storage lines.
    pub timestamp: Option<i64>,
    pub message: String,
}

/// Where a batch of records came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// CloudWatch log group/stream identity from a subscription event.
    LogStream {
        owner: String,
        log_group: String,
        log_stream: String,
    },
    /// S3 object identity from an object-created notification.
    StoredObject { bucket: String, key: String },
}

impl Origin {
    /// The value reported as `logGroup` in intake payloads.
    pub fn log_group(&self) -> &str {
        match self {
            Origin::LogStream { log_group, .. } => log_group,
            Origin::StoredObject { bucket, .. } => bucket,
        }
    }

    /// The value reported as `logStream` in intake payloads.
    pub fn log_stream(&self) -> &str {
        match self {
            Origin::LogStream { log_stream, .. } => log_stream,
            Origin::StoredObject { key, .. } => key,
        }
    }
}

/// An ordered batch of decoded records plus their origin descriptor.
#[derive(Debug, Clone)]
pub struct LogBatch {
    pub origin: Origin,
    pub records: Vec<LogRecord>,
}

/// Classification of a batch, driving the Infrastructure ingest path and
/// the Lambda-specific line filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Lambda,
    Vpc,
    Other,
}

impl EntryType {
    /// Infrastructure ingest path for this entry type.
    pub fn infra_path(self) -> &'static str {
        match self {
            EntryType::Lambda => "/aws/lambda",
            EntryType::Vpc => "/aws/vpc",
            EntryType::Other => "/aws",
        }
    }

    /// Classifies a batch from its log-group prefix and, for Lambda
    /// groups, from the presence of at least one invocation-sufficient
    /// message.
    pub fn classify(batch: &LogBatch, config: &Config) -> Self {
        let log_group = batch.origin.log_group();
        if log_group.starts_with(&config.vpc_log_group_prefix) {
            return EntryType::Vpc;
        }
        if log_group.starts_with(&config.lambda_log_group_prefix)
            && batch.records.iter().any(|r| is_lambda_message(&r.message))
        {
            return EntryType::Lambda;
        }
        EntryType::Other
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionDocument {
    message_type: String,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    log_group: String,
    #[serde(default)]
    log_stream: String,
    #[serde(default)]
    log_events: Vec<SubscriptionLogEvent>,
}

#[derive(Deserialize)]
struct SubscriptionLogEvent {
    id: Option<String>,
    timestamp: i64,
    message: String,
}

#[derive(Deserialize)]
struct ObjectNotification {
    #[serde(rename = "Records")]
    records: Vec<ObjectNotificationRecord>,
}

#[derive(Deserialize)]
struct ObjectNotificationRecord {
    s3: S3Entity,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Deserialize)]
struct S3Object {
    key: String,
}

/// Normalizes a raw invocation payload into zero or more record batches.
///
/// Subscription events yield at most one batch (zero for control
/// messages); object notifications yield one batch per named object.
pub async fn decode(event: &Value, objects: &dyn ObjectStore) -> Result<Vec<LogBatch>, DecodeError> {
    if let Some(data) = event
        .get("awslogs")
        .and_then(|v| v.get("data"))
        .and_then(Value::as_str)
    {
        return decode_subscription(data);
    }
    if event
        .get("Records")
        .and_then(Value::as_array)
        .is_some_and(|records| records.iter().any(|r| r.get("s3").is_some()))
    {
        let notification: ObjectNotification = serde_json::from_value(event.clone())?;
        return decode_objects(&notification, objects).await;
    }
    Err(DecodeError::UnknownEnvelope)
}

fn decode_subscription(data: &str) -> Result<Vec<LogBatch>, DecodeError> {
    let compressed = BASE64.decode(data)?;
    let raw = gunzip(&compressed).map_err(DecodeError::Gzip)?;
    let document: SubscriptionDocument = serde_json::from_slice(&raw)?;

    if document.message_type != DATA_MESSAGE {
        debug!(
            message_type = %document.message_type,
            "dropping control message from subscription filter"
        );
        return Ok(Vec::new());
    }

    let records = document
        .log_events
        .into_iter()
        .map(|event| LogRecord {
            id: event.id,
            timestamp: Some(event.timestamp),
            message: event.message,
        })
        .collect();

    Ok(vec![LogBatch {
        origin: Origin::LogStream {
            owner: document.owner,
            log_group: document.log_group,
            log_stream: document.log_stream,
        },
        records,
    }])
}

async fn decode_objects(
    notification: &ObjectNotification,
    objects: &dyn ObjectStore,
) -> Result<Vec<LogBatch>, DecodeError> {
    let mut batches = Vec::with_capacity(notification.records.len());
    for record in &notification.records {
        let bucket = &record.s3.bucket.name;
        let key = &record.s3.object.key;
        let body = objects
            .fetch(bucket, key)
            .await
            .map_err(|source| DecodeError::ObjectFetch {
                bucket: bucket.clone(),
                key: key.clone(),
                source,
            })?;
        let body = if body.starts_with(&GZIP_MAGIC) {
            gunzip(&body).map_err(DecodeError::Gzip)?
        } else {
            body
        };
        let text = String::from_utf8_lossy(&body);
        let records = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| LogRecord {
                id: None,
                timestamp: None,
                message: line.to_string(),
            })
            .collect();
        batches.push(LogBatch {
            origin: Origin::StoredObject {
                bucket: bucket.clone(),
                key: key.clone(),
            },
            records,
        });
    }
    Ok(batches)
}

pub(crate) fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

/// Matches messages sufficient to report a Lambda invocation. `REPORT`
/// lines alone are not sufficient, just nice to have.
pub fn is_lambda_message(message: &str) -> bool {
    nr_monitoring_pattern().is_match(message)
        || timeout_pattern().is_match(message)
        || request_id_pattern().is_match(message)
}

/// Matches `REPORT RequestId:` summary lines.
pub fn is_report_message(message: &str) -> bool {
    report_pattern().is_match(message)
}

pub(crate) fn nr_monitoring_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^.*"NR_LAMBDA_MONITORING"#).expect("invalid pattern"))
}

fn report_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^REPORT RequestId:").expect("invalid pattern"))
}

fn timeout_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d+Z\s[\d\w-]+\sTask timed out after [\d.]+ seconds",
        )
        .expect("invalid pattern")
    })
}

/// Lines like this are generated by the Lambda service when it has to
/// kill the function's runtime, e.g. for an out of memory error.
fn request_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^RequestId:\s[-a-zA-Z0-9]{36}\s.*").expect("invalid pattern")
    })
}

/// Extracts the request id from a Lambda runtime log line, if present.
pub(crate) fn lambda_request_id(message: &str) -> Option<&str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"RequestId:\s(?P<request_id>[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})",
        )
        .expect("invalid pattern")
    });
    re.captures(message)
        .and_then(|c| c.name("request_id"))
        .map(|m| m.as_str())
}
