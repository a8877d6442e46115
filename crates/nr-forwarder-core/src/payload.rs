// Copyright 2025-Present New Relic, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Intake payload construction and size splitting.
//!
//! Two serializers, one per destination shape:
//!
//! - **Infrastructure**: records are wrapped in the agent-reported bundle
//!   the cloud collector expects: a `context` block carrying the
//!   forwarder's own function identity plus an `entry` field holding the
//!   original log entry as a JSON string.
//! - **Logging**: records become a flat ordered array of
//!   `{message, timestamp, attributes}` objects under a `common` block
//!   carrying plugin metadata, the origin identity, and any configured
//!   tags.
//!
//! # Splitting
//!
//! Records are accumulated into the current chunk one at a time. Before
//! a record is added, the builder estimates the post-compression size
//! from the running serialized length plus a worst-case gzip bound; if
//! adding the record would cross the destination's ceiling the current
//! chunk is sealed (serialized and gzipped) and a new one is opened
//! starting with that record. Should a sealed chunk still compress above
//! the ceiling it is halved and re-sealed; a single record that cannot
//! fit alone is emitted anyway, flagged oversized, never dropped.
//!
//! Chunk boundaries depend only on the input and configuration, so the
//! same batch always splits the same way, and concatenating the chunks
//! of a destination reproduces the input records in decode order.

use std::fmt;
use std::io::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::constants;
use crate::decode::{self, EntryType, LogBatch, LogRecord};
use crate::error::ForwardError;
use crate::handler::FunctionContext;

/// Which intake a payload targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Infra,
    Logging,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Infra => write!(f, "infra"),
            Destination::Logging => write!(f, "logging"),
        }
    }
}

/// A sealed, compressed request body bound for one destination.
#[derive(Debug, Clone)]
pub struct OutboundPayload {
    pub destination: Destination,
    /// Gzip-compressed JSON body, sent as-is.
    pub body: Vec<u8>,
    pub uncompressed_len: usize,
    pub record_count: usize,
    /// Set when a single record could not fit the ceiling even alone.
    /// The record is still sent undivided; the intake may reject it.
    pub oversized: bool,
}

/// Worst-case growth of gzip over incompressible input, used when
/// estimating whether a chunk still fits before it is actually sealed.
fn compressed_bound(uncompressed_len: usize) -> usize {
    uncompressed_len + uncompressed_len / 1000 + 64
}

/// Builds the Infrastructure payload chunks for one batch.
///
/// For Lambda entries only the invocation-sufficient lines (and their
/// `REPORT` summaries) are forwarded; everything else in the stream is
/// application output that the Logging destination carries instead.
pub fn build_infra_payloads(
    batch: &LogBatch,
    entry_type: EntryType,
    context: &FunctionContext,
    config: &Config,
) -> Result<Vec<OutboundPayload>, ForwardError> {
    let records: Vec<&LogRecord> = match entry_type {
        EntryType::Lambda => batch
            .records
            .iter()
            .filter(|r| decode::is_report_message(&r.message) || decode::is_lambda_message(&r.message))
            .collect(),
        _ => batch.records.iter().collect(),
    };
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let ceiling = config.max_payload_bytes_for(Destination::Infra);
    let envelope = |records: &[&LogRecord]| infra_envelope(context, batch, records);

    let base_len = envelope(&[])?.len();
    let costs: Result<Vec<usize>, ForwardError> = records
        .iter()
        .map(|r| {
            let inner = serde_json::to_string(&infra_record(r)).map_err(ForwardError::Serialize)?;
            // Records live inside the `entry` JSON string, so their cost
            // is the escaped length plus the separator.
            Ok(escaped_len(&inner) + 1)
        })
        .collect();

    assemble(&records, &costs?, base_len, ceiling, Destination::Infra, &envelope)
}

/// Builds the Logging payload chunks for one batch.
pub fn build_logging_payloads(
    batch: &LogBatch,
    config: &Config,
) -> Result<Vec<OutboundPayload>, ForwardError> {
    let messages = logging_messages(batch, config);
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    let ceiling = config.max_payload_bytes_for(Destination::Logging);
    let common = logging_common(batch, config);
    let envelope = move |messages: &[Value]| -> Result<Vec<u8>, ForwardError> {
        serde_json::to_vec(&json!([{ "common": common, "logs": messages }]))
            .map_err(ForwardError::Serialize)
    };

    let base_len = envelope(&[])?.len();
    let costs: Result<Vec<usize>, ForwardError> = messages
        .iter()
        .map(|m| {
            serde_json::to_string(m)
                .map(|s| s.len() + 1)
                .map_err(ForwardError::Serialize)
        })
        .collect();

    assemble(&messages, &costs?, base_len, ceiling, Destination::Logging, &envelope)
}

/// Greedy accumulation: plan chunk boundaries from per-record costs,
/// then seal each chunk.
fn assemble<T, F>(
    items: &[T],
    costs: &[usize],
    base_len: usize,
    ceiling: usize,
    destination: Destination,
    envelope: &F,
) -> Result<Vec<OutboundPayload>, ForwardError>
where
    F: Fn(&[T]) -> Result<Vec<u8>, ForwardError>,
{
    let mut payloads = Vec::new();
    let mut start = 0;
    let mut len = 0;
    for (i, &cost) in costs.iter().enumerate() {
        if i > start && compressed_bound(base_len + len + cost) > ceiling {
            seal(&items[start..i], envelope, ceiling, destination, &mut payloads)?;
            start = i;
            len = 0;
        }
        len += cost;
    }
    if start < items.len() {
        seal(&items[start..], envelope, ceiling, destination, &mut payloads)?;
    }
    debug!(
        %destination,
        chunks = payloads.len(),
        records = items.len(),
        "sealed intake payloads"
    );
    Ok(payloads)
}

/// Seals one chunk. If the compressed body still exceeds the ceiling
/// (the estimate undercounts only for incompressible input) the chunk
/// is halved and re-sealed; a singleton is emitted oversized.
fn seal<T, F>(
    items: &[T],
    envelope: &F,
    ceiling: usize,
    destination: Destination,
    payloads: &mut Vec<OutboundPayload>,
) -> Result<(), ForwardError>
where
    F: Fn(&[T]) -> Result<Vec<u8>, ForwardError>,
{
    let serialized = envelope(items)?;
    let body = gzip_compress(&serialized).map_err(ForwardError::Compress)?;

    if body.len() > ceiling && items.len() > 1 {
        let half = items.len() / 2;
        seal(&items[..half], envelope, ceiling, destination, payloads)?;
        return seal(&items[half..], envelope, ceiling, destination, payloads);
    }

    let oversized = body.len() > ceiling;
    if oversized {
        warn!(
            %destination,
            compressed = body.len(),
            ceiling,
            "single record exceeds the payload ceiling, sending undivided"
        );
    }
    payloads.push(OutboundPayload {
        destination,
        uncompressed_len: serialized.len(),
        record_count: items.len(),
        body,
        oversized,
    });
    Ok(())
}

fn gzip_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// JSON string-escape cost of `s`, without the surrounding quotes.
fn escaped_len(s: &str) -> usize {
    s.bytes()
        .map(|b| match b {
            b'"' | b'\\' | 0x08 | 0x09 | 0x0a | 0x0c | 0x0d => 2,
            b if b < 0x20 => 6,
            _ => 1,
        })
        .sum()
}

fn infra_record(record: &LogRecord) -> Value {
    let mut map = Map::new();
    if let Some(id) = &record.id {
        map.insert("id".to_string(), Value::String(id.clone()));
    }
    if let Some(timestamp) = record.timestamp {
        map.insert("timestamp".to_string(), Value::from(timestamp));
    }
    map.insert("message".to_string(), Value::String(record.message.clone()));
    Value::Object(map)
}

fn infra_envelope(
    context: &FunctionContext,
    batch: &LogBatch,
    records: &[&LogRecord],
) -> Result<Vec<u8>, ForwardError> {
    let mut entry = Map::new();
    if let decode::Origin::LogStream { owner, .. } = &batch.origin {
        entry.insert("owner".to_string(), Value::String(owner.clone()));
    }
    entry.insert(
        "logGroup".to_string(),
        Value::String(batch.origin.log_group().to_string()),
    );
    entry.insert(
        "logStream".to_string(),
        Value::String(batch.origin.log_stream().to_string()),
    );
    entry.insert(
        "logEvents".to_string(),
        Value::Array(records.iter().map(|r| infra_record(r)).collect()),
    );
    let entry_string =
        serde_json::to_string(&Value::Object(entry)).map_err(ForwardError::Serialize)?;

    serde_json::to_vec(&json!({
        "context": {
            "function_name": context.function_name,
            "invoked_function_arn": context.invoked_function_arn,
            "log_group_name": context.log_group_name,
            "log_stream_name": context.log_stream_name,
        },
        "entry": entry_string,
    }))
    .map_err(ForwardError::Serialize)
}

/// Produces the per-record Logging message objects, carrying forward the
/// trace id and Lambda request id once they are seen in the stream.
fn logging_messages(batch: &LogBatch, config: &Config) -> Vec<Value> {
    let is_lambda_group = batch
        .origin
        .log_group()
        .starts_with(&config.lambda_log_group_prefix);
    let mut trace_id = String::new();
    let mut request_id: Option<String> = None;

    batch
        .records
        .iter()
        .map(|record| {
            if decode::nr_monitoring_pattern().is_match(&record.message) {
                if let Some(found) = extract_trace_id(&record.message) {
                    trace_id = found;
                }
            }

            let mut aws = Map::new();
            if is_lambda_group {
                if let Some(found) = decode::lambda_request_id(&record.message) {
                    request_id = Some(found.to_string());
                }
                if let Some(id) = &request_id {
                    aws.insert("lambda_request_id".to_string(), Value::String(id.clone()));
                }
            }

            let mut attributes = Map::new();
            attributes.insert("aws".to_string(), Value::Object(aws));

            let mut message = Map::new();
            message.insert(
                "message".to_string(),
                Value::String(record.message.clone()),
            );
            if let Some(timestamp) = record.timestamp {
                message.insert("timestamp".to_string(), Value::from(timestamp));
            }
            message.insert("attributes".to_string(), Value::Object(attributes));
            if !trace_id.is_empty() {
                message.insert("trace.id".to_string(), Value::String(trace_id.clone()));
            }
            Value::Object(message)
        })
        .collect()
}

fn logging_common(batch: &LogBatch, config: &Config) -> Value {
    let mut attributes = Map::new();
    attributes.insert(
        "plugin".to_string(),
        json!({
            "type": constants::LOGGING_PLUGIN_TYPE,
            "version": constants::LOGGING_PLUGIN_VERSION,
        }),
    );
    attributes.insert(
        "aws".to_string(),
        json!({
            "logGroup": batch.origin.log_group(),
            "logStream": batch.origin.log_stream(),
        }),
    );
    for (key, value) in parse_tags(&config.tags, &config.tag_delimiter) {
        attributes.insert(key, Value::String(value));
    }
    json!({ "attributes": attributes })
}

/// Splits the configured tag string into key/value pairs. Malformed
/// pairs are skipped individually; `aws:` and `plugin:` keys are
/// reserved and dropped.
fn parse_tags(tags: &str, delimiter: &str) -> Vec<(String, String)> {
    tags.split(delimiter)
        .filter(|item| !item.is_empty())
        .filter(|item| !item.starts_with("aws:") && !item.starts_with("plugin:"))
        .filter_map(|item| {
            let (key, value) = item.split_once(':')?;
            if key.is_empty() {
                warn!(tag = item, "skipping malformed tag");
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Pulls the trace id out of an `NR_LAMBDA_MONITORING` agent message:
/// a JSON array whose third element is a base64 gzip bundle of agent
/// data keyed under `analytic_event_data` or `span_event_data`.
fn extract_trace_id(message: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(message).ok()?;
    let encoded = parsed.get(2)?.as_str()?;
    let compressed = BASE64.decode(encoded).ok()?;
    let raw = decode::gunzip(&compressed).ok()?;
    let bundle: Value = serde_json::from_slice(&raw).ok()?;
    let data = bundle.get("data")?;

    for key in ["analytic_event_data", "span_event_data"] {
        let trace_id = data
            .get(key)
            .and_then(|v| v.get(2))
            .and_then(|v| v.get(0))
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("traceId"))
            .and_then(Value::as_str);
        match trace_id {
            Some(id) if !id.is_empty() => return Some(id.to_string()),
            _ => debug!(key, "no trace id found"),
        }
    }
    None
}
