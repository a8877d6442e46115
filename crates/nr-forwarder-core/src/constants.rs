// Copyright 2025-Present New Relic, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Intake endpoints and pipeline limits.
//!
//! The defaults here mirror the documented New Relic intake constraints:
//! a request body over [`DEFAULT_MAX_PAYLOAD_BYTES`] is rejected by the
//! collector, so the payload builder splits batches to stay under it.

/// US region Logging intake endpoint.
pub const US_LOGGING_ENDPOINT: &str = "https://log-api.newrelic.com/log/v1";

/// EU region Logging intake endpoint.
pub const EU_LOGGING_ENDPOINT: &str = "https://log-api.eu.newrelic.com/log/v1";

/// US region Infrastructure intake endpoint.
pub const US_INFRA_ENDPOINT: &str = "https://cloud-collector.newrelic.com";

/// EU region Infrastructure intake endpoint.
pub const EU_INFRA_ENDPOINT: &str = "https://cloud-collector.eu01.nr-data.net";

/// Version suffix appended to the Infrastructure ingest path.
pub const INGEST_SERVICE_VERSION: &str = "v1";

/// Plugin metadata reported in the Logging payload's common attributes.
pub const LOGGING_PLUGIN_TYPE: &str = "lambda";
pub const LOGGING_PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum compressed request body accepted by the intake, in bytes.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1000 * 1024;

/// Retries after the first attempt before a chunk is failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Backoff before the first retry, in seconds.
pub const DEFAULT_INITIAL_BACKOFF_SECS: f64 = 1.0;

/// Multiplier applied to the backoff between consecutive retries.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Per-request timeout, in seconds. Not configurable: the invocation
/// budget is bounded, so a hung request must fail fast enough to leave
/// room for retries.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 3;

/// Log-group prefix that marks a batch as Lambda invocation logs.
pub const DEFAULT_LAMBDA_LOG_GROUP_PREFIX: &str = "/aws/lambda";

/// Log-group prefix that marks a batch as VPC flow logs.
pub const DEFAULT_VPC_LOG_GROUP_PREFIX: &str = "/aws/vpc/flow-logs";

/// Default license key cache TTL, in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Default delimiter between `key:value` pairs in the tag string.
pub const DEFAULT_TAG_DELIMITER: &str = ";";
