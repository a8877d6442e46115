// Copyright 2025-Present New Relic, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # New Relic log forwarder core
//!
//! This crate implements the ingestion pipeline of the New Relic AWS log
//! forwarder: it normalizes CloudWatch Logs subscription events and S3
//! object-created notifications into log records, packages those records
//! into the Infrastructure and Logging intake shapes, enforces the
//! per-request payload ceiling by splitting, and delivers every chunk
//! over HTTP with bounded exponential-backoff retries.
//!
//! # Architecture
//!
//! ```text
//!   Invocation payload (CloudWatch subscription / S3 notification)
//!        │
//!        v
//!   ┌──────────────┐
//!   │   Decoder    │  (base64 + gzip + JSON, or object fetch)
//!   └──────┬───────┘
//!          │  ordered LogRecords + origin
//!          v
//!   ┌──────────────┐
//!   │   Builder    │  (Infra / Logging shapes, gzip, size splitting)
//!   └──────┬───────┘
//!          │  OutboundPayload chunks
//!          v
//!   ┌──────────────┐
//!   │  Dispatcher  │  (HTTP POST, retry with backoff, per chunk)
//!   └──────┬───────┘
//!          │
//!          v
//!   New Relic intake (Infra / Logging endpoints)
//! ```
//!
//! The license key used to authenticate intake requests is resolved
//! through [`credentials::CredentialResolver`], which caches the secret
//! across invocations of the same process with a configurable TTL.
//!
//! # Components
//!
//! - [`config`]: environment-derived configuration and validation
//! - [`decode`]: invocation payload normalization into [`decode::LogBatch`]
//! - [`payload`]: intake payload construction and size splitting
//! - [`dispatch`]: retrying HTTP delivery of sealed payloads
//! - [`credentials`]: license key resolution and process-wide caching
//! - [`handler`]: per-invocation orchestration of the above

pub mod config;
pub mod constants;
pub mod credentials;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod payload;

pub use config::Config;
pub use credentials::{CredentialBackend, CredentialResolver, SecretStore};
pub use decode::{LogBatch, LogRecord, ObjectStore, Origin};
pub use dispatch::{Dispatcher, RetryPolicy};
pub use error::{
    CredentialError, DecodeError, DeliveryError, DeliveryReport, ForwardError, ObjectStoreError,
};
pub use handler::{Forwarder, FunctionContext};
pub use payload::{Destination, OutboundPayload};
