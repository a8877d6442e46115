// Copyright 2025-Present New Relic, Inc.
// SPDX-License-Identifier: Apache-2.0

//! License key resolution with an in-memory TTL cache.
//!
//! The key either comes straight from the environment, captured once at
//! startup, or from an external secret store behind the [`SecretStore`]
//! seam. Store lookups are cached for a configurable TTL so warm
//! invocations skip the network round trip. A failed refresh clears the
//! cache and surfaces the error; a stale key is never served.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::CredentialError;

/// External secret backend, implemented over SSM Parameter Store and
/// Secrets Manager by the AWS adapter crate.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Short backend name for logs, e.g. `"ssm"`.
    fn name(&self) -> &'static str;

    /// Fetches the secret value. Transport and permission failures map
    /// to [`CredentialError::Backend`].
    async fn fetch(&self) -> Result<String, CredentialError>;
}

/// Where the license key comes from.
#[derive(Clone)]
pub enum CredentialBackend {
    /// Key captured from the environment at startup. Never expires.
    Environment(Option<String>),
    Store(Arc<dyn SecretStore>),
}

struct CachedCredential {
    key: String,
    fetched_at: Instant,
}

/// Resolves and caches the license key.
pub struct CredentialResolver {
    backend: CredentialBackend,
    cache_enabled: bool,
    ttl: Duration,
    slot: Mutex<Option<CachedCredential>>,
}

impl CredentialResolver {
    pub fn new(backend: CredentialBackend, config: &Config) -> Self {
        Self {
            backend,
            cache_enabled: config.cache_enabled,
            ttl: config.cache_ttl,
            slot: Mutex::new(None),
        }
    }

    /// Returns the license key, fetching from the backend when the
    /// cache is cold, expired, or disabled.
    ///
    /// The cache slot lock is held across the fetch, so concurrent
    /// resolutions share a single backend call instead of stampeding.
    pub async fn resolve(&self) -> Result<String, CredentialError> {
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref() {
            if self.cache_enabled && cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.key.clone());
            }
        }

        match self.fetch().await {
            Ok(key) => {
                *slot = Some(CachedCredential {
                    key: key.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(key)
            }
            Err(err) => {
                // Do not fall back to a stale key; a revoked key would
                // otherwise keep flowing until the next cold start.
                *slot = None;
                Err(err)
            }
        }
    }

    async fn fetch(&self) -> Result<String, CredentialError> {
        let key = match &self.backend {
            CredentialBackend::Environment(value) => {
                value.clone().ok_or(CredentialError::Missing)?
            }
            CredentialBackend::Store(store) => {
                debug!(backend = store.name(), "fetching license key");
                match store.fetch().await {
                    Ok(key) => key,
                    Err(err) => {
                        warn!(backend = store.name(), error = %err, "license key fetch failed");
                        return Err(err);
                    }
                }
            }
        };
        if key.trim().is_empty() {
            return Err(CredentialError::Empty);
        }
        Ok(key)
    }
}
