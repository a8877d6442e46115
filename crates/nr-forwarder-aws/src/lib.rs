// Copyright 2025-Present New Relic, Inc.
// SPDX-License-Identifier: Apache-2.0

//! AWS service adapters behind the core crate's trait seams.
//!
//! The core pipeline talks to an [`ObjectStore`] and a [`SecretStore`];
//! this crate provides the production implementations over S3, SSM
//! Parameter Store, and Secrets Manager. Keeping the SDK types out of
//! the core crate keeps the pipeline testable with in-memory fakes.

use async_trait::async_trait;
use tracing::debug;

use nr_forwarder_core::credentials::SecretStore;
use nr_forwarder_core::decode::ObjectStore;
use nr_forwarder_core::error::{CredentialError, ObjectStoreError};

/// Loads the shared AWS configuration once; the per-service clients are
/// all cheap clones over it.
pub async fn load_sdk_config() -> aws_config::SdkConfig {
    aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await
}

/// [`ObjectStore`] over S3 `GetObject`.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        debug!(bucket, key, "fetching object");
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| ObjectStoreError(err.to_string()))?;
        let body = object
            .body
            .collect()
            .await
            .map_err(|err| ObjectStoreError(err.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }
}

/// [`SecretStore`] over an SSM parameter, decrypted on read.
pub struct SsmParameterStore {
    client: aws_sdk_ssm::Client,
    parameter_name: String,
}

impl SsmParameterStore {
    pub fn new(config: &aws_config::SdkConfig, parameter_name: String) -> Self {
        Self {
            client: aws_sdk_ssm::Client::new(config),
            parameter_name,
        }
    }
}

#[async_trait]
impl SecretStore for SsmParameterStore {
    fn name(&self) -> &'static str {
        "ssm"
    }

    async fn fetch(&self) -> Result<String, CredentialError> {
        let response = self
            .client
            .get_parameter()
            .name(&self.parameter_name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|err| CredentialError::Backend {
                backend: "ssm",
                message: err.to_string(),
            })?;
        response
            .parameter
            .and_then(|p| p.value)
            .ok_or(CredentialError::Backend {
                backend: "ssm",
                message: "parameter has no value".to_string(),
            })
    }
}

/// [`SecretStore`] over a Secrets Manager secret.
pub struct SecretsManagerStore {
    client: aws_sdk_secretsmanager::Client,
    secret_id: String,
}

impl SecretsManagerStore {
    pub fn new(config: &aws_config::SdkConfig, secret_id: String) -> Self {
        Self {
            client: aws_sdk_secretsmanager::Client::new(config),
            secret_id,
        }
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    fn name(&self) -> &'static str {
        "secrets-manager"
    }

    async fn fetch(&self) -> Result<String, CredentialError> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(&self.secret_id)
            .send()
            .await
            .map_err(|err| CredentialError::Backend {
                backend: "secrets-manager",
                message: err.to_string(),
            })?;
        if let Some(value) = response.secret_string {
            return Ok(value);
        }
        // Binary secrets hold the key as raw UTF-8.
        if let Some(blob) = response.secret_binary {
            return String::from_utf8(blob.into_inner()).map_err(|_| CredentialError::Backend {
                backend: "secrets-manager",
                message: "secret binary is not valid UTF-8".to_string(),
            });
        }
        Err(CredentialError::Backend {
            backend: "secrets-manager",
            message: "secret has no value".to_string(),
        })
    }
}
