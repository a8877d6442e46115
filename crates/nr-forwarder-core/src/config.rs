// Copyright 2025-Present New Relic, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Forwarder configuration.
//!
//! All knobs are read once from the environment at process start and
//! handed to the pipeline as a resolved [`Config`]; nothing in the core
//! reads ambient environment state afterwards.

use std::env;
use std::time::Duration;

use crate::constants;
use crate::payload::Destination;

/// Where the license key is resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseKeySource {
    /// `LICENSE_KEY` holds the literal key.
    EnvironmentVar,
    /// `LICENSE_KEY` names an SSM Parameter Store path.
    Ssm,
    /// `LICENSE_KEY` names a Secrets Manager secret id or ARN.
    SecretsManager,
}

impl LicenseKeySource {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "environment_var" => Ok(LicenseKeySource::EnvironmentVar),
            "ssm" => Ok(LicenseKeySource::Ssm),
            "secrets_manager" => Ok(LicenseKeySource::SecretsManager),
            other => Err(ConfigError::Invalid(format!(
                "LICENSE_KEY_SRC must be one of environment_var, ssm, secrets_manager; got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Resolved forwarder configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Literal license key, or the backend lookup name, per
    /// [`Config::license_key_source`].
    pub license_key: String,
    pub license_key_source: LicenseKeySource,
    /// Whether resolved keys are cached across invocations.
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    /// Infrastructure destination toggle. Enabled by default.
    pub infra_enabled: bool,
    /// Logging destination toggle. Disabled by default.
    pub logging_enabled: bool,
    pub debug_logging_enabled: bool,
    /// `key:value` pairs merged into the Logging payload's common
    /// attributes, e.g. `env:prod;team:myTeam`.
    pub tags: String,
    pub tag_delimiter: String,
    pub lambda_log_group_prefix: String,
    pub vpc_log_group_prefix: String,
    /// Retries after the first attempt; total attempts are one more.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Compressed payload ceiling applied to both destinations.
    pub max_payload_bytes: usize,
    /// Per-destination ceiling overrides.
    pub infra_max_payload_bytes: Option<usize>,
    pub logging_max_payload_bytes: Option<usize>,
    pub request_timeout: Duration,
    /// Endpoint overrides; when absent the region is picked from the
    /// license key prefix (`eu` keys route to the EU endpoints).
    pub infra_endpoint: Option<String>,
    pub logging_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            license_key: String::new(),
            license_key_source: LicenseKeySource::EnvironmentVar,
            cache_enabled: false,
            cache_ttl: Duration::from_secs(constants::DEFAULT_CACHE_TTL_SECS),
            infra_enabled: true,
            logging_enabled: false,
            debug_logging_enabled: false,
            tags: String::new(),
            tag_delimiter: constants::DEFAULT_TAG_DELIMITER.to_string(),
            lambda_log_group_prefix: constants::DEFAULT_LAMBDA_LOG_GROUP_PREFIX.to_string(),
            vpc_log_group_prefix: constants::DEFAULT_VPC_LOG_GROUP_PREFIX.to_string(),
            max_retries: constants::DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_secs_f64(constants::DEFAULT_INITIAL_BACKOFF_SECS),
            backoff_multiplier: constants::DEFAULT_BACKOFF_MULTIPLIER,
            max_payload_bytes: constants::DEFAULT_MAX_PAYLOAD_BYTES,
            infra_max_payload_bytes: None,
            logging_max_payload_bytes: None,
            request_timeout: Duration::from_secs(constants::DEFAULT_REQUEST_TIMEOUT_SECS),
            infra_endpoint: None,
            logging_endpoint: None,
        }
    }
}

impl Config {
    /// Builds the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let license_key_source = match env::var("LICENSE_KEY_SRC") {
            Ok(val) => LicenseKeySource::parse(&val.to_lowercase())?,
            Err(_) => LicenseKeySource::EnvironmentVar,
        };

        let config = Config {
            license_key: env::var("LICENSE_KEY").unwrap_or_default(),
            license_key_source,
            cache_enabled: env_flag("ENABLE_CACHING", false),
            cache_ttl: env::var("NR_LICENSE_KEY_CACHE_TTL")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(defaults.cache_ttl, Duration::from_secs),
            infra_enabled: env_flag("INFRA_ENABLED", true),
            logging_enabled: env_flag("LOGGING_ENABLED", false),
            debug_logging_enabled: env_flag("DEBUG_LOGGING_ENABLED", false),
            tags: env::var("NR_TAGS").unwrap_or_default(),
            tag_delimiter: env::var("NR_ENV_DELIMITER")
                .unwrap_or_else(|_| defaults.tag_delimiter.clone()),
            lambda_log_group_prefix: env::var("NR_LAMBDA_LOG_GROUP_PREFIX")
                .unwrap_or_else(|_| defaults.lambda_log_group_prefix.clone()),
            vpc_log_group_prefix: env::var("NR_VPC_LOG_GROUP_PREFIX")
                .unwrap_or_else(|_| defaults.vpc_log_group_prefix.clone()),
            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            initial_backoff: env::var("INITIAL_BACKOFF")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map_or(defaults.initial_backoff, Duration::from_secs_f64),
            backoff_multiplier: env::var("BACKOFF_MULTIPLIER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.backoff_multiplier),
            max_payload_bytes: env::var("MAX_PAYLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_payload_bytes),
            infra_max_payload_bytes: env::var("INFRA_MAX_PAYLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok()),
            logging_max_payload_bytes: env::var("LOGGING_MAX_PAYLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok()),
            request_timeout: defaults.request_timeout,
            infra_endpoint: env::var("NR_INFRA_ENDPOINT").ok(),
            logging_endpoint: env::var("NR_LOGGING_ENDPOINT").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.license_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "LICENSE_KEY must be set (to the key itself, or to the backend lookup name)"
                    .to_string(),
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "MAX_PAYLOAD_SIZE must be greater than 0".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "BACKOFF_MULTIPLIER must be at least 1".to_string(),
            ));
        }
        if self.tag_delimiter.is_empty() {
            return Err(ConfigError::Invalid(
                "NR_ENV_DELIMITER must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Compressed payload ceiling for a destination.
    pub fn max_payload_bytes_for(&self, destination: Destination) -> usize {
        match destination {
            Destination::Infra => self.infra_max_payload_bytes,
            Destination::Logging => self.logging_max_payload_bytes,
        }
        .unwrap_or(self.max_payload_bytes)
    }

    /// Infrastructure intake base URL for the given license key.
    pub fn infra_endpoint(&self, license_key: &str) -> String {
        if let Some(endpoint) = &self.infra_endpoint {
            return endpoint.clone();
        }
        if license_key.starts_with("eu") {
            constants::EU_INFRA_ENDPOINT.to_string()
        } else {
            constants::US_INFRA_ENDPOINT.to_string()
        }
    }

    /// Logging intake URL for the given license key.
    pub fn logging_endpoint(&self, license_key: &str) -> String {
        if let Some(endpoint) = &self.logging_endpoint {
            return endpoint.clone();
        }
        if license_key.starts_with("eu") {
            constants::EU_LOGGING_ENDPOINT.to_string()
        } else {
            constants::US_LOGGING_ENDPOINT.to_string()
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    parse_flag(env::var(name).ok().as_deref(), default)
}

/// Parses a boolean toggle: any casing of `"true"` enables, any other
/// value disables. Unset keeps the default.
fn parse_flag(value: Option<&str>, default: bool) -> bool {
    match value {
        Some(val) => val.to_lowercase() == "true",
        None => default,
    }
}
