// Copyright 2025-Present New Relic, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Lambda entrypoint for the New Relic log forwarder.
//!
//! All long-lived state (configuration, HTTP client, credential cache,
//! AWS clients) is built once before the runtime loop starts, so warm
//! invocations only pay for the pipeline itself.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use nr_forwarder_aws::{S3ObjectStore, SecretsManagerStore, SsmParameterStore};
use nr_forwarder_core::config::LicenseKeySource;
use nr_forwarder_core::{Config, CredentialBackend, Forwarder, FunctionContext};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::from_env()?;
    init_logging(&config);

    let sdk_config = nr_forwarder_aws::load_sdk_config().await;
    let backend = match config.license_key_source {
        LicenseKeySource::EnvironmentVar => {
            CredentialBackend::Environment(Some(config.license_key.clone()))
        }
        LicenseKeySource::Ssm => CredentialBackend::Store(Arc::new(SsmParameterStore::new(
            &sdk_config,
            config.license_key.clone(),
        ))),
        LicenseKeySource::SecretsManager => CredentialBackend::Store(Arc::new(
            SecretsManagerStore::new(&sdk_config, config.license_key.clone()),
        )),
    };
    let objects = Arc::new(S3ObjectStore::new(&sdk_config));
    let forwarder = Arc::new(Forwarder::new(config, backend, objects));

    debug!("forwarder initialized");
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let forwarder = forwarder.clone();
        async move { handle(forwarder, event).await }
    }))
    .await
}

fn init_logging(config: &Config) {
    let level = if config.debug_logging_enabled {
        "debug"
    } else {
        "info"
    };
    let env_filter = format!("h2=off,hyper=off,rustls=off,{level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).expect("could not parse log filter"))
        .with_level(true)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

async fn handle(forwarder: Arc<Forwarder>, event: LambdaEvent<Value>) -> Result<Value, Error> {
    let (payload, context) = event.into_parts();
    let function_context = FunctionContext {
        function_name: context.env_config.function_name.clone(),
        invoked_function_arn: context.invoked_function_arn.clone(),
        log_group_name: context.env_config.log_group.clone(),
        log_stream_name: context.env_config.log_stream.clone(),
    };
    let deadline = deadline_instant(context.deadline);
    forwarder.handle(&payload, &function_context, deadline).await?;
    // Echo the event so the function can be chained through a success
    // destination.
    Ok(payload)
}

/// Maps the runtime's epoch-millisecond deadline onto the monotonic
/// clock the dispatcher sleeps against. A deadline already in the past
/// maps to "now".
fn deadline_instant(deadline_ms: u64) -> Option<Instant> {
    if deadline_ms == 0 {
        return None;
    }
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_millis() as u64;
    let remaining = Duration::from_millis(deadline_ms.saturating_sub(now_ms));
    Some(Instant::now() + remaining)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use lambda_runtime::Context;
    use nr_forwarder_core::{ObjectStore, ObjectStoreError};
    use serde_json::json;

    use super::*;

    struct OneLineStore;

    #[async_trait]
    impl ObjectStore for OneLineStore {
        async fn fetch(&self, _bucket: &str, _key: &str) -> Result<Vec<u8>, ObjectStoreError> {
            Ok(b"one line\n".to_vec())
        }
    }

    #[tokio::test]
    async fn handler_echoes_the_invocation_payload() {
        let config = Config {
            license_key: "test-key".to_string(),
            infra_enabled: false,
            logging_enabled: false,
            ..Config::default()
        };
        let forwarder = Arc::new(Forwarder::new(
            config,
            CredentialBackend::Environment(Some("test-key".to_string())),
            Arc::new(OneLineStore),
        ));
        let payload = json!({
            "Records": [
                { "s3": { "bucket": { "name": "b" }, "object": { "key": "k" } } }
            ]
        });
        let event = LambdaEvent::new(payload.clone(), Context::default());

        let echoed = handle(forwarder, event).await.expect("handle");
        assert_eq!(echoed, payload);
    }

    #[test]
    fn past_deadlines_map_to_now() {
        assert!(deadline_instant(0).is_none());
        let deadline = deadline_instant(1).expect("instant");
        assert!(deadline <= Instant::now() + Duration::from_millis(1));
    }
}
