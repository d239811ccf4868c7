//! Secret store collaborator and the process-lifetime client cache

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::client::StripeClient;
use crate::config::WebhookConfig;
use crate::error::{WebhookError, WebhookResult};

/// External parameter store holding the two Stripe secrets under named
/// parameters. Values are fetched decrypted; an absent or empty value
/// is an error.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_parameter(&self, name: &str) -> anyhow::Result<String>;
}

#[derive(Deserialize)]
struct ParameterEnvelope {
    parameter: ParameterValue,
}

#[derive(Deserialize)]
struct ParameterValue {
    value: String,
}

/// HTTP parameter-store client.
pub struct HttpParameterStore {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpParameterStore {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        }
    }
}

#[async_trait]
impl SecretStore for HttpParameterStore {
    async fn get_parameter(&self, name: &str) -> anyhow::Result<String> {
        let url = format!(
            "{}/parameters/{}?withDecryption=true",
            self.base_url.trim_end_matches('/'),
            name
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;

        let envelope: ParameterEnvelope = response.json().await?;
        if envelope.parameter.value.is_empty() {
            anyhow::bail!("parameter {} is empty", name);
        }
        Ok(envelope.parameter.value)
    }
}

/// Lazily populated, process-lifetime cache of the Stripe client and
/// the webhook signing secret.
///
/// A fetch failure is returned to the caller and NOT cached, so the
/// next delivery retries it. Concurrent first-time initializations may
/// redundantly fetch the same parameter; the fetch is idempotent and
/// the results consistent, so the race is harmless.
pub struct ClientCache {
    store: Arc<dyn SecretStore>,
    api_key_parameter: String,
    secret_parameter: String,
    client: OnceCell<StripeClient>,
    signing_secret: OnceCell<String>,
}

impl ClientCache {
    pub fn new(store: Arc<dyn SecretStore>, config: &WebhookConfig) -> Self {
        Self {
            store,
            api_key_parameter: config.stripe_api_key_parameter.clone(),
            secret_parameter: config.webhook_secret_parameter.clone(),
            client: OnceCell::new(),
            signing_secret: OnceCell::new(),
        }
    }

    /// Cached Stripe client, initialized from the API key parameter on
    /// first use.
    pub async fn client(&self) -> WebhookResult<&StripeClient> {
        self.client
            .get_or_try_init(|| async {
                let api_key = self
                    .store
                    .get_parameter(&self.api_key_parameter)
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "Error fetching Stripe API key");
                        WebhookError::Initialization(
                            "Failed to initialize Stripe client".to_string(),
                        )
                    })?;
                Ok(StripeClient::new(api_key))
            })
            .await
    }

    /// Cached webhook signing secret.
    pub async fn signing_secret(&self) -> WebhookResult<&str> {
        self.signing_secret
            .get_or_try_init(|| async {
                self.store
                    .get_parameter(&self.secret_parameter)
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "Error fetching webhook signing secret");
                        WebhookError::Initialization(
                            "Failed to retrieve webhook secret".to_string(),
                        )
                    })
            })
            .await
            .map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        fetches: AtomicUsize,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl SecretStore for CountingStore {
        async fn get_parameter(&self, name: &str) -> anyhow::Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("store unreachable");
            }
            Ok(format!("value-of-{}", name))
        }
    }

    fn config() -> WebhookConfig {
        WebhookConfig {
            stripe_api_key_parameter: "stripe-api-key".to_string(),
            webhook_secret_parameter: "webhook-secret".to_string(),
            secret_store_url: "http://localhost".to_string(),
            secret_store_token: "token".to_string(),
            generate_reading_function_url: "http://localhost".to_string(),
            internal_invocation_secret: "internal".to_string(),
            ledger_url: None,
            environment: "dev".to_string(),
        }
    }

    #[tokio::test]
    async fn secret_is_fetched_once_and_cached() {
        let store = Arc::new(CountingStore {
            fetches: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
        });
        let cache = ClientCache::new(store.clone(), &config());

        let first = cache.signing_secret().await.unwrap().to_string();
        let second = cache.signing_secret().await.unwrap().to_string();
        assert_eq!(first, "value-of-webhook-secret");
        assert_eq!(first, second);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_failure_is_not_cached() {
        let store = Arc::new(CountingStore {
            fetches: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(1),
        });
        let cache = ClientCache::new(store.clone(), &config());

        let err = cache.signing_secret().await.unwrap_err();
        assert!(matches!(err, WebhookError::Initialization(_)));

        // Next call retries and succeeds
        let secret = cache.signing_secret().await.unwrap();
        assert_eq!(secret, "value-of-webhook-secret");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_and_secret_cache_independently() {
        let store = Arc::new(CountingStore {
            fetches: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
        });
        let cache = ClientCache::new(store.clone(), &config());

        cache.client().await.unwrap();
        cache.signing_secret().await.unwrap();
        cache.client().await.unwrap();
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }
}
