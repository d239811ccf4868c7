//! Webhook processor configuration

/// Configuration for the webhook processing pipeline.
///
/// Loaded from environment variables. The two Stripe secrets are *not*
/// read from the environment directly; the environment only names the
/// parameters under which the secret store holds them.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Parameter name for the Stripe secret API key
    pub stripe_api_key_parameter: String,
    /// Parameter name for the Stripe webhook signing secret
    pub webhook_secret_parameter: String,
    /// Base URL of the parameter store
    pub secret_store_url: String,
    /// Bearer token for the parameter store
    pub secret_store_token: String,
    /// Endpoint of the reading generation function
    pub generate_reading_function_url: String,
    /// Shared secret carried in downstream invocations
    pub internal_invocation_secret: String,
    /// Redis URL for the idempotency ledger; None disables the ledger
    pub ledger_url: Option<String>,
    /// Deployment environment tag, used only for metric dimensions
    pub environment: String,
}

impl WebhookConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            stripe_api_key_parameter: require_env("STRIPE_API_KEY_PARAMETER_NAME")?,
            webhook_secret_parameter: require_env("STRIPE_WEBHOOK_SECRET_PARAMETER_NAME")?,
            secret_store_url: require_env("SECRET_STORE_URL")?,
            secret_store_token: require_env("SECRET_STORE_TOKEN")?,
            generate_reading_function_url: require_env("GENERATE_READING_FUNCTION_URL")?,
            internal_invocation_secret: require_env("INTERNAL_INVOCATION_SECRET")?,
            ledger_url: std::env::var("WEBHOOK_LEDGER_URL").ok().filter(|v| !v.is_empty()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()),
        })
    }
}

fn require_env(name: &str) -> anyhow::Result<String> {
    let value = std::env::var(name).map_err(|_| anyhow::anyhow!("{} not set", name))?;
    if value.is_empty() {
        anyhow::bail!("{} is empty", name);
    }
    Ok(value)
}
