//! # Stripe Configuration
//!
//! Keys and tuning for the PaymentIntents adapter, read from the process
//! environment (and `.env` when present).

use rent_core::{RentalError, RentalResult};
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://api.stripe.com";
const PINNED_API_VERSION: &str = "2024-12-18.acacia";

/// Stripe API configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_test_... or sk_live_...)
    pub secret_key: String,

    /// Publishable key, handed to clients confirming an intent
    pub publishable_key: String,

    /// Webhook signing secret (whsec_...)
    pub webhook_secret: String,

    pub api_base_url: String,

    /// Sent as `Stripe-Version` on every request
    pub api_version: String,

    pub request_timeout: Duration,

    /// Accepted clock skew for webhook timestamps
    pub webhook_tolerance_secs: i64,
}

impl StripeConfig {
    /// Load from `STRIPE_SECRET_KEY`, `STRIPE_PUBLISHABLE_KEY` and
    /// `STRIPE_WEBHOOK_SECRET`. `STRIPE_API_BASE_URL` optionally points the
    /// adapter at a mock server.
    pub fn from_env() -> RentalResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> RentalResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| RentalError::Configuration(format!("{key} not set")))
        };

        let mut config = Self::new(
            required("STRIPE_SECRET_KEY")?,
            required("STRIPE_PUBLISHABLE_KEY")?,
            required("STRIPE_WEBHOOK_SECRET")?,
        );
        if let Some(base) = get("STRIPE_API_BASE_URL").filter(|v| !v.trim().is_empty()) {
            config.api_base_url = base.trim_end_matches('/').to_string();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn new(
        secret_key: impl Into<String>,
        publishable_key: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            secret_key: secret_key.into(),
            publishable_key: publishable_key.into(),
            webhook_secret: webhook_secret.into(),
            api_base_url: DEFAULT_API_BASE.to_string(),
            api_version: PINNED_API_VERSION.to_string(),
            request_timeout: Duration::from_secs(30),
            webhook_tolerance_secs: 300,
        }
    }

    /// Check every key carries the prefix Stripe issues it with
    pub fn validate(&self) -> RentalResult<()> {
        let checks: [(&str, &str, &[&str]); 3] = [
            ("STRIPE_SECRET_KEY", self.secret_key.as_str(), &["sk_test_", "sk_live_"]),
            (
                "STRIPE_PUBLISHABLE_KEY",
                self.publishable_key.as_str(),
                &["pk_test_", "pk_live_"],
            ),
            ("STRIPE_WEBHOOK_SECRET", self.webhook_secret.as_str(), &["whsec_"]),
        ];

        for (name, value, prefixes) in checks {
            if !prefixes.iter().any(|p| value.starts_with(p)) {
                return Err(RentalError::Configuration(format!(
                    "{} must start with {}",
                    name,
                    prefixes.join(" or ")
                )));
            }
        }

        // Both keys must come from the same mode.
        if self.is_test_mode() != self.publishable_key.starts_with("pk_test_") {
            return Err(RentalError::Configuration(
                "STRIPE_SECRET_KEY and STRIPE_PUBLISHABLE_KEY are from different modes".into(),
            ));
        }

        Ok(())
    }

    pub fn is_test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test_")
    }

    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key)
    }

    /// Builder: point at a mock server
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const KEYS: [(&str, &str); 3] = [
        ("STRIPE_SECRET_KEY", "sk_test_abc123"),
        ("STRIPE_PUBLISHABLE_KEY", "pk_test_xyz789"),
        ("STRIPE_WEBHOOK_SECRET", "whsec_secret"),
    ];

    #[test]
    fn test_loads_keys_with_defaults() {
        let config = StripeConfig::from_lookup(lookup(&KEYS)).unwrap();
        assert!(config.is_test_mode());
        assert_eq!(config.api_base_url, "https://api.stripe.com");
        assert_eq!(config.webhook_tolerance_secs, 300);
    }

    #[test]
    fn test_base_url_override_drops_trailing_slash() {
        let mut pairs = KEYS.to_vec();
        pairs.push(("STRIPE_API_BASE_URL", "http://localhost:12111/"));
        let config = StripeConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:12111");
    }

    #[test]
    fn test_missing_or_blank_key_is_configuration_error() {
        let err = StripeConfig::from_lookup(lookup(&KEYS[..2])).unwrap_err();
        assert!(err.to_string().contains("STRIPE_WEBHOOK_SECRET"));

        let mut pairs = KEYS.to_vec();
        pairs[0] = ("STRIPE_SECRET_KEY", "  ");
        assert!(matches!(
            StripeConfig::from_lookup(lookup(&pairs)),
            Err(RentalError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_wrong_prefixes() {
        let restricted = StripeConfig::new("rk_test_abc", "pk_test_xyz789", "whsec_secret");
        assert!(matches!(
            restricted.validate(),
            Err(RentalError::Configuration(_))
        ));

        let bad_hook = StripeConfig::new("sk_test_abc", "pk_test_xyz789", "secret");
        assert!(bad_hook.validate().is_err());
    }

    #[test]
    fn test_rejects_mixed_modes() {
        let live = StripeConfig::new("sk_live_abc123", "pk_live_xyz789", "whsec_secret");
        assert!(live.validate().is_ok());
        assert!(!live.is_test_mode());

        let mixed = StripeConfig::new("sk_live_abc123", "pk_test_xyz789", "whsec_secret");
        assert!(mixed.validate().is_err());
    }

    #[test]
    fn test_auth_header() {
        let config = StripeConfig::new("sk_test_abc123", "pk_test_xyz789", "whsec_secret");
        assert_eq!(config.auth_header(), "Bearer sk_test_abc123");
    }
}
