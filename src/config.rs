//! Immutable application configuration.
//!
//! Built once at startup from an optional JSON file plus environment
//! overrides, then shared behind an `Arc`.

use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

pub const ENV_STRIPE_SECRET_KEY: &str = "ESTORE_STRIPE_SECRET_KEY";
pub const ENV_STRIPE_WEBHOOK_SECRET: &str = "ESTORE_STRIPE_WEBHOOK_SECRET";
pub const ENV_FRONTEND_HOST: &str = "ESTORE_FRONTEND_HOST";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_level: String,
    /// Base URL of the storefront; checkout sessions return to `<host>/cart`.
    pub frontend_host: String,
    pub stripe: StripeConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// `None` selects the in-process gateway.
    pub secret_key: Option<SecretString>,
    pub webhook_secret: SecretString,
    pub api_base_url: String,
    pub currency: String,
    pub signature_tolerance_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub order_write_attempts: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            max_attempts: 5,
            base_backoff_ms: 200,
            order_write_attempts: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawConfig {
    log_level: String,
    frontend_host: String,
    stripe: RawStripe,
    reconcile: ReconcileConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawStripe {
    secret_key: Option<String>,
    webhook_secret: String,
    api_base_url: String,
    currency: String,
    signature_tolerance_secs: i64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            frontend_host: "http://localhost:3000".to_string(),
            stripe: RawStripe::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl Default for RawStripe {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: String::new(),
            api_base_url: "https://api.stripe.com".to_string(),
            currency: "usd".to_string(),
            signature_tolerance_secs: 300,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        Self {
            log_level: raw.log_level,
            frontend_host: raw.frontend_host,
            stripe: StripeConfig {
                secret_key: raw
                    .stripe
                    .secret_key
                    .filter(|key| !key.is_empty())
                    .map(SecretString::from),
                webhook_secret: SecretString::from(raw.stripe.webhook_secret),
                api_base_url: raw.stripe.api_base_url,
                currency: raw.stripe.currency,
                signature_tolerance_secs: raw.stripe.signature_tolerance_secs,
            },
            reconcile: raw.reconcile,
        }
    }
}

impl AppConfig {
    /// Loads the file at `path` (or defaults), then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let raw = match path {
            Some(path) => Self::read(path)?,
            None => RawConfig::default(),
        };
        let raw = apply_env(raw, |key| std::env::var(key).ok());
        Self::validated(raw)
    }

    /// Parses a JSON document without consulting the environment.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        Self::validated(raw)
    }

    /// Return URL handed to the provider; it substitutes the session id itself.
    pub fn checkout_return_url(&self) -> String {
        format!(
            "{}/cart?session_id={{CHECKOUT_SESSION_ID}}",
            self.frontend_host.trim_end_matches('/')
        )
    }

    fn read(path: &Path) -> Result<RawConfig, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    fn validated(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.reconcile.workers == 0 {
            return Err(ConfigError::Invalid("reconcile.workers must be at least 1".into()));
        }
        if raw.reconcile.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "reconcile.queueCapacity must be at least 1".into(),
            ));
        }
        if raw.reconcile.max_attempts == 0 || raw.reconcile.order_write_attempts == 0 {
            return Err(ConfigError::Invalid("attempt counts must be at least 1".into()));
        }
        if raw.stripe.signature_tolerance_secs < 0 {
            return Err(ConfigError::Invalid(
                "stripe.signatureToleranceSecs must not be negative".into(),
            ));
        }
        Ok(raw.into())
    }
}

fn apply_env(mut raw: RawConfig, lookup: impl Fn(&str) -> Option<String>) -> RawConfig {
    if let Some(key) = lookup(ENV_STRIPE_SECRET_KEY) {
        raw.stripe.secret_key = Some(key);
    }
    if let Some(secret) = lookup(ENV_STRIPE_WEBHOOK_SECRET) {
        raw.stripe.webhook_secret = secret;
    }
    if let Some(host) = lookup(ENV_FRONTEND_HOST) {
        raw.frontend_host = host;
    }
    raw
}
