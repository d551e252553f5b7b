//! Stripe adapter for the checkout gateway port.

pub mod signature;

use crate::config::StripeConfig;
use crate::domain::checkout::{CreateSession, OpenedSession};
use crate::domain::event::{CheckoutSessionObject, ORDER_ID_METADATA_KEY};
use crate::domain::ports::CheckoutGateway;
use crate::error::{Result, ServiceError};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeSessionCreated {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
}

/// Embedded-mode checkout sessions over the Stripe REST API.
#[derive(Clone)]
pub struct StripeGateway {
    http_client: reqwest::Client,
    secret_key: SecretString,
    api_base_url: String,
    currency: String,
}

impl StripeGateway {
    pub fn new(secret_key: SecretString, config: &StripeConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            secret_key,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            currency: config.currency.clone(),
        }
    }

    fn session_params(&self, request: &CreateSession) -> Vec<(String, String)> {
        let order_id = request.order_id.to_string();
        let mut params: Vec<(String, String)> = vec![
            ("ui_mode".into(), "embedded".into()),
            ("mode".into(), "payment".into()),
            ("redirect_on_completion".into(), "if_required".into()),
            ("automatic_tax[enabled]".into(), "true".into()),
            ("return_url".into(), request.return_url.clone()),
            (format!("metadata[{ORDER_ID_METADATA_KEY}]"), order_id.clone()),
            (
                format!("payment_intent_data[metadata][{ORDER_ID_METADATA_KEY}]"),
                order_id,
            ),
        ];
        for (index, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{index}]");
            params.push((
                format!("{prefix}[price_data][currency]"),
                self.currency.clone(),
            ));
            params.push((
                format!("{prefix}[price_data][product_data][name]"),
                item.name.clone(),
            ));
            params.push((
                format!("{prefix}[price_data][unit_amount_decimal]"),
                item.unit_amount_minor.to_string(),
            ));
            params.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
        }
        params
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/checkout/sessions", self.api_base_url)
    }

    async fn error_from(response: reqwest::Response) -> ServiceError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        ServiceError::Gateway(format!("Stripe API error {status}: {body}"))
    }
}

#[async_trait]
impl CheckoutGateway for StripeGateway {
    #[tracing::instrument(skip(self, request), fields(order_id = request.order_id))]
    async fn create_session(&self, request: CreateSession) -> Result<OpenedSession> {
        let response = self
            .http_client
            .post(self.sessions_url())
            .basic_auth(self.secret_key.expose_secret(), Option::<&str>::None)
            .form(&self.session_params(&request))
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let created: StripeSessionCreated = response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(format!("Failed to parse Stripe response: {e}")))?;
        let client_secret = created.client_secret.ok_or_else(|| {
            ServiceError::Gateway(format!("session {} has no client secret", created.id))
        })?;
        tracing::debug!(session_id = %created.id, "Opened checkout session");
        Ok(OpenedSession {
            id: created.id,
            client_secret,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn retrieve_session(
        &self,
        session_id: &str,
        expand_payment_intent: bool,
    ) -> Result<CheckoutSessionObject> {
        validate_session_id(session_id)?;
        let url = format!("{}/{session_id}", self.sessions_url());
        let mut request = self
            .http_client
            .get(&url)
            .basic_auth(self.secret_key.expose_secret(), Option::<&str>::None);
        if expand_payment_intent {
            request = request.query(&[("expand[]", "payment_intent")]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!(
                "checkout session {session_id}"
            )));
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(format!("Failed to parse Stripe response: {e}")))
    }

    #[tracing::instrument(skip(self))]
    async fn session_for_intent(&self, payment_intent_id: &str) -> Result<Option<String>> {
        let response = self
            .http_client
            .get(self.sessions_url())
            .basic_auth(self.secret_key.expose_secret(), Option::<&str>::None)
            .query(&[("payment_intent", payment_intent_id), ("limit", "1")])
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let sessions: StripeList<CheckoutSessionObject> = response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(format!("Failed to parse Stripe response: {e}")))?;
        Ok(sessions.data.into_iter().next().map(|session| session.id))
    }
}

/// Session ids end up in the request path, so only `cs_` followed by
/// alphanumerics and underscores is accepted.
fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = session_id
        .strip_prefix("cs_")
        .is_some_and(|rest| {
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !valid {
        return Err(ServiceError::Validation(format!(
            "malformed checkout session id {session_id:?}"
        )));
    }
    Ok(())
}
