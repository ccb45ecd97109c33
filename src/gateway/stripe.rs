// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Stripe REST adapter.
//!
//! Talks form-encoded HTTP to the Stripe API with the secret key as a bearer
//! credential. The key lives on the adapter instance; there is no process-wide
//! client state.

use super::{CardDetails, Gateway, GatewayIntent, IntentRequest, Metadata, SetupIntent, SetupUsage};
use crate::GatewayError;
use crate::base::{CustomerId, IntentId, PaymentMethodId, UserId};
use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Matches the deadline of Stripe's own client libraries.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(80);

type Form = Vec<(String, String)>;

#[derive(Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    api_key: String,
    base_url: Url,
}

impl fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeGateway")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CustomerObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SetupIntentObject {
    id: String,
    client_secret: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentObject {
    id: String,
    client_secret: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PaymentMethodObject {
    id: String,
    card: Option<CardObject>,
}

#[derive(Debug, Deserialize)]
struct CardObject {
    brand: String,
    last4: String,
    exp_month: i32,
    exp_year: i32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorObject,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: Option<String>,
    message: Option<String>,
}

impl StripeGateway {
    /// Creates an adapter against the production Stripe API.
    pub fn new(api_key: impl Into<String>) -> Result<Self, GatewayError> {
        Self::with_base_url(api_key, DEFAULT_API_BASE)
    }

    /// Creates an adapter against a custom API base (test servers, proxies).
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl AsRef<str>,
    ) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url.as_ref())
            .map_err(|e| GatewayError::transport(format!("invalid gateway base url: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url,
        })
    }

    /// Builds `<base>/v1/<segments...>`, percent-encoding each segment so
    /// opaque IDs cannot alter the path.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::transport("gateway base url cannot carry a path"))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        form: &Form,
        idempotency_key: Option<&str>,
    ) -> Result<T, GatewayError> {
        let url = self.endpoint(segments)?;
        debug!(path = url.path(), "gateway POST");

        let mut request = self.http.post(url).bearer_auth(&self.api_key).form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        Self::read(response).await
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, GatewayError> {
        let url = self.endpoint(segments)?;
        debug!(path = url.path(), "gateway GET");

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        Self::read(response).await
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                GatewayError::new(status.as_u16(), None, format!("undecodable response: {e}"))
            });
        }

        let body = response.text().await.unwrap_or_default();
        let error = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => GatewayError::new(
                status.as_u16(),
                envelope.error.code,
                envelope.error.message.unwrap_or(body),
            ),
            Err(_) => GatewayError::new(status.as_u16(), None, body),
        };
        warn!(status = status.as_u16(), code = ?error.code, "gateway rejected request");
        Err(error)
    }
}

fn push_metadata(form: &mut Form, metadata: &Metadata) {
    for (key, value) in metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }
}

#[async_trait]
impl Gateway for StripeGateway {
    async fn create_customer(&self, user_id: &UserId, email: &str) -> Result<CustomerId, GatewayError> {
        let form: Form = vec![
            ("email".into(), email.to_owned()),
            ("metadata[user_id]".into(), user_id.to_string()),
        ];
        // Concurrent first-time provisioning for the same user collapses into
        // one customer for as long as Stripe retains the key.
        let key = format!("customer-{user_id}");
        let customer: CustomerObject = self.post(&["customers"], &form, Some(&key)).await?;
        Ok(CustomerId::new(customer.id))
    }

    async fn create_setup_intent(
        &self,
        customer: &CustomerId,
        usage: SetupUsage,
        metadata: &Metadata,
    ) -> Result<SetupIntent, GatewayError> {
        let mut form: Form = vec![
            ("customer".into(), customer.to_string()),
            ("payment_method_types[]".into(), "card".into()),
            ("usage".into(), usage.as_str().into()),
        ];
        push_metadata(&mut form, metadata);

        let intent: SetupIntentObject = self.post(&["setup_intents"], &form, None).await?;
        Ok(SetupIntent {
            id: intent.id,
            client_secret: intent.client_secret.unwrap_or_default(),
            status: intent.status,
        })
    }

    async fn create_payment_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError> {
        let mut form: Form = vec![
            ("amount".into(), request.amount.to_string()),
            ("currency".into(), request.currency.to_string()),
            ("customer".into(), request.customer.to_string()),
            ("capture_method".into(), "manual".into()),
            ("payment_method_types[]".into(), "card".into()),
        ];
        if let Some(payment_method) = &request.payment_method {
            form.push(("payment_method".into(), payment_method.to_string()));
            form.push(("confirm".into(), "true".into()));
            form.push(("off_session".into(), "true".into()));
        }
        push_metadata(&mut form, &request.metadata);

        let intent: PaymentIntentObject = self.post(&["payment_intents"], &form, None).await?;
        Ok(intent.into())
    }

    async fn capture_payment_intent(&self, id: &IntentId) -> Result<GatewayIntent, GatewayError> {
        let intent: PaymentIntentObject = self
            .post(&["payment_intents", id.as_str(), "capture"], &Form::new(), None)
            .await?;
        Ok(intent.into())
    }

    async fn cancel_payment_intent(&self, id: &IntentId) -> Result<GatewayIntent, GatewayError> {
        let intent: PaymentIntentObject = self
            .post(&["payment_intents", id.as_str(), "cancel"], &Form::new(), None)
            .await?;
        Ok(intent.into())
    }

    async fn retrieve_payment_method(&self, id: &PaymentMethodId) -> Result<CardDetails, GatewayError> {
        let method: PaymentMethodObject = self.get(&["payment_methods", id.as_str()]).await?;
        let card = method.card.ok_or_else(|| {
            GatewayError::new(200, None, format!("payment method {} has no card details", method.id))
        })?;

        Ok(CardDetails {
            id: PaymentMethodId::new(method.id),
            brand: card.brand,
            last4: card.last4,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
        })
    }
}

impl From<PaymentIntentObject> for GatewayIntent {
    fn from(intent: PaymentIntentObject) -> Self {
        GatewayIntent {
            id: IntentId::new(intent.id),
            client_secret: intent.client_secret,
            status: intent.status,
        }
    }
}
